//! Bounded background compaction worker pool (spec.md §4.7).
//!
//! `Compactor::schedule` is the only place cascading merges are started
//! from; a merge that leaves the next level over budget schedules that
//! level itself rather than the original caller looping. Writers never
//! block on this pool — `TableBlock::insert` only calls `schedule` and
//! returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

use crate::error::Result;
use crate::lsm::compactor::{merge_level, CompactFn};
use crate::lsm::LSMIndex;
use crate::metrics::Registrar;
use crate::schema::Schema;

/// Tracks outstanding compactions for one `TableBlock` so rotation can
/// wait for them to drain before persisting the block (spec.md §4.4, §4.7).
#[derive(Default)]
pub struct WaitGroup {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Waits until every compaction this waitgroup knows about has
    /// called `done`. Safe to call while new work is concurrently being
    /// added; each wake re-checks the counter.
    pub async fn wait(&self) {
        loop {
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Per-table compaction configuration: one [`CompactFn`] and one byte
/// budget per level, shared across every scheduled merge for that table.
pub struct LevelPlan {
    pub compactors: Vec<Arc<dyn CompactFn>>,
    pub max_size: Vec<u64>,
}

impl LevelPlan {
    pub fn uniform(num_levels: usize, compactor: Arc<dyn CompactFn>, max_size: u64) -> Self {
        LevelPlan { compactors: (0..num_levels).map(|_| compactor.clone()).collect(), max_size: vec![max_size; num_levels] }
    }
}

/// Bounded pool of background compaction workers shared by every table in
/// a `ColumnStore`. `max_concurrent` caps how many merges run at once
/// regardless of how many levels across how many tables are over budget.
pub struct Compactor {
    semaphore: Arc<Semaphore>,
    registrar: Arc<dyn Registrar>,
}

impl Compactor {
    pub fn new(max_concurrent: usize, registrar: Arc<dyn Registrar>) -> Arc<Self> {
        Arc::new(Compactor { semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))), registrar })
    }

    /// Idempotent: dispatches a background task that re-reads the
    /// level's sentinel state before doing any work, so scheduling the
    /// same level twice while a merge is already in flight is a no-op.
    pub fn schedule(
        self: &Arc<Self>,
        lsm: Arc<LSMIndex>,
        schema: Arc<Schema>,
        level: usize,
        plan: Arc<LevelPlan>,
        waitgroup: Arc<WaitGroup>,
    ) {
        if level >= plan.compactors.len() {
            return;
        }
        waitgroup.add(1);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = this.semaphore.acquire().await.expect("semaphore never closed");
            let result = this.run_one(&lsm, &schema, level, &plan);
            drop(_permit);
            match result {
                Ok(true) => this.schedule(lsm, schema, level + 1, plan, waitgroup.clone()),
                Ok(false) => {}
                Err(err) => tracing::warn!(level, error = %err, "compaction worker failed"),
            }
            waitgroup.done();
        });
    }

    /// Runs one merge pass and reports whether the next level is now
    /// over budget (i.e. whether the caller should cascade).
    fn run_one(&self, lsm: &Arc<LSMIndex>, schema: &Arc<Schema>, level: usize, plan: &LevelPlan) -> Result<bool> {
        let compactor = &plan.compactors[level];
        let outcome = merge_level(lsm, level, schema, compactor.as_ref(), &plan.max_size, &self.registrar)?;
        Ok(outcome.ran && outcome.next_level_over_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ColumnData, ColumnValues, Record};
    use crate::lsm::compactor::RecordMergeCompactor;
    use crate::metrics::NoopRegistrar;
    use crate::schema::{ColumnDef, SortColumn, StorageType};
    use std::collections::HashMap;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse(vec![ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")]).unwrap())
    }

    fn part(values: Vec<i64>, txn: u64) -> crate::part::Part {
        let n = values.len();
        let mut columns = HashMap::new();
        columns.insert("value".to_string(), ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(values), nulls: vec![false; n] });
        let record = Record::new((*schema()).clone(), n, columns).unwrap();
        crate::part::Part::from_record(record, txn, 300, 0)
    }

    #[tokio::test]
    async fn schedule_cascades_through_over_budget_levels() {
        let lsm = Arc::new(LSMIndex::new(3));
        let schema = schema();
        lsm.add(0, part(vec![1, 2], 0));
        lsm.add(0, part(vec![3, 4], 1));

        let compactor = Compactor::new(2, Arc::new(NoopRegistrar));
        let plan = Arc::new(LevelPlan::uniform(3, Arc::new(RecordMergeCompactor), 10)); // tiny budget forces cascade
        let wg = Arc::new(WaitGroup::new());

        compactor.schedule(lsm.clone(), schema, 0, plan, wg.clone());
        wg.wait().await;

        assert_eq!(lsm.level(0).scan().len(), 0);
        // With a 10-byte budget every level overflows, so the merge
        // cascades all the way to the last level.
        assert!(lsm.level(2).scan().len() >= 1);
    }

    #[tokio::test]
    async fn waitgroup_wait_returns_immediately_with_no_outstanding_work() {
        let wg = WaitGroup::new();
        wg.wait().await;
        assert_eq!(wg.outstanding(), 0);
    }
}
