//! Transaction id allocation and the commit watermark (spec.md §4.6).
//!
//! Ids are handed out by a single monotonic counter ([`TxnMgr::begin`]).
//! Writers can commit out of order (e.g. two concurrent inserts where
//! the second's WAL append lands first); the watermark only advances
//! past the highest txn id for which every lower id has also completed,
//! tracked with a min-heap of finished-but-not-yet-contiguous ids —
//! the same contiguous-draining shape as [`crate::wal::Wal`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

struct Ring {
    watermark: u64,
    completed_out_of_order: BinaryHeap<Reverse<u64>>,
}

/// Allocates monotonic transaction ids and tracks the watermark: the
/// highest id below which every txn has committed. Readers observe the
/// watermark to get a consistent snapshot without blocking writers.
pub struct TxnMgr {
    next_txn: AtomicU64,
    ring: Mutex<Ring>,
}

impl Default for TxnMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnMgr {
    pub fn new() -> Self {
        TxnMgr {
            next_txn: AtomicU64::new(0),
            ring: Mutex::new(Ring { watermark: 0, completed_out_of_order: BinaryHeap::new() }),
        }
    }

    /// Allocates a new write txn id.
    pub fn begin(&self) -> u64 {
        self.next_txn.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// The watermark a read-only transaction should pin to: every txn
    /// with a lower id is guaranteed either fully committed or never
    /// will be.
    pub fn begin_read(&self) -> u64 {
        self.watermark()
    }

    /// Marks `txn_id` committed. Advances the watermark past as many
    /// contiguous completed ids as are now available.
    pub fn complete(&self, txn_id: u64) {
        let mut ring = self.ring.lock();
        if txn_id == ring.watermark {
            ring.watermark += 1;
            while let Some(&Reverse(next)) = ring.completed_out_of_order.peek() {
                if next == ring.watermark {
                    ring.completed_out_of_order.pop();
                    ring.watermark += 1;
                } else {
                    break;
                }
            }
        } else if txn_id > ring.watermark {
            ring.completed_out_of_order.push(Reverse(txn_id));
        }
        // txn_id < watermark: already accounted for, ignore.
    }

    /// Highest txn id below which every txn has committed.
    pub fn watermark(&self) -> u64 {
        self.ring.lock().watermark
    }

    /// Next id that will be handed out by `begin`, useful for tests and
    /// for sizing the WAL's pending heap.
    pub fn peek_next(&self) -> u64 {
        self.next_txn.load(AtomicOrdering::SeqCst)
    }

    /// Folds an already-committed txn id (from WAL replay or a loaded
    /// snapshot) into the watermark, advancing `next_txn` past it if
    /// needed. Unlike `complete`, this never blocks on contiguity of ids
    /// this process allocated — replay delivers ids in increasing order
    /// already, by construction of the WAL's batching loop.
    pub fn observe_replayed(&self, txn_id: u64) {
        self.next_txn.fetch_max(txn_id + 1, AtomicOrdering::SeqCst);
        self.complete(txn_id);
    }

    /// Resets the watermark and next-id counter to `t`, used right after
    /// loading a snapshot taken at txn `t` before any further WAL replay
    /// or new writes (spec.md §4.8 Recovery).
    pub fn restore(&self, t: u64) {
        self.next_txn.store(t, AtomicOrdering::SeqCst);
        let mut ring = self.ring.lock();
        ring.watermark = t;
        ring.completed_out_of_order.clear();
    }
}
