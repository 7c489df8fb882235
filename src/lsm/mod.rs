//! Leveled index over immutable [`Part`]s (spec.md §4.3, §4.4).
//!
//! Each level is a lock-free singly linked list of parts. New parts are
//! pushed at the head with a CAS loop; the compactor delimits its input
//! set by publishing a sentinel *node* at the head rather than marking
//! existing parts, so readers mid-scan never observe a torn list and
//! never take a lock. Memory for an unlinked span is reclaimed once no
//! in-flight scan can still be holding a reference to it, via
//! `crossbeam::epoch`.
//!
//! Per spec.md §9: "the sentinel node is a tagged variant of the list
//! node (Part vs. Marker); tags are a small enum, not a pointer-identity
//! trick." [`Node`] is exactly that: a `kind` of either `Part` or
//! `Marker`, never resolved by comparing `Arc` pointers against a list
//! of parts being searched for.

pub mod compactor;
pub mod merge;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};

use crate::part::Part;

const COMPACTING: u8 = 0;
const COMPACTED: u8 = 1;

/// A list node is either a live part or a marker. Only a `Marker` ever
/// changes state in place; a `Part` node is immutable end to end.
enum NodeKind {
    Part(Part),
    Marker(AtomicU8),
}

struct Node {
    kind: NodeKind,
    next: Atomic<Node>,
}

impl Node {
    fn part(part: Part) -> Self {
        Node { kind: NodeKind::Part(part), next: Atomic::null() }
    }

    fn marker(state: u8) -> Self {
        Node { kind: NodeKind::Marker(AtomicU8::new(state)), next: Atomic::null() }
    }
}

/// One level of the LSM tree: a lock-free list of parts plus a running
/// byte total used to decide when the level is due for compaction.
pub struct Level {
    head: Atomic<Node>,
    size_bytes: AtomicU64,
    count: AtomicU64,
    /// Fast-path gate so a second `schedule` call against an
    /// already-compacting level is a no-op without having to walk the
    /// list first. The actual merge-input boundary is the `Marker` node
    /// itself, not this flag.
    compacting: AtomicBool,
}

impl Default for Level {
    fn default() -> Self {
        Level {
            head: Atomic::null(),
            size_bytes: AtomicU64::new(0),
            count: AtomicU64::new(0),
            compacting: AtomicBool::new(false),
        }
    }
}

impl Level {
    fn prepend(&self, mut new_node: Owned<Node>, guard: &Guard) {
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            new_node.next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange(head, new_node, Ordering::AcqRel, Ordering::Acquire, guard) {
                Ok(_) => return,
                Err(e) => new_node = e.new,
            }
        }
    }

    /// Pushes `part` onto the head of the list.
    pub fn add(&self, part: Part) {
        let guard = &epoch::pin();
        let size = part.size_bytes();
        self.prepend(Owned::new(Node::part(part)), guard);
        self.size_bytes.fetch_add(size, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of every live part in the level, head-first (most
    /// recently added first), skipping marker nodes. Safe to call
    /// concurrently with `add` and with an in-flight compaction.
    pub fn scan(&self) -> Vec<Part> {
        let guard = &epoch::pin();
        let mut out = Vec::new();
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.as_ref() } {
            if let NodeKind::Part(part) = &node.kind {
                out.push(part.clone());
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        out
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Publishes a Compacting marker at the head of the level (spec.md
    /// §4.3 step 1). Returns `false` without touching the list if
    /// another compaction of this level is already in flight ("only one
    /// Compacting sentinel may exist per level at a time").
    pub fn try_begin_compaction(&self) -> bool {
        if self.compacting.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        let guard = &epoch::pin();
        self.prepend(Owned::new(Node::marker(COMPACTING)), guard);
        true
    }

    /// The merge input set: every part strictly below the published
    /// Compacting marker (spec.md §4.3 step 2). A write that races in
    /// after the marker was published lands ahead of it and is excluded.
    /// Must be called while a marker from `try_begin_compaction` is
    /// still live.
    pub fn snapshot_below_sentinel(&self) -> Vec<Part> {
        let guard = &epoch::pin();
        let mut below_marker = false;
        let mut out = Vec::new();
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.as_ref() } {
            match &node.kind {
                NodeKind::Marker(state) if state.load(Ordering::Acquire) == COMPACTING => below_marker = true,
                NodeKind::Part(part) if below_marker => out.push(part.clone()),
                _ => {}
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        out
    }

    /// Finds the node immediately preceding the current marker and the
    /// marker itself. Returns `None` if no marker is published (should
    /// not happen between `try_begin_compaction` and the matching
    /// `commit_compaction`/`abort_compaction`).
    fn locate_marker<'g>(&self, guard: &'g Guard) -> Option<(Option<Shared<'g, Node>>, Shared<'g, Node>)> {
        let mut prefix = None;
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.as_ref() } {
            if matches!(node.kind, NodeKind::Marker(_)) {
                return Some((prefix, cur));
            }
            prefix = Some(cur);
            cur = node.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Aborts a compaction: retracts the Compacting marker entirely,
    /// restoring the chain exactly as it was before `try_begin_compaction`
    /// (spec.md §4.3 step 3 "retract the sentinel and exit", and step 5's
    /// "failure is fatal to this compaction attempt: retract the
    /// sentinel"). Idempotent no-op if no marker is present.
    pub fn abort_compaction(&self) {
        let guard = &epoch::pin();
        loop {
            let Some((prefix, marker)) = self.locate_marker(guard) else {
                self.compacting.store(false, Ordering::Release);
                return;
            };
            let marker_node = unsafe { marker.as_ref() }.expect("marker present");
            let after = marker_node.next.load(Ordering::Acquire, guard);
            let result = match prefix {
                Some(p) => unsafe { p.as_ref() }.expect("prefix present").next.compare_exchange(
                    marker,
                    after,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ),
                None => self.head.compare_exchange(marker, after, Ordering::AcqRel, Ordering::Acquire, guard),
            };
            if result.is_ok() {
                unsafe { guard.defer_destroy(marker) };
                self.compacting.store(false, Ordering::Release);
                return;
            }
        }
    }

    /// Commits a compaction: swaps the Compacting marker for a Compacted
    /// one and excises the span below it (spec.md §4.3 step 6). `excised`
    /// must be exactly the parts returned by the `snapshot_below_sentinel`
    /// call that preceded this one; their sizes are subtracted from the
    /// level's running totals. The promoted/merged replacements are
    /// *not* re-added here — the caller adds them to level `k+1` via
    /// [`LSMIndex::add`], per spec.
    pub fn commit_compaction(&self, excised: &[Part]) {
        let guard = &epoch::pin();
        loop {
            let Some((prefix, marker)) = self.locate_marker(guard) else {
                self.compacting.store(false, Ordering::Release);
                return;
            };
            let marker_node = unsafe { marker.as_ref() }.expect("marker present");
            let span_first = marker_node.next.load(Ordering::Acquire, guard);

            let replacement = Owned::new(Node::marker(COMPACTED)).into_shared(guard);
            // The Compacted marker's `next` starts null: everything below
            // the old marker is being excised, so nothing follows it.
            let result = match prefix {
                Some(p) => unsafe { p.as_ref() }.expect("prefix present").next.compare_exchange(
                    marker,
                    replacement,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ),
                None => self.head.compare_exchange(marker, replacement, Ordering::AcqRel, Ordering::Acquire, guard),
            };

            match result {
                Ok(_) => {
                    unsafe { guard.defer_destroy(marker) };
                    let mut cur = span_first;
                    while let Some(node) = unsafe { cur.as_ref() } {
                        let next = node.next.load(Ordering::Acquire, guard);
                        unsafe { guard.defer_destroy(cur) };
                        cur = next;
                    }
                    let removed_bytes: u64 = excised.iter().map(|p| p.size_bytes()).sum();
                    self.size_bytes.fetch_sub(removed_bytes, Ordering::Relaxed);
                    self.count.fetch_sub(excised.len() as u64, Ordering::Relaxed);
                    self.compacting.store(false, Ordering::Release);
                    return;
                }
                Err(_) => continue,
            }
        }
    }
}

/// The full leveled index for one table: level 0 holds the freshest,
/// potentially-overlapping parts; higher levels hold progressively
/// larger, non-overlapping merged parts.
pub struct LSMIndex {
    levels: Vec<Level>,
}

impl LSMIndex {
    pub fn new(num_levels: usize) -> Self {
        LSMIndex { levels: (0..num_levels).map(|_| Level::default()).collect() }
    }

    pub fn level(&self, index: usize) -> &Level {
        &self.levels[index]
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn add(&self, level: usize, part: Part) {
        part.set_level(level);
        self.levels[level].add(part);
    }

    /// Adds `part` to `level` and reports whether the level is now at or
    /// past `max_size`, i.e. whether a merge should be scheduled.
    pub fn add_and_check_budget(&self, level: usize, part: Part, max_size: u64) -> bool {
        self.add(level, part);
        self.levels[level].size_bytes() >= max_size
    }

    /// Every live part across every level, in unspecified order.
    pub fn scan_all(&self) -> Vec<Part> {
        self.levels.iter().flat_map(|l| l.scan()).collect()
    }

    /// Every live part with `txn_id <= watermark`, across every level, in
    /// unspecified order (spec.md §4.3 Scan).
    pub fn scan(&self, watermark: u64) -> Vec<Part> {
        self.scan_all().into_iter().filter(|p| p.txn_id() <= watermark).collect()
    }
}
