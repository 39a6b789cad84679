/*
 * Priority queue back-ends
 *
 * Three interchangeable ordered containers of thread IDs: `dumb` (sorted
 * doubly-ended list), `scalable` (tree keyed by (priority, order_key)), and
 * `multiq` (32 FIFO buckets plus an occupancy bitmask). Each is selected at
 * build time through a Cargo feature, never through a trait object — the
 * `RunQueue` trait below is dispatched statically, so swapping `ActiveRunQueue`
 * costs nothing at runtime. This is a deploy-time choice, not something a
 * running kernel ever switches, so `dyn` dispatch would only add an
 * indirection with no corresponding flexibility.
 */

use alloc::collections::{BTreeMap, VecDeque};
use heapless::Deque;

use super::types::{OrderKey, Priority, ThreadId};

/// Capability shared by all three back-ends: a FIFO-within-priority ordered
/// set of thread IDs.
pub trait RunQueue: Default {
    /// Insert `tid`, ordered by `prio` then `order` (§4.1).
    fn add(&mut self, tid: ThreadId, prio: Priority, order: OrderKey);

    /// Remove `tid`. `prio` must be the priority it was added with — callers
    /// must not mutate a queued thread's priority without dequeuing first
    /// (§4.12 dequeues before updating).
    fn remove(&mut self, tid: ThreadId, prio: Priority);

    /// The highest-priority resident, or `None` if empty.
    fn best(&self) -> Option<ThreadId>;

    fn is_empty(&self) -> bool {
        self.best().is_none()
    }
}

/// Doubly-linked-list back-end: insertion sorted by priority, O(n) insert,
/// O(1) head. The only back-end that supports CPU affinity masks (§4.10),
/// because affinity requires a linear scan to skip ineligible threads
/// anyway — the tree and multiq back-ends document this as a limitation.
#[derive(Default)]
pub struct DumbRunQueue {
    entries: VecDeque<(Priority, ThreadId)>,
}

impl DumbRunQueue {
    pub const fn new() -> Self {
        Self { entries: VecDeque::new() }
    }
}

impl RunQueue for DumbRunQueue {
    fn add(&mut self, tid: ThreadId, prio: Priority, _order: OrderKey) {
        let pos = self
            .entries
            .iter()
            .position(|(p, _)| *p > prio)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (prio, tid));
    }

    fn remove(&mut self, tid: ThreadId, _prio: Priority) {
        self.entries.retain(|(_, t)| *t != tid);
    }

    fn best(&self) -> Option<ThreadId> {
        self.entries.front().map(|(_, tid)| *tid)
    }
}

impl DumbRunQueue {
    /// Affinity-aware variant of `best()` (§4.10): skip threads whose mask
    /// excludes `cpu`. Linear scan, same cost class as ordinary `best()`.
    pub fn best_with_affinity(&self, cpu_bit: u64, masks: &dyn Fn(ThreadId) -> u64) -> Option<ThreadId> {
        self.entries
            .iter()
            .find(|(_, tid)| masks(*tid) & cpu_bit != 0)
            .map(|(_, tid)| *tid)
    }
}

/// Tree back-end keyed by `(priority, order_key)`. A red-black tree is the
/// textbook shape, but Rust's `BTreeMap` is the idiomatic systems-Rust
/// realization of the same O(log n) ordered-map contract (see DESIGN.md) —
/// it avoids the pointer-aliasing hazards the spec's own design notes warn
/// against for intrusive trees. A reverse index lets `remove` find a
/// thread's key without a linear scan.
#[derive(Default)]
pub struct ScalableRunQueue {
    by_key: BTreeMap<(Priority, OrderKey), ThreadId>,
    by_thread: BTreeMap<ThreadId, (Priority, OrderKey)>,
}

impl RunQueue for ScalableRunQueue {
    fn add(&mut self, tid: ThreadId, prio: Priority, order: OrderKey) {
        self.by_key.insert((prio, order), tid);
        self.by_thread.insert(tid, (prio, order));
    }

    fn remove(&mut self, tid: ThreadId, _prio: Priority) {
        if let Some(key) = self.by_thread.remove(&tid) {
            self.by_key.remove(&key);
        }
    }

    fn best(&self) -> Option<ThreadId> {
        self.by_key.values().next().copied()
    }
}

/// 32 FIFO buckets indexed by priority, plus an occupancy bitmask so the
/// head bucket is found by `count_trailing_zeros` in O(1). Each bucket has
/// a fixed capacity sized to `MAX_THREADS`, which is the whole point of
/// using `heapless::Deque` here rather than `VecDeque`: a multiq kernel
/// never needs to grow a bucket past the total thread count, so a stack
/// allocation with a compile-time bound is strictly better than a heap one.
const BUCKET_CAP: usize = crate::scheduler::thread::MAX_THREADS;

pub struct MultiqRunQueue {
    buckets: [Deque<ThreadId, BUCKET_CAP>; 32],
    occupied: u32,
}

impl Default for MultiqRunQueue {
    fn default() -> Self {
        Self {
            buckets: [const { Deque::new() }; 32],
            occupied: 0,
        }
    }
}

impl RunQueue for MultiqRunQueue {
    fn add(&mut self, tid: ThreadId, prio: Priority, _order: OrderKey) {
        let bucket = prio.bucket();
        // Capacity is MAX_THREADS per bucket, so this can only fail if a
        // thread were double-queued, which the QUEUED-bit invariant forbids.
        let _ = self.buckets[bucket].push_back(tid);
        self.occupied |= 1 << bucket;
    }

    fn remove(&mut self, tid: ThreadId, prio: Priority) {
        let bucket = prio.bucket();
        let mut rest = Deque::new();
        while let Some(t) = self.buckets[bucket].pop_front() {
            if t != tid {
                let _ = rest.push_back(t);
            }
        }
        self.buckets[bucket] = rest;
        if self.buckets[bucket].is_empty() {
            self.occupied &= !(1 << bucket);
        }
    }

    fn best(&self) -> Option<ThreadId> {
        if self.occupied == 0 {
            return None;
        }
        let bucket = self.occupied.trailing_zeros() as usize;
        self.buckets[bucket].front().copied()
    }
}

#[cfg(all(feature = "sched-dumb", feature = "sched-scalable"))]
compile_error!("only one scheduler run-queue back-end feature may be enabled");
#[cfg(all(feature = "sched-dumb", feature = "sched-multiq"))]
compile_error!("only one scheduler run-queue back-end feature may be enabled");
#[cfg(all(feature = "sched-scalable", feature = "sched-multiq"))]
compile_error!("only one scheduler run-queue back-end feature may be enabled");

#[cfg(feature = "sched-dumb")]
pub type ActiveRunQueue = DumbRunQueue;
#[cfg(feature = "sched-scalable")]
pub type ActiveRunQueue = ScalableRunQueue;
#[cfg(not(any(feature = "sched-dumb", feature = "sched-scalable")))]
pub type ActiveRunQueue = MultiqRunQueue;

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: i32) -> Priority {
        Priority(v)
    }

    #[test]
    fn dumb_orders_by_priority_then_fifo() {
        let mut q = DumbRunQueue::default();
        q.add(ThreadId(1), p(5), OrderKey(0));
        q.add(ThreadId(2), p(1), OrderKey(1));
        q.add(ThreadId(3), p(5), OrderKey(2));
        assert_eq!(q.best(), Some(ThreadId(2)));
        q.remove(ThreadId(2), p(1));
        assert_eq!(q.best(), Some(ThreadId(1)));
        q.remove(ThreadId(1), p(5));
        assert_eq!(q.best(), Some(ThreadId(3)));
    }

    #[test]
    fn scalable_fifo_within_priority() {
        let mut q = ScalableRunQueue::default();
        q.add(ThreadId(10), p(3), OrderKey(5));
        q.add(ThreadId(11), p(3), OrderKey(6));
        assert_eq!(q.best(), Some(ThreadId(10)));
        q.remove(ThreadId(10), p(3));
        assert_eq!(q.best(), Some(ThreadId(11)));
    }

    #[test]
    fn multiq_head_is_lowest_occupied_bucket() {
        let mut q = MultiqRunQueue::default();
        q.add(ThreadId(1), p(4), OrderKey(0));
        q.add(ThreadId(2), p(-4), OrderKey(0));
        assert_eq!(q.best(), Some(ThreadId(2)));
        q.remove(ThreadId(2), p(-4));
        assert_eq!(q.best(), Some(ThreadId(1)));
        q.remove(ThreadId(1), p(4));
        assert_eq!(q.best(), None);
    }

    #[test]
    fn multiq_fifo_within_bucket() {
        let mut q = MultiqRunQueue::default();
        q.add(ThreadId(1), p(0), OrderKey(0));
        q.add(ThreadId(2), p(0), OrderKey(0));
        assert_eq!(q.best(), Some(ThreadId(1)));
    }
}
