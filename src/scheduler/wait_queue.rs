/*
 * Wait queues
 *
 * A wait queue is a priority queue instance owned by a kernel object
 * (semaphore, mutex, message queue, ...) instead of by the scheduler
 * itself. It holds threads pended on that object. The join queue embedded
 * in every thread (§3, §4.9) is the same structure reused: the object is
 * simply the thread being joined.
 *
 * Wait queues always use the dumb back-end regardless of which run-queue
 * back-end the build selected: they are typically tiny (a handful of
 * waiters on one semaphore) and the teacher's own `io_wait.rs` used a flat
 * `Vec` for exactly this reason. See DESIGN.md.
 */

use super::queue::{DumbRunQueue, RunQueue};
use super::types::{OrderKey, Priority, ThreadId};

#[derive(Default)]
pub struct WaitQueue {
    q: DumbRunQueue,
    next_order: u64,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            q: DumbRunQueue::new(),
            next_order: 0,
        }
    }

    pub fn insert(&mut self, tid: ThreadId, prio: Priority) {
        let order = OrderKey(self.next_order);
        self.next_order = self.next_order.wrapping_add(1);
        self.q.add(tid, prio, order);
    }

    pub fn remove(&mut self, tid: ThreadId, prio: Priority) {
        self.q.remove(tid, prio);
    }

    /// Pop the highest-priority waiter (FIFO within priority), §4.5.
    pub fn pop_first(&mut self) -> Option<ThreadId> {
        let best = self.q.best()?;
        // DumbRunQueue::remove only needs the thread id to find its entry;
        // the priority argument is unused by this back-end's remove.
        self.q.remove(best, Priority(0));
        Some(best)
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}
