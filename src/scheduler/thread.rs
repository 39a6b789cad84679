/*
 * Thread control block
 *
 * One `Thread` per schedulable entity (§3). Unlike the process-coupled
 * thread this kernel used to have, a thread here is entirely self-contained:
 * no process, no address space, no file descriptor table. The fields below
 * are exactly the ones the scheduling algorithm in `core.rs` reads or
 * writes; nothing is carried "for later".
 */

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use super::context::InterruptContext;
use super::types::{BlockReason, OrderKey, Priority, ThreadId, ThreadState, Timeout};
use super::wait_queue::WaitQueue;

/// Per-thread stack size. Threads never grow their stack, so this is a hard
/// cap, not a hint.
pub const THREAD_STACK_SIZE: usize = 64 * 1024;

/// Fixed capacity of the thread table, and by extension of each `multiq`
/// bucket (`queue.rs`) and of every `WaitQueue`'s backing `DumbRunQueue`.
pub const MAX_THREADS: usize = 64;

/// CPU affinity mask: bit `n` set means the thread may run on `CpuId(n)`.
/// Only the dumb back-end consults this (§4.10); the others document the
/// limitation rather than silently ignoring it.
pub type AffinityMask = u64;

pub const ALL_CPUS: AffinityMask = u64::MAX;

pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub stack: Box<[u8]>,

    pub priority: Priority,
    pub base_priority: Priority,
    /// Optional scheduling deadline in absolute tick count (EDF tie-break
    /// among equal-priority threads is a §9 Open Question; this kernel does
    /// not implement EDF — see DESIGN.md — but the field is carried so a
    /// deadline-aware back-end can be added without another TCB change).
    pub deadline: Option<u64>,

    pub state: ThreadState,
    pub cpu_affinity: AffinityMask,
    /// Assigned CPU once placed on a run queue or running (§4.11).
    pub cpu: Option<super::types::CpuId>,

    /// Set while the thread is on some `WaitQueue` (pend queue or join
    /// queue), `None` otherwise. Threads are pended on at most one queue.
    pub pended_on: Option<BlockReason>,
    pub timeout: Timeout,
    /// Absolute tick the timeout fires at, set when `timeout` is `Ticks(_)`.
    pub timeout_at: Option<u64>,
    /// Address of whatever `WaitQueue` `pended_on` refers to, so a timeout
    /// expiry (`sched_core::wake_timed_out`) can remove this thread from
    /// that queue's backing store instead of leaving a stale entry behind.
    /// Kept as a `usize` rather than a raw pointer so `Thread` stays `Send`
    /// (required for `SchedState` to live behind the global `Mutex`); cast
    /// back to `*mut WaitQueue` at the one call site that dereferences it.
    /// Sound because every `WaitQueue` a thread can be parked on either
    /// lives in the fixed, never-reallocated thread table (a join queue) or
    /// on the blocked thread's own stack (a local wait queue, which cannot
    /// unwind while the thread is parked) — never in a temporary that could
    /// be dropped out from under this address.
    pub pended_wq: Option<usize>,

    /// Threads parked in `join()` waiting for this one to exit (§4.9).
    pub join_queue: WaitQueue,

    /// Saved register state; restored by the naked-asm trampoline on
    /// dispatch.
    pub switch_handle: InterruptContext,

    /// Non-zero while running above its configured preemption threshold
    /// (§4.3): a cooperative thread temporarily running preemptibly, or a
    /// preemptible thread that has raised its own floor.
    pub preempt_threshold: Priority,

    /// `sched_lock`/`sched_unlock` nesting count (§6). Non-zero blocks all
    /// preemption of this thread regardless of priority.
    pub sched_locked: u32,

    /// FIFO tie-break key assigned at last ready-queue insertion (§4.1).
    pub order_key: OrderKey,

    /// Remaining ticks in the current timeslice (§4.7); reloaded from the
    /// scheduler's configured slice length whenever the thread is dispatched
    /// at or below `slice_max_prio`.
    pub slice_remaining: u32,

    pub exit_code: Option<i32>,
}

impl Thread {
    pub fn new(id: ThreadId, name: String, stack: Box<[u8]>, priority: Priority, entry: fn()) -> Self {
        let stack_top = stack.as_ptr() as u64 + stack.len() as u64;
        // Entry functions are plain `fn()`; if one returns via `ret` instead
        // of calling `exit`, it pops this slot and lands in the trampoline.
        unsafe {
            let return_addr_slot = (stack_top - 8) as *mut u64;
            *return_addr_slot = thread_exit_trampoline as *const () as u64;
        }
        Self {
            id,
            name,
            stack,
            priority,
            base_priority: priority,
            deadline: None,
            state: ThreadState::PRESTART | ThreadState::QUEUED,
            cpu_affinity: ALL_CPUS,
            cpu: None,
            pended_on: None,
            timeout: Timeout::Forever,
            timeout_at: None,
            pended_wq: None,
            join_queue: WaitQueue::new(),
            switch_handle: InterruptContext::fresh(entry, stack_top),
            preempt_threshold: priority,
            sched_locked: 0,
            order_key: OrderKey(0),
            slice_remaining: 0,
            exit_code: None,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority.0)
            .field("state", &self.state)
            .finish()
    }
}

/// Return address planted on every fresh thread's stack (`fresh`'s
/// `stack_top - 8`). A thread whose entry function returns instead of
/// calling `scheduler::exit` lands here instead of executing garbage.
pub extern "C" fn thread_exit_trampoline() -> ! {
    log::info!("thread entry returned without exiting, terminating with code 0");
    super::exit(0);
}
