/*
 * Scheduling algorithm
 *
 * Everything the spec calls the "decision logic" lives here: which thread
 * runs next (§4.2), whether a just-readied thread should preempt the
 * current one (§4.3), timeslice accounting (§4.7), the metairq
 * preemption-return protocol (§4.8), pend/unpend/wake (§4.5), and the
 * join-on-exit protocol (§4.9). `mod.rs` only calls into this module from
 * the naked interrupt trampolines and the public thread API; it never
 * touches `ready_q` or `threads` directly.
 *
 * Concurrency model (§5): one global spinlock guards all of this state,
 * the "one big lock" the spec calls out as the only concurrency strategy
 * actually needed at this scale. There is no per-queue or per-thread
 * locking to reason about.
 */

use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

use super::queue::{ActiveRunQueue, RunQueue};
use super::thread::{Thread, ALL_CPUS, MAX_THREADS};
use super::types::{BlockReason, CpuId, OrderKey, Priority, SchedError, SchedResult, ThreadId, ThreadState, Timeout};
use super::wait_queue::WaitQueue;

/// Ticks per timeslice when timeslicing is enabled (§4.7). Zero disables it.
const DEFAULT_SLICE_TICKS: u32 = 10;

pub struct SchedState {
    threads: Vec<Option<Thread>>,
    ready_q: ActiveRunQueue,
    next_order: u64,
    /// Currently running thread on the (single, for now) CPU. `None` only
    /// before the first thread is dispatched.
    current: Option<ThreadId>,
    idle: Option<ThreadId>,
    tick: u64,
    slice_ticks: u32,
    /// Threads with priority numerically at or above this value (i.e.
    /// equally or less urgent) are timesliced; more urgent threads run to
    /// completion or voluntary yield, matching Zephyr's `slice_max_prio`
    /// carve-out for cooperative and metairq threads.
    slice_max_prio: Priority,
    /// §4.8: the cooperative, non-metairq thread a metairq thread preempted,
    /// if any. Consulted by the next dispatch so a metairq blocking returns
    /// control to the thread it actually interrupted rather than whatever
    /// the run queue's `best()` now says — which, without this, could be a
    /// different cooperative thread that only became ready while the
    /// metairq was running.
    metairq_preempted: Option<ThreadId>,
}

impl SchedState {
    fn new() -> Self {
        Self {
            threads: (0..MAX_THREADS).map(|_| None).collect(),
            ready_q: ActiveRunQueue::default(),
            next_order: 0,
            current: None,
            idle: None,
            tick: 0,
            slice_ticks: DEFAULT_SLICE_TICKS,
            slice_max_prio: Priority(0),
            metairq_preempted: None,
        }
    }

    fn alloc_slot(&mut self) -> SchedResult<ThreadId> {
        self.threads
            .iter()
            .position(|t| t.is_none())
            .map(ThreadId)
            .ok_or(SchedError::Invalid)
    }

    fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(tid.0)?.as_ref()
    }

    fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(tid.0)?.as_mut()
    }

    fn next_order_key(&mut self) -> OrderKey {
        let k = OrderKey(self.next_order);
        self.next_order = self.next_order.wrapping_add(1);
        k
    }

    /// Put a thread on the ready queue (§4.1). Caller must hold the bit
    /// invariant: only a thread that is runnable and not already queued.
    fn enqueue(&mut self, tid: ThreadId) {
        let order = self.next_order_key();
        if let Some(t) = self.thread_mut(tid) {
            t.order_key = order;
            t.state.insert(ThreadState::QUEUED);
            let prio = t.priority;
            self.ready_q.add(tid, prio, order);
        }
    }

    fn dequeue(&mut self, tid: ThreadId) {
        if let Some(t) = self.thread_mut(tid) {
            let prio = t.priority;
            t.state.remove(ThreadState::QUEUED);
            self.ready_q.remove(tid, prio);
        }
    }

    /// §4.2: the head of the ready queue, or the idle thread if none is
    /// runnable.
    fn next_up(&self) -> Option<ThreadId> {
        self.ready_q.best().or(self.idle)
    }

    /// §4.3: does `candidate` outrank the thread currently running? A
    /// cooperative current thread (`priority < 0`) is never preempted
    /// except by a strictly higher-priority metairq thread, and never while
    /// `sched_locked` is held.
    pub fn should_preempt(&self, candidate: ThreadId) -> bool {
        let Some(current) = self.current else { return true };
        if current == candidate {
            return false;
        }
        let (Some(cur), Some(cand)) = (self.thread(current), self.thread(candidate)) else {
            return true;
        };
        if cur.sched_locked > 0 {
            return false;
        }
        if cur.priority.is_cooperative() && !cand.priority.is_metairq() {
            return false;
        }
        cand.priority < cur.preempt_threshold
    }
}

static SCHED: Mutex<Option<SchedState>> = Mutex::new(None);

fn state() -> MutexGuard<'static, Option<SchedState>> {
    SCHED.lock()
}

pub fn init() {
    *state() = Some(SchedState::new());
}

fn with_state<R>(f: impl FnOnce(&mut SchedState) -> R) -> R {
    let mut guard = state();
    let s = guard.as_mut().expect("scheduler core not initialized");
    f(s)
}

/// Register a freshly built thread and place it on the ready queue,
/// `PRESTART` cleared since it is immediately runnable (§4.1 "ready").
pub fn spawn(thread: Thread) -> SchedResult<ThreadId> {
    with_state(|s| {
        let tid = s.alloc_slot()?;
        let mut thread = thread;
        thread.id = tid;
        thread.state.remove(ThreadState::PRESTART);
        s.threads[tid.0] = Some(thread);
        s.enqueue(tid);
        Ok(tid)
    })
}

/// Mark the idle thread so `next_up` always has a fallback candidate.
pub fn set_idle(tid: ThreadId) {
    with_state(|s| s.idle = Some(tid));
}

pub fn current() -> Option<ThreadId> {
    with_state(|s| s.current)
}

/// §4.3: would `candidate` preempt whatever is running right now? Callers
/// (e.g. `sched_wake`'s users) use this to decide whether to yield
/// immediately instead of waiting for the next tick.
pub fn should_preempt(candidate: ThreadId) -> bool {
    with_state(|s| s.should_preempt(candidate))
}

/// §4.6: does a reschedule actually need to happen? `force` covers the two
/// unconditional triggers — an explicit yield (`move_to_end_of_prio_q`) and
/// a timeslice that just expired (§4.7). Absent those, a swap only happens
/// if the best ready candidate genuinely outranks `current` per
/// `should_preempt` (which itself honors `sched_locked` and cooperative
/// priorities) — mirroring `update_cache`'s "only swap if `need_swap()`"
/// gate instead of rotating on every tick regardless of outcome.
fn need_swap(s: &SchedState, force: bool) -> bool {
    if force {
        return true;
    }
    match (s.current, s.ready_q.best()) {
        (Some(_), Some(cand)) => s.should_preempt(cand),
        (None, _) => true,
        (Some(_), None) => false,
    }
}

/// §4.2/§4.11: called from the interrupt trampoline with the outgoing
/// thread's saved context already copied in. The outgoing thread's context
/// is always recorded (so a later dispatch restores the right state), but
/// the thread is only actually requeued and replaced when `need_swap` says
/// a real trigger occurred — `force` for an explicit yield or a timeslice
/// expiry (§4.7), or a ready candidate that outranks `current` via
/// `should_preempt` (§4.3), which also keeps a `sched_locked` or
/// cooperative `current` from being evicted by a plain tick. When a swap
/// does happen, the outgoing thread goes to the *end* of its priority band
/// (`enqueue` always assigns a fresh order key), satisfying §4.11's
/// SMP-coherence requirement trivially on a single CPU.
pub fn switch_threads(saved_current: Option<(ThreadId, super::context::InterruptContext)>, force: bool) -> ThreadId {
    with_state(|s| {
        if let Some((tid, ctx)) = saved_current {
            if let Some(t) = s.thread_mut(tid) {
                t.switch_handle = ctx;
            }
        }

        if !need_swap(s, force) {
            return s.current.or(s.idle).expect("idle thread must always be runnable");
        }

        // §4.8: a metairq is about to preempt `current` right now only if
        // `current` is cooperative, non-metairq, and a metairq is actually
        // the candidate picked below — recorded once we know `next`.
        let cur_before = s.current;
        let cur_was_coop_non_metairq = cur_before
            .and_then(|c| s.thread(c))
            .map_or(false, |t| t.priority.is_cooperative() && !t.priority.is_metairq());

        if let Some((tid, _)) = saved_current {
            let should_requeue = s.thread(tid).map_or(false, |t| t.is_runnable() && !t.state.contains(ThreadState::QUEUED));
            if should_requeue {
                let order = s.next_order_key();
                if let Some(t) = s.thread_mut(tid) {
                    let prio = t.priority;
                    t.order_key = order;
                    t.state.insert(ThreadState::QUEUED);
                    s.ready_q.add(tid, prio, order);
                }
            }
        }

        // §4.8: prefer the thread a still-pending metairq preemption
        // recorded, unless it's no longer runnable, before falling back to
        // the run queue's own ordering.
        let next = match s.metairq_preempted {
            Some(saved) if s.thread(saved).map_or(false, |t| t.is_runnable()) => saved,
            Some(_) => {
                s.metairq_preempted = None;
                s.next_up().expect("idle thread must always be runnable")
            }
            None => s.next_up().expect("idle thread must always be runnable"),
        };

        if s.thread(next).map(|t| t.state.contains(ThreadState::QUEUED)).unwrap_or(false) {
            s.dequeue(next);
        }
        let slice_max_prio = s.slice_max_prio;
        let slice_ticks = s.slice_ticks;
        if let Some(t) = s.thread_mut(next) {
            if t.priority >= slice_max_prio {
                t.slice_remaining = slice_ticks;
            }
        }

        let next_is_metairq = s.thread(next).map_or(false, |t| t.priority.is_metairq());
        if next_is_metairq {
            if cur_was_coop_non_metairq {
                s.metairq_preempted = cur_before;
            }
        } else if s.idle != Some(next) {
            // §4.8: returning to any non-metairq, non-idle thread clears
            // the slot, whether or not it was the one just used.
            s.metairq_preempted = None;
        }

        s.current = Some(next);
        next
    })
}

pub fn switch_handle(tid: ThreadId) -> *const super::context::InterruptContext {
    with_state(|s| s.thread(tid).map(|t| &t.switch_handle as *const _).unwrap_or(core::ptr::null()))
}

/// §4.7: called once per tick (from the timer ISR). Returns `true` if the
/// running thread's slice just expired and a reschedule should happen.
pub fn on_tick() -> bool {
    with_state(|s| {
        s.tick = s.tick.wrapping_add(1);
        let tick = s.tick;

        let expired: Vec<ThreadId> = s
            .threads
            .iter()
            .filter_map(|t| t.as_ref())
            .filter(|t| t.timeout_at.map_or(false, |at| at <= tick))
            .map(|t| t.id)
            .collect();
        for tid in expired {
            wake_timed_out(s, tid);
        }

        let Some(cur) = s.current else { return false };
        let slice_max_prio = s.slice_max_prio;
        let Some(t) = s.thread_mut(cur) else { return false };
        if t.priority < slice_max_prio || t.sched_locked > 0 {
            return false;
        }
        if t.slice_remaining == 0 {
            return false;
        }
        t.slice_remaining -= 1;
        t.slice_remaining == 0
    })
}

/// §4.5.2: a timed-out wait must atomically remove the thread from the
/// `WaitQueue` it was parked on, not just clear its own `PENDING` bit —
/// otherwise the stale id is left resident in that queue's backing store
/// and a later `sched_wake`/`sched_wake_all` on it pops and re-readies an
/// already-runnable (or already-dead) thread a second time.
fn wake_timed_out(s: &mut SchedState, tid: ThreadId) {
    let Some(t) = s.thread(tid) else { return };
    if t.pended_on.is_none() {
        return;
    }
    let prio = t.priority;
    let wq_addr = t.pended_wq;
    if let Some(t) = s.thread_mut(tid) {
        t.pended_on = None;
        t.timeout_at = None;
        t.pended_wq = None;
        t.state.remove(ThreadState::PENDING);
    }
    if let Some(addr) = wq_addr {
        let wq = addr as *mut WaitQueue;
        // SAFETY: see `Thread::pended_wq` — the queue this address names
        // outlives every thread parked on it.
        unsafe { (*wq).remove(tid, prio) };
    }
    s.enqueue(tid);
}

/// §4.5: remove the current thread from the ready set and park it on
/// `wq`, recording `reason` and an absolute wake tick if `timeout` bounds
/// the wait. Returns the parked thread's id so the interrupt trampoline
/// can perform the actual context switch.
pub fn pend_curr(wq: &mut WaitQueue, reason: BlockReason, timeout: Timeout) -> SchedResult<ThreadId> {
    with_state(|s| {
        let cur = s.current.ok_or(SchedError::Invalid)?;
        let prio = s.thread(cur).ok_or(SchedError::Invalid)?.priority;
        wq.insert(cur, prio);
        let wq_addr = wq as *mut WaitQueue as usize;
        let tick = s.tick;
        if let Some(t) = s.thread_mut(cur) {
            t.pended_on = Some(reason);
            t.timeout = timeout;
            t.timeout_at = match timeout {
                Timeout::Ticks(n) => Some(tick + n),
                _ => None,
            };
            t.pended_wq = Some(wq_addr);
            t.state.insert(ThreadState::PENDING);
        }
        Ok(cur)
    })
}

/// §4.5: wake the highest-priority waiter on `wq`, if any, and return it.
pub fn sched_wake(wq: &mut WaitQueue) -> Option<ThreadId> {
    let tid = wq.pop_first()?;
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.pended_on = None;
            t.timeout_at = None;
            t.pended_wq = None;
            t.state.remove(ThreadState::PENDING);
        }
        s.enqueue(tid);
    });
    Some(tid)
}

/// Wake every waiter on `wq` (broadcast variant used by e.g. condvars).
pub fn sched_wake_all(wq: &mut WaitQueue) {
    while sched_wake(wq).is_some() {}
}

/// §4.9: a thread exiting wakes everyone joined on it.
pub fn end_thread(tid: ThreadId, exit_code: i32) {
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.exit_code = Some(exit_code);
            t.state.insert(ThreadState::DEAD);
            t.state.remove(ThreadState::ABORTING);
        }
    });
    let mut joiners = with_state(|s| core::mem::take(&mut s.thread_mut(tid).unwrap().join_queue));
    sched_wake_all(&mut joiners);
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.join_queue = joiners;
        }
    });
}

/// §4.9: would `waiter` joining `target` close a cycle in the join graph?
/// Walks the chain of `Join { target }` reasons starting at `target`: if it
/// ever leads back to `waiter`, every thread on that chain is waiting (
/// directly or transitively) for a thread that is itself waiting on
/// `waiter`, so none of them can ever make progress. Bounded by
/// `MAX_THREADS` since the chain can't be longer than the thread table
/// without repeating a thread, which `pended_on` (single queue per thread)
/// already rules out.
fn join_forms_cycle(s: &SchedState, waiter: ThreadId, target: ThreadId) -> bool {
    let mut cur = target;
    for _ in 0..MAX_THREADS {
        if cur == waiter {
            return true;
        }
        match s.thread(cur).and_then(|t| t.pended_on) {
            Some(BlockReason::Join { target: next }) => cur = next,
            _ => return false,
        }
    }
    false
}

/// §4.9: block the current thread on `target`'s join queue. Returns
/// immediately with `Ok` if `target` has already exited.
pub fn join(target: ThreadId, timeout: Timeout) -> SchedResult<Option<ThreadId>> {
    let already_dead = with_state(|s| s.thread(target).map_or(true, |t| t.state.contains(ThreadState::DEAD)));
    if already_dead {
        return Ok(None);
    }
    let cur = with_state(|s| s.current).ok_or(SchedError::Invalid)?;
    if target == cur {
        return Err(SchedError::Deadlock);
    }
    if with_state(|s| join_forms_cycle(s, cur, target)) {
        return Err(SchedError::Deadlock);
    }
    if timeout.is_no_wait() {
        return Err(SchedError::Busy);
    }
    with_state(|s| {
        let prio = s.thread(cur).ok_or(SchedError::Invalid)?.priority;
        let reason = BlockReason::Join { target };
        let tick = s.tick;
        let timeout_at = match timeout {
            Timeout::Ticks(n) => Some(tick + n),
            _ => None,
        };
        let target_thread = s.thread_mut(target).ok_or(SchedError::Invalid)?;
        target_thread.join_queue.insert(cur, prio);
        let wq_addr = &mut target_thread.join_queue as *mut WaitQueue as usize;
        if let Some(t) = s.thread_mut(cur) {
            t.pended_on = Some(reason);
            t.timeout = timeout;
            t.timeout_at = timeout_at;
            t.pended_wq = Some(wq_addr);
            t.state.insert(ThreadState::PENDING);
        }
        Ok(Some(cur))
    })
}

/// §4.6/§4.9 abort protocol: mark `tid` aborting; if it is the current
/// thread this degenerates into `end_thread` once it actually stops
/// running. If it is pending or ready, remove it from wherever it sits and
/// finalize immediately.
pub fn abort(tid: ThreadId) {
    let was_current = with_state(|s| s.current == Some(tid));
    if was_current {
        with_state(|s| {
            if let Some(t) = s.thread_mut(tid) {
                t.state.insert(ThreadState::ABORTING);
            }
        });
        end_thread(tid, -1);
        return;
    }
    with_state(|s| {
        if s.thread(tid).map_or(false, |t| t.state.contains(ThreadState::QUEUED)) {
            s.dequeue(tid);
        }
    });
    end_thread(tid, -1);
}

pub fn suspend(tid: ThreadId) {
    with_state(|s| {
        if s.thread(tid).map_or(false, |t| t.state.contains(ThreadState::QUEUED)) {
            s.dequeue(tid);
        }
        if let Some(t) = s.thread_mut(tid) {
            t.state.insert(ThreadState::SUSPENDED);
        }
    });
}

pub fn resume(tid: ThreadId) {
    with_state(|s| {
        let runnable = if let Some(t) = s.thread_mut(tid) {
            t.state.remove(ThreadState::SUSPENDED);
            t.is_runnable() && !t.state.contains(ThreadState::QUEUED)
        } else {
            false
        };
        if runnable {
            s.enqueue(tid);
        }
    });
}

/// §4.12: dequeue before mutating priority, then reinsert at the new
/// position — a priority change must never leave a thread keyed by its old
/// priority in a tree or bucketed back-end.
pub fn priority_set(tid: ThreadId, prio: Priority) {
    with_state(|s| {
        let was_queued = s.thread(tid).map_or(false, |t| t.state.contains(ThreadState::QUEUED));
        if was_queued {
            s.dequeue(tid);
        }
        if let Some(t) = s.thread_mut(tid) {
            t.priority = prio;
            t.preempt_threshold = prio;
        }
        if was_queued {
            s.enqueue(tid);
        }
    });
}

pub fn priority_get(tid: ThreadId) -> Option<Priority> {
    with_state(|s| s.thread(tid).map(|t| t.priority))
}

pub fn sched_lock(tid: ThreadId) {
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.sched_locked += 1;
        }
    });
}

pub fn sched_unlock(tid: ThreadId) {
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.sched_locked = t.sched_locked.saturating_sub(1);
        }
    });
}

/// §4.10: dumb-back-end-only CPU affinity. On the tree/multiq back-ends
/// this only gates which CPU a thread is *assigned* to at enqueue time
/// (`cpu` field); it cannot steer the O(1)/O(log n) `best()` lookup, which
/// is the documented limitation.
pub fn cpu_mask_set(tid: ThreadId, mask: u64) -> SchedResult<()> {
    if mask == 0 {
        return Err(SchedError::Invalid);
    }
    with_state(|s| {
        if let Some(t) = s.thread_mut(tid) {
            t.cpu_affinity = mask;
            Ok(())
        } else {
            Err(SchedError::Invalid)
        }
    })
}

pub fn cpu_mask_get(tid: ThreadId) -> u64 {
    with_state(|s| s.thread(tid).map(|t| t.cpu_affinity).unwrap_or(ALL_CPUS))
}

pub fn sched_time_slice_set(ticks: u32, max_prio: Priority) {
    with_state(|s| {
        s.slice_ticks = ticks;
        s.slice_max_prio = max_prio;
    });
}

/// Whether the thread currently running is in the metairq band. The actual
/// "don't fall through to an arbitrary ready thread" protection lives in
/// `switch_threads`'s `metairq_preempted` handling (§4.8); this is just the
/// query used by callers that want to know without reaching into the slot.
pub fn is_metairq_running() -> bool {
    with_state(|s| s.current.and_then(|c| s.thread(c)).map_or(false, |t| t.priority.is_metairq()))
}

pub fn thread_name(tid: ThreadId) -> Option<alloc::string::String> {
    with_state(|s| s.thread(tid).map(|t| t.name.clone()))
}

pub fn thread_state(tid: ThreadId) -> Option<ThreadState> {
    with_state(|s| s.thread(tid).map(|t| t.state))
}

pub fn cpu_affinity_matches(tid: ThreadId, cpu: CpuId) -> bool {
    with_state(|s| {
        s.thread(tid)
            .map(|t| t.cpu_affinity & (1u64 << cpu.as_usize()) != 0)
            .unwrap_or(false)
    })
}
