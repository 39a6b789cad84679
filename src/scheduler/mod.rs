/*
 * Preemptive thread scheduler
 *
 * A small, always-on ready queue plus the interrupt plumbing needed to act
 * on it. Three run-queue back-ends live in `queue.rs`, selected at build
 * time by Cargo feature; the algorithm that decides *when* to switch lives
 * in `sched_core.rs` and is back-end agnostic. This module is the public
 * surface (`start`, `yield_now`, `sleep`, `join`, ...) and the two naked-asm
 * trampolines that the IDT wires timer and software interrupts to.
 *
 * THREAD LIFECYCLE:
 *
 *   PRESTART -> (ready queue) -> Running -> (ready queue) -> ...
 *                                   |
 *                                   +-> Pending (wait queue / sleep / join)
 *                                   +-> Suspended
 *                                   +-> Dead
 *
 * Both voluntary yields (`int 0x81`) and timer preemption (IRQ0) funnel
 * through the same `switch_threads` decision in `sched_core.rs` and the
 * same register save/restore sequence below, so there is exactly one
 * context switch path to reason about.
 */

use core::{
    arch::asm,
    sync::atomic::{AtomicBool, Ordering},
};

use alloc::string::ToString;

pub mod context;
pub mod sched_core;
pub mod queue;
pub mod thread;
pub mod types;
pub mod wait_queue;

pub use context::InterruptContext;
pub use thread::{Thread, MAX_THREADS, THREAD_STACK_SIZE};
pub use types::{BlockReason, CpuId, Priority, SchedError, SchedResult, ThreadId, ThreadState, Timeout};
pub use wait_queue::WaitQueue;

/// Set once `start()` has spawned the idle thread and the timer ISR is
/// allowed to start preempting.
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Nonzero while scheduler bookkeeping itself is being mutated outside the
/// normal tick path (e.g. during `spawn`), so a reentrant timer tick does
/// not see half-updated state. Distinct from a thread's own `sched_locked`
/// counter, which is about *that thread* not being preempted.
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Bring up the scheduler core. Call once, before spawning any threads.
pub fn init() {
    sched_core::init();
    log::info!("scheduler core initialized");
}

/// Spawn a new thread at `priority`, entering at `entry`. The thread is
/// immediately placed on the ready queue (§4.1).
pub fn spawn(entry: fn(), name: &str, priority: Priority) -> SchedResult<ThreadId> {
    PREEMPTION_DISABLED.store(true, Ordering::SeqCst);
    let result = (|| {
        let stack = alloc::vec![0u8; thread::THREAD_STACK_SIZE].into_boxed_slice();
        let thread = Thread::new(ThreadId(0), name.to_string(), stack, priority, entry);
        sched_core::spawn(thread)
    })();
    PREEMPTION_DISABLED.store(false, Ordering::SeqCst);
    if let Ok(tid) = result {
        log::info!("spawned thread {} '{}' at priority {}", tid, name, priority.0);
    }
    result
}

fn idle_main() {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Spawn the idle thread and enable preemption. Must be called after all
/// boot-time threads are spawned.
pub fn start() {
    let idle = spawn(idle_main, "idle", Priority::IDLE).expect("failed to spawn idle thread");
    sched_core::set_idle(idle);
    SCHEDULER_ENABLED.store(true, Ordering::SeqCst);
    log::info!("scheduler started");
}

pub fn is_running() -> bool {
    SCHEDULER_ENABLED.load(Ordering::SeqCst)
}

pub fn current() -> Option<ThreadId> {
    sched_core::current()
}

pub fn priority_get(tid: ThreadId) -> Option<Priority> {
    sched_core::priority_get(tid)
}

/// §4.12: change priority and dequeue/reinsert to keep the run-queue
/// back-end's ordering invariant intact.
pub fn priority_set(tid: ThreadId, priority: Priority) {
    sched_core::priority_set(tid, priority);
    maybe_preempt(tid);
}

/// §6: raise the calling thread's preemption floor. Nested calls stack;
/// `sched_unlock` must be called the same number of times.
pub fn sched_lock() {
    if let Some(cur) = current() {
        sched_core::sched_lock(cur);
    }
}

pub fn sched_unlock() {
    if let Some(cur) = current() {
        sched_core::sched_unlock(cur);
        maybe_preempt(cur);
    }
}

pub fn cpu_mask_set(tid: ThreadId, mask: u64) -> SchedResult<()> {
    sched_core::cpu_mask_set(tid, mask)
}

pub fn cpu_mask_get(tid: ThreadId) -> u64 {
    sched_core::cpu_mask_get(tid)
}

pub fn sched_time_slice_set(ticks: u32, max_prio: Priority) {
    sched_core::sched_time_slice_set(ticks, max_prio);
}

pub fn is_preempt_thread(tid: ThreadId) -> bool {
    sched_core::priority_get(tid).map(|p| p.is_preemptible()).unwrap_or(false)
}

/// §4.5: block the current thread on `wq` until woken or `timeout` elapses.
/// Must be called with interrupts enabled; triggers an immediate context
/// switch and does not return until the thread is woken.
pub fn wait(wq: &mut WaitQueue, reason: BlockReason, timeout: Timeout) -> SchedResult<()> {
    sched_core::pend_curr(wq, reason, timeout)?;
    yield_now();
    Ok(())
}

/// §4.5: wake the highest-priority waiter on `wq`. If it outranks the
/// currently running thread, yields immediately so it runs without delay.
pub fn wake(wq: &mut WaitQueue) -> Option<ThreadId> {
    let woken = sched_core::sched_wake(wq)?;
    maybe_preempt(woken);
    Some(woken)
}

fn maybe_preempt(tid: ThreadId) {
    if is_running() && sched_core::should_preempt(tid) {
        yield_now();
    }
}

/// §4.9: block until `target` exits, or until `timeout` elapses.
pub fn join(target: ThreadId, timeout: Timeout) -> SchedResult<()> {
    match sched_core::join(target, timeout)? {
        None => Ok(()),
        Some(_) => {
            yield_now();
            Ok(())
        }
    }
}

/// §4.6/§4.9: terminate `tid` immediately, waking its joiners.
pub fn abort(tid: ThreadId) {
    sched_core::abort(tid);
    if current() == Some(tid) {
        yield_now();
        unreachable!("aborted thread resumed after yielding");
    }
}

/// Terminate the calling thread with `exit_code`.
pub fn exit(exit_code: i32) -> ! {
    let tid = current().expect("exit() called with no current thread");
    log::info!("thread {} exiting with code {}", tid, exit_code);
    sched_core::end_thread(tid, exit_code);
    yield_now();
    unreachable!("exited thread resumed after yielding");
}

pub fn suspend(tid: ThreadId) {
    sched_core::suspend(tid);
    if current() == Some(tid) {
        yield_now();
    }
}

pub fn resume(tid: ThreadId) {
    sched_core::resume(tid);
    maybe_preempt(tid);
}

/// Block the current thread for `ticks` scheduler ticks (§4.7's tick unit).
pub fn sleep(ticks: u64) {
    if !is_running() || ticks == 0 {
        return;
    }
    let mut wq = WaitQueue::new();
    let _ = wait(&mut wq, BlockReason::Sleep, Timeout::Ticks(ticks));
}

/// Voluntarily give up the CPU (`int 0x81`, handled by
/// `yield_interrupt_handler` below). No-op before the scheduler starts or
/// with interrupts disabled, matching the boot-time and critical-section
/// cases where a reschedule would be unsafe.
pub fn yield_now() {
    if !is_running() {
        return;
    }
    if !crate::arch::x86_64::interrupts::are_enabled() {
        return;
    }
    unsafe {
        asm!("int 0x81", options(nostack));
    }
}

/// §4.7: called once per PIT tick from the timer ISR, before the dispatch
/// decision. Expires timeouts and decrements the running thread's slice;
/// returns whether the slice just ran out (forces a reschedule even if no
/// higher-priority thread woke up).
fn tick() -> bool {
    sched_core::on_tick()
}

/// The actual dispatch decision, shared by both naked-asm trampolines
/// below. Copies the outgoing context in, asks `core.rs` for the next
/// thread, and returns a pointer to its saved context for the trampoline
/// to restore. `force` is passed straight through to `switch_threads`:
/// `true` for an unconditional trigger (voluntary yield, timeslice
/// expiry), `false` for a plain tick where a swap only happens if
/// something ready actually outranks `current`.
fn dispatch(current_ctx_ptr: *const InterruptContext, force: bool) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) || PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    let outgoing = sched_core::current().map(|tid| (tid, unsafe { *current_ctx_ptr }));
    let next = sched_core::switch_threads(outgoing, force);
    sched_core::switch_handle(next)
}

/// Voluntary yield (`int 0x81`): §4.6 always rotates the caller to the end
/// of its priority band and dispatches whatever is now at the head.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(current_ctx_ptr: *const InterruptContext) -> *const InterruptContext {
    dispatch(current_ctx_ptr, true)
}

/// Timer-driven entry point (IRQ0, every tick). Runs the per-tick
/// bookkeeping (§4.7) first — which may expire the running thread's slice
/// or wake a timed-out waiter — then dispatches with `force` set only when
/// the slice actually expired. A plain tick with neither outcome calls
/// into `switch_threads` with `force = false`, which only swaps if the
/// newly-woken (or otherwise ready) best candidate actually outranks
/// `current`; it does not rotate `current` to the tail on every tick.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_timer(current_ctx_ptr: *const InterruptContext) -> *const InterruptContext {
    let slice_expired = tick();
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }
    dispatch(current_ctx_ptr, slice_expired)
}

/// Voluntary yield (`int 0x81`). Identical register save/restore to the
/// timer handler; the only difference is no PIC EOI, since software
/// interrupts never go through the PIC.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt (IRQ0, 100 Hz). Builds the same
/// `InterruptContext` on the stack as the yield path, but calls
/// `schedule_from_timer` (which also drives §4.7 tick accounting) and
/// sends PIC EOI before returning.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",
        "iretq",
        schedule_fn = sym schedule_from_timer,
    )
}
