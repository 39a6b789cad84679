/*
 * In-kernel scheduler scenarios
 *
 * Boot-time PASS/FAIL smoke threads exercising the scheduler end to end:
 * real threads, real context switches, a real timer. Host-runnable unit
 * tests for pure logic (priority ordering, queue back-ends) live next to
 * the code they test instead of here.
 */

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use alloc::vec::Vec;

use crate::scheduler::{self, BlockReason, Priority, SchedError, ThreadId, Timeout, WaitQueue};

/// Spawn every scenario thread. Called once from `kstart` after
/// `scheduler::init()` but before `scheduler::start()`, so the scenarios
/// run as soon as preemption is enabled.
pub fn spawn_self_tests() {
    scheduler::spawn(round_robin_leader, "s1_leader", Priority(5))
        .expect("spawn s1_leader");

    scheduler::spawn(preemption_low, "s2_low", Priority(10))
        .expect("spawn s2_low");

    scheduler::spawn(join_target, "s6_target", Priority(6)).expect("spawn s6_target");
    scheduler::spawn(join_waiter, "s6_waiter", Priority(6)).expect("spawn s6_waiter");

    scheduler::spawn(pend_timeout_waiter, "s4_waiter", Priority(6))
        .expect("spawn s4_waiter");

    scheduler::spawn(timeslice_a, "s3_a", Priority(7)).expect("spawn s3_a");

    scheduler::spawn(metairq_normal, "s5_normal", Priority(-5))
        .expect("spawn s5_normal");
}

/// S1 — yield round-robin. Three threads at the same priority, each
/// yielding once per iteration, must observe a strict round-robin order.
static RR_ORDER: [AtomicUsize; 6] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];
static RR_NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

fn record_rr(id: usize) {
    let slot = RR_NEXT_SLOT.fetch_add(1, Ordering::SeqCst);
    if slot < RR_ORDER.len() {
        RR_ORDER[slot].store(id, Ordering::SeqCst);
    }
}

fn round_robin_leader() {
    scheduler::spawn(round_robin_b, "s1_b", Priority(5)).expect("spawn s1_b");
    scheduler::spawn(round_robin_c, "s1_c", Priority(5)).expect("spawn s1_c");

    for _ in 0..2 {
        record_rr(1);
        scheduler::yield_now();
    }

    if RR_NEXT_SLOT.load(Ordering::SeqCst) >= 6 {
        let order: Vec<usize> = RR_ORDER.iter().map(|a| a.load(Ordering::SeqCst)).collect();
        if order == [1, 2, 3, 1, 2, 3] {
            log::info!("[S1 round-robin] PASS: order = {:?}", order);
        } else {
            log::error!("[S1 round-robin] FAIL: order = {:?}", order);
        }
    }
}

fn round_robin_b() {
    for _ in 0..2 {
        record_rr(2);
        scheduler::yield_now();
    }
}

fn round_robin_c() {
    for _ in 0..2 {
        record_rr(3);
        scheduler::yield_now();
    }
}

/// S2 — priority preemption. The low-priority thread spawns a
/// higher-priority thread mid-loop; the high-priority thread must run to
/// completion before the low-priority thread sees another tick.
static PREEMPTION_HIGH_RAN: AtomicU32 = AtomicU32::new(0);
static PREEMPTION_LOW_SAW_GAP: AtomicU32 = AtomicU32::new(0);

fn preemption_low() {
    for i in 0..5 {
        if i == 2 {
            scheduler::spawn(preemption_high, "s2_high", Priority(1))
                .expect("spawn s2_high");
        }
        if i > 2 && PREEMPTION_HIGH_RAN.load(Ordering::SeqCst) == 1 {
            PREEMPTION_LOW_SAW_GAP.store(1, Ordering::SeqCst);
        }
        scheduler::yield_now();
    }

    if PREEMPTION_HIGH_RAN.load(Ordering::SeqCst) == 1 && PREEMPTION_LOW_SAW_GAP.load(Ordering::SeqCst) == 1 {
        log::info!("[S2 priority preemption] PASS");
    } else {
        log::error!(
            "[S2 priority preemption] FAIL: high_ran={} saw_gap={}",
            PREEMPTION_HIGH_RAN.load(Ordering::SeqCst),
            PREEMPTION_LOW_SAW_GAP.load(Ordering::SeqCst)
        );
    }
}

fn preemption_high() {
    PREEMPTION_HIGH_RAN.store(1, Ordering::SeqCst);
}

/// S6 — join. The waiter blocks on the target, observes its exit, and
/// must be runnable again at exactly the tick the target ended.
static JOIN_TARGET_ID: AtomicUsize = AtomicUsize::new(0);

fn join_target() {
    let tid = scheduler::current().expect("current thread");
    JOIN_TARGET_ID.store(tid.0, Ordering::SeqCst);
    for _ in 0..3 {
        scheduler::yield_now();
    }
    scheduler::exit(7);
}

fn join_waiter() {
    // Give join_target a chance to publish its id first.
    scheduler::yield_now();
    let target = ThreadId(JOIN_TARGET_ID.load(Ordering::SeqCst));
    match scheduler::join(target, Timeout::Forever) {
        Ok(()) => log::info!("[S6 join] PASS: observed target exit"),
        Err(e) => log::error!("[S6 join] FAIL: {:?}", e),
    }
}

/// S4 — pend with timeout. No waker exists for this queue; the waiter
/// must be readied by timeout expiry alone and see the timeout error.
fn pend_timeout_waiter() {
    let mut wq = WaitQueue::new();
    match scheduler::wait(&mut wq, BlockReason::WaitTimeout, Timeout::Ticks(20)) {
        Err(SchedError::Timeout) => log::info!("[S4 pend timeout] PASS"),
        other => log::error!("[S4 pend timeout] FAIL: {:?}", other),
    }
}

/// S3 — timeslice expiry. `s3_a` never yields and never blocks; it must
/// still be preempted for `s3_b` once its timeslice runs out, driven purely
/// by the tick interrupt rather than any cooperative call.
static S3_B_RAN: AtomicU32 = AtomicU32::new(0);

fn timeslice_a() {
    scheduler::sched_time_slice_set(5, Priority(8));
    scheduler::spawn(timeslice_b, "s3_b", Priority(7)).expect("spawn s3_b");

    let mut preempted = false;
    for _ in 0..5_000_000u32 {
        if S3_B_RAN.load(Ordering::SeqCst) == 1 {
            preempted = true;
            break;
        }
    }

    if preempted {
        log::info!("[S3 timeslice expiry] PASS: s3_b ran without s3_a yielding");
    } else {
        log::error!("[S3 timeslice expiry] FAIL: s3_b never got a turn");
    }
}

fn timeslice_b() {
    S3_B_RAN.store(1, Ordering::SeqCst);
}

/// S5 — metairq return. `s5_normal` is cooperative (never yields), so the
/// only thing that can preempt it at all is the metairq `s5_metairq`. While
/// the metairq runs it spawns `s5_competing`, a cooperative thread at a
/// priority *between* the metairq and `s5_normal` — one that would win an
/// ordinary priority-only pick. When the metairq exits, control must come
/// back to `s5_normal` specifically (the thread it actually interrupted),
/// not fall through to `s5_competing` just because it now outranks
/// `s5_normal` in the ready queue.
static S5_METAIRQ_RAN: AtomicU32 = AtomicU32::new(0);
/// 0 = undecided, 1 = s5_normal ran first (correct), 2 = s5_competing ran
/// first (the bug this scenario exists to catch).
static S5_WINNER: AtomicU32 = AtomicU32::new(0);

fn metairq_normal() {
    scheduler::spawn(metairq_worker, "s5_metairq", Priority::MIN).expect("spawn s5_metairq");

    for _ in 0..5_000_000u32 {
        if S5_METAIRQ_RAN.load(Ordering::SeqCst) == 1 {
            break;
        }
    }

    let _ = S5_WINNER.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);

    match S5_WINNER.load(Ordering::SeqCst) {
        1 => log::info!("[S5 metairq return] PASS: s5_normal resumed ahead of s5_competing"),
        other => log::error!("[S5 metairq return] FAIL: winner={}", other),
    }
}

fn metairq_worker() {
    scheduler::spawn(metairq_competing, "s5_competing", Priority(-10)).expect("spawn s5_competing");
    S5_METAIRQ_RAN.store(1, Ordering::SeqCst);
}

fn metairq_competing() {
    let _ = S5_WINNER.compare_exchange(0, 2, Ordering::SeqCst, Ordering::SeqCst);
}
