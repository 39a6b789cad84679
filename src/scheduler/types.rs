/*
 * Scheduler Type Definitions
 *
 * Lightweight, Copy-able types shared by the queue back-ends, the thread
 * control block, and the scheduler core. Kept separate from the core
 * algorithm so the back-ends in `queue.rs` can depend only on this module.
 */

use bitflags::bitflags;

/// Logical CPU identifier. Only CpuId::BSP is ever populated today, but the
/// per-CPU record in `core.rs` is addressed by this type so a second core
/// is a matter of growing the array, not rewriting the algorithm.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl CpuId {
    pub const BSP: CpuId = CpuId(0);

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Opaque thread identifier: an index into the scheduler's thread table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Thread priority. Lower numeric value runs first. Negative priorities are
/// cooperative (never preempted by an equal-or-lower-priority thread);
/// priorities `0..PRIORITY_PREEMPT_MAX` are preemptible. The most negative
/// `N_METAIRQ` priorities are the metairq band (see `is_metairq`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// Width of the metairq band: the `N_METAIRQ` most negative priorities.
    pub const N_METAIRQ: i32 = 2;
    pub const MIN: Priority = Priority(-16);
    pub const MAX: Priority = Priority(15);
    pub const IDLE: Priority = Priority(15);

    pub fn is_cooperative(self) -> bool {
        self.0 < 0
    }

    pub fn is_preemptible(self) -> bool {
        self.0 >= 0
    }

    /// Top of the metairq band: "ISRs written as threads", per §4.8.
    pub fn is_metairq(self) -> bool {
        self.0 < Self::MIN.0 + Self::N_METAIRQ
    }

    /// Clamp into the range the `multiq` back-end can index (32 buckets).
    pub fn bucket(self) -> usize {
        (self.0 - Self::MIN.0).clamp(0, 31) as usize
    }
}

/// Monotonically increasing key assigned at ready-queue insertion time,
/// used by the `scalable` back-end to break priority ties in FIFO order
/// (§4.1). Wraparound is handled by the back-end re-keying on overflow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OrderKey(pub u64);

/// Bitmask of states a thread can be in simultaneously. Mirrors §3's
/// `{PENDING, PRESTART, DEAD, SUSPENDED, QUEUED, ABORTING, DUMMY}`.
bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ThreadState: u16 {
        /// Blocked on a wait queue.
        const PENDING   = 1 << 0;
        /// Created but not yet started.
        const PRESTART  = 1 << 1;
        /// Terminated; control block retained only until reaped.
        const DEAD      = 1 << 2;
        /// Suspended by `suspend()` or asleep in `sleep()`.
        const SUSPENDED = 1 << 3;
        /// Resident in the ready queue.
        const QUEUED    = 1 << 4;
        /// `abort()` in flight, not yet finalized by `end_thread`.
        const ABORTING  = 1 << 5;
        /// Placeholder control block (e.g. a CPU's idle thread accounting
        /// slot before it is fully constructed). Never runnable.
        const DUMMY     = 1 << 6;
    }
}

impl ThreadState {
    /// A thread is runnable iff none of these bits are set.
    pub fn is_runnable(self) -> bool {
        !self.intersects(
            ThreadState::PENDING
                | ThreadState::PRESTART
                | ThreadState::DEAD
                | ThreadState::SUSPENDED
                | ThreadState::ABORTING
                | ThreadState::DUMMY,
        )
    }
}

/// Why a thread was blocked; carried for logging and for the invariant that
/// a thread is pended on at most one wait queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockReason {
    WaitTimeout,
    WaitObject,
    Sleep,
    Join { target: ThreadId },
    Suspend,
}

/// Timeout expressed in scheduler ticks (§4.7's `ticks_elapsed` unit).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    NoWait,
    Ticks(u64),
}

impl Timeout {
    pub fn is_no_wait(self) -> bool {
        matches!(self, Timeout::Ticks(0))
    }
}

/// Result codes at the public §6 boundary, convertible to the negative
/// integer return codes §7 specifies. Internal code uses `Result<T, SchedError>`
/// and `?`; only invariant violations (§7 "Assertion failure") bypass this
/// and panic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Bad priority, bad deadline, out-of-range argument.
    Invalid,
    /// `join` with a zero timeout on a thread that is still alive.
    Busy,
    /// Timer fired before the condition was satisfied.
    Timeout,
    /// Self-join, or a join that would form a cycle.
    Deadlock,
}

impl SchedError {
    /// The negative-return-code convention of §7.
    pub fn as_code(self) -> i32 {
        match self {
            SchedError::Invalid => -1,
            SchedError::Busy => -2,
            SchedError::Timeout => -3,
            SchedError::Deadlock => -4,
        }
    }
}

pub type SchedResult<T> = Result<T, SchedError>;
