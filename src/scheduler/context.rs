/*
 * Saved CPU context
 *
 * Register layout for the interrupt-driven context switch. The CPU pushes
 * `InterruptFrame` automatically on any trap; `schedule_from_interrupt`'s
 * naked-asm preamble pushes the general-purpose registers on top of that in
 * the exact order `InterruptContext` declares them, so the two layouts must
 * stay byte-for-byte in sync with the push/pop sequence in mod.rs.
 */

/// Pushed by the CPU itself when entering any interrupt or exception.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Default for InterruptFrame {
    fn default() -> Self {
        Self {
            rip: 0,
            cs: 0x08,
            rflags: 0x202,
            rsp: 0,
            ss: 0x10,
        }
    }
}

/// A thread's full saved register state: general-purpose registers pushed
/// by the handler preamble, low addresses first, followed by the frame the
/// CPU pushed. `switch_handle` in the TCB (§3) is one of these.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    pub iret_frame: InterruptFrame,
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            iret_frame: InterruptFrame::default(),
        }
    }
}

impl InterruptContext {
    /// Build the initial context for a thread that has never run: as if it
    /// had been interrupted right at its entry point, with `stack_top - 8`
    /// holding the exit trampoline return address.
    pub fn fresh(entry: fn(), stack_top: u64) -> Self {
        let mut ctx = Self::default();
        ctx.iret_frame.rip = entry as u64;
        ctx.iret_frame.rsp = stack_top - 8;
        ctx
    }
}
