/*
 * Kernel Entry Point
 *
 * Bare-metal x86_64 entry point for a small kernel whose only job is to
 * run a preemptive thread scheduler. No bootloader protocol beyond a
 * multiboot-style direct jump from the bare-metal harness this binary is
 * linked against: `_start` switches to a private boot stack and jumps
 * into `kstart`, which brings up GDT/IDT, the heap, and the scheduler,
 * then spawns the kernel's self-test threads and hands control over.
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![allow(dead_code)]

extern crate alloc;
extern crate rlibc;

use core::panic::PanicInfo;

mod arch;
mod drivers;
mod io;
mod memory;
mod scheduler;
mod tests;
mod utils;

#[repr(C, align(16))]
pub struct AlignedBspStack([u8; 64 * 1024]);

#[unsafe(no_mangle)]
pub static mut BSP_STACK: AlignedBspStack = AlignedBspStack([0; 64 * 1024]);

/// Switches onto `BSP_STACK` and jumps into `kstart`. Written in naked asm
/// because the incoming stack pointer is whatever the bare-metal harness
/// left it at, and we need a known-good, known-sized stack before any
/// Rust function prologue runs.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "lea rax, [rip + BSP_STACK]",
        "add rax, {stack_size}",
        "mov rsp, rax",
        "jmp kstart",
        stack_size = const 64 * 1024,
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn kstart() -> ! {
    utils::debug::init_debug_infrastructure();
    utils::debug::logger::init(true);
    log::info!("kernel starting...");

    arch::x86_64::gdt::init();
    arch::x86_64::idt::init();

    log::info!("initializing memory management...");
    memory::init();

    {
        use alloc::vec::Vec;
        let mut v = Vec::new();
        v.push(42);
        v.push(1337);
        log::info!("heap smoke test: {:?}", v);
    }

    drivers::system::init();

    scheduler::init();

    tests::spawn_self_tests();

    x86_64::instructions::interrupts::enable();
    log::info!("interrupts enabled");

    scheduler::start();
    log::info!("scheduler started - handing control to threads");

    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}

#[unsafe(no_mangle)]
extern "C" fn rust_eh_personality() {}
