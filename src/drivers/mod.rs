/*
 * Hardware Drivers
 *
 * Hardware-specific drivers the kernel needs to get a scheduler running
 * and observable: a serial console for log output, and the PIC/PIT pair
 * that feeds the timer interrupt the scheduler preempts on.
 *
 * Driver categories:
 * - Serial: UART communication driver
 * - System: PIC, PIT, and other system controllers
 */

pub mod serial;
pub mod system;
