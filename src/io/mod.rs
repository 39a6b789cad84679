/*
 * Low-level port I/O
 *
 * Generic `Io` trait over memory-mapped and port-mapped registers, used by
 * drivers (the 16550 UART, the PIC/PIT) instead of each driver hand-rolling
 * `in`/`out` instructions.
 */

pub mod pio;

pub use pio::{Io, Pio, ReadOnly};
