/*
 * Input/Output Utilities
 *
 * Serial-backed text output and the print!/serial_println! macros built
 * on top of it.
 */

pub mod writer;
#[macro_use]
pub mod macros;
