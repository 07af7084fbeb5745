//! functest - functional test harness for a processor toolchain
//!
//! Compiles small test programs, runs them on an emulator, an RTL simulator
//! or an FPGA board, and checks what they printed or drew.

pub mod cli;
pub mod common;
pub mod exec;
pub mod harness;
pub mod verify;

// Re-export commonly used types for tests
pub use common::{Error, Result};
