//! Building test programs and running them on a target

pub mod harness;
pub mod process;
pub mod target;
pub mod toolchain;

pub use harness::Harness;
pub use process::{run_with_timeout, CompletionFlag, ProcessRunner};
pub use target::{MemoryDump, RunConfig, Target};
pub use toolchain::{BuildOptions, ImageType};
