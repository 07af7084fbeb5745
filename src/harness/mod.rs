//! Test registration and execution

pub mod generic;
pub mod registry;
pub mod runner;
pub mod suite;

pub use registry::{handler_fn, TestCase, TestHandler, TestRegistry};
pub use runner::{Outcome, Report, TestResult, TestRunner};
pub use suite::Suite;
