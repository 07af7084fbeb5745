//! Error types for the test harness
//!
//! Variants fall into three groups: configuration problems that abort the
//! whole run, recognized test failures that fail a single test, and
//! everything else, which is a fault in the harness or in a test handler.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Unknown test {0}")]
    UnknownTest(String),

    #[error("Need to set {0} to device path in environment")]
    MissingEnv(String),

    #[error("{option} is not supported on {target}")]
    UnsupportedOption { option: String, target: String },

    // === Toolchain Errors ===
    #[error("{tool} failed:\n{output}")]
    Toolchain { tool: String, output: String },

    // === Execution Errors ===
    #[error("Test timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process returned error ({status}): {output}")]
    AbnormalExit { status: String, output: String },

    #[error("{0}\nProgram did not halt normally")]
    DidNotHalt(String),

    #[error("Failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    // === Verification Errors ===
    #[error("{0}")]
    Verification(String),

    #[error("FAIL: no verification directives present in {0}")]
    NoDirectives(String),

    #[error("FAIL: line {line} has invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("render test failed, bad checksum {actual}; output image written to {image}")]
    HashMismatch { actual: String, image: String },

    #[error("{0}")]
    FileMismatch(String),

    #[error("{0}")]
    TestFailure(String),

    // === Run Control ===
    #[error("Interrupted by operator")]
    Interrupted,

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a toolchain failure carrying the tool's captured output
    pub fn toolchain(tool: &str, output: impl Into<String>) -> Self {
        Self::Toolchain {
            tool: tool.to_string(),
            output: output.into(),
        }
    }

    /// Create an unsupported option error
    pub fn unsupported(option: &str, target: impl std::fmt::Display) -> Self {
        Self::UnsupportedOption {
            option: option.to_string(),
            target: target.to_string(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Conditions that fail one test and are reported with their message only
    pub fn is_test_failure(&self) -> bool {
        matches!(
            self,
            Error::Toolchain { .. }
                | Error::Timeout(_)
                | Error::AbnormalExit { .. }
                | Error::DidNotHalt(_)
                | Error::Verification(_)
                | Error::NoDirectives(_)
                | Error::InvalidPattern { .. }
                | Error::HashMismatch { .. }
                | Error::FileMismatch(_)
                | Error::TestFailure(_)
                | Error::UnsupportedOption { .. }
                | Error::MissingEnv(_)
        )
    }

    /// Conditions that abort the run before any test executes
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::UnknownTest(_)
                | Error::MissingEnv(_)
                | Error::UnsupportedOption { .. }
        )
    }
}
