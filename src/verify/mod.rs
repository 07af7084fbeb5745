//! Judging what a test program produced

pub mod directives;
pub mod files;
pub mod render;

pub use directives::{check_result, parse_directives, Directive, Polarity};
pub use files::assert_files_equal;
pub use render::{check_render, digest_hex, DigestKind};
