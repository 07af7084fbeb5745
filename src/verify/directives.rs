//! Ordered output checks driven by comments in the test source
//!
//! A source line containing `CHECK: <regex>` asserts the pattern occurs in
//! the program output; `CHECKN: <regex>` asserts it does not. Positive
//! checks must match in file order: each search starts where the previous
//! match ended, and nothing is ever searched twice.

use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::common::{Error, Result};

/// Marker for a pattern that must appear
pub const CHECK_PREFIX: &str = "CHECK: ";
/// Marker for a pattern that must not appear
pub const CHECKN_PREFIX: &str = "CHECKN: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    MustOccur,
    MustNotOccur,
}

/// One assertion parsed from a source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based line number in the source file
    pub line: usize,
    pub polarity: Polarity,
    pub pattern: String,
}

impl Directive {
    fn compile(&self) -> Result<Regex> {
        RegexBuilder::new(&self.pattern)
            .multi_line(true)
            .crlf(true)
            .build()
            .map_err(|source| Error::InvalidPattern {
                line: self.line,
                pattern: self.pattern.clone(),
                source,
            })
    }
}

/// Extract directives from source text, in file order
pub fn parse_directives(source: &str) -> Vec<Directive> {
    source
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let (polarity, offset, prefix) = if let Some(pos) = line.find(CHECK_PREFIX) {
                (Polarity::MustOccur, pos, CHECK_PREFIX)
            } else if let Some(pos) = line.find(CHECKN_PREFIX) {
                (Polarity::MustNotOccur, pos, CHECKN_PREFIX)
            } else {
                return None;
            };
            Some(Directive {
                line: idx + 1,
                polarity,
                pattern: line[offset + prefix.len()..].trim().to_string(),
            })
        })
        .collect()
}

/// Check `output` against directives; `origin` names the source in messages
pub fn check_directives(directives: &[Directive], output: &str, origin: &str) -> Result<()> {
    if directives.is_empty() {
        return Err(Error::NoDirectives(origin.to_string()));
    }

    let mut offset = 0;
    for directive in directives {
        let regex = directive.compile()?;
        match directive.polarity {
            Polarity::MustOccur => {
                tracing::debug!(
                    line = directive.line,
                    "searching for pattern \"{}\"",
                    directive.pattern
                );
                match regex.find_at(output, offset) {
                    Some(found) => offset = found.end(),
                    None => {
                        return Err(Error::Verification(format!(
                            "FAIL: line {} expected string {} was not found\nsearching here:{}",
                            directive.line,
                            directive.pattern,
                            &output[offset..]
                        )));
                    }
                }
            }
            Polarity::MustNotOccur => {
                tracing::debug!(
                    line = directive.line,
                    "ensuring absence of pattern \"{}\"",
                    directive.pattern
                );
                if regex.find_at(output, offset).is_some() {
                    return Err(Error::Verification(format!(
                        "FAIL: line {} string {} should not be here:\n{}",
                        directive.line,
                        directive.pattern,
                        &output[offset..]
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Check program output against the directives in `source_file`
pub fn check_result(source_file: &Path, output: &str) -> Result<()> {
    let source =
        std::fs::read_to_string(source_file).map_err(|e| Error::file_read(source_file, e))?;
    let directives = parse_directives(&source);
    check_directives(&directives, output, &source_file.display().to_string())
}
