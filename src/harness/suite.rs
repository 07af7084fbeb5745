//! Suite file configuration
//!
//! A suite file describes the tests of one directory in YAML. Loading it
//! registers the listed (or discovered) sources with the standard handlers.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::paths::find_files;
use crate::common::{Error, Result};
use crate::exec::Target;

use super::generic::{self, ExpectedDump};
use super::registry::TestRegistry;

/// A complete suite loaded from a YAML file
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    /// Sources checked against their `CHECK:`/`CHECKN:` directives
    #[serde(default)]
    pub generic: Vec<FileGroup>,
    /// Assembly sources that print PASS or FAIL
    #[serde(default)]
    pub assembly: Vec<FileGroup>,
    /// User programs run under the kernel, checked against directives
    #[serde(default)]
    pub kernel: Vec<FileGroup>,
    /// Framebuffer-hash tests
    #[serde(default)]
    pub render: Vec<RenderSpec>,
    /// Multi-source programs that print PASS or FAIL
    #[serde(default)]
    pub programs: Vec<ProgramSpec>,
}

/// A set of single-file tests sharing a target list
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct FileGroup {
    /// Files listed explicitly
    #[serde(default)]
    pub files: Vec<String>,
    /// Extensions to discover in the suite directory (e.g. ".c")
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Discovered names to leave out
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Valid targets; empty means all
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A render test
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RenderSpec {
    pub name: String,
    pub sources: Vec<String>,
    /// Expected SHA-1 (40 digits) or SHA-256 (64 digits) of the framebuffer, hex
    pub hash: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A PASS/FAIL program test
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    pub name: String,
    pub sources: Vec<String>,
    /// Files placed in a filesystem image attached as the block device
    #[serde(default)]
    pub fs_image: Vec<String>,
    /// Memory range to dump after the run and compare with a file
    #[serde(default)]
    pub memory_dump: Option<DumpSpec>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Memory dump check for a program test
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct DumpSpec {
    pub base: u64,
    pub length: u64,
    /// Reference file, relative to the suite directory
    pub expected: String,
}

impl FileGroup {
    /// Explicit files followed by discovered ones, without duplicates
    fn resolve(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = self.files.clone();
        if !self.extensions.is_empty() {
            let found = find_files(dir, &self.extensions).map_err(|e| {
                Error::Config(format!("Failed to scan '{}': {}", dir.display(), e))
            })?;
            for name in found {
                if !self.exclude.contains(&name) && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

impl Suite {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test suite '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse test suite: {}", e)))
    }

    /// Register every test in the suite; sources resolve against `dir`
    pub fn register(&self, registry: &mut TestRegistry, dir: &Path) -> Result<()> {
        for group in &self.generic {
            generic::register_generic_tests(registry, dir, group.resolve(dir)?, &group.targets);
        }
        for group in &self.assembly {
            generic::register_assembly_tests(registry, dir, group.resolve(dir)?, &group.targets);
        }
        for group in &self.kernel {
            generic::register_kernel_tests(registry, dir, group.resolve(dir)?, &group.targets);
        }
        for render in &self.render {
            generic::register_render_test(
                registry,
                &render.name,
                resolve_all(dir, &render.sources),
                &render.hash,
                &render.targets,
            )?;
        }
        for program in &self.programs {
            let fs_files = program.fs_image.iter().map(|f| dir.join(f)).collect::<Vec<PathBuf>>();
            generic::register_program_test(
                registry,
                &program.name,
                resolve_all(dir, &program.sources),
                fs_files,
                program.memory_dump.as_ref().map(|d| ExpectedDump {
                    base: d.base,
                    length: d.length,
                    expected: dir.join(&d.expected),
                }),
                &program.targets,
            );
        }
        tracing::debug!(tests = registry.len(), "Suite registered");
        Ok(())
    }
}

fn resolve_all(dir: &Path, sources: &[String]) -> Vec<String> {
    sources
        .iter()
        .map(|s| dir.join(s).display().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_suite() {
        let suite = Suite::parse(
            r#"
generic:
  - files: [hello.c]
    targets: [emulator, fpga]
assembly:
  - files: [branch.S]
render:
  - name: teapot
    sources: [teapot.cpp, model.cpp]
    hash: "a9993e364706816aba3e25717850c26c9cd0d89d"
    targets: [verilator]
programs:
  - name: filesystem
    sources: [fs.c]
    fs_image: [fstest.txt]
    memory_dump:
      base: 4096
      length: 64
      expected: expected.bin
"#,
        )
        .unwrap();

        assert_eq!(suite.generic[0].targets, vec![Target::Emulator, Target::Hardware]);
        assert_eq!(suite.render[0].targets, vec![Target::Simulator]);
        assert_eq!(suite.programs[0].fs_image, vec!["fstest.txt".to_string()]);
        let dump = suite.programs[0].memory_dump.as_ref().unwrap();
        assert_eq!((dump.base, dump.length), (4096, 64));
        assert!(suite.kernel.is_empty());
    }

    #[test]
    fn test_register_rejects_bad_render_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let suite = Suite::parse(
            "render:\n  - name: teapot\n    sources: [teapot.cpp]\n    hash: \"ab12\"\n",
        )
        .unwrap();
        let mut registry = TestRegistry::new();
        let err = suite.register(&mut registry, tmp.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Suite::parse("generics:\n  - files: [a.c]\n").is_err());
    }

    #[test]
    fn test_register_discovers_files() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["fs.c", "printf.c", "atoi.cpp", "_util.c", "README"] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        let suite = Suite::parse(
            r#"
generic:
  - extensions: [.c, .cpp]
    exclude: [fs.c]
    targets: [emulator]
programs:
  - name: filesystem
    sources: [fs.c]
    targets: [emulator, hardware]
"#,
        )
        .unwrap();

        let mut registry = TestRegistry::new();
        suite.register(&mut registry, tmp.path()).unwrap();

        assert_eq!(
            registry.listing(),
            vec![
                "atoi.cpp: emulator",
                "printf.c: emulator",
                "filesystem: emulator, hardware",
            ]
        );
    }
}
