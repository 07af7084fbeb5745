//! Standard test handlers
//!
//! Most tests are one source file whose expected output is written into the
//! file itself; the handlers here cover those shapes so suites only list
//! files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::exec::{BuildOptions, Harness, ImageType, RunConfig, Target};
use crate::verify::{assert_files_equal, check_render, check_result, DigestKind};

use super::registry::{TestHandler, TestRegistry};

const RAW_FB_DUMP_FILE: &str = "fb.bin";
const PNG_DUMP_FILE: &str = "actual-output.png";
const FS_IMAGE_FILE: &str = "fsimage.bin";
const MEM_DUMP_FILE: &str = "memdump.bin";

/// Fail unless the program reported PASS and never reported FAIL
fn expect_pass(output: &str, context: &str) -> Result<()> {
    if !output.contains("PASS") || output.contains("FAIL") {
        return Err(Error::TestFailure(format!("{}\n{}", context, output)));
    }
    Ok(())
}

fn source_path(base_dir: &Path, name: &str) -> String {
    base_dir.join(name).display().to_string()
}

/// Compile the named source, run it, check its `CHECK:` directives
#[derive(Debug, Clone)]
pub struct DirectiveTest {
    base_dir: PathBuf,
}

#[async_trait]
impl TestHandler for DirectiveTest {
    async fn run(&self, harness: &Harness, name: &str, target: Target) -> Result<()> {
        let source = source_path(&self.base_dir, name);
        harness
            .build_program(&[&source], BuildOptions::default())
            .await?;
        let output = harness.run_program(RunConfig::new(target)).await?;
        check_result(Path::new(&source), &output)
    }
}

/// Assemble the named source, run it, require PASS and no FAIL
#[derive(Debug, Clone)]
pub struct AssemblyTest {
    base_dir: PathBuf,
}

#[async_trait]
impl TestHandler for AssemblyTest {
    async fn run(&self, harness: &Harness, name: &str, target: Target) -> Result<()> {
        let source = source_path(&self.base_dir, name);
        harness
            .build_program(&[&source], BuildOptions::default())
            .await?;
        let output = harness.run_program(RunConfig::new(target)).await?;
        expect_pass(&output, "Test failed")
    }
}

/// Build the named source as a user program, run it under the kernel,
/// check its directives
#[derive(Debug, Clone)]
pub struct KernelTest {
    base_dir: PathBuf,
}

#[async_trait]
impl TestHandler for KernelTest {
    async fn run(&self, harness: &Harness, name: &str, target: Target) -> Result<()> {
        let source = source_path(&self.base_dir, name);
        let opts = BuildOptions::default().image_type(ImageType::User);
        harness.build_program(&[&source], opts).await?;
        let output = harness.run_kernel(target, None).await?;
        check_result(Path::new(&source), &output)
    }
}

/// Compile several sources into one program and hash its framebuffer
#[derive(Debug, Clone)]
pub struct RenderTest {
    sources: Vec<String>,
    expected_hash: String,
}

#[async_trait]
impl TestHandler for RenderTest {
    async fn run(&self, harness: &Harness, _name: &str, target: Target) -> Result<()> {
        let config = harness.config();
        let paths = &config.paths;
        let cflags = [
            format!("-I{}", paths.lib_include_dir.join("librender").display()),
            paths.lib_dir.join("librender/librender.a").display().to_string(),
            "-ffast-math".to_string(),
        ];
        harness
            .build_program(&self.sources, BuildOptions::default().cflags(cflags))
            .await?;

        let dump_file = harness.work_file(RAW_FB_DUMP_FILE);
        let run = RunConfig::new(target)
            .dump(
                &dump_file,
                config.render.framebuffer_base,
                config.render.framebuffer_len(),
            )
            .flush_l2(true);
        harness.run_program(run).await?;

        check_render(
            &dump_file,
            &self.expected_hash,
            &harness.work_file(PNG_DUMP_FILE),
            &config.render,
            harness.runner(),
        )
        .await
    }
}

/// Memory range a program test dumps and the file it must equal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDump {
    pub base: u64,
    pub length: u64,
    pub expected: PathBuf,
}

/// Compile sources, optionally attach a filesystem image, require PASS and
/// optionally compare a memory dump against a reference file
#[derive(Debug, Clone)]
pub struct ProgramTest {
    sources: Vec<String>,
    fs_files: Vec<PathBuf>,
    expected_dump: Option<ExpectedDump>,
}

#[async_trait]
impl TestHandler for ProgramTest {
    async fn run(&self, harness: &Harness, _name: &str, target: Target) -> Result<()> {
        harness
            .build_program(&self.sources, BuildOptions::default())
            .await?;

        let mut run = RunConfig::new(target);
        if !self.fs_files.is_empty() {
            let image = harness.work_file(FS_IMAGE_FILE);
            harness.make_fs_image(&image, &self.fs_files).await?;
            run = run.block_device(image);
        }
        let dump_file = harness.work_file(MEM_DUMP_FILE);
        if let Some(dump) = &self.expected_dump {
            run = run.dump(&dump_file, dump.base, dump.length);
        }

        let output = harness.run_program(run).await?;
        expect_pass(&output, "test program did not indicate pass")?;

        match &self.expected_dump {
            Some(dump) => assert_files_equal(&dump_file, &dump.expected, "memory dump mismatch"),
            None => Ok(()),
        }
    }
}

/// Register one directive-checked test per source file name in `base_dir`
pub fn register_generic_tests<I, S>(
    registry: &mut TestRegistry,
    base_dir: &Path,
    names: I,
    targets: &[Target],
) where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let handler = Arc::new(DirectiveTest {
        base_dir: base_dir.to_path_buf(),
    });
    registry.register(handler, names, targets);
}

/// Register one PASS/FAIL assembly test per source file name in `base_dir`
pub fn register_assembly_tests<I, S>(
    registry: &mut TestRegistry,
    base_dir: &Path,
    names: I,
    targets: &[Target],
) where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let handler = Arc::new(AssemblyTest {
        base_dir: base_dir.to_path_buf(),
    });
    registry.register(handler, names, targets);
}

/// Register one kernel-hosted, directive-checked test per source file name
pub fn register_kernel_tests<I, S>(
    registry: &mut TestRegistry,
    base_dir: &Path,
    names: I,
    targets: &[Target],
) where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let handler = Arc::new(KernelTest {
        base_dir: base_dir.to_path_buf(),
    });
    registry.register(handler, names, targets);
}

/// Register a render test; all `sources` build into one program
///
/// `expected_hash` is a SHA-1 or SHA-256 hex digest; anything else is a
/// configuration error.
pub fn register_render_test(
    registry: &mut TestRegistry,
    name: &str,
    sources: Vec<String>,
    expected_hash: &str,
    targets: &[Target],
) -> Result<()> {
    DigestKind::from_hex(expected_hash).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("render test {}: {}", name, msg)),
        other => other,
    })?;
    let handler = Arc::new(RenderTest {
        sources,
        expected_hash: expected_hash.trim().to_string(),
    });
    registry.add(name, targets, handler);
    Ok(())
}

/// Register a PASS/FAIL program test, optionally with a filesystem image
/// and a memory dump to compare
pub fn register_program_test(
    registry: &mut TestRegistry,
    name: &str,
    sources: Vec<String>,
    fs_files: Vec<PathBuf>,
    expected_dump: Option<ExpectedDump>,
    targets: &[Target],
) {
    let handler = Arc::new(ProgramTest {
        sources,
        fs_files,
        expected_dump,
    });
    registry.add(name, targets, handler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_pass() {
        assert!(expect_pass("...PASS\n", "x").is_ok());
        assert!(expect_pass("nothing\n", "x").is_err());
        let err = expect_pass("PASS\nFAIL 3\n", "Test failed").unwrap_err();
        assert_eq!(err.to_string(), "Test failed\nPASS\nFAIL 3\n");
        assert!(err.is_test_failure());
    }

    #[test]
    fn test_register_helpers() {
        let mut registry = TestRegistry::new();
        register_generic_tests(&mut registry, Path::new("libc"), ["printf.c"], &[]);
        register_assembly_tests(&mut registry, Path::new("core"), ["branch.S"], &[Target::Emulator]);
        register_render_test(
            &mut registry,
            "teapot",
            vec!["teapot.cpp".into()],
            "a9993e364706816aba3e25717850c26c9cd0d89d",
            &[Target::Simulator],
        )
        .unwrap();
        assert_eq!(
            registry.listing(),
            vec![
                "printf.c: emulator, simulator, hardware",
                "branch.S: emulator",
                "teapot: simulator",
            ]
        );
    }

    #[test]
    fn test_render_hash_length_checked_at_registration() {
        let mut registry = TestRegistry::new();
        let err = register_render_test(&mut registry, "teapot", vec![], "abcd", &[])
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("teapot"));
        assert!(registry.is_empty());

        let sha256 = crate::verify::digest_hex(b"frame");
        register_render_test(&mut registry, "sha256", vec![], &sha256, &[]).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_rejected_on_hardware_before_running() {
        use crate::common::config::Config;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        // Toolchain stubs succeed so the run configuration is reached
        for tool in ["clang", "elf2hex"] {
            let path = tmp.path().join(tool);
            std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let mut config = Config::default();
        config.paths.compiler_dir = tmp.path().to_path_buf();
        config.hardware.reset_command = Vec::new();
        let harness = Harness::new(config)
            .with_work_dir(tmp.path().join("work"))
            .with_serial_port(Some("/dev/null".into()));
        let test = RenderTest {
            sources: vec!["teapot.cpp".into()],
            expected_hash: "0".repeat(64),
        };

        let err = test
            .run(&harness, "teapot", Target::Hardware)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOption { .. }), "{err:?}");
    }
}
