//! Per-run context handed to every test handler
//!
//! A [`Harness`] bundles the configuration, the scratch directory and the
//! process runner, and exposes the build/run operations handlers compose.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::process::ProcessRunner;
use super::target::{RunConfig, Target};
use super::toolchain::{self, BuildOptions, ImageType};

const ELF_NAME: &str = "program.elf";
const HEX_NAME: &str = "program.hex";
const FS_IMAGE_NAME: &str = "fsimage.bin";

/// Shared, cheaply clonable test context
#[derive(Debug, Clone)]
pub struct Harness {
    config: Arc<Config>,
    work_dir: PathBuf,
    serial_port: Option<String>,
    runner: ProcessRunner,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let work_dir = config.paths.work_dir.clone();
        let runner = ProcessRunner::new(Duration::from_secs(config.timeouts.grace_secs));
        Self {
            config: Arc::new(config),
            work_dir,
            serial_port: None,
            runner,
        }
    }

    /// Use `dir` as the scratch directory instead of the configured one
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_serial_port(mut self, port: Option<String>) -> Self {
        self.serial_port = port;
        self
    }

    /// Look up the serial device if `targets` include hardware
    ///
    /// Missing the variable is a configuration error, raised before any
    /// test runs.
    pub fn resolve_serial_port(config: &Config, targets: &[Target]) -> Result<Option<String>> {
        if !targets.contains(&Target::Hardware) {
            return Ok(None);
        }
        let var = &config.hardware.serial_env;
        match std::env::var(var) {
            Ok(port) if !port.is_empty() => Ok(Some(port)),
            _ => Err(Error::MissingEnv(var.clone())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path of a file inside the scratch directory
    pub fn work_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn elf_file(&self) -> PathBuf {
        self.work_file(ELF_NAME)
    }

    pub fn hex_file(&self) -> PathBuf {
        self.work_file(HEX_NAME)
    }

    /// Compile/assemble `sources` into the scratch directory
    pub async fn build_program<S: AsRef<str>>(
        &self,
        sources: &[S],
        opts: BuildOptions,
    ) -> Result<PathBuf> {
        let sources: Vec<String> = sources.iter().map(|s| s.as_ref().to_string()).collect();
        toolchain::build_program(
            &self.config,
            &self.runner,
            &sources,
            &opts,
            &self.elf_file(),
            &self.hex_file(),
        )
        .await
    }

    /// Build a filesystem image holding `files`
    pub async fn make_fs_image(&self, image: &Path, files: &[PathBuf]) -> Result<()> {
        toolchain::make_fs_image(&self.config, &self.runner, image, files).await
    }

    /// Run the built program on a target and return what it printed
    pub async fn run_program(&self, run: RunConfig) -> Result<String> {
        run.validate()?;
        let invocation =
            run.command_line(&self.config, &self.hex_file(), self.serial_port.as_deref())?;

        if run.target == Target::Hardware {
            self.reset_board().await?;
        }

        let timeout = run
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.timeouts.run_secs));
        let output = self
            .runner
            .run(&invocation.program, &invocation.args, timeout, None)
            .await?;

        tracing::debug!("Program Output:\n{}", output);
        run.check_halted(&output)?;
        Ok(output)
    }

    /// Run the built user program under the kernel
    ///
    /// The kernel loads `program.elf` from a filesystem image built here.
    pub async fn run_kernel(&self, target: Target, timeout: Option<Duration>) -> Result<String> {
        let image = self.work_file(FS_IMAGE_NAME);
        self.make_fs_image(&image, &[self.elf_file()]).await?;

        let mut run = RunConfig::new(target)
            .block_device(&image)
            .executable(self.config.paths.kernel_dir.join("kernel.hex"));
        if let Some(timeout) = timeout {
            run = run.timeout(timeout);
        }
        self.run_program(run).await
    }

    /// Convenience for the common build-then-run sequence
    pub async fn build_and_run<S: AsRef<str>>(&self, sources: &[S], target: Target) -> Result<String> {
        let opts = BuildOptions::default().image_type(ImageType::BareMetal);
        self.build_program(sources, opts).await?;
        self.run_program(RunConfig::new(target)).await
    }

    async fn reset_board(&self) -> Result<()> {
        let Some((program, args)) = self.config.hardware.reset_command.split_first() else {
            return Ok(());
        };
        tracing::debug!(%program, "Resetting dev board");
        toolchain::run_tool(
            &self.runner,
            Path::new(program),
            args,
            Duration::from_secs(self.config.timeouts.toolchain_secs),
        )
        .await
        .map_err(|e| match e {
            Error::Toolchain { output, .. } => {
                Error::toolchain("Resetting dev board", output)
            }
            other => other,
        })?;
        Ok(())
    }
}
