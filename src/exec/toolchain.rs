//! Compiler, hex conversion and filesystem-image wrappers
//!
//! These only marshal arguments for external tools; failures come back as
//! [`Error::Toolchain`] with the tool's output attached.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::process::ProcessRunner;

/// Kind of image `build_program` produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageType {
    /// Standalone program with ELF linkage, converted to a hex image
    #[default]
    BareMetal,
    /// Headerless binary linked at address 0, hex-dumped
    Raw,
    /// ELF linked at 0x1000 against the kernel libraries, run under the kernel
    User,
}

/// Compiler settings for one build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub image_type: ImageType,
    pub opt_level: String,
    pub cflags: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            image_type: ImageType::BareMetal,
            opt_level: "-O3".to_string(),
            cflags: Vec::new(),
        }
    }
}

impl BuildOptions {
    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn opt_level(mut self, level: impl Into<String>) -> Self {
        self.opt_level = level.into();
        self
    }

    pub fn cflags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cflags.extend(flags.into_iter().map(Into::into));
        self
    }
}

fn is_c_source(path: &str) -> bool {
    path.ends_with(".c") || path.ends_with(".cpp")
}

/// Arguments for the compiler driver, without the program name
pub fn compiler_args(
    config: &Config,
    sources: &[String],
    opts: &BuildOptions,
    elf_file: &Path,
) -> Vec<String> {
    let paths = &config.paths;
    let mut args = vec![
        "-o".to_string(),
        elf_file.display().to_string(),
        "-w".to_string(),
        opts.opt_level.clone(),
    ];
    args.extend(opts.cflags.iter().cloned());

    match opts.image_type {
        ImageType::Raw => args.push(format!(
            "-Wl,--script,{},--oformat,binary",
            paths.raw_linker_script.display()
        )),
        ImageType::User => args.push("-Wl,--image-base=0x1000".to_string()),
        ImageType::BareMetal => {}
    }

    args.extend(sources.iter().cloned());

    if sources.iter().any(|s| is_c_source(s)) {
        let include = &paths.lib_include_dir;
        args.push(format!("-I{}", include.join("libc/include").display()));
        args.push(format!("-I{}", include.join("libos").display()));
        args.push(paths.lib_dir.join("libc/libc.a").display().to_string());
        let libos = match opts.image_type {
            ImageType::User => "libos/kernel/libos-kern.a",
            _ => "libos/bare-metal/libos-bare.a",
        };
        args.push(paths.lib_dir.join(libos).display().to_string());
    }

    args
}

/// Run one toolchain program; any failure is a toolchain failure
pub async fn run_tool(
    runner: &ProcessRunner,
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<String> {
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    match runner.run(program, args, timeout, None).await {
        Ok(output) => Ok(output),
        Err(Error::AbnormalExit { output, .. }) => Err(Error::toolchain(&tool, output)),
        Err(Error::Spawn { error, .. }) => Err(Error::toolchain(&tool, error)),
        Err(Error::Timeout(limit)) => {
            Err(Error::toolchain(&tool, format!("timed out after {:?}", limit)))
        }
        Err(e) => Err(e),
    }
}

/// Compile and link `sources`, returning the image to execute
///
/// Bare-metal and raw builds return the hex file; user builds return the ELF.
pub async fn build_program(
    config: &Config,
    runner: &ProcessRunner,
    sources: &[String],
    opts: &BuildOptions,
    elf_file: &Path,
    hex_file: &Path,
) -> Result<PathBuf> {
    let timeout = Duration::from_secs(config.timeouts.toolchain_secs);
    let clang = config.compiler_tool("clang");
    let args = compiler_args(config, sources, opts, elf_file);
    tracing::debug!(?sources, image = ?opts.image_type, "Building program");

    run_tool(runner, &clang, &args, timeout)
        .await
        .map_err(|e| match e {
            Error::Toolchain { output, .. } => {
                Error::toolchain("Compilation", output)
            }
            other => other,
        })?;

    match opts.image_type {
        ImageType::Raw => {
            dump_hex(elf_file, hex_file)?;
            Ok(hex_file.to_path_buf())
        }
        ImageType::BareMetal => {
            let elf2hex = config.compiler_tool("elf2hex");
            let args = vec![
                "-o".to_string(),
                hex_file.display().to_string(),
                elf_file.display().to_string(),
            ];
            run_tool(runner, &elf2hex, &args, timeout).await?;
            Ok(hex_file.to_path_buf())
        }
        ImageType::User => Ok(elf_file.to_path_buf()),
    }
}

/// Write `input` as hex text, one 32-bit word (4 bytes) per line
pub fn dump_hex(input: &Path, output: &Path) -> Result<()> {
    let data = std::fs::read(input).map_err(|e| Error::file_read(input, e))?;
    let mut out = std::io::BufWriter::new(std::fs::File::create(output)?);
    for word in data.chunks(4) {
        out.write_all(hex::encode(word).as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Build a filesystem image containing `files`
pub async fn make_fs_image(
    config: &Config,
    runner: &ProcessRunner,
    image: &Path,
    files: &[PathBuf],
) -> Result<()> {
    let mkfs = config.bin_tool("mkfs");
    let mut args = vec![image.display().to_string()];
    args.extend(files.iter().map(|f| f.display().to_string()));
    run_tool(
        runner,
        &mkfs,
        &args,
        Duration::from_secs(config.timeouts.toolchain_secs),
    )
    .await?;
    Ok(())
}
