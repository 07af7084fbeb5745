//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;
use crate::exec::Target;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Tool, library and scratch locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Target selection settings
    #[serde(default)]
    pub targets: TargetsConfig,

    /// Hardware (FPGA board) settings
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Render test settings
    #[serde(default)]
    pub render: RenderConfig,
}

/// Tool, library and scratch locations
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory containing clang, elf2hex and friends
    #[serde(default = "default_compiler_dir")]
    pub compiler_dir: PathBuf,

    /// Directory containing the emulator, simulator, serial_boot and mkfs
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    /// Directory containing built libraries (libc, libos, librender)
    #[serde(default = "default_lib_dir")]
    pub lib_dir: PathBuf,

    /// Directory containing library headers
    #[serde(default = "default_lib_include_dir")]
    pub lib_include_dir: PathBuf,

    /// Directory containing kernel.hex
    #[serde(default = "default_kernel_dir")]
    pub kernel_dir: PathBuf,

    /// Linker script used for raw images
    #[serde(default = "default_raw_linker_script")]
    pub raw_linker_script: PathBuf,

    /// Scratch directory recreated before every test
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            compiler_dir: default_compiler_dir(),
            bin_dir: default_bin_dir(),
            lib_dir: default_lib_dir(),
            lib_include_dir: default_lib_include_dir(),
            kernel_dir: default_kernel_dir(),
            raw_linker_script: default_raw_linker_script(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_compiler_dir() -> PathBuf {
    PathBuf::from("/usr/local/llvm-nyuzi/bin")
}
fn default_bin_dir() -> PathBuf {
    PathBuf::from("bin")
}
fn default_lib_dir() -> PathBuf {
    PathBuf::from("software/libs")
}
fn default_lib_include_dir() -> PathBuf {
    PathBuf::from("software/libs")
}
fn default_kernel_dir() -> PathBuf {
    PathBuf::from("software/kernel")
}
fn default_raw_linker_script() -> PathBuf {
    PathBuf::from("../one-segment.ld")
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default wall-clock limit for a target run
    #[serde(default = "default_run")]
    pub run_secs: u64,

    /// Wall-clock limit for each toolchain invocation
    #[serde(default = "default_toolchain")]
    pub toolchain_secs: u64,

    /// Time a timed-out child gets to exit after SIGTERM before SIGKILL
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            run_secs: default_run(),
            toolchain_secs: default_toolchain(),
            grace_secs: default_grace(),
        }
    }
}

fn default_run() -> u64 {
    60
}
fn default_toolchain() -> u64 {
    300
}
fn default_grace() -> u64 {
    2
}

/// Target selection settings
#[derive(Debug, Deserialize, Clone)]
pub struct TargetsConfig {
    /// Targets used when `--target` is not given
    #[serde(default = "default_targets")]
    pub default: Vec<Target>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            default: default_targets(),
        }
    }
}

fn default_targets() -> Vec<Target> {
    vec![Target::Simulator, Target::Emulator]
}

/// Hardware (FPGA board) settings
#[derive(Debug, Deserialize, Clone)]
pub struct HardwareConfig {
    /// Environment variable naming the serial device
    #[serde(default = "default_serial_env")]
    pub serial_env: String,

    /// Command that resets the board before each boot; empty disables reset
    #[serde(default = "default_reset_command")]
    pub reset_command: Vec<String>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            serial_env: default_serial_env(),
            reset_command: default_reset_command(),
        }
    }
}

fn default_serial_env() -> String {
    "SERIAL_PORT".to_string()
}
fn default_reset_command() -> Vec<String> {
    vec![
        "quartus_stp".to_string(),
        "-t".to_string(),
        "reset_altera.tcl".to_string(),
    ]
}

/// Render test settings
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Image converter executable (ImageMagick `convert`)
    #[serde(default = "default_converter")]
    pub converter: String,

    /// Framebuffer width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Framebuffer height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Physical address of the framebuffer
    #[serde(default = "default_fb_base")]
    pub framebuffer_base: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            converter: default_converter(),
            width: default_width(),
            height: default_height(),
            framebuffer_base: default_fb_base(),
        }
    }
}

fn default_converter() -> String {
    "convert".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fb_base() -> u64 {
    0x200000
}

impl RenderConfig {
    /// Size in bytes of a 32bpp framebuffer
    pub fn framebuffer_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}

impl Config {
    /// Load configuration from an explicit file, or the default config file
    ///
    /// Returns default configuration if no file exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve a tool from `bin_dir`, falling back to `PATH`
    pub fn bin_tool(&self, name: &str) -> PathBuf {
        resolve_tool(&self.paths.bin_dir, name)
    }

    /// Resolve a tool from `compiler_dir`, falling back to `PATH`
    pub fn compiler_tool(&self, name: &str) -> PathBuf {
        resolve_tool(&self.paths.compiler_dir, name)
    }
}

fn resolve_tool(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if candidate.exists() {
        return candidate;
    }
    which::which(name).unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.timeouts.run_secs, 60);
        assert_eq!(config.timeouts.grace_secs, 2);
        assert_eq!(
            config.targets.default,
            vec![Target::Simulator, Target::Emulator]
        );
        assert_eq!(config.hardware.serial_env, "SERIAL_PORT");
        assert_eq!(config.render.framebuffer_len(), 0x12c000);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
[paths]
bin_dir = "/opt/nyuzi/bin"

[timeouts]
run_secs = 5

[targets]
default = ["emulator", "fpga"]

[hardware]
reset_command = []
"#,
        )
        .unwrap();
        assert_eq!(config.paths.bin_dir, PathBuf::from("/opt/nyuzi/bin"));
        assert_eq!(config.paths.work_dir, PathBuf::from("work"));
        assert_eq!(config.timeouts.run_secs, 5);
        assert_eq!(config.timeouts.toolchain_secs, 300);
        assert_eq!(
            config.targets.default,
            vec![Target::Emulator, Target::Hardware]
        );
        assert!(config.hardware.reset_command.is_empty());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[targets]\ndefault = [\"qemu\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_bin_tool_falls_back_to_dir_join() {
        let mut config = Config::default();
        config.paths.bin_dir = PathBuf::from("/nonexistent/bin");
        let tool = config.bin_tool("definitely-not-a-real-tool-name");
        assert_eq!(tool, PathBuf::from("/nonexistent/bin/definitely-not-a-real-tool-name"));
    }
}
