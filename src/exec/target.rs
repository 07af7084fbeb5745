//! Execution targets and per-run configuration
//!
//! Each target is driven by a different binary with its own flag syntax.
//! [`RunConfig`] describes one run and turns itself into a command line.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::config::Config;
use crate::common::{Error, Result};

/// Marker the simulator prints when the program halted cleanly
pub const HALTED_MARKER: &str = "***HALTED***";

/// Where a compiled test program runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Instruction-set emulator
    Emulator,
    /// Cycle-accurate (verilator) simulator
    #[serde(alias = "verilator")]
    #[value(alias = "verilator")]
    Simulator,
    /// FPGA board booted over a serial port
    #[serde(alias = "fpga")]
    #[value(alias = "fpga")]
    Hardware,
}

impl Target {
    /// Every target, in display order
    pub const ALL: [Target; 3] = [Target::Emulator, Target::Simulator, Target::Hardware];

    /// Name used in labels and listings
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Emulator => "emulator",
            Target::Simulator => "simulator",
            Target::Hardware => "hardware",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory region the target writes to a file after the program finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    pub file: PathBuf,
    pub base: u64,
    pub length: u64,
}

/// One invocation of a target
///
/// Built with the consuming setters below and not changed afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: Target,
    /// Image to load; `None` means the working directory's hex file
    pub executable: Option<PathBuf>,
    /// File presented to the program as a virtual SD/MMC device
    pub block_device: Option<PathBuf>,
    pub dump: Option<MemoryDump>,
    /// Wall-clock limit; `None` uses the configured default
    pub timeout: Option<Duration>,
    /// Randomize hardware thread scheduling (emulator)
    pub randomize_threads: bool,
    /// Write back the L2 cache before dumping memory (simulator)
    pub flush_l2: bool,
    /// Print an instruction trace (simulator)
    pub trace: bool,
}

/// Program and arguments produced by [`RunConfig::command_line`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunConfig {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            executable: None,
            block_device: None,
            dump: None,
            timeout: None,
            randomize_threads: true,
            flush_l2: false,
            trace: false,
        }
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn block_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.block_device = Some(path.into());
        self
    }

    pub fn dump(mut self, file: impl Into<PathBuf>, base: u64, length: u64) -> Self {
        self.dump = Some(MemoryDump {
            file: file.into(),
            base,
            length,
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn randomize_threads(mut self, enabled: bool) -> Self {
        self.randomize_threads = enabled;
        self
    }

    pub fn flush_l2(mut self, enabled: bool) -> Self {
        self.flush_l2 = enabled;
        self
    }

    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Reject option combinations the target cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.target == Target::Hardware {
            if self.dump.is_some() {
                return Err(Error::unsupported("dump file", self.target));
            }
            if self.flush_l2 {
                return Err(Error::unsupported("flush_l2", self.target));
            }
        }
        Ok(())
    }

    /// Build the target command line
    ///
    /// `default_executable` is used when no executable was set; `serial_port`
    /// is required for hardware runs.
    pub fn command_line(
        &self,
        config: &Config,
        default_executable: &Path,
        serial_port: Option<&str>,
    ) -> Result<Invocation> {
        self.validate()?;
        let executable = self
            .executable
            .as_deref()
            .unwrap_or(default_executable)
            .display()
            .to_string();
        let mut args = Vec::new();

        let program = match self.target {
            Target::Emulator => {
                if self.randomize_threads {
                    args.push("-a".to_string());
                }
                if let Some(block) = &self.block_device {
                    args.push("-b".to_string());
                    args.push(block.display().to_string());
                }
                if let Some(dump) = &self.dump {
                    args.push("-d".to_string());
                    args.push(format!(
                        "{},{:#x},{:#x}",
                        dump.file.display(),
                        dump.base,
                        dump.length
                    ));
                }
                args.push(executable);
                config.bin_tool("nyuzi_emulator")
            }
            Target::Simulator => {
                if let Some(block) = &self.block_device {
                    args.push(format!("+block={}", block.display()));
                }
                if let Some(dump) = &self.dump {
                    args.push(format!("+memdumpfile={}", dump.file.display()));
                    args.push(format!("+memdumpbase={:x}", dump.base));
                    args.push(format!("+memdumplen={:x}", dump.length));
                }
                if self.flush_l2 {
                    args.push("+autoflushl2=1".to_string());
                }
                if self.trace {
                    args.push("+trace".to_string());
                }
                args.push(format!("+bin={}", executable));
                config.bin_tool("nyuzi_vsim")
            }
            Target::Hardware => {
                let port = serial_port
                    .ok_or_else(|| Error::MissingEnv(config.hardware.serial_env.clone()))?;
                args.push(port.to_string());
                args.push(executable);
                if let Some(block) = &self.block_device {
                    args.push(block.display().to_string());
                }
                config.bin_tool("serial_boot")
            }
        };

        Ok(Invocation { program, args })
    }

    /// Check the target-specific termination condition on captured output
    pub fn check_halted(&self, output: &str) -> Result<()> {
        if self.target == Target::Simulator && !output.contains(HALTED_MARKER) {
            return Err(Error::DidNotHalt(output.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.paths.bin_dir = PathBuf::from("/tools/bin");
        config
    }

    fn invocation(run: &RunConfig, port: Option<&str>) -> Invocation {
        run.command_line(&config(), Path::new("work/program.hex"), port)
            .unwrap()
    }

    #[test]
    fn test_emulator_command_line() {
        let run = RunConfig::new(Target::Emulator)
            .block_device("work/fsimage.bin")
            .dump("work/fb.bin", 0x200000, 0x12c000);
        let inv = invocation(&run, None);
        assert!(inv.program.ends_with("nyuzi_emulator"));
        assert_eq!(
            inv.args,
            vec![
                "-a",
                "-b",
                "work/fsimage.bin",
                "-d",
                "work/fb.bin,0x200000,0x12c000",
                "work/program.hex",
            ]
        );
    }

    #[test]
    fn test_emulator_without_randomization() {
        let run = RunConfig::new(Target::Emulator)
            .randomize_threads(false)
            .executable("kernel.hex");
        assert_eq!(invocation(&run, None).args, vec!["kernel.hex"]);
    }

    #[test]
    fn test_simulator_command_line() {
        let run = RunConfig::new(Target::Simulator)
            .dump("fb.bin", 0x200000, 0x12c000)
            .flush_l2(true)
            .trace(true);
        let inv = invocation(&run, None);
        assert!(inv.program.ends_with("nyuzi_vsim"));
        assert_eq!(
            inv.args,
            vec![
                "+memdumpfile=fb.bin",
                "+memdumpbase=200000",
                "+memdumplen=12c000",
                "+autoflushl2=1",
                "+trace",
                "+bin=work/program.hex",
            ]
        );
    }

    #[test]
    fn test_hardware_command_line() {
        let run = RunConfig::new(Target::Hardware).block_device("fs.bin");
        let inv = invocation(&run, Some("/dev/ttyUSB0"));
        assert!(inv.program.ends_with("serial_boot"));
        assert_eq!(inv.args, vec!["/dev/ttyUSB0", "work/program.hex", "fs.bin"]);
    }

    #[test]
    fn test_hardware_requires_serial_port() {
        let run = RunConfig::new(Target::Hardware);
        let err = run
            .command_line(&config(), Path::new("p.hex"), None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingEnv(ref var) if var == "SERIAL_PORT"));
    }

    #[test]
    fn test_hardware_rejects_dump_and_flush() {
        let dump = RunConfig::new(Target::Hardware).dump("fb.bin", 0, 16);
        assert!(matches!(
            dump.validate(),
            Err(Error::UnsupportedOption { .. })
        ));

        let flush = RunConfig::new(Target::Hardware).flush_l2(true);
        let err = flush
            .command_line(&config(), Path::new("p.hex"), Some("/dev/ttyS0"))
            .unwrap_err();
        assert_eq!(err.to_string(), "flush_l2 is not supported on hardware");
    }

    #[test]
    fn test_simulator_must_halt() {
        let run = RunConfig::new(Target::Simulator);
        assert!(run.check_halted("hello\n***HALTED***\n").is_ok());
        assert!(matches!(
            run.check_halted("hello\n"),
            Err(Error::DidNotHalt(_))
        ));
        assert!(RunConfig::new(Target::Emulator).check_halted("hello").is_ok());
    }

    #[test]
    fn test_target_aliases() {
        use clap::ValueEnum;
        assert_eq!(
            Target::from_str("verilator", false).unwrap(),
            Target::Simulator
        );
        assert_eq!(Target::from_str("fpga", false).unwrap(), Target::Hardware);
        assert_eq!(Target::Hardware.to_string(), "hardware");
    }
}
