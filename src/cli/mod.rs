//! Command-line surface
//!
//! Parses arguments, builds the registry from the suite file and runs the
//! selected tests.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::exec::{Harness, Target};
use crate::harness::{Suite, TestRegistry, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "functest", about = "Functional test runner for the processor toolchain")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Run only on this target (default: targets from the config file)
    #[arg(long, value_enum)]
    pub target: Option<Target>,

    /// Log program output and directive searches
    #[arg(long)]
    pub debug: bool,

    /// List registered tests and their targets, then exit
    #[arg(long)]
    pub list: bool,

    /// Suite file describing the tests
    #[arg(long, default_value = "suite.yaml")]
    pub suite: PathBuf,

    /// Configuration file (default: platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tests to run (default: all)
    pub names: Vec<String>,
}

/// Build the registry described by a suite file
pub fn load_registry(suite_path: &Path) -> Result<TestRegistry> {
    let suite = Suite::load(suite_path)?;
    let dir = match suite_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut registry = TestRegistry::new();
    suite.register(&mut registry, &dir)?;
    Ok(registry)
}

/// Run the CLI; the returned value is the process exit code
pub async fn run(cli: Cli) -> i32 {
    match execute(cli).await {
        Ok(code) => code,
        Err(Error::Interrupted) => {
            eprintln!("Interrupted");
            1
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;
    let registry = load_registry(&cli.suite)?;

    if cli.list {
        for line in registry.listing() {
            println!("{}", line);
        }
        return Ok(0);
    }

    let targets = match cli.target {
        Some(target) => vec![target],
        None => config.targets.default.clone(),
    };
    let serial_port = Harness::resolve_serial_port(&config, &targets)?;
    tracing::debug!(?targets, tests = registry.len(), "Starting run");

    let harness = Harness::new(config).with_serial_port(serial_port);
    let runner = TestRunner::new(registry, harness);
    let report = runner.execute(&cli.names, &targets).await?;
    report.print_summary();

    Ok(if report.success() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "functest", "--target", "verilator", "--debug", "printf.c", "atoi.c",
        ]);
        assert_eq!(cli.target, Some(Target::Simulator));
        assert!(cli.debug);
        assert!(!cli.list);
        assert_eq!(cli.suite, PathBuf::from("suite.yaml"));
        assert_eq!(cli.names, vec!["printf.c", "atoi.c"]);
    }

    #[test]
    fn test_rejects_unknown_target() {
        assert!(Cli::try_parse_from(["functest", "--target", "qemu"]).is_err());
    }

    #[test]
    fn test_load_registry_relative_to_suite() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.c"), "").unwrap();
        let suite = tmp.path().join("suite.yaml");
        std::fs::write(&suite, "generic:\n  - extensions: [.c]\n").unwrap();

        let registry = load_registry(&suite).unwrap();
        assert_eq!(
            registry.listing(),
            vec!["hello.c: emulator, simulator, hardware"]
        );
    }

    #[test]
    fn test_missing_suite_is_config_error() {
        let err = load_registry(Path::new("/nonexistent/suite.yaml")).unwrap_err();
        assert!(err.is_configuration());
    }
}
