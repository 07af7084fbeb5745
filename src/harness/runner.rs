//! Test runner implementation
//!
//! Runs the selected (test, target) pairs one at a time, each in a freshly
//! emptied working directory, and collects a report. A failing or panicking
//! test never stops the run; an operator interrupt does.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use colored::Colorize;
use futures_util::FutureExt;

use crate::common::paths::recreate_dir;
use crate::common::{Error, Result};
use crate::exec::{Harness, Target};

use super::registry::{TestCase, TestRegistry};

/// Column where PASS/FAIL is printed
const OUTPUT_ALIGN: usize = 50;

/// Outcome of one (test, target) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    /// Failure detail
    Fail(String),
}

/// Result of a test run
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub target: Target,
    pub outcome: Outcome,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.target)
    }
}

/// Results of a whole run, in execution order
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub results: Vec<TestResult>,
}

impl Report {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.passed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    /// True iff no test failed
    pub fn success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Print failure details and the final tally
    pub fn print_summary(&self) {
        let failures: Vec<&TestResult> = self.failed().collect();
        if !failures.is_empty() {
            println!("{}", "Failing tests:".red().bold());
            for result in &failures {
                println!("{}", result.label().bold());
                if let Outcome::Fail(detail) = &result.outcome {
                    println!("{}", detail);
                }
            }
        }
        println!("{}/{} tests failed", failures.len(), self.total());
    }
}

/// Drives registered tests against the selected targets
pub struct TestRunner {
    registry: TestRegistry,
    harness: Harness,
}

impl TestRunner {
    pub fn new(registry: TestRegistry, harness: Harness) -> Self {
        Self { registry, harness }
    }

    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Select the (test, target) pairs to run, in registration order
    ///
    /// Fails with [`Error::UnknownTest`] if any requested name is not
    /// registered. An empty `names` slice selects every test.
    pub fn plan(&self, names: &[String], targets: &[Target]) -> Result<Vec<(&TestCase, Target)>> {
        if let Some(unknown) = names.iter().find(|n| self.registry.find(n).is_none()) {
            return Err(Error::UnknownTest(unknown.clone()));
        }

        Ok(self
            .registry
            .iter()
            .filter(|case| names.is_empty() || names.contains(&case.name))
            .flat_map(|case| {
                case.targets
                    .iter()
                    .filter(|t| targets.contains(t))
                    .map(move |t| (case, *t))
            })
            .collect())
    }

    /// Run the selected tests; Ctrl-C aborts the run
    pub async fn execute(&self, names: &[String], targets: &[Target]) -> Result<Report> {
        self.execute_until(names, targets, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the selected tests until they finish or `abort` completes
    ///
    /// When `abort` completes the current test is dropped (killing any child
    /// it started) and [`Error::Interrupted`] is returned.
    pub async fn execute_until<F>(
        &self,
        names: &[String],
        targets: &[Target],
        abort: F,
    ) -> Result<Report>
    where
        F: Future<Output = ()>,
    {
        let plan = self.plan(names, targets)?;
        install_panic_hook();
        tokio::pin!(abort);

        let mut report = Report::default();
        for (case, target) in plan {
            let label = format!("{} ({})", case.name, target);
            print!("{:<width$}", label, width = OUTPUT_ALIGN);
            let _ = std::io::stdout().flush();

            let outcome = tokio::select! {
                biased;
                _ = &mut abort => {
                    println!();
                    tracing::info!("Interrupted, skipping remaining tests");
                    return Err(Error::Interrupted);
                }
                outcome = self.run_case(case, target) => outcome?,
            };

            match &outcome {
                Outcome::Pass => println!("[{}]", "PASS".green()),
                Outcome::Fail(_) => println!("[{}]", "FAIL".red()),
            }
            report.results.push(TestResult {
                name: case.name.clone(),
                target,
                outcome,
            });
        }

        Ok(report)
    }

    /// Run one pair, turning everything but an interrupt into an outcome
    async fn run_case(&self, case: &TestCase, target: Target) -> Result<Outcome> {
        if let Err(e) = recreate_dir(self.harness.work_dir()) {
            return Ok(Outcome::Fail(fault_detail(&Error::Io(e))));
        }

        let mut fut = std::pin::pin!(
            AssertUnwindSafe(case.handler.run(&self.harness, &case.name, target)).catch_unwind()
        );
        let result = std::future::poll_fn(|cx| {
            let _scope = HandlerScope::enter();
            fut.as_mut().poll(cx)
        })
        .await;

        let outcome = match result {
            Ok(Ok(())) => Outcome::Pass,
            Ok(Err(Error::Interrupted)) => return Err(Error::Interrupted),
            Ok(Err(e)) if e.is_test_failure() => Outcome::Fail(e.to_string()),
            Ok(Err(e)) => Outcome::Fail(fault_detail(&e)),
            Err(payload) => Outcome::Fail(panic_detail(payload)),
        };
        if let Outcome::Fail(detail) = &outcome {
            tracing::debug!(test = %case.name, %target, "Failed: {}", detail);
        }
        Ok(outcome)
    }
}

fn fault_detail(err: &Error) -> String {
    let mut detail = format!("Test threw exception:\n{}", err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    detail.push_str(&format!("\n{:?}", err));
    detail
}

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Marks the current thread as polling a test handler
struct HandlerScope {
    previous: bool,
}

impl HandlerScope {
    fn enter() -> Self {
        Self {
            previous: IN_HANDLER.with(|f| f.replace(true)),
        }
    }
}

impl Drop for HandlerScope {
    fn drop(&mut self) {
        IN_HANDLER.with(|f| f.set(self.previous));
    }
}

/// Record handler panics (with a backtrace) instead of printing them
/// mid-table; panics elsewhere go to the previous hook
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if IN_HANDLER.with(|f| f.get()) {
                let trace = format!("{}\n{}", info, Backtrace::force_capture());
                LAST_PANIC.with(|p| *p.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    let recorded = LAST_PANIC.with(|p| p.borrow_mut().take());
    let detail = recorded.unwrap_or_else(|| {
        if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        }
    });
    format!("Test threw exception:\n{}", detail)
}
