//! Timeout-bounded subprocess execution
//!
//! The child's stdout and stderr share one pipe, so the captured text is a
//! single interleaved timeline. A watchdog task races the collector; the two
//! rendezvous on a [`CompletionFlag`] and exactly one of them wins. The child
//! lives inside a [`ChildGuard`], so it is killed on every exit path,
//! including the caller dropping the future on operator interrupt.

use std::io::Read;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

/// Time a child gets to exit after SIGTERM before it is killed
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// One-shot flag shared by the collector and the watchdog
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag; true only for the caller that set it first
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Term,
    Kill,
}

/// Owns the child process and kills it (and its process group) on drop
struct ChildGuard {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    fn signal(&mut self, signal: Signal) {
        tracing::debug!(pid = ?self.pid, ?signal, "Signalling child");
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let sig = match signal {
                Signal::Term => libc::SIGTERM,
                Signal::Kill => libc::SIGKILL,
            };
            // The child leads its own process group; reach its descendants too
            unsafe {
                libc::kill(-(pid as i32), sig);
            }
            if signal == Signal::Term {
                return;
            }
        }
        let _ = self.child.start_kill();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.signal(Signal::Kill);
        }
    }
}

/// Timer that asks the collector to stop the child once the deadline passes
struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn arm(
        timeout: Duration,
        grace: Duration,
        flag: CompletionFlag,
        kill_tx: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !flag.claim() {
                return;
            }
            tracing::debug!(timeout_secs = timeout.as_secs_f64(), "Watchdog expired");
            if kill_tx.send(Signal::Term).is_err() {
                return;
            }
            tokio::time::sleep(grace).await;
            tracing::warn!("Child ignored SIGTERM, killing it");
            let _ = kill_tx.send(Signal::Kill);
        });
        Self { handle }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs one child process under a wall-clock limit
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl ProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Run `program` and return its interleaved stdout+stderr
    ///
    /// Fails with [`Error::Timeout`] if the child is still running after
    /// `timeout`, and with [`Error::AbnormalExit`] (output attached) if it
    /// exits unsuccessfully.
    pub async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        tracing::debug!(program = %program.display(), ?args, "Spawning");

        let (mut reader, writer) = std::io::pipe()?;
        let writer_err = writer.try_clone()?;

        let mut guard = {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(if stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(writer)
                .stderr(writer_err)
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);

            let child = cmd.spawn().map_err(|e| Error::Spawn {
                program: program.display().to_string(),
                error: e.to_string(),
            })?;
            // Dropping `cmd` closes our copies of the pipe's write end
            ChildGuard::new(child)
        };

        if let (Some(input), Some(mut pipe)) = (stdin, guard.child.stdin.take()) {
            let input = input.to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!("Child closed stdin early: {}", e);
                }
            });
        }

        let mut drain = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });

        let flag = CompletionFlag::new();
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::arm(timeout, self.grace, flag.clone(), kill_tx);

        let mut status: Option<ExitStatus> = None;
        let mut output: Option<Vec<u8>> = None;
        while status.is_none() || output.is_none() {
            tokio::select! {
                res = guard.child.wait(), if status.is_none() => {
                    status = Some(res?);
                }
                res = &mut drain, if output.is_none() => {
                    let bytes = res.map_err(|e| Error::Internal(format!("Output reader failed: {}", e)))??;
                    output = Some(bytes);
                }
                Some(signal) = kill_rx.recv() => {
                    guard.signal(signal);
                }
            }
        }
        guard.reaped = true;
        drop(watchdog);

        let timed_out = !flag.claim();
        let status = status.ok_or_else(|| Error::Internal("missing exit status".into()))?;
        let output = String::from_utf8_lossy(&output.unwrap_or_default()).into_owned();

        if timed_out {
            tracing::debug!(program = %program.display(), "Timed out");
            return Err(Error::Timeout(timeout));
        }

        if !status.success() {
            // Non-zero return code. Probably target program crash.
            return Err(Error::AbnormalExit {
                status: status.to_string(),
                output,
            });
        }

        Ok(output)
    }
}

/// Run a program with the default grace period
pub async fn run_with_timeout(program: &Path, args: &[String], timeout: Duration) -> Result<String> {
    ProcessRunner::default().run(program, args, timeout, None).await
}
