//! Ad hoc terminal commands (`npm ls`, `node --version`, ...).
//!
//! Commands have their own single-flight slot, separate from the
//! [`Coordinator`](crate::coordinator::Coordinator): a long `npm install`
//! typed in the terminal does not block running code, and vice versa.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::coordinator::{EXIT_CODE_CANCELLED, EXIT_CODE_LOST, EXIT_CODE_TIMEOUT};
use crate::events::OutputStream;
use crate::sandbox::{SandboxError, SandboxRuntime};
use crate::supervisor::{supervise, OutputSink, RunExit, SupervisorConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("a command is already running")]
    Busy,
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: f64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }
}

struct Quiet;

impl OutputSink for Quiet {
    fn on_output(&self, _stream: OutputStream, _text: &str) {}
    fn on_line(&self, _stream: OutputStream, _line: &str) {}
}

#[derive(Default)]
struct Slot {
    busy: bool,
    stop: Option<oneshot::Sender<()>>,
}

struct SlotGuard<'a>(&'a Mutex<Slot>);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        slot.busy = false;
        slot.stop = None;
    }
}

pub struct CommandRunner {
    sandbox: Arc<dyn SandboxRuntime>,
    slot: Mutex<Slot>,
}

impl CommandRunner {
    pub fn new(sandbox: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            sandbox,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().map(|slot| slot.busy).unwrap_or(false)
    }

    /// Kill the running command, if any.
    pub fn stop(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        match slot.stop.take() {
            Some(stop) => stop.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.run_streaming(command, args, timeout, Arc::new(Quiet))
            .await
    }

    /// Run a command, forwarding its output to `sink` as it arrives.
    pub async fn run_streaming(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
        sink: Arc<dyn OutputSink>,
    ) -> Result<CommandOutput, CommandError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let _guard = {
            let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
            if slot.busy {
                return Err(CommandError::Busy);
            }
            slot.busy = true;
            slot.stop = Some(stop_tx);
            SlotGuard(&self.slot)
        };

        let started = Instant::now();
        tracing::debug!(command, ?args, "running command");
        let process = self.sandbox.spawn(command, args).await?;
        let run = supervise(
            process,
            stop_rx,
            SupervisorConfig {
                timeout,
                drain_grace: Duration::from_millis(250),
                capture: true,
            },
            sink,
        )
        .await;

        let (exit_code, timed_out, cancelled, mut stderr) = match run.exit {
            RunExit::Exited(code) => (code, false, false, run.stderr),
            RunExit::TimedOut => (EXIT_CODE_TIMEOUT, true, false, run.stderr),
            RunExit::Cancelled => (EXIT_CODE_CANCELLED, false, true, run.stderr),
            RunExit::Failed(message) => {
                let mut stderr = run.stderr;
                stderr.push_str(&message);
                (EXIT_CODE_LOST, false, false, stderr)
            }
        };
        if timed_out {
            stderr.push_str(&format!("command timed out after {}ms", timeout.as_millis()));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: run.stdout,
            stderr,
            timed_out,
            cancelled,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
