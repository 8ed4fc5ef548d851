//! Package installation for missing dependencies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::events::OutputStream;
use crate::sandbox::{SandboxError, SandboxRuntime};
use crate::supervisor::{supervise, OutputSink, RunExit, SupervisorConfig};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("installer exited with code {code}: {output}")]
    Failed { code: i32, output: String },
    #[error("install timed out after {0:?}")]
    TimedOut(Duration),
    #[error("install interrupted: {0}")]
    Interrupted(String),
}

/// Installs packages into the sandbox.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(
        &self,
        sandbox: &dyn SandboxRuntime,
        packages: &[String],
    ) -> Result<(), InstallError>;
}

/// `npm install <packages>` inside the sandbox.
#[derive(Debug, Clone)]
pub struct NpmInstaller {
    command: String,
    timeout: Duration,
}

impl Default for NpmInstaller {
    fn default() -> Self {
        Self::new("npm", Duration::from_secs(120))
    }
}

impl NpmInstaller {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn args(packages: &[String]) -> Vec<String> {
        let mut args = vec!["install".to_string(), "--no-audit".to_string(), "--no-fund".to_string()];
        args.extend(packages.iter().cloned());
        args
    }
}

struct Discard;

impl OutputSink for Discard {
    fn on_output(&self, _stream: OutputStream, _text: &str) {}
    fn on_line(&self, stream: OutputStream, line: &str) {
        tracing::trace!(?stream, line, "installer output");
    }
}

#[async_trait]
impl PackageInstaller for NpmInstaller {
    async fn install(
        &self,
        sandbox: &dyn SandboxRuntime,
        packages: &[String],
    ) -> Result<(), InstallError> {
        if packages.is_empty() {
            return Ok(());
        }
        tracing::info!(?packages, "installing packages");

        let process = sandbox.spawn(&self.command, &Self::args(packages)).await?;
        let (_stop_tx, stop_rx) = oneshot::channel();
        let config = SupervisorConfig {
            timeout: self.timeout,
            drain_grace: Duration::from_millis(250),
            capture: true,
        };
        let run = supervise(process, stop_rx, config, Arc::new(Discard)).await;

        match run.exit {
            RunExit::Exited(0) => Ok(()),
            RunExit::Exited(code) => Err(InstallError::Failed {
                code,
                output: if run.stderr.is_empty() {
                    run.stdout
                } else {
                    run.stderr
                },
            }),
            RunExit::TimedOut => Err(InstallError::TimedOut(self.timeout)),
            RunExit::Cancelled => Err(InstallError::Interrupted("cancelled".to_string())),
            RunExit::Failed(message) => Err(InstallError::Interrupted(message)),
        }
    }
}
