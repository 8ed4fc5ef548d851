//! Sandbox Runtime Adapter contract.
//!
//! The sandbox owns a file system and can spawn processes. The engine only
//! needs three primitives from it, so this trait stays narrow and can be
//! implemented by a local process runner, a remote container, or a test
//! double.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// Error type for sandbox operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// Runtime not available (not booted, binary missing)
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    /// Process could not be started
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    /// Process started but its exit status was lost
    #[error("process error: {0}")]
    Process(String),
}

/// Kill switch for a running process. Must be idempotent and safe to call
/// after the process already exited.
pub trait ProcessHandle: Send + Sync {
    fn kill(&self);
}

/// A started process: its output streams, its exit future and a handle to
/// terminate it.
pub struct SpawnedProcess {
    pub output: BoxStream<'static, Bytes>,
    /// Separate error stream, for runtimes that keep one.
    pub stderr: Option<BoxStream<'static, Bytes>>,
    pub exit: BoxFuture<'static, Result<i32, SandboxError>>,
    pub handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// The external runtime the engine executes code in.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError>;
}
