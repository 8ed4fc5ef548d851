//! Process supervision: output pumping and the exit / deadline / stop race.
//!
//! Whichever of the three settles first decides the outcome. The losers
//! are undone by guards, not by the happy path: the process is killed by
//! [`KillOnDrop`] unless it exited on its own, the deadline timer is
//! dropped with the `select!`, and output pumps are aborted by
//! [`PumpSet`]. This holds even when the supervising future itself is
//! dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::events::OutputStream;
use crate::protocol::LineDecoder;
use crate::sandbox::{ProcessHandle, SpawnedProcess};

/// Receives process output as it arrives.
pub trait OutputSink: Send + Sync + 'static {
    /// A decoded piece of raw output.
    fn on_output(&self, stream: OutputStream, text: &str);
    /// A complete line.
    fn on_line(&self, stream: OutputStream, line: &str);
}

/// How the race ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Exited(i32),
    TimedOut,
    Cancelled,
    /// The exit status could not be observed.
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub timeout: Duration,
    /// How long to keep reading output after a natural exit.
    pub drain_grace: Duration,
    /// Keep a copy of stdout/stderr for the result.
    pub capture: bool,
}

#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub exit: RunExit,
    pub stdout: String,
    pub stderr: String,
}

/// Supervise `process` until it exits, the deadline passes or `stop` fires.
///
/// When this returns the process is either exited or killed and no pump is
/// running, so `sink` sees nothing further.
pub async fn supervise(
    process: SpawnedProcess,
    stop: oneshot::Receiver<()>,
    config: SupervisorConfig,
    sink: Arc<dyn OutputSink>,
) -> SupervisedRun {
    let SpawnedProcess {
        output,
        stderr,
        mut exit,
        handle,
    } = process;

    let mut kill_guard = KillOnDrop::new(handle);
    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));

    let mut pumps = PumpSet::default();
    pumps.spawn(pump(
        output,
        OutputStream::Stdout,
        sink.clone(),
        config.capture.then(|| stdout_buf.clone()),
    ));
    if let Some(stderr) = stderr {
        pumps.spawn(pump(
            stderr,
            OutputStream::Stderr,
            sink.clone(),
            config.capture.then(|| stderr_buf.clone()),
        ));
    }

    // A dropped stop sender means "nobody can cancel", not "cancel now".
    let stopped = async {
        if stop.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let exit = tokio::select! {
        status = &mut exit => match status {
            Ok(code) => RunExit::Exited(code),
            Err(err) => RunExit::Failed(err.to_string()),
        },
        _ = tokio::time::sleep(config.timeout) => RunExit::TimedOut,
        _ = stopped => RunExit::Cancelled,
    };

    match &exit {
        RunExit::Exited(code) => {
            tracing::debug!(code, "process exited");
            kill_guard.disarm();
            if tokio::time::timeout(config.drain_grace, pumps.join())
                .await
                .is_err()
            {
                tracing::debug!("output still open after exit, closing pumps");
            }
            pumps.abort().await;
        }
        other => {
            tracing::debug!(exit = ?other, "terminating process");
            drop(kill_guard);
            pumps.abort().await;
        }
    }

    SupervisedRun {
        exit,
        stdout: take(&stdout_buf),
        stderr: take(&stderr_buf),
    }
}

fn take(buf: &Arc<Mutex<String>>) -> String {
    buf.lock().map(|mut s| std::mem::take(&mut *s)).unwrap_or_default()
}

async fn pump(
    mut stream: BoxStream<'static, Bytes>,
    kind: OutputStream,
    sink: Arc<dyn OutputSink>,
    capture: Option<Arc<Mutex<String>>>,
) {
    let mut text = Utf8Carry::default();
    let mut lines = LineDecoder::new();

    let emit = |piece: &str| {
        if piece.is_empty() {
            return;
        }
        sink.on_output(kind, piece);
        if let Some(buf) = &capture {
            if let Ok(mut buf) = buf.lock() {
                buf.push_str(piece);
            }
        }
    };

    while let Some(chunk) = stream.next().await {
        emit(&text.push(&chunk));
        for line in lines.push(&chunk) {
            sink.on_line(kind, &line);
        }
    }

    emit(&text.finish());
    if let Some(line) = lines.finish() {
        sink.on_line(kind, &line);
    }
}

// ============================================================================
// GUARDS
// ============================================================================

/// Kills the process when dropped unless disarmed.
struct KillOnDrop {
    handle: Option<Box<dyn ProcessHandle>>,
}

impl KillOnDrop {
    fn new(handle: Box<dyn ProcessHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.kill();
        }
    }
}

/// Output pump tasks, aborted on drop.
#[derive(Default)]
struct PumpSet {
    tasks: Vec<JoinHandle<()>>,
}

impl PumpSet {
    fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(fut));
    }

    /// Wait for every pump to finish on its own.
    async fn join(&mut self) {
        while let Some(task) = self.tasks.last_mut() {
            let _ = task.await;
            self.tasks.pop();
        }
    }

    async fn abort(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.join().await;
    }
}

impl Drop for PumpSet {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Decodes UTF-8 across chunk boundaries, holding back an incomplete
/// trailing sequence until the next chunk.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
