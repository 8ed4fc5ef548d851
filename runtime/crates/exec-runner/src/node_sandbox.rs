//! Sandbox backed by local processes in a work directory.
//!
//! Files live under `root`; relative paths only, no `..`. Each spawned
//! process is owned by a background task that waits for it, so a kill
//! request is honoured even when nobody polls the exit future anymore.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use exec_engine::{ProcessHandle, SandboxError, SandboxRuntime, SpawnedProcess};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Exit code reported for a process we killed.
const KILLED_EXIT_CODE: i32 = 137;

const READ_BUF_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct NodeSandbox {
    root: PathBuf,
}

impl NodeSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        safe.then(|| self.root.join(relative))
    }
}

struct ChildHandle {
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessHandle for ChildHandle {
    fn kill(&self) {
        let sender = self.kill.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

fn read_stream<R>(reader: R) -> BoxStream<'static, Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::unfold(reader, |mut reader| async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Bytes::from(buf), reader))
            }
        }
    })
    .boxed()
}

#[async_trait]
impl SandboxRuntime for NodeSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let write_err = |message: String| SandboxError::Write {
            path: path.to_string(),
            message,
        };
        let target = self
            .resolve(path)
            .ok_or_else(|| write_err("path escapes the sandbox".to_string()))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_err(e.to_string()))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| write_err(e.to_string()))
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let read_err = |message: String| SandboxError::Read {
            path: path.to_string(),
            message,
        };
        let target = self
            .resolve(path)
            .ok_or_else(|| read_err("path escapes the sandbox".to_string()))?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| read_err(e.to_string()))
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError> {
        let mut child = Command::new(command)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SandboxError::Unavailable(format!("{} not found", command))
                }
                _ => SandboxError::Spawn(format!("{}: {}", command, e)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Spawn("stderr not captured".to_string()))?;

        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel::<Result<i32, SandboxError>>();
        let pid = child.id();
        tracing::debug!(command, ?pid, "process spawned");

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status
                    .map(|s| s.code().unwrap_or(KILLED_EXIT_CODE))
                    .map_err(|e| SandboxError::Process(e.to_string())),
                Ok(()) = &mut kill_rx => {
                    if let Err(err) = child.kill().await {
                        tracing::warn!(?pid, %err, "failed to kill process");
                    }
                    Ok(KILLED_EXIT_CODE)
                }
            };
            let _ = exit_tx.send(status);
        });

        let exit = async move {
            exit_rx
                .await
                .unwrap_or_else(|_| Err(SandboxError::Process("process task ended".to_string())))
        }
        .boxed();

        Ok(SpawnedProcess {
            output: read_stream(stdout),
            stderr: Some(read_stream(stderr)),
            exit,
            handle: Box::new(ChildHandle {
                kill: Mutex::new(Some(kill_tx)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new(dir.path());
        sandbox.write_file("nested/a.txt", "hello").await.unwrap();
        assert_eq!(sandbox.read_file("nested/a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_paths_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new(dir.path());
        assert!(matches!(
            sandbox.write_file("../evil.js", "x").await,
            Err(SandboxError::Write { .. })
        ));
        assert!(matches!(
            sandbox.read_file("/etc/passwd").await,
            Err(SandboxError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new(dir.path());
        let err = sandbox
            .spawn("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_collects_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new(dir.path());
        let process = sandbox
            .spawn("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .await
            .unwrap();
        let stdout: Vec<Bytes> = process.output.collect().await;
        let stderr: Vec<Bytes> = process.stderr.unwrap().collect().await;
        assert_eq!(stdout.concat(), b"out\n");
        assert_eq!(stderr.concat(), b"err\n");
        assert_eq!(process.exit.await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new(dir.path());
        let process = sandbox
            .spawn("sleep", &["30".to_string()])
            .await
            .unwrap();
        process.handle.kill();
        process.handle.kill();
        let code = tokio::time::timeout(std::time::Duration::from_secs(5), process.exit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, KILLED_EXIT_CODE);
    }
}
