//! Scripted in-memory sandbox for coordinator tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use exec_engine::{ExecutionEvent, ProcessHandle, SandboxError, SandboxRuntime, SpawnedProcess, Subscription};
use futures::channel::mpsc;
use futures::FutureExt;
use futures::StreamExt;
use tokio::sync::{oneshot, Notify};

/// What one spawned process does.
#[derive(Debug, Clone)]
pub struct Script {
    chunks: Vec<String>,
    stderr: Vec<String>,
    chunk_delay: Duration,
    ending: Ending,
}

#[derive(Debug, Clone)]
enum Ending {
    Exit { code: i32, delay: Duration },
    /// Keeps printing until killed.
    Hang,
}

impl Script {
    pub fn exits(code: i32) -> Self {
        Self {
            chunks: vec![],
            stderr: vec![],
            chunk_delay: Duration::from_millis(1),
            ending: Ending::Exit {
                code,
                delay: Duration::from_millis(5),
            },
        }
    }

    pub fn hangs() -> Self {
        Self {
            ending: Ending::Hang,
            ..Self::exits(0)
        }
    }

    pub fn output(mut self, chunk: &str) -> Self {
        self.chunks.push(chunk.to_string());
        self
    }

    pub fn stderr(mut self, chunk: &str) -> Self {
        self.stderr.push(chunk.to_string());
        self
    }

    pub fn exit_after(mut self, delay: Duration) -> Self {
        if let Ending::Exit { code, .. } = self.ending {
            self.ending = Ending::Exit { code, delay };
        }
        self
    }
}

struct ScriptedHandle {
    killed: Arc<AtomicBool>,
    notify: Arc<Notify>,
    kills: Arc<AtomicUsize>,
}

impl ProcessHandle for ScriptedHandle {
    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedSandbox {
    files: Mutex<HashMap<String, String>>,
    scripts: Mutex<VecDeque<Script>>,
    spawned: Mutex<Vec<(String, Vec<String>)>>,
    kills: Arc<AtomicUsize>,
    fail_spawn: AtomicBool,
}

impl ScriptedSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the behaviour of the next spawned process.
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn set_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn fail_spawns(&self) {
        self.fail_spawn.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.set_file(path, content);
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.file(path).ok_or_else(|| SandboxError::Read {
            path: path.to_string(),
            message: "not found".to_string(),
        })
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SandboxError::Unavailable("runtime not booted".to_string()));
        }
        self.spawned
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::exits(0));

        let (out_tx, out_rx) = mpsc::unbounded::<Bytes>();
        let (err_tx, err_rx) = mpsc::unbounded::<Bytes>();
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let killed = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let task_killed = killed.clone();
        let task_notify = notify.clone();
        tokio::spawn(async move {
            for chunk in &script.stderr {
                let _ = err_tx.unbounded_send(Bytes::from(chunk.clone()));
            }
            drop(err_tx);
            for chunk in &script.chunks {
                tokio::time::sleep(script.chunk_delay).await;
                if task_killed.load(Ordering::SeqCst) {
                    break;
                }
                let _ = out_tx.unbounded_send(Bytes::from(chunk.clone()));
            }
            match script.ending {
                Ending::Exit { code, delay } => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = task_notify.notified() => {}
                    }
                    let _ = exit_tx.send(if task_killed.load(Ordering::SeqCst) { 137 } else { code });
                }
                Ending::Hang => {
                    loop {
                        tokio::select! {
                            _ = task_notify.notified() => break,
                            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                                let _ = out_tx.unbounded_send(Bytes::from_static(b"tick\n"));
                            }
                        }
                    }
                    let _ = exit_tx.send(137);
                }
            }
        });

        Ok(SpawnedProcess {
            output: out_rx.boxed(),
            stderr: Some(err_rx.boxed()),
            exit: async move {
                exit_rx
                    .await
                    .map_err(|_| SandboxError::Process("exit status lost".to_string()))
            }
            .boxed(),
            handle: Box::new(ScriptedHandle {
                killed,
                notify,
                kills: self.kills.clone(),
            }),
        })
    }
}

/// Every event currently queued on `events`.
pub fn drain(events: &mut Subscription<ExecutionEvent>) -> Vec<ExecutionEvent> {
    events.drain()
}

pub fn count(events: &[ExecutionEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

/// Wait until `check` passes, polling every few milliseconds.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
