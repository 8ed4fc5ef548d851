//! Execution events and the fan-out channel that delivers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::coordinator::ExecutionResult;
use crate::dependencies::{DependencySuggestion, MissingDependency};
use crate::language::Language;
use crate::protocol::StructuredEvent;

/// Which process stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events emitted by the coordinator during one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ExecutionEvent {
    #[serde(rename = "execution:started")]
    Started {
        filename: String,
        code: String,
        language: Language,
    },
    /// Raw output chunk.
    #[serde(rename = "execution:output")]
    Output {
        #[serde(rename = "type")]
        stream: OutputStream,
        data: String,
        timestamp: DateTime<Utc>,
    },
    /// A line that parsed as a [`StructuredEvent`].
    #[serde(rename = "execution:structured-output")]
    Structured { data: StructuredEvent },
    #[serde(rename = "execution:completed")]
    Completed { result: ExecutionResult },
    #[serde(rename = "execution:error")]
    Error { error: String },
    #[serde(rename = "execution:stopped")]
    Stopped { timestamp: DateTime<Utc> },
    #[serde(rename = "execution:dependencies-missing")]
    DependenciesMissing {
        missing: Vec<MissingDependency>,
        suggestions: Vec<DependencySuggestion>,
    },
}

impl ExecutionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::Started { .. } => "execution:started",
            ExecutionEvent::Output { .. } => "execution:output",
            ExecutionEvent::Structured { .. } => "execution:structured-output",
            ExecutionEvent::Completed { .. } => "execution:completed",
            ExecutionEvent::Error { .. } => "execution:error",
            ExecutionEvent::Stopped { .. } => "execution:stopped",
            ExecutionEvent::DependenciesMissing { .. } => "execution:dependencies-missing",
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// Broadcast channel with independent subscribers. A slow or dropped
/// subscriber never blocks delivery to the others.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Deliver to every current subscriber. Returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One subscriber's view of an [`EventBus`].
#[derive(Debug)]
pub struct Subscription<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: Clone> Subscription<E> {
    /// Next event, or `None` once the bus is gone. Events this subscriber
    /// was too slow to read are skipped.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
