//! Structured output wire protocol.
//!
//! Instrumented programs write one JSON object per line to stdout:
//!
//! ```text
//! {"type":"console.log","args":["hi"],"timestamp":1700000000000}
//! {"type":"runtime.error","error":{"name":"Error","message":"boom"},"timestamp":...}
//! ```
//!
//! Parsing is permissive: any line that is not a recognised event is plain
//! text, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error shape carried by `runtime.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default = "default_error_name")]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

fn default_error_name() -> String {
    "Error".to_string()
}

/// Event emitted from inside the running program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StructuredEvent {
    #[serde(rename = "console.log")]
    ConsoleLog {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename = "console.error")]
    ConsoleError {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename = "console.warn")]
    ConsoleWarn {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename = "console.table")]
    ConsoleTable {
        #[serde(default)]
        data: Value,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename = "runtime.error")]
    RuntimeError {
        error: ErrorPayload,
        #[serde(default)]
        timestamp: i64,
    },
}

impl StructuredEvent {
    /// Wire discriminator, e.g. `console.log`.
    pub fn kind(&self) -> &'static str {
        match self {
            StructuredEvent::ConsoleLog { .. } => "console.log",
            StructuredEvent::ConsoleError { .. } => "console.error",
            StructuredEvent::ConsoleWarn { .. } => "console.warn",
            StructuredEvent::ConsoleTable { .. } => "console.table",
            StructuredEvent::RuntimeError { .. } => "runtime.error",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            StructuredEvent::ConsoleLog { timestamp, .. }
            | StructuredEvent::ConsoleError { timestamp, .. }
            | StructuredEvent::ConsoleWarn { timestamp, .. }
            | StructuredEvent::ConsoleTable { timestamp, .. }
            | StructuredEvent::RuntimeError { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StructuredEvent::ConsoleError { .. } | StructuredEvent::RuntimeError { .. }
        )
    }
}

/// Parse one output line. `None` means "plain text".
pub fn parse_line(line: &str) -> Option<StructuredEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

// ============================================================================
// CHUNK DECODING
// ============================================================================

/// Reassembles lines from arbitrary byte chunks.
///
/// Chunks may split lines and multi-byte characters anywhere; bytes are
/// held back until a newline completes them.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without the
    /// trailing `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush an unterminated final line.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
