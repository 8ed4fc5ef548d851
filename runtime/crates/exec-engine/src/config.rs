//! Engine configuration
//!
//! Loaded from TOML. Every section and key is optional:
//!
//! ```toml
//! [execution]
//! default_timeout_ms = 30000
//!
//! [jsx]
//! factory = "h"
//! fragment = "Fragment"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::instrument::DEFAULT_FUNCTION_PREVIEW_LEN;
use crate::transform::JsxOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub jsx: JsxOptions,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub instrument: InstrumentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Output read after a natural exit before the result is settled.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Events buffered per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_drain_grace_ms() -> u64 {
    250
}

fn default_event_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub detection_capacity: usize,

    #[serde(default = "default_cache_capacity")]
    pub transform_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detection_capacity: default_cache_capacity(),
            transform_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program that runs the entry file.
    #[serde(default = "default_runtime_command")]
    pub command: String,

    /// Manifest read from the sandbox to learn the installed set.
    #[serde(default = "default_package_manifest")]
    pub package_manifest: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: default_runtime_command(),
            package_manifest: default_package_manifest(),
        }
    }
}

fn default_runtime_command() -> String {
    "node".to_string()
}

fn default_package_manifest() -> String {
    "package.json".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_install_command")]
    pub command: String,

    #[serde(default = "default_install_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            command: default_install_command(),
            timeout_ms: default_install_timeout_ms(),
        }
    }
}

fn default_install_command() -> String {
    "npm".to_string()
}

fn default_install_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_function_preview_len")]
    pub function_preview_len: usize,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            function_preview_len: default_function_preview_len(),
        }
    }
}

fn default_function_preview_len() -> usize {
    DEFAULT_FUNCTION_PREVIEW_LEN
}

impl EngineConfig {
    /// Parse config from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Option<String> {
        toml::to_string_pretty(self).ok()
    }
}
