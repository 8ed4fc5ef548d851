//! Source dialects and the detection result shared by every pipeline stage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A source dialect the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Jsx,
    Tsx,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Jsx,
        Language::Tsx,
    ];

    /// Stable lowercase identifier, also used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Jsx => "jsx",
            Language::Tsx => "tsx",
        }
    }

    /// Human readable name for UI labels.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Jsx => "JavaScript React",
            Language::Tsx => "TypeScript React",
        }
    }

    /// Language id understood by the editor component.
    pub fn editor_language_id(&self) -> &'static str {
        match self {
            Language::JavaScript | Language::Jsx => "javascript",
            Language::TypeScript | Language::Tsx => "typescript",
        }
    }

    /// Map a file extension (without the dot) to a dialect.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "jsx" => Some(Language::Jsx),
            "tsx" => Some(Language::Tsx),
            _ => None,
        }
    }

    pub fn has_types(&self) -> bool {
        matches!(self, Language::TypeScript | Language::Tsx)
    }

    pub fn has_jsx(&self) -> bool {
        matches!(self, Language::Jsx | Language::Tsx)
    }

    /// Combine type and JSX signals into a single dialect.
    pub fn from_signals(types: bool, jsx: bool) -> Self {
        match (types, jsx) {
            (true, true) => Language::Tsx,
            (true, false) => Language::TypeScript,
            (false, true) => Language::Jsx,
            (false, false) => Language::JavaScript,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a language hint cannot be understood. Never fatal: the
/// detector falls back to heuristics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    #[error("unknown language hint: {0}")]
    UnknownLanguage(String),
}

impl FromStr for Language {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "jsx" | "javascriptreact" => Ok(Language::Jsx),
            "tsx" | "typescriptreact" => Ok(Language::Tsx),
            other => Err(DetectionError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Input to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub code: String,
    pub filename: String,
    pub language_hint: Option<String>,
}

impl SourceUnit {
    pub fn new(code: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            filename: filename.into(),
            language_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.language_hint = Some(hint.into());
        self
    }
}

/// Outcome of language detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub language: Language,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    pub display_name: String,
    pub editor_language_id: String,
}

impl DetectionResult {
    pub fn new(language: Language, confidence: f64) -> Self {
        Self {
            language,
            confidence: confidence.clamp(0.0, 1.0),
            display_name: language.display_name().to_string(),
            editor_language_id: language.editor_language_id().to_string(),
        }
    }
}
