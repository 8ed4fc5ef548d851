//! Language detection from filename and content heuristics.
//!
//! The filename gives a cheap first guess (0.9 for a known extension, 0.1
//! otherwise). Content patterns then score TypeScript and JSX signals; when
//! the content score beats [`CONTENT_CONFIDENCE_THRESHOLD`] it overrides the
//! filename. Results are memoized per `(code, filename)`.

use std::path::Path;
use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::cache::{content_hash, BoundedCache, CacheStats, DEFAULT_CACHE_CAPACITY};
use crate::language::{DetectionResult, Language, SourceUnit};

/// Confidence assigned to a recognized file extension.
pub const EXTENSION_CONFIDENCE: f64 = 0.9;

/// Confidence of the javascript fallback.
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

/// Content must score strictly above this to override the filename.
pub const CONTENT_CONFIDENCE_THRESHOLD: f64 = 0.3;

// ============================================================================
// CONTENT SIGNALS
// ============================================================================

struct Signal {
    pattern: Regex,
    weight: f64,
}

fn signals(table: &[(&str, f64)]) -> Vec<Signal> {
    table
        .iter()
        .filter_map(|(pattern, weight)| {
            Regex::new(pattern).ok().map(|pattern| Signal {
                pattern,
                weight: *weight,
            })
        })
        .collect()
}

static TYPESCRIPT_SIGNALS: LazyLock<Vec<Signal>> = LazyLock::new(|| {
    signals(&[
        (r"\binterface\s+[A-Za-z_$][\w$]*", 0.4),
        (r"\benum\s+[A-Za-z_$][\w$]*\s*\{", 0.35),
        (r"\bnamespace\s+[A-Za-z_$][\w$.]*\s*\{", 0.35),
        (
            r"\bdeclare\s+(?:const|let|var|function|class|module|global|namespace|enum|type)\b",
            0.35,
        ),
        (r"\btype\s+[A-Za-z_$][\w$]*(?:<[^>]*>)?\s*=", 0.3),
        (
            r"[\w$)\]]\??\s*:\s*(?:string|number|boolean|any|void|unknown|never|bigint|symbol)\b",
            0.4,
        ),
        (
            r"\)\s*:\s*(?:Promise<|[A-Z][\w$]*(?:<[^>]*>)?(?:\[\])?\s*(?:\{|=>))",
            0.2,
        ),
        (r"\b(?:public|private|protected|readonly)\s+[A-Za-z_$]", 0.2),
        (r"\bimplements\s+[A-Z]", 0.2),
        (
            r"\bas\s+(?:const|string|number|boolean|any|unknown|[A-Z][\w$]*)\b",
            0.15,
        ),
    ])
});

static JSX_SIGNALS: LazyLock<Vec<Signal>> = LazyLock::new(|| {
    signals(&[
        (r"React\.createElement\s*\(", 0.5),
        (r"<>|</>", 0.4),
        (r"</[A-Za-z][\w.-]*\s*>", 0.35),
        (r"(?:^|[^\w$.])<[A-Z][\w$.]*(?:\s+[\w$-]+\s*=|\s*/?>)", 0.35),
        (
            r"(?:^|[^\w$.])<(?:div|span|p|a|ul|ol|li|h[1-6]|button|input|form|img|section|header|footer|main|nav|table|tr|td|label|select|option|textarea|br|hr)\b[^<>]*>",
            0.35,
        ),
        (r#"\bclassName\s*=\s*[{"']"#, 0.2),
    ])
});

fn score(code: &str, table: &[Signal]) -> f64 {
    table
        .iter()
        .filter(|signal| signal.pattern.is_match(code))
        .map(|signal| signal.weight)
        .sum::<f64>()
        .min(1.0)
}

/// TypeScript and JSX content scores in `0.0..=1.0`.
pub fn content_scores(code: &str) -> (f64, f64) {
    (score(code, &TYPESCRIPT_SIGNALS), score(code, &JSX_SIGNALS))
}

fn extension_of(filename: &str) -> Option<Language> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
}

// ============================================================================
// PURE CLASSIFICATION
// ============================================================================

/// Classify `code` without touching any cache. Deterministic in its inputs.
pub fn classify(code: &str, filename: &str) -> DetectionResult {
    if code.trim().is_empty() {
        return DetectionResult::new(Language::JavaScript, FALLBACK_CONFIDENCE);
    }

    let by_extension = extension_of(filename);
    let (file_language, file_confidence) = match by_extension {
        Some(language) => (language, EXTENSION_CONFIDENCE),
        None => (Language::JavaScript, FALLBACK_CONFIDENCE),
    };

    let (ts_score, jsx_score) = content_scores(code);
    let content_language = Language::from_signals(ts_score > 0.0, jsx_score > 0.0);
    let content_confidence = ts_score.max(jsx_score);

    if content_language == Language::JavaScript
        || content_confidence <= CONTENT_CONFIDENCE_THRESHOLD
    {
        return DetectionResult::new(file_language, file_confidence);
    }

    // Content wins, but a .ts/.tsx/.jsx name still contributes its signal.
    let language = match by_extension {
        Some(ext) => Language::from_signals(
            ts_score > 0.0 || ext.has_types(),
            jsx_score > 0.0 || ext.has_jsx(),
        ),
        None => content_language,
    };
    let confidence = if language == file_language {
        content_confidence.max(file_confidence)
    } else {
        content_confidence
    };
    DetectionResult::new(language, confidence)
}

// ============================================================================
// MEMOIZING DETECTOR
// ============================================================================

/// Memoizing detector. Safe to share behind `&self`.
#[derive(Debug)]
pub struct LanguageDetector {
    cache: Mutex<BoundedCache<String, DetectionResult>>,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl LanguageDetector {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    pub fn detect(&self, code: &str, filename: &str) -> DetectionResult {
        let key = content_hash(&[code, filename]);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                tracing::debug!(filename, language = %hit.language, "detection cache hit");
                return hit;
            }
        }

        let result = classify(code, filename);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        result
    }

    /// Detect a [`SourceUnit`], honouring its language hint when it names a
    /// known dialect. Unknown hints degrade to heuristic detection.
    pub fn detect_unit(&self, unit: &SourceUnit) -> DetectionResult {
        if let Some(hint) = unit.language_hint.as_deref() {
            match hint.parse::<Language>() {
                Ok(language) => return DetectionResult::new(language, 1.0),
                Err(err) => tracing::debug!(%err, "ignoring language hint"),
            }
        }
        self.detect(&unit.code, &unit.filename)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}
