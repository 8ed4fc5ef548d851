//! Transform pipeline: TypeScript / JSX / TSX to plain JavaScript.
//!
//! Backends implement [`Transformer`] and are registered per [`Language`] in
//! a [`TransformerRegistry`] at startup. JavaScript never reaches a backend.
//! Results are cached by `(language, content hash)` in a bounded FIFO cache.

#[cfg(feature = "swc")]
mod jsx;
#[cfg(feature = "swc")]
pub mod swc;
pub(crate) mod syntax;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::cache::{content_hash, BoundedCache, CacheStats, DEFAULT_CACHE_CAPACITY};
use crate::language::{DetectionResult, Language};

/// Element factory symbols used when rewriting JSX.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsxOptions {
    /// Callee for elements, e.g. `React.createElement` or `h`.
    pub factory: String,
    /// Value passed as the element type for `<>...</>`.
    pub fragment: String,
}

impl Default for JsxOptions {
    fn default() -> Self {
        Self {
            factory: "React.createElement".to_string(),
            fragment: "React.Fragment".to_string(),
        }
    }
}

/// Transform failure. Always fatal for the execution that hit it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("{language} syntax error: {message}")]
    Syntax { language: Language, message: String },
    #[error("{language} code generation failed: {message}")]
    Emit { language: Language, message: String },
    #[error("no transformer registered for {language}")]
    Unsupported { language: Language },
}

impl TransformError {
    pub fn language(&self) -> Language {
        match self {
            TransformError::Syntax { language, .. }
            | TransformError::Emit { language, .. }
            | TransformError::Unsupported { language } => *language,
        }
    }
}

/// A backend that turns one dialect into executable JavaScript.
#[cfg_attr(test, mockall::automock)]
pub trait Transformer: Send + Sync {
    fn transform(&self, code: &str, filename: &str) -> Result<String, TransformError>;
}

/// Output of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
    pub transformed_code: String,
    pub cache_key: String,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Transformer capability per language, selected once at startup.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    backends: HashMap<Language, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// A registry with nothing registered: only JavaScript can run.
    pub fn empty() -> Self {
        Self::default()
    }

    /// SWC backends for every non-JavaScript dialect.
    #[cfg(feature = "swc")]
    pub fn with_defaults(jsx: &JsxOptions) -> Self {
        let mut registry = Self::empty();
        for language in [Language::TypeScript, Language::Jsx, Language::Tsx] {
            registry.register(language, Arc::new(swc::SwcTransformer::new(language, jsx.clone())));
        }
        registry
    }

    #[cfg(not(feature = "swc"))]
    pub fn with_defaults(_jsx: &JsxOptions) -> Self {
        Self::empty()
    }

    pub fn register(&mut self, language: Language, transformer: Arc<dyn Transformer>) {
        self.backends.insert(language, transformer);
    }

    pub fn get(&self, language: Language) -> Option<Arc<dyn Transformer>> {
        self.backends.get(&language).cloned()
    }

    pub fn supports(&self, language: Language) -> bool {
        language == Language::JavaScript || self.backends.contains_key(&language)
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut languages: Vec<_> = self.backends.keys().map(|l| l.as_str()).collect();
        languages.sort_unstable();
        f.debug_struct("TransformerRegistry")
            .field("languages", &languages)
            .finish()
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Registry plus cache.
#[derive(Debug)]
pub struct TransformPipeline {
    registry: TransformerRegistry,
    cache: Mutex<BoundedCache<String, String>>,
}

impl TransformPipeline {
    pub fn new(registry: TransformerRegistry, capacity: usize) -> Self {
        Self {
            registry,
            cache: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    /// Cache key for `(language, code)`.
    pub fn cache_key(language: Language, code: &str) -> String {
        format!("{}:{}", language, content_hash(&[code]))
    }

    /// Transform `code` according to `detection`. Failures are returned as-is
    /// and never cached or retried.
    pub fn transform(
        &self,
        code: &str,
        detection: &DetectionResult,
        filename: &str,
    ) -> Result<TransformResult, TransformError> {
        let language = detection.language;
        let cache_key = Self::cache_key(language, code);

        if language == Language::JavaScript {
            return Ok(TransformResult {
                transformed_code: code.to_string(),
                cache_key,
            });
        }

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&cache_key) {
                tracing::debug!(%language, "transform cache hit");
                return Ok(TransformResult {
                    transformed_code: hit,
                    cache_key,
                });
            }
        }

        let backend = self
            .registry
            .get(language)
            .ok_or(TransformError::Unsupported { language })?;
        let transformed_code = backend.transform(code, filename)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(cache_key.clone(), transformed_code.clone());
        }
        Ok(TransformResult {
            transformed_code,
            cache_key,
        })
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

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new(
            TransformerRegistry::with_defaults(&JsxOptions::default()),
            DEFAULT_CACHE_CAPACITY,
        )
    }
}
