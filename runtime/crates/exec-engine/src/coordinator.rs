//! Execution coordinator.
//!
//! ```text
//! Idle -> Preparing -> Running -> Completed | Failed | TimedOut | Cancelled -> Idle
//!            |
//!            +-> Failed (transform error) -> Idle
//! ```
//!
//! One coordinator runs at most one execution at a time. A second
//! `execute` while not idle is rejected with [`ExecutionError::Busy`];
//! nothing is queued. The in-flight slot is released by a guard, so every
//! exit path (including a dropped future) returns the coordinator to idle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::dependencies::{parse_installed, DependencyAnalyzer, DependencyReport};
use crate::detector::LanguageDetector;
use crate::error::ExecutionError;
use crate::events::{EventBus, ExecutionEvent, OutputStream, Subscription};
use crate::installer::{NpmInstaller, PackageInstaller};
use crate::instrument::{ExecutableUnit, InstrumentationWrapper};
use crate::language::{DetectionResult, Language, SourceUnit};
use crate::metrics::ExecutionMetrics;
use crate::protocol;
use crate::sandbox::{SandboxError, SandboxRuntime, SpawnedProcess};
use crate::supervisor::{supervise, OutputSink, RunExit, SupervisorConfig};
use crate::transform::{TransformError, TransformPipeline, TransformResult, TransformerRegistry};

/// Exit code reported for a run killed at its deadline.
pub const EXIT_CODE_TIMEOUT: i32 = 124;
/// Exit code reported for a run stopped by the caller.
pub const EXIT_CODE_CANCELLED: i32 = 130;
/// Exit code reported when the process exit status was lost.
pub const EXIT_CODE_LOST: i32 = -1;
/// Exit code reported when the code never ran because it did not transform.
pub const EXIT_CODE_TRANSFORM_FAILED: i32 = 1;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub filename: String,
    pub timeout_ms: u64,
    pub capture_output: bool,
    pub check_dependencies: bool,
    pub auto_install_deps: bool,
    /// Forces the dialect instead of detecting it.
    pub language: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            filename: "index.js".to_string(),
            timeout_ms: 30_000,
            capture_output: true,
            check_dependencies: true,
            auto_install_deps: false,
            language: None,
        }
    }
}

impl ExecutionOptions {
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn check_dependencies(mut self, check: bool) -> Self {
        self.check_dependencies = check;
        self
    }

    pub fn auto_install_deps(mut self, install: bool) -> Self {
        self.auto_install_deps = install;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// One call to [`Coordinator::execute`]. Immutable once created.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub code: String,
    pub options: ExecutionOptions,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, options: ExecutionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            options,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub language: Language,
    pub outcome: ExecutionOutcome,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: f64,
    pub success: bool,
    pub timeout: bool,
    pub timestamp: DateTime<Utc>,
}

/// Where the coordinator is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Preparing,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl From<ExecutionOutcome> for ExecutionState {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed => ExecutionState::Completed,
            ExecutionOutcome::Failed => ExecutionState::Failed,
            ExecutionOutcome::TimedOut => ExecutionState::TimedOut,
            ExecutionOutcome::Cancelled => ExecutionState::Cancelled,
        }
    }
}

/// Occupancy of both caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub detection: CacheStats,
    pub transform: CacheStats,
}

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[derive(Debug)]
struct Flight {
    state: ExecutionState,
    stop: Option<oneshot::Sender<()>>,
}

/// Holds the in-flight slot; returns the coordinator to idle when dropped.
struct FlightGuard<'a> {
    flight: &'a Mutex<Flight>,
}

impl FlightGuard<'_> {
    fn set(&self, state: ExecutionState, stop: Option<oneshot::Sender<()>>) {
        let mut flight = lock(self.flight);
        tracing::debug!(from = ?flight.state, to = ?state, "execution state");
        flight.state = state;
        flight.stop = stop;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flight = lock(self.flight);
        flight.state = ExecutionState::Idle;
        flight.stop = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forwards process output as events.
struct EventSink {
    events: EventBus<ExecutionEvent>,
}

impl OutputSink for EventSink {
    fn on_output(&self, stream: OutputStream, text: &str) {
        self.events.emit(ExecutionEvent::Output {
            stream,
            data: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_line(&self, _stream: OutputStream, line: &str) {
        if let Some(data) = protocol::parse_line(line) {
            self.events.emit(ExecutionEvent::Structured { data });
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct CoordinatorBuilder {
    sandbox: Arc<dyn SandboxRuntime>,
    config: EngineConfig,
    registry: Option<TransformerRegistry>,
    installer: Option<Arc<dyn PackageInstaller>>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default SWC transformers.
    pub fn registry(mut self, registry: TransformerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn build(self) -> Coordinator {
        let config = self.config;
        let registry = self
            .registry
            .unwrap_or_else(|| TransformerRegistry::with_defaults(&config.jsx));
        let installer = self.installer.unwrap_or_else(|| {
            Arc::new(NpmInstaller::new(
                config.install.command.clone(),
                Duration::from_millis(config.install.timeout_ms),
            ))
        });

        Coordinator {
            sandbox: self.sandbox,
            installer,
            detector: LanguageDetector::new(config.cache.detection_capacity),
            pipeline: TransformPipeline::new(registry, config.cache.transform_capacity),
            analyzer: DependencyAnalyzer::new(),
            wrapper: InstrumentationWrapper::new(
                config.jsx.clone(),
                config.instrument.function_preview_len,
            ),
            events: EventBus::new(config.execution.event_capacity),
            metrics: Mutex::new(ExecutionMetrics::default()),
            flight: Mutex::new(Flight {
                state: ExecutionState::Idle,
                stop: None,
            }),
            config,
        }
    }
}

/// Owns every piece of mutable execution state: the in-flight slot, the
/// caches and the metrics.
pub struct Coordinator {
    sandbox: Arc<dyn SandboxRuntime>,
    installer: Arc<dyn PackageInstaller>,
    detector: LanguageDetector,
    pipeline: TransformPipeline,
    analyzer: DependencyAnalyzer,
    wrapper: InstrumentationWrapper,
    events: EventBus<ExecutionEvent>,
    metrics: Mutex<ExecutionMetrics>,
    flight: Mutex<Flight>,
    config: EngineConfig,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .field("registry", self.pipeline.registry())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn builder(sandbox: Arc<dyn SandboxRuntime>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            sandbox,
            config: EngineConfig::default(),
            registry: None,
            installer: None,
        }
    }

    pub fn new(sandbox: Arc<dyn SandboxRuntime>) -> Self {
        Self::builder(sandbox).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Default options with the configured timeout.
    pub fn options(&self) -> ExecutionOptions {
        ExecutionOptions::default().timeout_ms(self.config.execution.default_timeout_ms)
    }

    pub fn subscribe(&self) -> Subscription<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ExecutionState {
        lock(&self.flight).state
    }

    pub fn is_running(&self) -> bool {
        self.state() != ExecutionState::Idle
    }

    /// Stop the running execution. Returns `false` (and does nothing) when
    /// no process is running.
    pub fn stop(&self) -> bool {
        let mut flight = lock(&self.flight);
        if flight.state != ExecutionState::Running {
            tracing::debug!(state = ?flight.state, "stop ignored");
            return false;
        }
        match flight.stop.take() {
            Some(stop) => stop.send(()).is_ok(),
            None => false,
        }
    }

    pub fn detect(&self, code: &str, filename: &str) -> DetectionResult {
        self.detector.detect(code, filename)
    }

    pub fn transform(&self, code: &str, filename: &str) -> Result<TransformResult, TransformError> {
        let detection = self.detector.detect(code, filename);
        self.pipeline.transform(code, &detection, filename)
    }

    /// Analyze against the packages the sandbox reports as installed.
    pub async fn analyze_dependencies(&self, code: &str, language: Language) -> DependencyReport {
        let installed = self.installed_packages().await;
        self.analyzer
            .analyze_with_installed(code, language, &installed)
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        lock(&self.metrics).clone()
    }

    pub fn reset_metrics(&self) {
        *lock(&self.metrics) = ExecutionMetrics::default();
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            detection: self.detector.stats(),
            transform: self.pipeline.stats(),
        }
    }

    pub fn clear_caches(&self) {
        self.detector.clear();
        self.pipeline.clear();
    }

    pub async fn execute(
        &self,
        code: impl Into<String>,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute_request(ExecutionRequest::new(code, options))
            .await
    }

    pub async fn execute_request(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let guard = self.begin()?;
        let started = Instant::now();
        let options = &request.options;

        // Preparing
        let mut unit = SourceUnit::new(request.code.as_str(), options.filename.as_str());
        if let Some(hint) = &options.language {
            unit = unit.with_hint(hint.as_str());
        }
        let detection = self.detector.detect_unit(&unit);
        let language = detection.language;
        tracing::info!(id = %request.id, %language, filename = %options.filename, "execution started");
        self.events.emit(ExecutionEvent::Started {
            filename: options.filename.clone(),
            code: request.code.clone(),
            language,
        });

        if options.check_dependencies {
            self.check_dependencies(&request.code, language, options.auto_install_deps)
                .await;
        }

        let unit = match self.prepare(&request.code, &detection, &options.filename) {
            Ok(unit) => unit,
            Err(err) => {
                tracing::info!(id = %request.id, %err, "transform failed");
                self.events.emit(ExecutionEvent::Error {
                    error: err.to_string(),
                });
                let stderr = if options.capture_output {
                    err.to_string()
                } else {
                    String::new()
                };
                let result = self.settle(
                    &guard,
                    &request,
                    language,
                    ExecutionOutcome::Failed,
                    EXIT_CODE_TRANSFORM_FAILED,
                    String::new(),
                    stderr,
                    started,
                );
                return Ok(result);
            }
        };

        let process = match self.launch(&unit).await {
            Ok(process) => process,
            Err(err) => {
                tracing::warn!(id = %request.id, %err, "sandbox rejected execution");
                self.events.emit(ExecutionEvent::Error {
                    error: err.to_string(),
                });
                return Err(err.into());
            }
        };

        // Running
        let (stop_tx, stop_rx) = oneshot::channel();
        guard.set(ExecutionState::Running, Some(stop_tx));

        let sink = Arc::new(EventSink {
            events: self.events.clone(),
        });
        let run = supervise(
            process,
            stop_rx,
            SupervisorConfig {
                timeout: Duration::from_millis(options.timeout_ms),
                drain_grace: Duration::from_millis(self.config.execution.drain_grace_ms),
                capture: options.capture_output,
            },
            sink,
        )
        .await;

        let (outcome, exit_code, mut stderr) = match run.exit {
            RunExit::Exited(0) => (ExecutionOutcome::Completed, 0, run.stderr),
            RunExit::Exited(code) => (ExecutionOutcome::Failed, code, run.stderr),
            RunExit::TimedOut => (ExecutionOutcome::TimedOut, EXIT_CODE_TIMEOUT, run.stderr),
            RunExit::Cancelled => (ExecutionOutcome::Cancelled, EXIT_CODE_CANCELLED, run.stderr),
            RunExit::Failed(message) => {
                self.events.emit(ExecutionEvent::Error {
                    error: message.clone(),
                });
                let mut stderr = run.stderr;
                if options.capture_output {
                    if !stderr.is_empty() && !stderr.ends_with('\n') {
                        stderr.push('\n');
                    }
                    stderr.push_str(&message);
                }
                (ExecutionOutcome::Failed, EXIT_CODE_LOST, stderr)
            }
        };
        if outcome == ExecutionOutcome::TimedOut && options.capture_output {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Execution timed out after {}ms",
                options.timeout_ms
            ));
        }
        if outcome == ExecutionOutcome::Cancelled {
            self.events.emit(ExecutionEvent::Stopped {
                timestamp: Utc::now(),
            });
        }

        Ok(self.settle(
            &guard,
            &request,
            language,
            outcome,
            exit_code,
            run.stdout,
            stderr,
            started,
        ))
    }

    /// Transform and wrap `code`. Both fail the same way: before anything runs.
    fn prepare(
        &self,
        code: &str,
        detection: &DetectionResult,
        filename: &str,
    ) -> Result<ExecutableUnit, TransformError> {
        let transformed = self.pipeline.transform(code, detection, filename)?;
        self.wrapper
            .wrap(&transformed.transformed_code, detection, filename)
    }

    async fn launch(&self, unit: &ExecutableUnit) -> Result<SpawnedProcess, SandboxError> {
        self.sandbox
            .write_file(&unit.entry_filename, &unit.code)
            .await?;
        self.sandbox
            .spawn(
                &self.config.runtime.command,
                std::slice::from_ref(&unit.entry_filename),
            )
            .await
    }

    fn begin(&self) -> Result<FlightGuard<'_>, ExecutionError> {
        let mut flight = lock(&self.flight);
        if flight.state != ExecutionState::Idle {
            tracing::debug!(state = ?flight.state, "execution rejected: busy");
            return Err(ExecutionError::Busy);
        }
        flight.state = ExecutionState::Preparing;
        flight.stop = None;
        Ok(FlightGuard {
            flight: &self.flight,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        guard: &FlightGuard<'_>,
        request: &ExecutionRequest,
        language: Language,
        outcome: ExecutionOutcome,
        exit_code: i32,
        stdout: String,
        stderr: String,
        started: Instant,
    ) -> ExecutionResult {
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = outcome == ExecutionOutcome::Completed;
        let result = ExecutionResult {
            request_id: request.id,
            language,
            outcome,
            exit_code,
            stdout,
            stderr,
            execution_time_ms,
            success,
            timeout: outcome == ExecutionOutcome::TimedOut,
            timestamp: Utc::now().max(request.created_at),
        };

        {
            let mut metrics = lock(&self.metrics);
            metrics.record(language, success, execution_time_ms);
            match outcome {
                ExecutionOutcome::TimedOut => metrics.record_timeout(),
                ExecutionOutcome::Cancelled => metrics.record_cancel(),
                _ => {}
            }
        }

        guard.set(outcome.into(), None);
        tracing::info!(
            id = %request.id,
            ?outcome,
            exit_code,
            elapsed_ms = execution_time_ms,
            "execution finished"
        );
        self.events.emit(ExecutionEvent::Completed {
            result: result.clone(),
        });
        result
    }

    async fn check_dependencies(&self, code: &str, language: Language, auto_install: bool) {
        let report = self.analyze_dependencies(code, language).await;
        for conflict in &report.conflicts {
            tracing::info!(packages = ?conflict.packages, kind = %conflict.kind, "overlapping packages");
        }
        if !report.has_missing() {
            return;
        }

        self.events.emit(ExecutionEvent::DependenciesMissing {
            missing: report.missing.clone(),
            suggestions: report.suggestions.clone(),
        });

        if auto_install {
            let packages = report.missing_names();
            if let Err(err) = self
                .installer
                .install(self.sandbox.as_ref(), &packages)
                .await
            {
                tracing::warn!(%err, ?packages, "auto-install failed; running anyway");
            }
        }
    }

    async fn installed_packages(&self) -> HashSet<String> {
        let manifest = &self.config.runtime.package_manifest;
        match self.sandbox.read_file(manifest).await {
            Ok(text) => parse_installed(&text).unwrap_or_else(|err| {
                tracing::warn!(%err, manifest = %manifest, "unreadable package manifest");
                HashSet::new()
            }),
            Err(err) => {
                tracing::debug!(%err, "no package manifest");
                HashSet::new()
            }
        }
    }
}
