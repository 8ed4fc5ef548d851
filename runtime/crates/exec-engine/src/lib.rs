//! Code execution engine for the JS/TS playground.
//!
//! Takes arbitrary source text through detection, transformation,
//! dependency analysis and instrumentation, then runs it in an external
//! sandbox with single-flight, timeout and cancellation guarantees.
//!
//! ```ignore
//! let coordinator = Coordinator::new(Arc::new(my_sandbox));
//! let mut events = coordinator.subscribe();
//! let result = coordinator
//!     .execute("console.log('hi')", coordinator.options())
//!     .await?;
//! ```

pub mod cache;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dependencies;
pub mod detector;
pub mod error;
pub mod events;
pub mod installer;
pub mod instrument;
pub mod language;
pub mod metrics;
pub mod protocol;
pub mod sandbox;
pub mod supervisor;
pub mod transform;

pub use command::{CommandError, CommandOutput, CommandRunner};
pub use config::{ConfigError, EngineConfig};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, ExecutionOptions, ExecutionOutcome, ExecutionRequest,
    ExecutionResult, ExecutionState,
};
pub use dependencies::{DependencyAnalyzer, DependencyReport};
pub use detector::LanguageDetector;
pub use error::ExecutionError;
pub use events::{EventBus, ExecutionEvent, OutputStream, Subscription};
pub use installer::{InstallError, NpmInstaller, PackageInstaller};
pub use instrument::{ExecutableUnit, InstrumentationWrapper, ModuleKind};
pub use language::{DetectionError, DetectionResult, Language, SourceUnit};
pub use metrics::{ExecutionMetrics, LanguageStats};
pub use protocol::StructuredEvent;
pub use sandbox::{ProcessHandle, SandboxError, SandboxRuntime, SpawnedProcess};
pub use transform::{
    JsxOptions, TransformError, TransformPipeline, TransformResult, Transformer,
    TransformerRegistry,
};
