//! Coordinator behaviour against a scripted sandbox.

mod support;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use exec_engine::{
    CommandRunner, Coordinator, ExecutionError, ExecutionEvent, ExecutionOptions,
    ExecutionOutcome, ExecutionState, InstallError, Language, PackageInstaller, SandboxRuntime,
    StructuredEvent, TransformError, Transformer, TransformerRegistry,
};
use support::{count, drain, wait_for, Script, ScriptedSandbox};

fn options() -> ExecutionOptions {
    ExecutionOptions::default().check_dependencies(false)
}

#[tokio::test]
async fn test_console_log_is_structured_and_successful() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(
        Script::exits(0)
            .output("hi\n")
            .output("{\"type\":\"console.log\",\"args\":[\"hi\"],\"timestamp\":1}\n"),
    );
    let coordinator = Coordinator::new(sandbox.clone());
    let mut events = coordinator.subscribe();

    let result = coordinator
        .execute("console.log('hi')", options())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.outcome, ExecutionOutcome::Completed);
    assert_eq!(result.language, Language::JavaScript);
    assert!(result.stdout.starts_with("hi\n"));

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::Structured { data: StructuredEvent::ConsoleLog { args, .. } }
            if args == &vec![serde_json::json!("hi")]
    )));
    // Raw output is forwarded as well as the structured form.
    assert!(count(&events, "execution:output") >= 1);
    assert_eq!(count(&events, "execution:started"), 1);
    assert!(matches!(events.last(), Some(ExecutionEvent::Completed { .. })));

    let entry = sandbox.file("index.cjs").expect("entry written");
    assert!(entry.contains("console.log('hi')"));
    assert!(entry.contains("runtime.error"));
    assert_eq!(sandbox.spawned(), vec![("node".to_string(), vec!["index.cjs".to_string()])]);
    assert_eq!(coordinator.state(), ExecutionState::Idle);
}

#[tokio::test]
async fn test_thrown_error_fails_with_runtime_error_event() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(
        Script::exits(1)
            .output("{\"type\":\"runtime.error\",\"error\":{\"name\":\"Error\",\"message\":\"boom\"},\"timestamp\":2}\n")
            .stderr("Error: boom\n"),
    );
    let coordinator = Coordinator::new(sandbox);
    let mut events = coordinator.subscribe();

    let result = coordinator
        .execute("throw new Error('boom')", options())
        .await
        .unwrap();

    assert!(!result.success);
    assert_ne!(result.exit_code, 0);
    assert_eq!(result.outcome, ExecutionOutcome::Failed);
    assert!(result.stderr.contains("boom"));
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::Structured { data: StructuredEvent::RuntimeError { error, .. } }
            if error.message == "boom"
    )));
}

#[tokio::test]
async fn test_timeout_kills_process_and_silences_output() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(Script::hangs().output("working\n"));
    let coordinator = Coordinator::new(sandbox.clone());
    let mut events = coordinator.subscribe();

    let started = Instant::now();
    let result = coordinator
        .execute("while (true) {}", options().timeout_ms(100))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(result.timeout);
    assert!(!result.success);
    assert_eq!(result.exit_code, 124);
    assert_eq!(result.outcome, ExecutionOutcome::TimedOut);
    assert!(result.stderr.contains("timed out"));
    assert_eq!(sandbox.kills(), 1);

    let before = drain(&mut events);
    assert!(matches!(before.last(), Some(ExecutionEvent::Completed { .. })));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(drain(&mut events).is_empty(), "output after resolution");
    assert_eq!(coordinator.metrics().timed_out_executions, 1);
}

#[tokio::test]
async fn test_second_execute_is_rejected_while_running() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(Script::hangs());
    let coordinator = Arc::new(Coordinator::new(sandbox.clone()));
    let mut events = coordinator.subscribe();

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute("for(;;){}", options()).await })
    };
    let watcher = coordinator.clone();
    wait_for(|| watcher.state() == ExecutionState::Running).await;

    let second = coordinator.execute("console.log(2)", options()).await;
    assert_eq!(second.unwrap_err(), ExecutionError::Busy);

    assert!(coordinator.stop());
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.outcome, ExecutionOutcome::Cancelled);
    assert_eq!(result.exit_code, 130);
    assert!(!result.success);

    let events = drain(&mut events);
    assert_eq!(count(&events, "execution:started"), 1);
    assert_eq!(count(&events, "execution:stopped"), 1);
    assert_eq!(sandbox.spawned().len(), 1);
    assert_eq!(coordinator.state(), ExecutionState::Idle);
    assert_eq!(coordinator.metrics().cancelled_executions, 1);
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let coordinator = Coordinator::new(ScriptedSandbox::new());
    let mut events = coordinator.subscribe();
    assert!(!coordinator.stop());
    assert!(!coordinator.stop());
    assert!(drain(&mut events).is_empty());
    assert_eq!(coordinator.state(), ExecutionState::Idle);
}

#[tokio::test]
async fn test_average_time_is_mean_of_results() {
    let sandbox = ScriptedSandbox::new();
    for (code, delay) in [(0, 5), (1, 20), (0, 10)] {
        sandbox.push(Script::exits(code).exit_after(Duration::from_millis(delay)));
    }
    let coordinator = Coordinator::new(sandbox);

    let mut times = Vec::new();
    for _ in 0..3 {
        let result = coordinator.execute("1", options()).await.unwrap();
        times.push(result.execution_time_ms);
    }

    let metrics = coordinator.metrics();
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    assert_eq!(metrics.total_executions, 3);
    assert_eq!(metrics.successful_executions, 2);
    assert_eq!(metrics.failed_executions, 1);
    assert!((metrics.average_execution_time_ms - mean).abs() < 1e-6);
    assert_eq!(metrics.per_language[&Language::JavaScript].executions, 3);

    coordinator.reset_metrics();
    assert_eq!(coordinator.metrics().total_executions, 0);
}

#[tokio::test]
async fn test_dependency_report_and_event() {
    let sandbox = ScriptedSandbox::new();
    let coordinator = Coordinator::new(sandbox.clone());
    let code = "const fs = require('fs'); const x = require('left-pad');";

    let report = coordinator
        .analyze_dependencies(code, Language::JavaScript)
        .await;
    let found: Vec<&str> = report.found.iter().map(String::as_str).collect();
    assert_eq!(found, vec!["fs", "left-pad"]);
    assert_eq!(report.missing_names(), vec!["left-pad".to_string()]);

    let mut events = coordinator.subscribe();
    coordinator
        .execute(code, ExecutionOptions::default())
        .await
        .unwrap();
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::DependenciesMissing { missing, .. }
            if missing.len() == 1 && missing[0].name == "left-pad"
    )));

    // Once installed according to the manifest, nothing is missing.
    sandbox.set_file("package.json", r#"{"dependencies":{"left-pad":"1.3.0"}}"#);
    let report = coordinator
        .analyze_dependencies(code, Language::JavaScript)
        .await;
    assert!(report.missing.is_empty());
}

#[derive(Default)]
struct RecordingInstaller {
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(
        &self,
        _sandbox: &dyn SandboxRuntime,
        packages: &[String],
    ) -> Result<(), InstallError> {
        self.calls.lock().unwrap().push(packages.to_vec());
        Err(InstallError::Failed {
            code: 1,
            output: "registry offline".to_string(),
        })
    }
}

#[tokio::test]
async fn test_auto_install_failure_does_not_abort() {
    let sandbox = ScriptedSandbox::new();
    let installer = Arc::new(RecordingInstaller::default());
    let coordinator = Coordinator::builder(sandbox.clone())
        .installer(installer.clone())
        .build();

    let result = coordinator
        .execute(
            "import dayjs from 'dayjs';\nconsole.log(dayjs)",
            ExecutionOptions::default().auto_install_deps(true),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(*installer.calls.lock().unwrap(), vec![vec!["dayjs".to_string()]]);
    // Static imports force an ES module entry.
    assert!(sandbox.file("index.mjs").is_some());
}

struct BrokenTransformer;

impl Transformer for BrokenTransformer {
    fn transform(&self, _code: &str, _filename: &str) -> Result<String, TransformError> {
        Err(TransformError::Syntax {
            language: Language::TypeScript,
            message: "Unexpected token".to_string(),
        })
    }
}

#[tokio::test]
async fn test_transform_failure_settles_without_running() {
    let sandbox = ScriptedSandbox::new();
    let mut registry = TransformerRegistry::empty();
    registry.register(Language::TypeScript, Arc::new(BrokenTransformer));
    let coordinator = Coordinator::builder(sandbox.clone())
        .registry(registry)
        .build();
    let mut events = coordinator.subscribe();

    let result = coordinator
        .execute("const x: number = ;", options().filename("main.ts"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.outcome, ExecutionOutcome::Failed);
    assert_eq!(result.language, Language::TypeScript);
    assert!(result.stderr.contains("Unexpected token"));
    assert!(sandbox.spawned().is_empty());

    let events = drain(&mut events);
    assert_eq!(count(&events, "execution:error"), 1);
    assert_eq!(count(&events, "execution:completed"), 1);
    assert_eq!(coordinator.state(), ExecutionState::Idle);
    assert_eq!(coordinator.metrics().failed_executions, 1);
}

#[tokio::test]
async fn test_javascript_syntax_error_settles_without_running() {
    let sandbox = ScriptedSandbox::new();
    let coordinator = Coordinator::new(sandbox.clone());
    let mut events = coordinator.subscribe();

    let result = coordinator
        .execute("console.log((", options())
        .await
        .unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::Failed);
    assert_eq!(result.exit_code, 1);
    assert!(result.stderr.contains("line 1"));
    assert!(sandbox.spawned().is_empty());
    assert_eq!(count(&drain(&mut events), "execution:error"), 1);
    assert_eq!(coordinator.state(), ExecutionState::Idle);
}

#[tokio::test]
async fn test_one_line_import_is_hoisted_into_module_entry() {
    let sandbox = ScriptedSandbox::new();
    let coordinator = Coordinator::new(sandbox.clone());

    let result = coordinator
        .execute("import path from 'path'; console.log(path.sep)", options())
        .await
        .unwrap();

    assert!(result.success);
    let entry = sandbox.file("index.mjs").expect("entry written");
    let body_start = entry.find("(async () => {").unwrap();
    assert!(entry[..body_start].contains("import path from"));
    assert!(entry[body_start..].contains("console.log(path.sep)"));
    assert!(!entry[body_start..].contains("import path"));
}

#[tokio::test]
async fn test_spawn_failure_rejects_and_releases() {
    let sandbox = ScriptedSandbox::new();
    sandbox.fail_spawns();
    let coordinator = Coordinator::new(sandbox);

    let err = coordinator.execute("1", options()).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Sandbox(_)));
    assert_eq!(coordinator.state(), ExecutionState::Idle);
    assert_eq!(coordinator.metrics().total_executions, 0);
}

#[tokio::test]
async fn test_typescript_is_transformed_before_running() {
    let sandbox = ScriptedSandbox::new();
    let coordinator = Coordinator::new(sandbox.clone());

    let result = coordinator
        .execute(
            "const x: number = 1;\nconsole.log(x);",
            options().filename("main.ts"),
        )
        .await
        .unwrap();

    assert_eq!(result.language, Language::TypeScript);
    let entry = sandbox.file("main.cjs").expect("entry written");
    assert!(entry.contains("const x = 1"));
    assert!(!entry.contains(": number"));

    // Second run of the same code is served from the transform cache.
    coordinator
        .execute(
            "const x: number = 1;\nconsole.log(x);",
            options().filename("main.ts"),
        )
        .await
        .unwrap();
    let stats = coordinator.cache_stats();
    assert_eq!(stats.transform.entries, 1);
    assert_eq!(stats.transform.hits, 1);

    coordinator.clear_caches();
    assert_eq!(coordinator.cache_stats().transform.entries, 0);
    assert_eq!(coordinator.cache_stats().detection.entries, 0);
}

#[tokio::test]
async fn test_uncaptured_output_still_emits_events() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(Script::exits(0).output("quiet\n"));
    let coordinator = Coordinator::new(sandbox);
    let mut events = coordinator.subscribe();

    let result = coordinator
        .execute("console.log('quiet')", options().capture_output(false))
        .await
        .unwrap();

    assert!(result.stdout.is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ExecutionEvent::Output { data, .. } if data.contains("quiet")
    )));
}

#[tokio::test]
async fn test_language_hint_overrides_detection() {
    let sandbox = ScriptedSandbox::new();
    let coordinator = Coordinator::new(sandbox);
    let result = coordinator
        .execute("let a = 1", options().language("typescript"))
        .await
        .unwrap();
    assert_eq!(result.language, Language::TypeScript);
}

#[tokio::test]
async fn test_commands_do_not_share_the_execution_slot() {
    let sandbox = ScriptedSandbox::new();
    sandbox.push(Script::hangs());
    sandbox.push(Script::exits(0).output("v20.0.0\n"));
    let coordinator = Arc::new(Coordinator::new(sandbox.clone()));
    let commands = CommandRunner::new(sandbox.clone());

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute("for(;;){}", options()).await })
    };
    let watcher = coordinator.clone();
    wait_for(|| watcher.state() == ExecutionState::Running).await;

    let output = commands
        .run("node", &["--version".to_string()], Duration::from_secs(1))
        .await
        .unwrap();
    assert!(output.success());
    assert_eq!(output.stdout, "v20.0.0\n");

    coordinator.stop();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.outcome, ExecutionOutcome::Cancelled);
}
