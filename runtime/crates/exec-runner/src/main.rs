//! `playground`: run, inspect and transform JS/TS snippets locally.
//!
//! ```bash
//! playground run app.tsx
//! echo 'console.log(1)' | playground run - --json
//! playground deps app.ts
//! RUST_LOG=exec_engine=debug playground run slow.js --timeout-ms 500
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exec_engine::{Coordinator, EngineConfig};
use exec_runner::{format_report, NodeSandbox, RenderMode, Renderer};
use tracing_subscriber::EnvFilter;

/// Filename used when the source comes from stdin.
const STDIN_FILENAME: &str = "main.js";

#[derive(Parser, Debug)]
#[command(name = "playground")]
#[command(about = "Run JavaScript and TypeScript snippets with structured console capture")]
struct Args {
    /// Engine config file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a source file (`-` reads stdin)
    Run {
        file: PathBuf,

        /// Kill the program after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Skip dependency analysis
        #[arg(long)]
        no_deps: bool,

        /// Install missing packages before running
        #[arg(long)]
        install: bool,

        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,

        /// Work directory for the entry file (defaults to a fresh temp dir)
        #[arg(long, value_name = "DIR")]
        workdir: Option<PathBuf>,

        /// Force the language instead of detecting it
        #[arg(long)]
        language: Option<String>,
    },
    /// Report the detected language
    Detect {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Report imported packages, missing ones and conflicts
    Deps {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the executable JavaScript for a source file
    Transform { file: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))?;

    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Run {
            file,
            timeout_ms,
            no_deps,
            install,
            json,
            workdir,
            language,
        } => {
            let (code, filename) = read_source(&file)?;
            let scratch;
            let root = match workdir {
                Some(dir) => {
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create work dir: {:?}", dir))?;
                    dir
                }
                None => {
                    scratch = tempfile::tempdir().context("Failed to create work dir")?;
                    scratch.path().to_path_buf()
                }
            };
            tracing::debug!(root = %root.display(), "using work dir");

            let coordinator = Arc::new(
                Coordinator::builder(Arc::new(NodeSandbox::new(root)))
                    .config(config)
                    .build(),
            );
            let mut options = coordinator
                .options()
                .filename(filename)
                .check_dependencies(!no_deps)
                .auto_install_deps(install);
            if let Some(timeout_ms) = timeout_ms {
                options = options.timeout_ms(timeout_ms);
            }
            if let Some(language) = language {
                options = options.language(language);
            }

            let mode = if json { RenderMode::Json } else { RenderMode::Human };
            let mut events = coordinator.subscribe();
            let printer = tokio::spawn(async move {
                let mut renderer = Renderer::terminal(mode);
                while let Some(event) = events.recv().await {
                    match renderer.render(&event) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => {
                            tracing::warn!(%err, "failed to write output");
                            break;
                        }
                    }
                }
            });

            let interrupt = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        coordinator.stop();
                    }
                })
            };

            let outcome = coordinator.execute(code, options).await;
            interrupt.abort();
            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    printer.abort();
                    return Err(err).context("Execution rejected");
                }
            };
            if let Err(err) = printer.await {
                tracing::warn!(%err, "printer task failed");
            }
            Ok(if result.exit_code < 0 { 1 } else { result.exit_code })
        }
        Command::Detect { file, json } => {
            let (code, filename) = read_source(&file)?;
            let coordinator = local_coordinator(config);
            let detection = coordinator.detect(&code, &filename);
            if json {
                println!("{}", serde_json::to_string_pretty(&detection)?);
            } else {
                println!(
                    "{} ({:.2})",
                    detection.display_name, detection.confidence
                );
            }
            Ok(0)
        }
        Command::Deps { file, json } => {
            let (code, filename) = read_source(&file)?;
            let coordinator = local_coordinator(config);
            let language = coordinator.detect(&code, &filename).language;
            let report = coordinator.analyze_dependencies(&code, language).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", format_report(&report));
            }
            Ok(if report.has_missing() { 2 } else { 0 })
        }
        Command::Transform { file } => {
            let (code, filename) = read_source(&file)?;
            let coordinator = local_coordinator(config);
            let result = coordinator
                .transform(&code, &filename)
                .with_context(|| format!("Failed to transform {}", filename))?;
            print!("{}", result.transformed_code);
            Ok(0)
        }
    }
}

/// Coordinator over the current directory, for commands that never spawn.
fn local_coordinator(config: EngineConfig) -> Coordinator {
    Coordinator::builder(Arc::new(NodeSandbox::new(".")))
        .config(config)
        .build()
}

fn read_source(path: &Path) -> Result<(String, String)> {
    if path.as_os_str() == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read stdin")?;
        return Ok((code, STDIN_FILENAME.to_string()));
    }
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source: {:?}", path))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| STDIN_FILENAME.to_string());
    Ok((code, filename))
}
