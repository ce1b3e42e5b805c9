//! Taintflow CLI
//!
//! # Usage
//!
//! ```bash
//! # One-shot type check
//! taintflow check --source-root ./src
//!
//! # Taint fixpoint with model documents
//! taintflow analyze --source-root ./src --models ./taint/models.pysa
//!
//! # Read-only environment probe
//! taintflow query --source-root ./src signature myapp.handler
//!
//! # Long-running incremental server
//! taintflow server --source-root ./src
//! ```
//!
//! Exit code is non-zero iff any `error`-severity diagnostic is produced.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;
use taintflow_core::config::AnalysisConfig;
use taintflow_core::features::source_env::FileEvent;
use taintflow_core::shared::models::{Qualifier, Severity};
use taintflow_core::{AnalysisPipeline, Result, TaintflowError};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "taintflow")]
#[command(about = "Whole-program taint analyzer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Source roots, in shadowing order
    #[arg(long = "source-root", required = true)]
    source_roots: Vec<PathBuf>,

    /// Stub roots consulted before implementations
    #[arg(long = "stub-root")]
    stub_roots: Vec<PathBuf>,

    /// Configuration file; command-line flags win on conflict
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// One-shot type check
    Check {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the interprocedural taint fixpoint
    Analyze {
        #[command(flatten)]
        common: CommonArgs,

        /// Taint model documents
        #[arg(long = "models")]
        model_paths: Vec<PathBuf>,

        /// Rules file (JSON); built-in rules apply when absent
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Only report these rule codes
        #[arg(long = "rule-filter", value_delimiter = ',')]
        rule_filter: Option<Vec<u32>>,

        /// Cache directory for persisted state
        #[arg(long = "cache-dir")]
        cache_dir: Option<PathBuf>,

        /// Fixpoint iteration budget
        #[arg(long, default_value = "100")]
        max_iterations: u32,
    },

    /// Read-only environment probe
    Query {
        #[command(flatten)]
        common: CommonArgs,

        #[command(subcommand)]
        probe: Probe,
    },

    /// Long-running incremental server watching the source roots
    Server {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Subcommand)]
enum Probe {
    /// Signature of a fully qualified callable
    Signature { name: String },

    /// Class summary of a fully qualified class
    Class { name: String },

    /// Annotated global
    Global { name: String },

    /// All known project modules
    Modules,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Deployment wrappers communicate through these; absence is fine, and
    // the HH_SERVER_DAEMON* family is cleared by test harnesses.
    if let Ok(binary) = std::env::var("TAINTFLOW_BINARY") {
        debug!(%binary, "binary override present");
    }
    if let Ok(client) = std::env::var("TAINTFLOW_CLIENT") {
        debug!(%client, "client override present");
    }
    for (key, _) in std::env::vars().filter(|(k, _)| k.starts_with("HH_SERVER_DAEMON")) {
        debug!(%key, "ignoring legacy daemon variable");
    }

    match run() {
        Ok(had_errors) => {
            if had_errors {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            eprintln!("taintflow: {error}");
            ExitCode::from(2)
        }
    }
}

fn build_config(common: &CommonArgs) -> Result<AnalysisConfig> {
    let mut config = match &common.config {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::default(),
    };
    if !common.source_roots.is_empty() {
        config.source_roots = common.source_roots.clone();
    }
    if !common.stub_roots.is_empty() {
        config.stub_roots = common.stub_roots.clone();
    }
    Ok(config)
}

fn run() -> Result<bool> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { common } => {
            let config = build_config(&common)?;
            let pipeline = AnalysisPipeline::from_disk(config)?;
            let diagnostics = pipeline.check();
            println!("{}", serde_json::to_string_pretty(&diagnostics).unwrap());
            Ok(diagnostics.iter().any(|d| d.severity == Severity::Error))
        }
        Commands::Analyze {
            common,
            model_paths,
            rules,
            rule_filter,
            cache_dir,
            max_iterations,
        } => {
            let mut config = build_config(&common)?;
            if !model_paths.is_empty() {
                config.model_paths = model_paths;
            }
            if rules.is_some() {
                config.rules_path = rules;
            }
            if rule_filter.is_some() {
                config.rule_filter = rule_filter;
            }
            if cache_dir.is_some() {
                config.cache_dir = cache_dir;
            }
            config.max_iterations = max_iterations;

            let pipeline = AnalysisPipeline::from_disk(config)?;
            let report = pipeline.analyze()?;

            for error in &report.model_errors {
                eprintln!("model error: {error}");
            }
            info!(
                iterations = report.iterations,
                issues = report.issues.len(),
                expensive = report.expensive_callables,
                "analysis finished"
            );
            println!("{}", serde_json::to_string_pretty(&report.issues).unwrap());
            Ok(report.has_errors())
        }
        Commands::Query { common, probe } => {
            let config = build_config(&common)?;
            let pipeline = AnalysisPipeline::from_disk(config)?;
            let env = pipeline.type_env();
            let value = match probe {
                Probe::Signature { name } => serde_json::to_value(env.signature_of(&name))
                    .unwrap_or(serde_json::Value::Null),
                Probe::Class { name } => match env.class_summary(&name) {
                    Some(summary) => serde_json::json!({
                        "name": summary.name,
                        "bases": summary.bases,
                        "methods": summary.methods.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
                        "attributes": summary.attributes.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
                    }),
                    None => serde_json::Value::Null,
                },
                Probe::Global { name } => match env.global_info(&name) {
                    Some(info) => serde_json::json!({
                        "name": info.name,
                        "annotation": info.annotation.as_ref().map(|a| a.to_string()),
                    }),
                    None => serde_json::Value::Null,
                },
                Probe::Modules => serde_json::to_value(
                    pipeline
                        .project_modules()
                        .iter()
                        .map(|q| q.as_str().to_string())
                        .collect::<Vec<_>>(),
                )
                .unwrap(),
            };
            println!("{}", serde_json::to_string_pretty(&value).unwrap());
            Ok(false)
        }
        Commands::Server { common } => {
            let config = build_config(&common)?;
            let roots = config.source_roots.clone();
            let pipeline = AnalysisPipeline::from_disk(config)?;
            serve(pipeline, roots)
        }
    }
}

/// Watch the source roots and re-check incrementally on every batch of
/// filesystem events.
fn serve(pipeline: AnalysisPipeline, roots: Vec<PathBuf>) -> Result<bool> {
    use notify::{RecursiveMode, Watcher};

    let (sender, receiver) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = sender.send(event);
    })
    .map_err(|e| TaintflowError::config(format!("watcher: {e}")))?;
    for root in &roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| TaintflowError::config(format!("watch {}: {e}", root.display())))?;
    }

    // Initial state so the first incremental batch has a baseline.
    let initial = pipeline.check();
    println!("{}", serde_json::to_string_pretty(&initial).unwrap());
    info!(diagnostics = initial.len(), "server ready");

    loop {
        let Ok(event) = receiver.recv() else {
            // Watcher gone; shut down cleanly.
            return Ok(false);
        };
        let mut paths: Vec<PathBuf> = match event {
            Ok(event) => event.paths,
            Err(error) => {
                warn!(%error, "watch error");
                continue;
            }
        };
        // Coalesce whatever arrived in the same instant.
        while let Ok(Ok(more)) = receiver.recv_timeout(Duration::from_millis(20)) {
            paths.extend(more.paths);
        }
        paths.sort();
        paths.dedup();

        let events: Vec<FileEvent> = paths
            .into_iter()
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e == "py" || e == "pyi")
                    .unwrap_or(false)
            })
            .map(|path| match std::fs::read_to_string(&path) {
                Ok(content) => FileEvent::CreatedOrChanged { path, content },
                Err(_) => FileEvent::Deleted { path },
            })
            .collect();
        if events.is_empty() {
            continue;
        }

        let result = pipeline.update(events);
        let recheck: Vec<Qualifier> = result.recheck_modules.clone();
        debug!(
            invalidated = result.invalidated_modules.len(),
            rechecked = recheck.len(),
            "incremental update"
        );

        let mut diagnostics = result.syntax_errors;
        for qualifier in &recheck {
            diagnostics.extend(pipeline.type_env().check_module(qualifier).iter().cloned());
        }
        diagnostics.sort_by_key(|d| d.sort_key());
        println!("{}", serde_json::to_string_pretty(&diagnostics).unwrap());
    }
}
