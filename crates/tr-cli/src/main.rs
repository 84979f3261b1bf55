use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tr_core::{Project, StageOrchestrator};
use tr_dag::StepEventCallback;
use tr_types::TerminalStatus;

#[derive(Parser, Debug)]
#[command(name = "tr", version, about = "Task Runner CLI")]
struct Cli {
    /// Path to the project YAML file.
    #[arg(long, default_value = "project.yaml")]
    project: PathBuf,
    /// Work directory actions run in. Defaults to the project file's directory.
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Extra vars: --var key=value (repeatable).
    #[arg(long = "var", value_parser = parse_key_val, num_args = 0..)]
    vars: Vec<(String, String)>,
    /// Print step output live instead of only on failure.
    #[arg(long)]
    verbose: bool,
    /// Maximum number of steps to run concurrently.
    #[arg(long)]
    parallel: Option<usize>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run every step in a stage's dependency graph.
    RunStage {
        stage: String,
        /// Print a machine-readable run report (run id, timestamps, every
        /// step's result) to stdout as JSON instead of the live event log.
        #[arg(long)]
        json: bool,
    },
    /// Run one step from a stage.
    RunStageStep {
        stage: String,
        step: String,
        /// Also run the step's transitive prerequisites first.
        #[arg(long)]
        with_requires: bool,
    },
    /// Run a single action, outside of any stage/DAG.
    RunAction { action: String },
    /// List the project's declared actions.
    ListActions,
    /// List the project's declared stages.
    ListStages,
    /// Re-validate the project file without running anything.
    Validate,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = s.split_once('=').ok_or("expected key=value")?;
    Ok((k.to_string(), v.to_string()))
}

/// Prints step lifecycle events to stdout/stderr as they are released by
/// the ordered output manager (§4.7): one line per event, in
/// declaration order.
struct CliCallback {
    verbose: bool,
}

impl StepEventCallback for CliCallback {
    fn on_step_start(&self, step_name: &str) {
        println!("==> {step_name}");
    }

    fn on_step_complete(&self, step_name: &str, status: TerminalStatus, message: &str, duration: std::time::Duration) {
        let marker = match status {
            TerminalStatus::Ok => "ok",
            TerminalStatus::Warn => "warn",
            TerminalStatus::Error => "error",
            TerminalStatus::Skipped => "skipped",
        };
        println!("<== {step_name} [{marker}] ({:.2}s) {message}", duration.as_secs_f64());
    }

    fn on_step_output(&self, step_name: &str, line: &str) {
        if self.verbose {
            println!("    {step_name} | {line}");
        }
    }

    fn on_step_error(&self, step_name: &str, error: &str) {
        eprintln!("!!! {step_name}: {error}");
    }
}

/// Used in `--json` mode: the ordered output manager still drives its
/// contracts, but nothing is printed except the final report.
struct NullCallback;

impl StepEventCallback for NullCallback {
    fn on_step_start(&self, _step_name: &str) {}
    fn on_step_complete(&self, _step_name: &str, _status: TerminalStatus, _message: &str, _duration: std::time::Duration) {}
    fn on_step_output(&self, _step_name: &str, _line: &str) {}
    fn on_step_error(&self, _step_name: &str, _error: &str) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let project = Project::load(&cli.project).with_context(|| format!("load {}", cli.project.display()))?;
    let workdir = cli.workdir.clone().unwrap_or_else(|| {
        cli.project.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
    });

    let mut orchestrator = StageOrchestrator::new(project, workdir);
    if !cli.vars.is_empty() {
        orchestrator = orchestrator.with_vars(cli.vars.into_iter().collect::<BTreeMap<_, _>>());
    }
    if let Some(n) = cli.parallel {
        orchestrator = orchestrator.with_max_parallel(n);
    }

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrlc_cancel.cancel();
    });

    match cli.cmd {
        Cmd::ListActions => {
            for name in orchestrator.list_actions() {
                println!("{name}");
            }
            Ok(())
        }
        Cmd::ListStages => {
            for name in orchestrator.list_stages() {
                println!("{name}");
            }
            Ok(())
        }
        Cmd::Validate => {
            orchestrator.validate()?;
            println!("project is valid");
            Ok(())
        }
        Cmd::RunStage { stage, json } => {
            if json {
                let report = orchestrator
                    .run_stage_report(&stage, NullCallback, cli.verbose, cancel)
                    .await
                    .context("stage run failed")?;
                println!("{}", serde_json::to_string_pretty(&report).context("serialize run report")?);
            } else {
                orchestrator
                    .run_stage(&stage, CliCallback { verbose: cli.verbose }, cli.verbose, cancel)
                    .await
                    .context("stage run failed")?;
            }
            Ok(())
        }
        Cmd::RunStageStep { stage, step, with_requires } => {
            orchestrator
                .run_stage_step(&stage, &step, with_requires, CliCallback { verbose: cli.verbose }, cli.verbose, cancel)
                .await
                .context("step run failed")?;
            Ok(())
        }
        Cmd::RunAction { action } => {
            let result = orchestrator
                .run_action(&action, CliCallback { verbose: cli.verbose }, cli.verbose, cancel)
                .await
                .context("action run failed")?;
            if result.status.is_error() {
                anyhow::bail!("action `{action}` failed: {}", result.message);
            }
            Ok(())
        }
    }
}
