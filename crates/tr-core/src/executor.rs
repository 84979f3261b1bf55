//! Action executor (C5, §4.5).
//!
//! Runs one resolved action: either a built-in lookup or a shell
//! invocation. Side effects (process spawn, shell resolution) are mediated
//! entirely by `tr_runtime`, keeping this module itself free of direct
//! process/filesystem calls.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tr_runtime::{resolve_shell, run_buffered, run_streamed, CancellationToken, OutputLine};
use tr_types::StepResult;

use crate::config::ActionBody;
use crate::registry::BuiltinRegistry;

/// Everything the executor needs beyond the resolved action body: the
/// environment it runs in and how output should be surfaced.
pub struct ExecutionRequest<'a> {
    pub step_name: &'a str,
    pub body: ActionBody<'a>,
    pub shell: Option<&'a str>,
    pub workdir: &'a Path,
    pub env: &'a HashMap<String, String>,
    pub verbose: bool,
}

/// Runs `request` to completion. `on_line` is called for each output line
/// when `verbose` is set (§4.5 streaming behavior); it must be owned
/// (not borrowed) since the underlying process plumbing spawns reader
/// tasks that outlive this call's stack frame.
pub async fn execute(
    request: ExecutionRequest<'_>,
    registry: &BuiltinRegistry,
    cancel: CancellationToken,
    on_line: impl Fn(String) + Send + Sync + 'static,
) -> StepResult {
    let start = Instant::now();
    match request.body {
        ActionBody::Uses(name) => {
            let Some(runner) = registry.get(name) else {
                return StepResult::error(
                    request.step_name,
                    format!("unknown built-in action `{name}`"),
                    format!("no built-in registered under `{name}`"),
                    start.elapsed(),
                );
            };
            runner.run(request.workdir, cancel).await.into_step_result(request.step_name, start.elapsed())
        }
        ActionBody::Run(command) => run_shell(request, command, cancel, start, on_line).await,
    }
}

async fn run_shell(
    request: ExecutionRequest<'_>,
    command: &str,
    cancel: CancellationToken,
    start: Instant,
    on_line: impl Fn(String) + Send + Sync + 'static,
) -> StepResult {
    let resolved = match resolve_shell(request.shell) {
        Ok(r) => r,
        Err(e) => {
            return StepResult::error(request.step_name, "shell configuration error", e.to_string(), start.elapsed());
        }
    };
    let (program, args) = resolved.argv(command);

    let outcome = if request.verbose {
        run_streamed(&program, &args, request.workdir, request.env, cancel.clone(), move |line: OutputLine| {
            on_line(line.line);
        })
        .await
    } else {
        run_buffered(&program, &args, request.workdir, request.env, cancel.clone()).await
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            return StepResult::error(request.step_name, "failed to launch command", e.to_string(), start.elapsed());
        }
    };

    let duration = start.elapsed();
    if outcome.cancelled {
        return StepResult::error(request.step_name, "cancelled", "cancelled".to_string(), duration);
    }

    match outcome.exit_code {
        Some(0) => {
            let message = if request.verbose { "command executed successfully".to_string() } else { outcome.stdout.clone() };
            StepResult::ok(request.step_name, message, duration)
        }
        _ => {
            let reproduction = format!("to check run:\n  {command}");
            let output = format!("{}{}", outcome.stdout, outcome.stderr);
            StepResult::error(request.step_name, reproduction, output, duration)
        }
    }
}

/// Outcome of a built-in runner invocation (§6 "Built-in action
/// runner interface"), mapped onto [`StepResult`] unchanged as §4.5
/// requires ("map its {OK, WARN, ERROR} result through unchanged").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinOutcome {
    Ok(String),
    Warn(String),
    Error(String),
}

impl BuiltinOutcome {
    fn into_step_result(self, step_name: &str, duration: Duration) -> StepResult {
        match self {
            BuiltinOutcome::Ok(msg) => StepResult::ok(step_name, msg, duration),
            BuiltinOutcome::Warn(msg) => StepResult::warn(step_name, msg.clone(), msg, duration),
            BuiltinOutcome::Error(msg) => StepResult::error(step_name, msg.clone(), msg, duration),
        }
    }
}
