//! Concurrent DAG scheduler (§4.6, §5).
//!
//! The scheduler owns readiness tracking and bounded parallelism; it knows
//! nothing about conditions, variants, or how a step is actually executed.
//! That behavior is supplied by an injected [`StepRunner`] — this keeps the
//! dependency direction clean (`tr-core` depends on `tr-dag`, not the other
//! way around) while the *effective* call sequence still matches the
//! component table: the scheduler gates on readiness, then the runner gates
//! on conditions/variants before invoking the action executor.
//!
//! A step is ready once every prerequisite has resolved; dispatch onto the
//! bounded worker pool and cooperative cancellation both go through
//! `tokio::sync::Semaphore` + `tokio_util::sync::CancellationToken`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use tr_types::{StepResult, TerminalStatus};

use crate::graph::Dag;
use crate::output::OrderedOutputManager;
use crate::output::StepEventCallback;

/// Executes a single DAG node to completion. Implemented in `tr-core` as the
/// composition of condition gating (C1), variant selection (C3), and action
/// execution (C5); the scheduler treats it as opaque.
///
/// `on_line` is forwarded straight to the ordered output manager (spec
/// §4.7's output-buffering contract); the runner calls it once per output
/// line produced while the step is executing.
#[async_trait]
pub trait StepRunner<T>: Send + Sync {
    async fn run(
        &self,
        node_id: &str,
        data: &T,
        on_line: Arc<dyn Fn(String) + Send + Sync>,
        cancel: CancellationToken,
    ) -> StepResult;
}

/// Aggregate result of running an entire stage's DAG.
pub struct SchedulerOutcome {
    pub results: Vec<StepResult>,
    /// True if the run stopped early because a `stop`-policy step failed or
    /// the run was cancelled; remaining unreached steps are not present in
    /// `results` at all (they never started).
    pub stopped_early: bool,
}

/// Runs a [`Dag`] to completion with bounded parallelism, respecting
/// per-step `onerror` policy and a cooperative [`CancellationToken`].
pub struct Scheduler<T> {
    max_parallel: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new(num_cpus_fallback())
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl<T: Send + Sync + 'static> Scheduler<T> {
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel: max_parallel.max(1), _marker: std::marker::PhantomData }
    }

    /// Run every node in `dag` via `runner`, respecting dependency order,
    /// `onerror` propagation (§4.6: a `stop`-policy failure skips all
    /// of its transitive dependents and halts scheduling new work, but lets
    /// already-running siblings finish), and `cancel`.
    pub async fn run<C: StepEventCallback + 'static>(
        &self,
        dag: Arc<Dag<T>>,
        runner: Arc<dyn StepRunner<T>>,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
    ) -> SchedulerOutcome {
        let n = dag.len();
        let names: Vec<String> = (0..n).map(|i| dag.node_id(i).to_string()).collect();
        let output = Arc::new(OrderedOutputManager::new(names, callback, verbose));

        let state = Arc::new(Mutex::new(SchedulerState {
            done: vec![false; n],
            skipped: HashSet::new(),
            results: vec![None; n],
            stop_requested: false,
        }));

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let remaining = Arc::new(Mutex::new(n));

        // Kick off an initial wave; each completed task schedules its
        // newly-ready dependents itself (work-stealing via recursive spawn).
        let mut ready = Vec::new();
        for i in 0..n {
            if dag.requires(i).is_empty() {
                ready.push(i);
            }
        }

        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        for i in ready.drain(..) {
            spawn_node(
                i,
                dag.clone(),
                runner.clone(),
                output.clone(),
                state.clone(),
                semaphore.clone(),
                cancel.clone(),
                done_tx.clone(),
                remaining.clone(),
            );
        }
        drop(done_tx);

        // Wait until every node has either completed or been permanently
        // skipped. `remaining` is decremented by each terminal node.
        loop {
            let left = *remaining.lock().await;
            if left == 0 {
                break;
            }
            if done_rx.recv().await.is_none() {
                break;
            }
        }

        let guard = state.lock().await;
        let results: Vec<StepResult> = guard.results.iter().cloned().filter_map(|r| r).collect();
        SchedulerOutcome { stopped_early: guard.stop_requested, results }
    }
}

struct SchedulerState {
    done: Vec<bool>,
    skipped: HashSet<usize>,
    results: Vec<Option<StepResult>>,
    stop_requested: bool,
}

#[allow(clippy::too_many_arguments)]
fn spawn_node<T: Send + Sync + 'static, C: StepEventCallback + 'static>(
    idx: usize,
    dag: Arc<Dag<T>>,
    runner: Arc<dyn StepRunner<T>>,
    output: Arc<OrderedOutputManager<C>>,
    state: Arc<Mutex<SchedulerState>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    done_tx: tokio::sync::mpsc::UnboundedSender<()>,
    remaining: Arc<Mutex<usize>>,
) {
    tokio::spawn(async move {
        // Dependency-skip (§4.6) only looks at *this* node's direct
        // prerequisites — a stop-policy failure elsewhere in the graph
        // never withholds dispatch of unrelated, already-ready work.
        let failed_prereqs: Vec<String> = {
            let guard = state.lock().await;
            dag.requires(idx)
                .iter()
                .filter(|&&p| guard.skipped.contains(&p))
                .map(|&p| dag.node_id(p).to_string())
                .collect()
        };

        if !failed_prereqs.is_empty() || cancel.is_cancelled() {
            let name = dag.node_id(idx).to_string();
            let message = if cancel.is_cancelled() {
                "skipped: run cancelled".to_string()
            } else {
                format!("skipped (dependency failed: {})", failed_prereqs.join(", "))
            };
            tracing::debug!(step = %name, reason = %message, "dependency-skip");
            let result = StepResult::skipped(name, message);
            output.on_start(idx);
            output.on_complete(idx, TerminalStatus::Skipped, result.message.clone(), Duration::ZERO);
            finish_node(idx, result, true, dag.clone(), state.clone(), semaphore.clone(), cancel.clone(), done_tx.clone(), remaining.clone(), runner.clone(), output.clone()).await;
            return;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        output.on_start(idx);
        tracing::debug!(step = %dag.node_id(idx), "step executing");
        let start = Instant::now();
        let data = dag.node_data(idx);
        let line_output = output.clone();
        let on_line: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |line: String| line_output.on_output(idx, line));
        let result = runner.run(dag.node_id(idx), data, on_line, cancel.clone()).await;
        drop(permit);
        let elapsed = start.elapsed();

        // A failing step under `onerror: warn` (§3, §7) converts to a WARN
        // result here, before the output manager or the caller ever sees
        // it — both the live callback and the run report must show WARN,
        // not ERROR, for a warn-policy step.
        let result = if result.status.is_error() && dag.onerror(idx) == tr_types::OnError::Warn {
            StepResult::warn(result.step_name.clone(), result.message.clone(), result.error_cause.clone().unwrap_or_default(), result.duration)
        } else {
            result
        };

        output.on_complete(idx, result.status, result.message.clone(), elapsed);

        let is_failure = result.status.is_error() && dag.onerror(idx) == tr_types::OnError::Stop;
        if is_failure {
            tracing::warn!(step = %dag.node_id(idx), message = %result.message, "step failed, stop policy");
        }
        finish_node(idx, result, is_failure, dag, state, semaphore, cancel, done_tx, remaining, runner, output).await;
    });
}

#[allow(clippy::too_many_arguments)]
async fn finish_node<T: Send + Sync + 'static, C: StepEventCallback + 'static>(
    idx: usize,
    result: StepResult,
    propagate_failure: bool,
    dag: Arc<Dag<T>>,
    state: Arc<Mutex<SchedulerState>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    done_tx: tokio::sync::mpsc::UnboundedSender<()>,
    remaining: Arc<Mutex<usize>>,
    runner: Arc<dyn StepRunner<T>>,
    output: Arc<OrderedOutputManager<C>>,
) {
    let mut newly_ready = Vec::new();
    {
        let mut guard = state.lock().await;
        guard.done[idx] = true;
        guard.results[idx] = Some(result);
        if propagate_failure {
            guard.skipped.insert(idx);
            guard.stop_requested = true;
            if cancel_on_stop_policy() {
                cancel.cancel();
            }
        }

        // dependents of idx: find nodes whose requires includes idx and all
        // of whose requires are now done.
        for candidate in 0..dag.len() {
            if guard.done[candidate] || guard.skipped.contains(&candidate) {
                continue;
            }
            if !dag.requires(candidate).contains(&idx) {
                continue;
            }
            let all_done = dag.requires(candidate).iter().all(|&p| guard.done[p] || guard.skipped.contains(&p));
            if all_done {
                newly_ready.push(candidate);
            }
        }
    }

    for next in newly_ready {
        spawn_node(
            next,
            dag.clone(),
            runner.clone(),
            output.clone(),
            state.clone(),
            semaphore.clone(),
            cancel.clone(),
            done_tx.clone(),
            remaining.clone(),
        );
    }

    let mut left = remaining.lock().await;
    *left = left.saturating_sub(1);
    let _ = done_tx.send(());
}

/// Whether a stop-policy failure should cancel already-running siblings.
/// Spec §5: no — siblings run to completion; only *new* work is withheld.
/// Kept as a named function (not inlined `false`) so the decision reads as
/// deliberate at the call site.
fn cancel_on_stop_policy() -> bool {
    false
}
