//! Stage orchestrator (C8, §4.8): the public API surface of the
//! execution core. Ties together the config (§3), the expression
//! evaluator/interpolator/variant selector (C1-C3), the DAG builder and
//! scheduler (`tr_dag`), the action executor (C5), and the built-in
//! registry (C9).
//!
//! Exposes the `RunStage`/`RunAction`/`RunStageStep` trio §4.8
//! requires, all backed by the same DAG scheduler — per §9's Open
//! Question this is the *only* execution path; no second "simple"
//! sequential runner coexists alongside it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tr_dag::{Dag, NodeSpec, Scheduler, StepEventCallback, StepRunner};
use tr_runtime::PlatformVars;
use tr_types::{CancellationCause, ExecError, OnError, RunnerError, RunnerResult, StepResult, TerminalStatus};

use crate::config::{Action, Project, Stage, Step};
use crate::context::Context;
use crate::executor::{self, ExecutionRequest};
use crate::registry::BuiltinRegistry;
use crate::{expr, variant};

/// Owns the validated project and everything needed to run it: built-in
/// registry, working directory, and the variable context (§3
/// "Ownership: the orchestrator exclusively owns the DAG and execution
/// state; the scheduler borrows them for the duration of the run").
pub struct StageOrchestrator {
    project: Arc<Project>,
    registry: Arc<BuiltinRegistry>,
    workdir: PathBuf,
    context: Context,
    max_parallel: usize,
}

impl StageOrchestrator {
    pub fn new(project: Project, workdir: PathBuf) -> Self {
        let platform = PlatformVars::detect(&workdir);
        let max_parallel = num_cpus::get();
        Self {
            project: Arc::new(project),
            registry: Arc::new(BuiltinRegistry::default()),
            workdir,
            context: Context::new(BTreeMap::new()).with_platform(platform),
            max_parallel,
        }
    }

    pub fn with_registry(mut self, registry: BuiltinRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.context.vars = vars;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn list_actions(&self) -> Vec<&str> {
        self.project.actions.keys().map(String::as_str).collect()
    }

    pub fn list_stages(&self) -> Vec<&str> {
        self.project.stages.keys().map(String::as_str).collect()
    }

    pub fn validate(&self) -> RunnerResult<()> {
        self.project.validate().map_err(RunnerError::from)
    }

    /// **RunStage** (§4.8).
    pub async fn run_stage<C: StepEventCallback + 'static>(
        &self,
        stage_name: &str,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
    ) -> RunnerResult<()> {
        tracing::debug!(stage = stage_name, "run_stage starting");
        let stage = self.project.stages.get(stage_name).ok_or_else(|| RunnerError::StageNotFound(stage_name.to_string()))?;
        let specs = self.resolve_stage(stage)?;
        let dag = Arc::new(Dag::build(specs).map_err(RunnerError::from)?);
        let result = self.drive(dag, stage, callback, verbose, cancel, stage_name).await;
        match &result {
            Ok(_) => tracing::debug!(stage = stage_name, "run_stage finished"),
            Err(e) => tracing::warn!(stage = stage_name, error = %e, "run_stage failed"),
        }
        result.map(|_| ())
    }

    /// Like [`Self::run_stage`], but returns a [`crate::report::RunReport`]
    /// carrying a run identifier, start/finish timestamps, and every
    /// step's result — for callers that want a machine-readable summary
    /// (e.g. the CLI's `--json` output) rather than only pass/fail.
    pub async fn run_stage_report<C: StepEventCallback + 'static>(
        &self,
        stage_name: &str,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
    ) -> RunnerResult<crate::report::RunReport> {
        let run_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let stage = self.project.stages.get(stage_name).ok_or_else(|| RunnerError::StageNotFound(stage_name.to_string()))?;
        let specs = self.resolve_stage(stage)?;
        let dag = Arc::new(Dag::build(specs).map_err(RunnerError::from)?);
        let results = self.drive(dag, stage, callback, verbose, cancel, stage_name).await?;
        Ok(crate::report::RunReport { run_id, stage: stage_name.to_string(), started_at, finished_at: chrono::Utc::now(), results })
    }

    /// **RunStageStep** (§4.8).
    pub async fn run_stage_step<C: StepEventCallback + 'static>(
        &self,
        stage_name: &str,
        step_name: &str,
        with_requires: bool,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
    ) -> RunnerResult<()> {
        let stage = self.project.stages.get(stage_name).ok_or_else(|| RunnerError::StageNotFound(stage_name.to_string()))?;
        if !stage.steps.iter().any(|s| s.key() == step_name) {
            return Err(RunnerError::StepNotFound(step_name.to_string(), stage_name.to_string()));
        }

        let specs = self.resolve_stage(stage)?;
        let full_dag = Dag::build(specs).map_err(RunnerError::from)?;
        let root = full_dag.index_of(step_name).ok_or_else(|| RunnerError::StepNotFound(step_name.to_string(), stage_name.to_string()))?;

        let included: Vec<usize> = if with_requires { full_dag.transitive_closure(root) } else { vec![root] };
        let included_ids: std::collections::HashSet<&str> = included.iter().map(|&i| full_dag.node_id(i)).collect();

        let sub_specs: Vec<NodeSpec<ResolvedStep>> = included
            .iter()
            .map(|&i| NodeSpec {
                id: full_dag.node_id(i).to_string(),
                requires: full_dag
                    .requires(i)
                    .iter()
                    .map(|&r| full_dag.node_id(r).to_string())
                    .filter(|id| included_ids.contains(id.as_str()))
                    .collect(),
                onerror: full_dag.onerror(i),
                data: full_dag.node_data(i).clone(),
            })
            .collect();

        let sub_dag = Arc::new(Dag::build(sub_specs).map_err(RunnerError::from)?);
        self.drive(sub_dag, stage, callback, verbose, cancel, stage_name).await.map(|_| ())
    }

    /// **RunAction** (§4.8): a single action, no DAG plumbing.
    pub async fn run_action<C: StepEventCallback>(
        &self,
        action_name: &str,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
    ) -> RunnerResult<StepResult> {
        let action = self.project.actions.get(action_name).ok_or_else(|| RunnerError::ActionNotFound(action_name.to_string()))?;

        callback.on_step_start(action_name);
        let start = std::time::Instant::now();
        let result = self.run_resolved_action(action_name, action, verbose, cancel).await;
        callback.on_step_complete(action_name, result.status, &result.message, start.elapsed());
        Ok(result)
    }

    async fn run_resolved_action(&self, name: &str, action: &Action, verbose: bool, cancel: CancellationToken) -> StepResult {
        match variant::select(action, &self.context) {
            Ok(variant::Resolution::NoMatch) => StepResult::skipped(name, "no matching variant"),
            Ok(variant::Resolution::Effective { body, shell }) => {
                let env = self.env_map();
                let request = ExecutionRequest { step_name: name, body, shell, workdir: &self.workdir, env: &env, verbose };
                executor::execute(request, &self.registry, cancel, |_| {}).await
            }
            Err(e) => StepResult::error(name, e.to_string(), e.to_string(), std::time::Duration::ZERO),
        }
    }

    async fn drive<C: StepEventCallback + 'static>(
        &self,
        dag: Arc<Dag<ResolvedStep>>,
        stage: &Stage,
        callback: C,
        verbose: bool,
        cancel: CancellationToken,
        stage_name: &str,
    ) -> RunnerResult<Vec<StepResult>> {
        let runner = Arc::new(CoreStepRunner {
            registry: self.registry.clone(),
            context: self.context.clone(),
            workdir: self.workdir.clone(),
            verbose,
        });
        let scheduler: Scheduler<ResolvedStep> = Scheduler::new(self.max_parallel);
        let outcome = scheduler.run(dag, runner, callback, verbose, cancel.clone()).await;

        if cancel.is_cancelled() {
            return Err(RunnerError::Cancellation(CancellationCause::new(format!("stage `{stage_name}` cancelled"))));
        }

        for result in &outcome.results {
            if !result.status.is_error() {
                continue;
            }
            let step = stage.steps.iter().find(|s| s.key() == result.step_name);
            if step.map(|s| s.onerror).unwrap_or(OnError::Stop) == OnError::Warn {
                continue;
            }
            let action_name = step.map(|s| s.action.clone()).unwrap_or_default();
            let source = RunnerError::Execution(ExecError {
                step: result.step_name.clone(),
                action: action_name,
                message: result.message.clone(),
                output: result.error_cause.clone().unwrap_or_default(),
                reproduction: None,
            });
            return Err(RunnerError::StepFailed { step: result.step_name.clone(), source: Box::new(source) });
        }

        Ok(outcome.results)
    }

    fn env_map(&self) -> HashMap<String, String> {
        self.context.flattened().into_iter().collect()
    }

    /// Interpolates and resolves a stage's steps into DAG node specs
    /// (§4.2: interpolation happens over the step's action reference,
    /// `require` entries, and `if` text before DAG construction).
    fn resolve_stage(&self, stage: &Stage) -> RunnerResult<Vec<NodeSpec<ResolvedStep>>> {
        let vars = self.context.flattened();
        let mut specs = Vec::with_capacity(stage.steps.len());
        for step in &stage.steps {
            let action_ref = crate::interpolate::interpolate(&step.action, &vars);
            let action = self
                .project
                .actions
                .get(&action_ref)
                .ok_or_else(|| RunnerError::ActionNotFound(action_ref.clone()))?
                .clone();
            let requires: Vec<String> = step.require.iter().map(|r| crate::interpolate::interpolate(r, &vars)).collect();
            let condition = step.condition.as_ref().map(|c| crate::interpolate::interpolate(c, &vars));
            let key = step.name.clone().unwrap_or_else(|| action_ref.clone());

            specs.push(NodeSpec {
                id: key,
                requires,
                onerror: step.onerror,
                data: ResolvedStep { action, condition, only: step.only.clone() },
            });
        }
        Ok(specs)
    }
}

/// The data a DAG node carries for a single step: its resolved action and
/// gating metadata (condition, version-kind labels).
#[derive(Clone)]
struct ResolvedStep {
    action: Action,
    condition: Option<String>,
    only: Vec<String>,
}

struct CoreStepRunner {
    registry: Arc<BuiltinRegistry>,
    context: Context,
    workdir: PathBuf,
    verbose: bool,
}

#[async_trait]
impl StepRunner<ResolvedStep> for CoreStepRunner {
    async fn run(
        &self,
        node_id: &str,
        data: &ResolvedStep,
        on_line: Arc<dyn Fn(String) + Send + Sync>,
        cancel: CancellationToken,
    ) -> StepResult {
        // Condition gating (§4.6): `if` and `only` failures are an
        // OK-status skip, distinct from a variant no-match (SKIPPED).
        if let Some(condition) = &data.condition {
            match expr::evaluate_bool(condition, &self.context) {
                Ok(true) => {}
                Ok(false) => return StepResult::ok(node_id, "skipped (condition not met)", std::time::Duration::ZERO),
                Err(e) => return StepResult::error(node_id, e.to_string(), e.to_string(), std::time::Duration::ZERO),
            }
        }

        if !data.only.is_empty() {
            let kind = match crate::registry::determine_version_kind(&self.workdir, cancel.clone()).await {
                Ok(kind) => kind,
                Err(e) => return StepResult::error(node_id, e.clone(), e, std::time::Duration::ZERO),
            };
            let label = kind.label();
            let matches_only = data.only.iter().any(|entry| entry == label);
            if !matches_only {
                return StepResult::ok(node_id, "skipped (condition not met)", std::time::Duration::ZERO);
            }
        }

        match variant::select(&data.action, &self.context) {
            Ok(variant::Resolution::NoMatch) => StepResult::skipped(node_id, "no matching variant"),
            Ok(variant::Resolution::Effective { body, shell }) => {
                let env: HashMap<String, String> = self.context.flattened().into_iter().collect();
                let request = ExecutionRequest { step_name: node_id, body, shell, workdir: &self.workdir, env: &env, verbose: self.verbose };
                executor::execute(request, &self.registry, cancel, move |line| on_line(line)).await
            }
            Err(e) => StepResult::error(node_id, e.to_string(), e.to_string(), std::time::Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Action as ActionCfg, ProjectIdentity};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StepEventCallback for Recorder {
        fn on_step_start(&self, step_name: &str) {
            self.events.lock().unwrap().push(format!("start({step_name})"));
        }
        fn on_step_complete(&self, step_name: &str, status: TerminalStatus, _message: &str, _duration: Duration) {
            self.events.lock().unwrap().push(format!("complete({step_name},{status:?})"));
        }
        fn on_step_output(&self, step_name: &str, line: &str) {
            self.events.lock().unwrap().push(format!("output({step_name},{line})"));
        }
        fn on_step_error(&self, step_name: &str, error: &str) {
            self.events.lock().unwrap().push(format!("error({step_name},{error})"));
        }
    }

    fn project_with(actions: Vec<ActionCfg>, stage_steps: Vec<Step>) -> Project {
        let mut stages = BTreeMap::new();
        stages.insert("main".to_string(), Stage { steps: stage_steps });
        Project {
            identity: ProjectIdentity { name: "demo".into(), modules: vec![], bin: None },
            actions: actions.into_iter().map(|a| (a.name.clone(), a)).collect(),
            stages,
        }
    }

    fn step(action: &str, require: &[&str]) -> Step {
        Step {
            name: None,
            action: action.to_string(),
            require: require.iter().map(|s| s.to_string()).collect(),
            onerror: OnError::Stop,
            condition: None,
            only: vec![],
        }
    }

    // S1 — linear stage, all pass.
    #[tokio::test]
    async fn s1_linear_stage_all_pass() {
        let project = project_with(
            vec![
                ActionCfg { name: "a".into(), run: Some("echo 1".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "b".into(), run: Some("echo 2".into()), uses: None, shell: None, variants: vec![] },
            ],
            vec![step("a", &[]), step("b", &["a"])],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        orchestrator.run_stage("main", recorder, false, CancellationToken::new()).await.unwrap();
    }

    // S2 — middle step fails with stop.
    #[tokio::test]
    async fn s2_middle_step_fails_with_stop() {
        let project = project_with(
            vec![
                ActionCfg { name: "a".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "b".into(), run: Some("false".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "c".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
            ],
            vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        let err = orchestrator.run_stage("main", recorder, false, CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains('b'));
    }

    // S3 — middle step fails with warn.
    #[tokio::test]
    async fn s3_middle_step_fails_with_warn() {
        let project = project_with(
            vec![
                ActionCfg { name: "a".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "b".into(), run: Some("false".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "c".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
            ],
            vec![step("a", &[]), Step { onerror: OnError::Warn, ..step("b", &["a"]) }, step("c", &["b"])],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        let report = orchestrator.run_stage_report("main", recorder, false, CancellationToken::new()).await.unwrap();
        let b = report.results.iter().find(|r| r.step_name == "b").unwrap();
        assert_eq!(b.status, TerminalStatus::Warn);
    }

    // run_stage_report on an all-pass stage: a machine-readable report with
    // a fresh run id and every step's result, for CLI `--json` consumers.
    #[tokio::test]
    async fn run_stage_report_includes_run_id_and_results() {
        let project = project_with(
            vec![ActionCfg { name: "a".into(), run: Some("echo 1".into()), uses: None, shell: None, variants: vec![] }],
            vec![step("a", &[])],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        let report = orchestrator.run_stage_report("main", recorder, false, CancellationToken::new()).await.unwrap();
        assert_eq!(report.stage, "main");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.count(TerminalStatus::Ok), 1);
        assert!(report.finished_at >= report.started_at);
    }

    // `only` gating (§3 invariant v, §4.6): a step whose `only` matches the
    // determined version kind runs, one that doesn't is skipped OK.
    #[tokio::test]
    async fn only_gates_on_determined_version_kind() {
        let project = project_with(
            vec![
                ActionCfg { name: "a".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "b".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] },
            ],
            vec![
                Step { only: vec!["release".to_string()], ..step("a", &[]) },
                Step { only: vec!["major".to_string()], ..step("b", &[]) },
            ],
        );
        let tmp = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(tmp.path()).output().unwrap();
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(tmp.path().join("VERSION"), "1.0.0\n").unwrap();

        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        let report = orchestrator.run_stage_report("main", recorder, false, CancellationToken::new()).await.unwrap();

        let a = report.results.iter().find(|r| r.step_name == "a").unwrap();
        assert_eq!(a.status, TerminalStatus::Ok);
        assert_ne!(a.message, "skipped (condition not met)");
        let b = report.results.iter().find(|r| r.step_name == "b").unwrap();
        assert_eq!(b.status, TerminalStatus::Ok);
        assert_eq!(b.message, "skipped (condition not met)");
    }

    // S4 — conditional skip.
    #[tokio::test]
    async fn s4_conditional_skip() {
        let project = project_with(
            vec![ActionCfg { name: "a".into(), run: Some("true".into()), uses: None, shell: None, variants: vec![] }],
            vec![Step { condition: Some("os == 'never'".into()), ..step("a", &[]) }],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf()).with_vars(BTreeMap::from([("os".to_string(), "linux".to_string())]));
        let recorder = Recorder::default();
        orchestrator.run_stage("main", recorder, false, CancellationToken::new()).await.unwrap();
    }

    // S6 — cancellation under parallelism.
    #[tokio::test]
    async fn s6_cancellation_under_parallelism() {
        let project = project_with(
            vec![
                ActionCfg { name: "a".into(), run: Some("sleep 30".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "b".into(), run: Some("sleep 30".into()), uses: None, shell: None, variants: vec![] },
                ActionCfg { name: "c".into(), run: Some("sleep 30".into()), uses: None, shell: None, variants: vec![] },
            ],
            vec![step("a", &[]), step("b", &[]), step("c", &[])],
        );
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = StageOrchestrator::new(project, tmp.path().to_path_buf());
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel2.cancel();
        });
        let start = std::time::Instant::now();
        let err = orchestrator.run_stage("main", recorder, false, cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancellation(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
