//! Project configuration: types (§3), YAML loading, and `include`
//! merging (§6).
//!
//! Deserialized with `serde_yaml` + `#[serde(flatten)]` for the tagged
//! action-body union, into the Project/Action/Stage/Step model §3
//! requires.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tr_types::{ConfigError, OnError, VersionKind};

/// Top-level project file (§6 "Configuration file (YAML)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub project: ProjectIdentity,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub stages: BTreeMap<String, Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectIdentity {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub bin: Option<String>,
}

/// A named, reusable unit of work (GLOSSARY "Action").
///
/// Exactly one of `run`, `uses`, or a non-empty `variants` must be present;
/// enforced by [`Project::validate`], not by the `serde` shape, since the
/// three forms share no common discriminant tag in the YAML surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Action {
    pub fn body(&self) -> Option<ActionBody<'_>> {
        if let Some(run) = &self.run {
            Some(ActionBody::Run(run))
        } else {
            self.uses.as_deref().map(ActionBody::Uses)
        }
    }
}

/// A conditional alternative implementation of an action (GLOSSARY
/// "Variant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub when: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

impl Variant {
    pub fn body(&self) -> Option<ActionBody<'_>> {
        if let Some(run) = &self.run {
            Some(ActionBody::Run(run))
        } else {
            self.uses.as_deref().map(ActionBody::Uses)
        }
    }
}

/// The resolved body of an action or variant: either a shell command or a
/// symbolic built-in reference (§3 invariant iv).
#[derive(Debug, Clone, Copy)]
pub enum ActionBody<'a> {
    Run(&'a str),
    Uses(&'a str),
}

/// An ordered sequence of steps, executed together (GLOSSARY "Stage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub steps: Vec<Step>,
}

/// One entry in a stage referencing an action plus metadata (GLOSSARY
/// "Step").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// The step's own name, also used as its DAG key. Defaults to the
    /// referenced action name when a stage has only one step per action
    /// (the common case); set explicitly to reference the same action
    /// from two steps in one stage.
    #[serde(default)]
    pub name: Option<String>,
    pub action: String,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub onerror: OnError,
    #[serde(rename = "if", default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub only: Vec<String>,
}

impl Step {
    pub fn key(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.action)
    }
}

/// A fully loaded and validated project: the owned configuration the
/// orchestrator holds read-only for the duration of a run.
#[derive(Debug, Clone)]
pub struct Project {
    pub identity: ProjectIdentity,
    pub actions: BTreeMap<String, Action>,
    pub stages: BTreeMap<String, Stage>,
}

impl Project {
    /// Load a project file from `path`, resolving `include` entries
    /// relative to its directory, merging, and validating the result
    /// (§4.8 "Configuration-validation rules").
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new(path.display().to_string(), format!("cannot read project file: {e}")))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut seen_includes = std::collections::HashSet::new();
        Self::load_merged(&text, base_dir, &mut seen_includes)
    }

    fn load_merged(
        text: &str,
        base_dir: &Path,
        seen_includes: &mut std::collections::HashSet<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let file: ProjectFile = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::new("<project>", format!("invalid YAML: {e}")))?;

        let mut actions: BTreeMap<String, Action> = file.actions.into_iter().map(|a| (a.name.clone(), a)).collect();
        let mut stages = file.stages;

        for pattern in &file.include {
            let resolved = base_dir.join(pattern);
            let paths: Vec<PathBuf> = if resolved.is_absolute() || !pattern.contains(['*', '?', '[']) {
                if resolved.exists() {
                    vec![resolved]
                } else if pattern.contains(['*', '?', '[']) {
                    Vec::new()
                } else {
                    return Err(ConfigError::new(pattern.clone(), "included path does not exist"));
                }
            } else {
                let glob_base = glob_base_dir(&resolved);
                if !glob_base.is_dir() {
                    return Err(ConfigError::new(pattern.clone(), format!("glob base directory `{}` does not exist", glob_base.display())));
                }
                let glob_pattern = resolved.to_string_lossy().to_string();
                glob::glob(&glob_pattern)
                    .map_err(|e| ConfigError::new(pattern.clone(), format!("invalid glob pattern: {e}")))?
                    .filter_map(Result::ok)
                    .collect()
            };

            for included_path in paths {
                let canonical = included_path.canonicalize().unwrap_or(included_path.clone());
                if !seen_includes.insert(canonical.clone()) {
                    return Err(ConfigError::new(pattern.clone(), "circular include"));
                }
                let included_text = std::fs::read_to_string(&included_path).map_err(|e| {
                    ConfigError::new(included_path.display().to_string(), format!("cannot read include: {e}"))
                })?;
                let included_dir = included_path.parent().unwrap_or(base_dir);
                let included = Self::load_merged(&included_text, included_dir, seen_includes)?;
                for (name, action) in included.actions {
                    actions.insert(name, action);
                }
                for (name, stage) in included.stages {
                    stages.insert(name, stage);
                }
            }
        }

        let project = Project { identity: file.project, actions, stages };
        project.validate()?;
        Ok(project)
    }

    /// Re-checks §3 invariants (i)-(vi). Called once at load time and
    /// may be re-invoked by `Validate` (§4.8).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for action in self.actions.values() {
            self.validate_action_shape(action)?;
        }

        for (stage_name, stage) in &self.stages {
            let mut seen_keys = std::collections::HashSet::new();
            for step in &stage.steps {
                if !seen_keys.insert(step.key().to_string()) {
                    return Err(ConfigError::new(step.key(), format!("duplicate step in stage `{stage_name}`")));
                }
                if !self.actions.contains_key(&step.action) {
                    return Err(ConfigError::new(&step.action, format!("step `{}` references unknown action", step.key())));
                }
                for req in &step.require {
                    if !stage.steps.iter().any(|s| s.key() == req) {
                        return Err(ConfigError::new(req, format!("step `{}` requires unknown step `{req}`", step.key())));
                    }
                }
                for label in &step.only {
                    if VersionKind::parse(label).is_none() {
                        return Err(ConfigError::new(label, format!("step `{}` has invalid `only` label `{label}`", step.key())));
                    }
                }
            }
            // Cycle detection is delegated to `tr_dag::Dag::build` at run
            // time (§4.4); `Validate` performs the same check eagerly.
            let specs: Vec<tr_dag::NodeSpec<()>> = stage
                .steps
                .iter()
                .map(|s| tr_dag::NodeSpec {
                    id: s.key().to_string(),
                    requires: s.require.clone(),
                    onerror: s.onerror,
                    data: (),
                })
                .collect();
            tr_dag::Dag::build(specs).map_err(|e| {
                ConfigError::new(stage_name.clone(), e.to_string())
            })?;
        }

        Ok(())
    }

    fn validate_action_shape(&self, action: &Action) -> Result<(), ConfigError> {
        let forms = [action.run.is_some(), action.uses.is_some(), !action.variants.is_empty()];
        let count = forms.iter().filter(|b| **b).count();
        if count != 1 {
            return Err(ConfigError::new(&action.name, "action must have exactly one of `run`, `uses`, or `variants`"));
        }
        for variant in &action.variants {
            let variant_forms = [variant.run.is_some(), variant.uses.is_some()];
            if variant_forms.iter().filter(|b| **b).count() != 1 {
                return Err(ConfigError::new(&action.name, "each variant must have exactly one of `run` or `uses`"));
            }
        }
        Ok(())
    }
}

/// The longest path prefix of a glob pattern with no glob metacharacter,
/// used to tell "pattern matched zero files" (allowed, §6) apart from
/// "pattern's directory doesn't exist" (an error).
fn glob_base_dir(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        let is_glob = matches!(component, std::path::Component::Normal(s) if s.to_string_lossy().contains(['*', '?', '[']));
        if is_glob {
            break;
        }
        base.push(component);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}
