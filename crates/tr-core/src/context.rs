//! Variable context shared by the expression evaluator, interpolator, and
//! variant selector (§9: "share it between the variant selector and
//! the `if` gate by passing the same context type").
//!
//! Namespaces mirror §4.1: bare identifiers resolve from `vars`;
//! `env.X` from the process environment; `inputs.X`/`matrix.X` from
//! caller-supplied maps; `os`/`arch`/`ci`/`branch` fall back to detected
//! platform values when not present in `vars`.

use std::collections::BTreeMap;

use tr_runtime::PlatformVars;

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub vars: BTreeMap<String, String>,
    pub inputs: BTreeMap<String, String>,
    pub matrix: BTreeMap<String, String>,
    pub platform: Option<PlatformVars>,
}

impl Context {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars, inputs: BTreeMap::new(), matrix: BTreeMap::new(), platform: None }
    }

    pub fn with_platform(mut self, platform: PlatformVars) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_matrix(mut self, matrix: BTreeMap<String, String>) -> Self {
        self.matrix = matrix;
        self
    }

    /// Resolve `name`, honoring the `env.`/`inputs.`/`matrix.` prefixes and
    /// the special platform-fallback names.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(key) = name.strip_prefix("env.") {
            return std::env::var(key).ok();
        }
        if let Some(key) = name.strip_prefix("inputs.") {
            return self.inputs.get(key).cloned();
        }
        if let Some(key) = name.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned();
        }
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        match name {
            "os" => self.platform.as_ref().map(|p| p.os.clone()),
            "arch" => self.platform.as_ref().map(|p| p.arch.clone()),
            "ci" => self.platform.as_ref().and_then(|p| p.ci.clone()),
            "branch" => self.platform.as_ref().and_then(|p| p.branch.clone()),
            _ => None,
        }
    }

    /// Flattened `name -> value` map for interpolation (§4.2), merging
    /// platform vars, user vars, and matrix in that override order.
    pub fn flattened(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(platform) = &self.platform {
            out.extend(platform.as_vars());
        }
        out.extend(self.vars.clone());
        out.extend(self.matrix.iter().map(|(k, v)| (format!("matrix.{k}"), v.clone())));
        out.extend(self.inputs.iter().map(|(k, v)| (format!("inputs.{k}"), v.clone())));
        out
    }
}
