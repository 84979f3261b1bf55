//! Platform/CI variable discovery (§6).
//!
//! Initialized once per invocation and passed by value into evaluator
//! contexts thereafter (§9 "Global state").

use std::collections::BTreeMap;
use std::path::Path;

/// Host- and environment-detected variables, computed once per run.
#[derive(Debug, Clone)]
pub struct PlatformVars {
    pub platform: String,
    pub os: String,
    pub arch: String,
    pub os_version: String,
    pub cpu: usize,
    pub ci: Option<String>,
    pub branch: Option<String>,
}

impl PlatformVars {
    /// Detect once, shelling out to the VCS for the current branch.
    pub fn detect(workdir: &Path) -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            os_version: os_version(),
            cpu: num_cpus::get(),
            ci: detect_ci(),
            branch: detect_branch(workdir),
        }
    }

    /// Flatten into the bare-identifier namespace consumed by the
    /// expression evaluator (§4.1): `os`, `arch`, `ci`, `branch` plus
    /// whatever user variables are merged in by the caller.
    pub fn as_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("os".to_string(), self.os.clone());
        vars.insert("arch".to_string(), self.arch.clone());
        vars.insert("platform".to_string(), self.platform.clone());
        vars.insert("os_version".to_string(), self.os_version.clone());
        vars.insert("cpu".to_string(), self.cpu.to_string());
        if let Some(ci) = &self.ci {
            vars.insert("ci".to_string(), ci.clone());
        }
        if let Some(branch) = &self.branch {
            vars.insert("branch".to_string(), branch.clone());
        }
        vars
    }
}

fn os_version() -> String {
    std::env::var("OS_VERSION_OVERRIDE").unwrap_or_else(|_| "unknown".to_string())
}

fn detect_ci() -> Option<String> {
    for key in ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "CIRCLECI"] {
        if std::env::var(key).map(|v| v == "true" || v == "1").unwrap_or(false) {
            return Some(key.to_string());
        }
    }
    None
}

fn detect_branch(workdir: &Path) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(workdir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

/// Default bounded parallelism degree for the scheduler (§4.6): the
/// host's logical CPU count.
pub fn default_parallelism() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_populates_os_and_arch() {
        let vars = PlatformVars::detect(Path::new("."));
        assert_eq!(vars.os, std::env::consts::OS);
        assert_eq!(vars.arch, std::env::consts::ARCH);
        assert!(vars.cpu >= 1);
    }

    #[test]
    fn as_vars_includes_os_and_arch() {
        let vars = PlatformVars::detect(Path::new("."));
        let map = vars.as_vars();
        assert_eq!(map.get("os"), Some(&vars.os));
        assert_eq!(map.get("arch"), Some(&vars.arch));
    }

    #[test]
    fn default_parallelism_is_at_least_one() {
        assert!(default_parallelism() >= 1);
    }
}
