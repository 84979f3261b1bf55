//! Built-in action registry (C9, §4.9).
//!
//! A process-wide map from symbolic name (`vcs@untracked`) to a runner
//! implementing `{run(ctx) -> Result, description() -> string}` (§6).
//! Composable: callers may swap in a replacement registry to inject test
//! doubles instead of the real runner implementations.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tr_types::VersionKind;

use crate::executor::BuiltinOutcome;

#[async_trait]
pub trait BuiltinRunner: Send + Sync {
    async fn run(&self, workdir: &Path, cancel: CancellationToken) -> BuiltinOutcome;
    fn description(&self) -> &str;
}

pub struct BuiltinRegistry {
    runners: BTreeMap<String, Box<dyn BuiltinRunner>>,
}

impl BuiltinRegistry {
    /// An empty registry, useful for tests that want to inject doubles
    /// without the default VCS/version runners.
    pub fn empty() -> Self {
        Self { runners: BTreeMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, runner: Box<dyn BuiltinRunner>) {
        self.runners.insert(name.into(), runner);
    }

    pub fn get(&self, name: &str) -> Option<&dyn BuiltinRunner> {
        self.runners.get(name).map(|b| b.as_ref())
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("vcs@untracked", Box::new(VcsUntracked));
        registry.register("vcs@uncommitted", Box::new(VcsUncommitted));
        registry.register("vcs@modified", Box::new(VcsModified));
        registry.register("version@valid", Box::new(VersionValid));
        registry.register("version@exceeds-tags", Box::new(VersionExceedsTags));
        registry
    }
}

/// Runs `git args` through the same async process plumbing the shell
/// executor uses, so a running built-in can be cancelled like any other
/// step (§5: cancellation threads through every built-in runner).
async fn git(workdir: &Path, args: &[&str], cancel: CancellationToken) -> Result<String, String> {
    let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let outcome = tr_runtime::run_buffered("git", &owned, workdir, &HashMap::new(), cancel)
        .await
        .map_err(|e| format!("failed to invoke git: {e}"))?;
    if outcome.cancelled {
        return Err("cancelled".to_string());
    }
    if outcome.exit_code != Some(0) {
        return Err(format!("git {} failed: {}", args.join(" "), outcome.stderr));
    }
    Ok(outcome.stdout)
}

/// Fails if the working tree has any untracked files.
struct VcsUntracked;

#[async_trait]
impl BuiltinRunner for VcsUntracked {
    async fn run(&self, workdir: &Path, cancel: CancellationToken) -> BuiltinOutcome {
        match git(workdir, &["ls-files", "--others", "--exclude-standard"], cancel).await {
            Ok(out) if out.trim().is_empty() => BuiltinOutcome::Ok("no untracked files".to_string()),
            Ok(out) => BuiltinOutcome::Error(format!("untracked files present:\n{out}")),
            Err(e) => BuiltinOutcome::Error(e),
        }
    }

    fn description(&self) -> &str {
        "fails if the working tree has untracked files"
    }
}

/// Fails if the working tree has any uncommitted changes (staged or not).
struct VcsUncommitted;

#[async_trait]
impl BuiltinRunner for VcsUncommitted {
    async fn run(&self, workdir: &Path, cancel: CancellationToken) -> BuiltinOutcome {
        match git(workdir, &["status", "--porcelain"], cancel).await {
            Ok(out) if out.trim().is_empty() => BuiltinOutcome::Ok("working tree clean".to_string()),
            Ok(out) => BuiltinOutcome::Error(format!("uncommitted changes present:\n{out}")),
            Err(e) => BuiltinOutcome::Error(e),
        }
    }

    fn description(&self) -> &str {
        "fails if the working tree has uncommitted changes"
    }
}

/// Warns (does not fail) if tracked files differ from HEAD.
struct VcsModified;

#[async_trait]
impl BuiltinRunner for VcsModified {
    async fn run(&self, workdir: &Path, cancel: CancellationToken) -> BuiltinOutcome {
        match git(workdir, &["diff", "--name-only", "HEAD"], cancel).await {
            Ok(out) if out.trim().is_empty() => BuiltinOutcome::Ok("no modified tracked files".to_string()),
            Ok(out) => BuiltinOutcome::Warn(format!("modified tracked files:\n{out}")),
            Err(e) => BuiltinOutcome::Error(e),
        }
    }

    fn description(&self) -> &str {
        "warns if tracked files differ from HEAD"
    }
}

/// Validates the contents of a `VERSION` file as a well-formed semver core.
struct VersionValid;

#[async_trait]
impl BuiltinRunner for VersionValid {
    async fn run(&self, workdir: &Path, _cancel: CancellationToken) -> BuiltinOutcome {
        let path = workdir.join("VERSION");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return BuiltinOutcome::Error(format!("cannot read {}: {e}", path.display())),
        };
        let version = contents.trim();
        let parts: Vec<&str> = version.split(['-', '+']).next().unwrap_or(version).split('.').collect();
        let valid = parts.len() == 3 && parts.iter().all(|p| p.parse::<u64>().is_ok());
        if valid {
            BuiltinOutcome::Ok(format!("VERSION `{version}` is valid"))
        } else {
            BuiltinOutcome::Error(format!("VERSION `{version}` is not a valid semver core (expected major.minor.patch)"))
        }
    }

    fn description(&self) -> &str {
        "validates a VERSION file as a well-formed semver string"
    }
}

/// Checks that the current `VERSION` exceeds every known release tag.
struct VersionExceedsTags;

#[async_trait]
impl BuiltinRunner for VersionExceedsTags {
    async fn run(&self, workdir: &Path, cancel: CancellationToken) -> BuiltinOutcome {
        let path = workdir.join("VERSION");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return BuiltinOutcome::Error(format!("cannot read {}: {e}", path.display())),
        };
        let current = contents.trim().to_string();

        let tags = match git(workdir, &["tag", "--list"], cancel).await {
            Ok(out) => out,
            Err(e) => return BuiltinOutcome::Error(e),
        };

        for tag in tags.lines().map(str::trim).filter(|t| !t.is_empty()) {
            let bare_tag = tag.strip_prefix('v').unwrap_or(tag);
            match crate::expr::semver_compare(&current, bare_tag) {
                Ok(cmp) if cmp <= 0.0 => {
                    return BuiltinOutcome::Error(format!("VERSION `{current}` does not exceed existing tag `{tag}`"));
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }

        BuiltinOutcome::Ok(format!("VERSION `{current}` exceeds all known tags"))
    }

    fn description(&self) -> &str {
        "checks the current version exceeds all known release tags"
    }
}

fn parse_core(version: &str) -> Option<(u64, u64, u64)> {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

/// Determines the project's current `only`-gating [`VersionKind`] (§3
/// invariant v, §4.6) from the `VERSION` file and the nearest prior git
/// tag, the same way `version@exceeds-tags` reads both. A version with a
/// pre-release suffix (`-rc.1`, `-beta`, ...) is always `Prerelease`.
/// Otherwise the kind is the bump magnitude against the highest existing
/// tag not exceeding the current version (`Major`/`Minor`/`Patch`), or
/// `Release` when the current version matches an existing tag exactly or
/// no tags exist yet.
pub(crate) async fn determine_version_kind(workdir: &Path, cancel: CancellationToken) -> Result<VersionKind, String> {
    let path = workdir.join("VERSION");
    let contents = std::fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let current = contents.trim().to_string();

    if current.contains('-') {
        return Ok(VersionKind::Prerelease);
    }
    let current_core = parse_core(&current).ok_or_else(|| format!("VERSION `{current}` is not a valid semver core"))?;

    let tags = git(workdir, &["tag", "--list"], cancel).await?;
    let highest_prior = tags
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|tag| parse_core(tag.strip_prefix('v').unwrap_or(tag)))
        .filter(|core| *core <= current_core)
        .max();

    let kind = match highest_prior {
        None => VersionKind::Release,
        Some(prior) if prior == current_core => VersionKind::Release,
        Some((pm, _, _)) if pm != current_core.0 => VersionKind::Major,
        Some((_, pn, _)) if pn != current_core.1 => VersionKind::Minor,
        Some(_) => VersionKind::Patch,
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir).output().unwrap();
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
    }

    #[tokio::test]
    async fn untracked_detects_new_files() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let runner = VcsUntracked;
        let outcome = runner.run(tmp.path(), CancellationToken::new()).await;
        assert_eq!(outcome, BuiltinOutcome::Ok("no untracked files".to_string()));

        std::fs::write(tmp.path().join("new.txt"), "hi").unwrap();
        let outcome = runner.run(tmp.path(), CancellationToken::new()).await;
        assert!(matches!(outcome, BuiltinOutcome::Error(_)));
    }

    #[tokio::test]
    async fn version_valid_accepts_semver_core() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("VERSION"), "1.2.3\n").unwrap();
        let runner = VersionValid;
        let outcome = runner.run(tmp.path(), CancellationToken::new()).await;
        assert!(matches!(outcome, BuiltinOutcome::Ok(_)));
    }

    #[tokio::test]
    async fn version_valid_rejects_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("VERSION"), "not-a-version\n").unwrap();
        let runner = VersionValid;
        let outcome = runner.run(tmp.path(), CancellationToken::new()).await;
        assert!(matches!(outcome, BuiltinOutcome::Error(_)));
    }

    #[test]
    fn default_registry_has_all_builtins() {
        let registry = BuiltinRegistry::default();
        for name in ["vcs@untracked", "vcs@uncommitted", "vcs@modified", "version@valid", "version@exceeds-tags"] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
    }

    #[tokio::test]
    async fn version_kind_prerelease_from_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("VERSION"), "1.2.3-rc.1\n").unwrap();
        let kind = determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap();
        assert_eq!(kind, VersionKind::Prerelease);
    }

    #[tokio::test]
    async fn version_kind_release_with_no_tags() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("VERSION"), "1.0.0\n").unwrap();
        let kind = determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap();
        assert_eq!(kind, VersionKind::Release);
    }

    #[tokio::test]
    async fn version_kind_detects_bump_magnitude() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("README"), "x").unwrap();
        Command::new("git").args(["add", "."]).current_dir(tmp.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(tmp.path()).output().unwrap();
        Command::new("git").args(["tag", "v1.2.3"]).current_dir(tmp.path()).output().unwrap();

        std::fs::write(tmp.path().join("VERSION"), "1.2.4\n").unwrap();
        assert_eq!(determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap(), VersionKind::Patch);

        std::fs::write(tmp.path().join("VERSION"), "1.3.0\n").unwrap();
        assert_eq!(determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap(), VersionKind::Minor);

        std::fs::write(tmp.path().join("VERSION"), "2.0.0\n").unwrap();
        assert_eq!(determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap(), VersionKind::Major);

        std::fs::write(tmp.path().join("VERSION"), "1.2.3\n").unwrap();
        assert_eq!(determine_version_kind(tmp.path(), CancellationToken::new()).await.unwrap(), VersionKind::Release);
    }
}
