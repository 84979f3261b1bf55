use serde::{Deserialize, Serialize};

/// Status reported through the step-event callback interface (§6).
/// Distinct from [`crate::TerminalStatus`]: this tracks the lifecycle of a
/// step as observed by the UI collaborator, including the pre-terminal
/// `pending`/`running` states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Ok,
    Warn,
    Error,
    Skipped,
}

/// Terminal status of a completed step (§3's Result entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Ok,
    Warn,
    Error,
    Skipped,
}

impl TerminalStatus {
    pub fn as_step_state(self) -> StepState {
        match self {
            TerminalStatus::Ok => StepState::Ok,
            TerminalStatus::Warn => StepState::Warn,
            TerminalStatus::Error => StepState::Error,
            TerminalStatus::Skipped => StepState::Skipped,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, TerminalStatus::Error)
    }
}

/// Per-step error policy (§3 invariant vi, §7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Stop,
    Warn,
}

/// The enumerated `only` label set (§3 invariant v).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Release,
    Prerelease,
    Patch,
    Minor,
    Major,
}

impl VersionKind {
    pub const ALL: [VersionKind; 5] = [
        VersionKind::Release,
        VersionKind::Prerelease,
        VersionKind::Patch,
        VersionKind::Minor,
        VersionKind::Major,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "release" => VersionKind::Release,
            "prerelease" => VersionKind::Prerelease,
            "patch" => VersionKind::Patch,
            "minor" => VersionKind::Minor,
            "major" => VersionKind::Major,
            _ => return None,
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            VersionKind::Release => "release",
            VersionKind::Prerelease => "prerelease",
            VersionKind::Patch => "patch",
            VersionKind::Minor => "minor",
            VersionKind::Major => "major",
        }
    }
}
