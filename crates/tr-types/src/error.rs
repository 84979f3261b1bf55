//! Error taxonomy for the execution core (§7).
//!
//! Each kind is distinguished at the type level so callers can match on it
//! instead of parsing messages. `RunnerError` is the top-level sum type that
//! crosses crate boundaries; it never wraps itself.

use thiserror::Error;

/// Invalid structure, unknown references, duplicate names, invalid enum
/// values. Carries the offending name and, when available, a source
/// location (line/column within the parsed document).
#[derive(Debug, Error, Clone)]
#[error("configuration error: {message} (at {name}{location})")]
pub struct ConfigError {
    pub name: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ConfigError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), location: None }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// Unknown prerequisite, or a cycle (with the full cycle path).
#[derive(Debug, Error, Clone)]
pub enum DependencyError {
    #[error("step `{step}` requires unknown step `{requires}`")]
    UnknownPrerequisite { step: String, requires: String },
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Expression parse failure, undefined variable, arity/regex error.
#[derive(Debug, Error, Clone)]
pub enum ExprError {
    #[error("syntax error in expression `{expr}`: {message}")]
    Syntax { expr: String, message: String },
    #[error("undefined variable `{name}` in expression `{expr}`")]
    UndefinedVariable { expr: String, name: String },
    #[error("evaluation error in expression `{expr}`: {message}")]
    Evaluation { expr: String, message: String },
}

/// Non-zero child-process exit or built-in runner error.
#[derive(Debug, Error, Clone)]
#[error("step `{step}` (action `{action}`) failed: {message}")]
pub struct ExecError {
    pub step: String,
    pub action: String,
    pub message: String,
    pub output: String,
    pub reproduction: Option<String>,
}

/// Propagated cancellation cause. The single value that flows back to the
/// caller whenever a run is cancelled; never swallowed (§7).
#[derive(Debug, Error, Clone)]
#[error("cancelled: {reason}")]
pub struct CancellationCause {
    pub reason: String,
}

impl CancellationCause {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Top-level error returned from the public orchestrator API.
#[derive(Debug, Error, Clone)]
pub enum RunnerError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error(transparent)]
    Execution(#[from] ExecError),
    #[error(transparent)]
    Cancellation(#[from] CancellationCause),
    /// A stop-policy step failed; the stage return wraps the name.
    #[error("step `{step}` failed: {source}")]
    StepFailed { step: String, #[source] source: Box<RunnerError> },
    #[error("stage not found: `{0}`")]
    StageNotFound(String),
    #[error("step not found: `{0}` in stage `{1}`")]
    StepNotFound(String, String),
    #[error("action not found: `{0}`")]
    ActionNotFound(String),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
