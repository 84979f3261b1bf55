//! Shared status/result/error taxonomy for the task runner execution core.
//!
//! Kept dependency-free of the other crates so every layer (runtime, dag,
//! core) can speak the same vocabulary without a cyclic crate graph.

mod error;
mod result;
mod status;

pub use error::{
    CancellationCause, ConfigError, DependencyError, ExecError, ExprError, RunnerError,
    RunnerResult, SourceLocation,
};
pub use result::StepResult;
pub use status::{OnError, StepState, TerminalStatus, VersionKind};
