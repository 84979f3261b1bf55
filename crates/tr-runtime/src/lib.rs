//! Process execution, shell resolution, and platform-variable discovery.
//!
//! Kept separate from `tr-core` so the execution core can stay synchronous-
//! logic-pure where it wants to (expression evaluation, DAG construction)
//! while all process/IO side effects are mediated here.

pub mod platform;
pub mod process;
pub mod shell;

pub use platform::PlatformVars;
pub use process::{run_buffered, run_streamed, OutputLine, ProcessError, ProcessOutcome, StreamKind};
pub use shell::{resolve as resolve_shell, ResolvedShell, ShellNotFound};
pub use tokio_util::sync::CancellationToken;
