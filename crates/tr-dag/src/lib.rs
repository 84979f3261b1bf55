//! DAG construction (C4), concurrent scheduling (C6), and declaration-order
//! output reconciliation (C7) for the task runner execution core.
//!
//! Domain-agnostic by design: nothing in this crate knows about actions,
//! expressions, or variants. `tr-core` supplies those via [`scheduler::StepRunner`].

pub mod graph;
pub mod output;
pub mod scheduler;

pub use graph::{Dag, NodeSpec};
pub use output::{OrderedOutputManager, StepEventCallback};
pub use scheduler::{Scheduler, SchedulerOutcome, StepRunner};
