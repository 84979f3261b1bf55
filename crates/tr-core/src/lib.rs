//! Task runner execution core: configuration, expression evaluator,
//! interpolator, variant selector, action executor, built-in registry, and
//! the stage orchestrator that ties them together over `tr-dag`.

pub mod config;
pub mod context;
pub mod executor;
pub mod expr;
pub mod interpolate;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod variant;

pub use config::{Action, Project, ProjectFile, ProjectIdentity, Stage, Step, Variant};
pub use context::Context;
pub use executor::{execute, BuiltinOutcome, ExecutionRequest};
pub use orchestrator::StageOrchestrator;
pub use registry::{BuiltinRegistry, BuiltinRunner};
pub use report::RunReport;
