//! Variant selector (C3, §4.3).
//!
//! Picks the first matching variant of an action, or reports a no-op skip.
//! Pure and synchronous, sharing the expression evaluator with the `if`
//! gate (§9).

use tr_types::ExprError;

use crate::config::{Action, ActionBody};
use crate::context::Context;
use crate::expr;

/// The outcome of resolving an action to something the executor can run.
pub enum Resolution<'a> {
    /// A single run-command or built-in body, with its effective shell
    /// (only meaningful for `Run`).
    Effective { body: ActionBody<'a>, shell: Option<&'a str> },
    /// The action declares variants but none matched.
    NoMatch,
}

/// Resolve `action` against `ctx` (§4.3):
/// - no variants: the action's own body is the effective action.
/// - variants: evaluate each `when` in order; the first truthy one wins.
pub fn select<'a>(action: &'a Action, ctx: &Context) -> Result<Resolution<'a>, ExprError> {
    if action.variants.is_empty() {
        let body = action.body().expect("validated actions always have exactly one body");
        return Ok(Resolution::Effective { body, shell: action.shell.as_deref() });
    }

    for variant in &action.variants {
        if expr::evaluate_bool(&variant.when, ctx)? {
            let body = variant.body().expect("validated variants always have exactly one body");
            return Ok(Resolution::Effective { body, shell: variant.shell.as_deref().or(action.shell.as_deref()) });
        }
    }

    Ok(Resolution::NoMatch)
}
