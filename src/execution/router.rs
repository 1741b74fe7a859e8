//! Conditional routing - picks which outgoing edges of a step stay live

use crate::core::condition::{predicate_scope, Predicate};
use crate::core::{RunState, Step, StepOutput};
use tracing::{debug, warn};

/// Successors taken after `step` completes
///
/// Without a predicate every child is taken. With one, a truthy result
/// takes the first declared child, a falsy one the second (if any). Only
/// two outcomes exist; a third or later edge out of a predicated step is
/// never taken. Parse and evaluation failures count as falsy.
pub fn select_successors(
    step: &Step,
    children: &[String],
    state: &RunState,
    output: &StepOutput,
) -> Vec<String> {
    let Some(source) = step.predicate() else {
        return children.to_vec();
    };

    let verdict = Predicate::parse(source)
        .and_then(|predicate| predicate.evaluate(&predicate_scope(state, Some(output))));

    let truthy = match verdict {
        Ok(value) => value,
        // A broken predicate reads as false, so the second edge is taken
        // when one exists rather than no branch at all
        Err(e) => {
            warn!("Predicate on step {} failed, treating as false: {}", step.id, e);
            false
        }
    };

    let index = if truthy { 0 } else { 1 };
    let taken: Vec<String> = children.get(index).cloned().into_iter().collect();
    debug!(
        "Step {} predicate '{}' -> {}; taking {:?}",
        step.id, source, truthy, taken
    );
    taken
}
