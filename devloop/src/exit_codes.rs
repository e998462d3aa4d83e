//! Stable exit codes for devloop CLI commands.

use crate::core::types::TaskOutcome;

/// Command succeeded or the task completed.
pub const OK: i32 = 0;
/// Invalid invocation, config, or setup error.
pub const INVALID: i32 = 1;
/// A fatal step stopped the task.
pub const FAILED: i32 = 2;
/// The step budget ran out before `task_complete`.
pub const BUDGET_EXHAUSTED: i32 = 3;
/// The task deadline passed.
pub const CANCELLED: i32 = 4;

pub fn for_outcome(outcome: &TaskOutcome) -> i32 {
    match outcome {
        TaskOutcome::Completed { .. } => OK,
        TaskOutcome::Failed { .. } => FAILED,
        TaskOutcome::BudgetExhausted { .. } => BUDGET_EXHAUSTED,
        TaskOutcome::Cancelled { .. } => CANCELLED,
    }
}
