//! Error types for the role state machine.

use crate::budget::BudgetExceeded;
use crate::generation::GenerationError;
use crate::message::ActionKind;
use crate::plan::PlanError;

/// Errors produced by `Role::act`.
///
/// Everything except [`RoleError::BudgetExceeded`] is local to the failing
/// role: siblings in the same round still publish.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("{action} failed after {attempts} attempt(s): {last}")]
    GenerationFailed {
        action: ActionKind,
        attempts: u32,
        last: GenerationError,
    },

    #[error("{action} produced malformed output: {detail}")]
    MalformedGenerationOutput { action: ActionKind, detail: String },

    #[error("plan update rejected: {0}")]
    PlanUpdateRejected(PlanError),

    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("act cancelled")]
    Cancelled,

    #[error("role {role} has no pending action")]
    NoPendingAction { role: String },

    #[error("role {role} cannot perform {action}")]
    UnsupportedAction { role: String, action: ActionKind },
}

impl RoleError {
    /// Whether this error halts the whole team.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoleError::BudgetExceeded(_))
    }
}

/// Result type for role operations.
pub type RoleResult<T> = std::result::Result<T, RoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_budget_is_fatal() {
        assert!(RoleError::BudgetExceeded(BudgetExceeded {
            spent: 2.0,
            cap: 1.0
        })
        .is_fatal());
        assert!(!RoleError::Cancelled.is_fatal());
        assert!(!RoleError::PlanUpdateRejected(PlanError::CycleDetected).is_fatal());
        assert!(!RoleError::GenerationFailed {
            action: ActionKind::WriteCode,
            attempts: 3,
            last: GenerationError::Timeout { after_ms: 10 },
        }
        .is_fatal());
    }

    #[test]
    fn display_names_action_and_attempts() {
        let err = RoleError::GenerationFailed {
            action: ActionKind::WritePlan,
            attempts: 3,
            last: GenerationError::RateLimited {
                retry_after_ms: None,
            },
        };
        let s = err.to_string();
        assert!(s.contains("write_plan"));
        assert!(s.contains("3 attempt"));
    }
}
