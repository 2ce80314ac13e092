//! Error types for plan updates.

/// Reasons a proposal or plan mutation is rejected.
///
/// A rejected update never touches the live plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("proposal contains no tasks")]
    EmptyProposal,

    #[error("proposal could not be parsed as a task list: {reason}")]
    MalformedProposal { reason: String },

    #[error("task at position {position} has an empty id")]
    EmptyTaskId { position: usize },

    #[error("task id '{task_id}' appears more than once")]
    DuplicateTaskId { task_id: String },

    #[error("task '{task_id}' depends on itself")]
    SelfDependency { task_id: String },

    #[error("no task with id '{task_id}' in plan")]
    UnknownTask { task_id: String },

    #[error("task '{task_id}' has missing dependency '{missing_dependency}'")]
    MissingDependency {
        task_id: String,
        missing_dependency: String,
    },

    #[error("dependency cycle detected in plan")]
    CycleDetected,
}

/// Result type for plan operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;
