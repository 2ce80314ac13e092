//! Role vocabulary: `RoleKind`, `RoleProfile`, `RoleSettings`, `RoleState`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::ActionKind;

/// The three role archetypes of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Turns the human idea into a requirements document.
    Stakeholder,
    /// Reviews requirements and owns the team plan.
    Planner,
    /// Gives plan feedback and implements assigned tasks.
    Engineer,
}

impl RoleKind {
    /// Causes this kind subscribes to by default.
    pub fn default_watch(&self) -> BTreeSet<ActionKind> {
        let causes: &[ActionKind] = match self {
            RoleKind::Stakeholder => &[ActionKind::UserRequirement, ActionKind::ReviewRequirements],
            RoleKind::Planner => &[ActionKind::WriteRequirements, ActionKind::ProvideFeedback],
            RoleKind::Engineer => &[ActionKind::WritePlan, ActionKind::PublishPlan],
        };
        causes.iter().copied().collect()
    }

    /// Actions this kind may run.
    pub fn capabilities(&self) -> &'static [ActionKind] {
        match self {
            RoleKind::Stakeholder => &[ActionKind::WriteRequirements],
            RoleKind::Planner => &[
                ActionKind::ReviewRequirements,
                ActionKind::WritePlan,
                ActionKind::PublishPlan,
            ],
            RoleKind::Engineer => &[ActionKind::ProvideFeedback, ActionKind::WriteCode],
        }
    }

    pub fn can_run(&self, action: ActionKind) -> bool {
        self.capabilities().contains(&action)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleKind::Stakeholder => "stakeholder",
            RoleKind::Planner => "planner",
            RoleKind::Engineer => "engineer",
        };
        f.write_str(s)
    }
}

/// Standing instruction handed to the generator for each action.
pub fn action_directive(action: ActionKind) -> &'static str {
    match action {
        ActionKind::UserRequirement => "Restate the user's requirement.",
        ActionKind::WriteRequirements => {
            "Write a requirements document for the project: goals, user stories, \
             data sources and acceptance criteria. Address any review comments."
        }
        ActionKind::ReviewRequirements => {
            "Review the requirements document. List gaps, ambiguities and risks \
             the author should fix before planning starts."
        }
        ActionKind::WritePlan => {
            "Break the project into tasks. Output a ```json list of objects with \
             task_id, dependent_task_ids, instruction, task_type and file_name."
        }
        ActionKind::ProvideFeedback => {
            "Give feedback on the proposed plan from an implementer's point of \
             view: missing steps, wrong ordering, unclear instructions."
        }
        ActionKind::PublishPlan => {
            "Revise the plan using the feedback received. Output the complete \
             plan as a ```json task list in the same format."
        }
        ActionKind::WriteCode => {
            "Write the code for the current task. Return a single fenced code \
             block with the full file content."
        }
    }
}

/// Identity and description of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub name: String,
    pub kind: RoleKind,
    #[serde(default)]
    pub description: String,
}

/// Behaviour knobs, usually filled from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    /// Planner: requirement reviews before writing the plan.
    pub review_rounds: u32,
    /// Stakeholder: rewrites accepted in answer to reviews.
    pub revision_rounds: u32,
    /// Artifact names fetched into every act context.
    pub reads_artifacts: Vec<String>,
    /// Planner: engineers that published tasks are assigned to, in order.
    pub engineers: Vec<String>,
}

/// Progress counters that survive snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounters {
    pub reviews_done: u32,
    pub revisions_done: u32,
    pub acts_completed: u64,
}

/// Position in the observe → think → act cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleState {
    #[default]
    Idle,
    Observing,
    Thinking,
    Acting,
    Terminated,
}
