//! Role state machine: observe → think → act.
//!
//! # Module layout
//!
//! - [`kind`]: `RoleKind`, `RoleProfile`, `RoleSettings`, `RoleState`
//! - [`memory`]: `Memory`
//! - [`error`]: `RoleError`, `RoleResult`
//! - `act`: generation with retry, commit, publish
//!
//! `observe` and `think` never suspend. `act` is the only async step and the
//! only one that talks to collaborators.

mod act;
pub mod error;
pub mod kind;
pub mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use act::ActReport;
pub use error::{RoleError, RoleResult};
pub use kind::{action_directive, RoleCounters, RoleKind, RoleProfile, RoleSettings, RoleState};
pub use memory::Memory;

use crate::message::{ActionKind, Message, Recipients};
use crate::plan::{Plan, Task, TaskStatus};

/// The action chosen by `think`, consumed by `act`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub action: ActionKind,
    /// The news item that triggered the decision.
    pub trigger: Arc<Message>,
    /// Plan task the action works on, for `WriteCode`.
    pub task: Option<String>,
}

impl PendingAction {
    fn new(action: ActionKind, trigger: &Arc<Message>) -> Self {
        Self {
            action,
            trigger: Arc::clone(trigger),
            task: None,
        }
    }

    fn on_task(mut self, task_id: String) -> Self {
        self.task = Some(task_id);
        self
    }
}

/// An autonomous participant in coordination rounds.
#[derive(Debug, Clone)]
pub struct Role {
    profile: RoleProfile,
    settings: RoleSettings,
    watch: BTreeSet<ActionKind>,
    state: RoleState,
    memory: Memory,
    working_memory: Memory,
    inbox: Vec<Arc<Message>>,
    news: Vec<Arc<Message>>,
    latest_observed: Option<Arc<Message>>,
    interrupted: bool,
    pending: Option<PendingAction>,
    plan: Plan,
    counters: RoleCounters,
}

/// Serializable role state stored in team snapshots.
///
/// Taken between rounds, when no news or pending action is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub profile: RoleProfile,
    pub settings: RoleSettings,
    pub watch: BTreeSet<ActionKind>,
    pub state: RoleState,
    pub memory: Memory,
    pub working_memory: Memory,
    pub inbox: Vec<Arc<Message>>,
    pub latest_observed: Option<Arc<Message>>,
    pub interrupted: bool,
    pub plan: Plan,
    pub counters: RoleCounters,
}

impl Role {
    pub fn new(name: impl Into<String>, kind: RoleKind) -> Self {
        Self {
            profile: RoleProfile {
                name: name.into(),
                kind,
                description: String::new(),
            },
            settings: RoleSettings::default(),
            watch: kind.default_watch(),
            state: RoleState::Idle,
            memory: Memory::new(),
            working_memory: Memory::new(),
            inbox: Vec::new(),
            news: Vec::new(),
            latest_observed: None,
            interrupted: false,
            pending: None,
            plan: Plan::default(),
            counters: RoleCounters::default(),
        }
    }

    pub fn stakeholder(name: impl Into<String>) -> Self {
        Self::new(name, RoleKind::Stakeholder)
    }

    pub fn planner(name: impl Into<String>) -> Self {
        Self::new(name, RoleKind::Planner)
    }

    pub fn engineer(name: impl Into<String>) -> Self {
        Self::new(name, RoleKind::Engineer)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.profile.description = description.into();
        self
    }

    pub fn with_settings(mut self, settings: RoleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the subscription set.
    pub fn watching(mut self, causes: impl IntoIterator<Item = ActionKind>) -> Self {
        self.watch = causes.into_iter().collect();
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn kind(&self) -> RoleKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &RoleProfile {
        &self.profile
    }

    pub fn settings(&self) -> &RoleSettings {
        &self.settings
    }

    pub fn watch(&self) -> &BTreeSet<ActionKind> {
        &self.watch
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn working_memory(&self) -> &Memory {
        &self.working_memory
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn news(&self) -> &[Arc<Message>] {
        &self.news
    }

    pub fn latest_observed(&self) -> Option<&Arc<Message>> {
        self.latest_observed.as_ref()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn counters(&self) -> RoleCounters {
        self.counters
    }

    pub fn is_terminated(&self) -> bool {
        self.state == RoleState::Terminated
    }

    pub(crate) fn terminate(&mut self) {
        self.state = RoleState::Terminated;
        self.pending = None;
        self.news.clear();
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Whether the bus should drop `message` into this role's inbox.
    pub fn accepts(&self, message: &Message) -> bool {
        !self.is_terminated()
            && (self.watch.contains(&message.cause) || message.recipients.reaches(self.name()))
    }

    pub(crate) fn deliver(&mut self, message: Arc<Message>) {
        self.inbox.push(message);
    }

    fn is_news(&self, message: &Message) -> bool {
        self.watch.contains(&message.cause) || message.recipients.names(self.name())
    }

    // -----------------------------------------------------------------------
    // observe / think
    // -----------------------------------------------------------------------

    /// Drain the inbox into memory and collect the news for this round.
    ///
    /// Messages already in memory are dropped, so re-delivering a message
    /// never makes it news twice. With no fresh news, an interrupted role
    /// re-queues `latest_observed` to pick up where it failed.
    ///
    /// Returns the number of news items; `0` means idle this round.
    pub fn observe(&mut self) -> usize {
        if self.is_terminated() {
            return 0;
        }
        self.state = RoleState::Observing;
        self.news.clear();

        for message in std::mem::take(&mut self.inbox) {
            if !self.memory.add(Arc::clone(&message)) {
                continue;
            }
            if self.is_news(&message) {
                self.news.push(message);
            }
        }

        if self.news.is_empty() && self.interrupted {
            if let Some(resume) = self.latest_observed.clone() {
                debug!(role = %self.profile.name, cause = %resume.cause, "re-queueing last observed message");
                self.news.push(resume);
            }
        }
        if let Some(last) = self.news.last() {
            self.latest_observed = Some(Arc::clone(last));
        } else {
            self.state = RoleState::Idle;
        }
        self.news.len()
    }

    /// Decide the next action from the most recent news item.
    ///
    /// Dispatch is a fixed table keyed on `(kind, cause)`. Returns whether
    /// there is an action to run.
    pub fn think(&mut self) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.state = RoleState::Thinking;
        self.pending = match self.news.last().cloned() {
            None => None,
            Some(trigger) => match self.profile.kind {
                RoleKind::Stakeholder => self.decide_as_stakeholder(&trigger),
                RoleKind::Planner => self.decide_as_planner(&trigger),
                RoleKind::Engineer => self.decide_as_engineer(&trigger),
            },
        };
        if self.pending.is_none() {
            self.state = RoleState::Idle;
        }
        self.pending.is_some()
    }

    fn decide_as_stakeholder(&mut self, trigger: &Arc<Message>) -> Option<PendingAction> {
        match trigger.cause {
            ActionKind::UserRequirement => {
                Some(PendingAction::new(ActionKind::WriteRequirements, trigger))
            }
            ActionKind::ReviewRequirements
                if self.counters.revisions_done < self.settings.revision_rounds =>
            {
                self.working_memory.add(Arc::clone(trigger));
                Some(PendingAction::new(ActionKind::WriteRequirements, trigger))
            }
            _ => None,
        }
    }

    fn decide_as_planner(&mut self, trigger: &Arc<Message>) -> Option<PendingAction> {
        match trigger.cause {
            ActionKind::WriteRequirements
                if self.counters.reviews_done < self.settings.review_rounds =>
            {
                Some(PendingAction::new(ActionKind::ReviewRequirements, trigger))
            }
            ActionKind::WriteRequirements => {
                Some(PendingAction::new(ActionKind::WritePlan, trigger))
            }
            ActionKind::ProvideFeedback => {
                let feedback: Vec<_> = self
                    .news
                    .iter()
                    .filter(|m| m.cause == ActionKind::ProvideFeedback)
                    .cloned()
                    .collect();
                for m in feedback {
                    self.working_memory.add(m);
                }
                Some(PendingAction::new(ActionKind::PublishPlan, trigger))
            }
            _ => None,
        }
    }

    fn decide_as_engineer(&mut self, trigger: &Arc<Message>) -> Option<PendingAction> {
        match trigger.cause {
            ActionKind::WritePlan => Some(PendingAction::new(ActionKind::ProvideFeedback, trigger)),
            ActionKind::PublishPlan => {
                if !self.adopt_published_plan(trigger) {
                    return None;
                }
                self.next_code_action(trigger)
            }
            ActionKind::WriteCode => {
                self.absorb_peer_progress();
                self.next_code_action(trigger)
            }
            _ => None,
        }
    }

    /// `WriteCode` on the next assigned task whose dependencies are done.
    fn next_code_action(&self, trigger: &Arc<Message>) -> Option<PendingAction> {
        let task = self.plan.ready_task_for(&self.profile.name)?;
        Some(PendingAction::new(ActionKind::WriteCode, trigger).on_task(task.id.clone()))
    }

    /// Mark tasks finished by other engineers, as reported in their code
    /// messages.
    fn absorb_peer_progress(&mut self) {
        let finished: Vec<String> = self
            .news
            .iter()
            .filter(|m| m.cause == ActionKind::WriteCode && m.sender != self.profile.name)
            .filter_map(|m| {
                let id = m.instruct_content.as_ref()?.get("task_id")?.as_str()?;
                Some(id.to_string())
            })
            .collect();
        for id in finished {
            if self.plan.set_task_status(&id, TaskStatus::Finished).is_ok() {
                debug!(role = %self.profile.name, task_id = %id, "peer finished task");
            }
        }
    }

    /// Replace this engineer's plan with the full published task list.
    ///
    /// Returns false, leaving the plan as it was, when the list is unreadable,
    /// not a well-formed graph, or assigns nothing to this engineer.
    fn adopt_published_plan(&mut self, published: &Message) -> bool {
        let Some(value) = published.instruct_content.as_ref() else {
            warn!(role = %self.profile.name, "published plan carries no task list");
            return false;
        };
        let tasks: Vec<Task> = match serde_json::from_value(value.clone()) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(role = %self.profile.name, error = %e, "published plan is not a task list");
                return false;
            }
        };
        if !tasks
            .iter()
            .any(|t| t.assignee.as_deref() == Some(self.profile.name.as_str()))
        {
            return false;
        }

        let mut plan = Plan::new(self.plan.goal.clone());
        if let Err(e) = plan.add_tasks(tasks).and_then(|()| plan.validate()) {
            warn!(role = %self.profile.name, error = %e, "published plan rejected");
            return false;
        }
        self.plan = plan;
        true
    }

    /// Default routing for the output of `action`.
    fn route(&self, pending: &PendingAction) -> Recipients {
        match pending.action {
            ActionKind::ReviewRequirements | ActionKind::ProvideFeedback => {
                if pending.trigger.is_from_human() {
                    Recipients::Broadcast
                } else {
                    Recipients::to([pending.trigger.sender.clone()])
                }
            }
            ActionKind::WriteCode => {
                let mut names: BTreeSet<String> = self
                    .plan
                    .tasks()
                    .iter()
                    .filter_map(|t| t.assignee.clone())
                    .collect();
                names.insert(self.profile.name.clone());
                Recipients::to(names)
            }
            _ => Recipients::Broadcast,
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            profile: self.profile.clone(),
            settings: self.settings.clone(),
            watch: self.watch.clone(),
            state: self.state,
            memory: self.memory.clone(),
            working_memory: self.working_memory.clone(),
            inbox: self.inbox.clone(),
            latest_observed: self.latest_observed.clone(),
            interrupted: self.interrupted,
            plan: self.plan.clone(),
            counters: self.counters,
        }
    }

    pub fn from_snapshot(snapshot: RoleSnapshot) -> Self {
        Self {
            profile: snapshot.profile,
            settings: snapshot.settings,
            watch: snapshot.watch,
            state: snapshot.state,
            memory: snapshot.memory,
            working_memory: snapshot.working_memory,
            inbox: snapshot.inbox,
            news: Vec::new(),
            latest_observed: snapshot.latest_observed,
            interrupted: snapshot.interrupted,
            pending: None,
            plan: snapshot.plan,
            counters: snapshot.counters,
        }
    }
}
