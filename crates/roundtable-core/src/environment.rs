//! Message bus and round driver.
//!
//! The environment exclusively owns its roles. A round runs in three phases:
//!
//! 1. every role observes and thinks, in hire order;
//! 2. roles with a pending action act concurrently, each staging its output
//!    on its own [`BusHandle`];
//! 3. staged messages are published as one batch, in hire order, after every
//!    act has finished.
//!
//! Nothing published in round N is visible to round N's observe. A fatal act
//! error raises the shared cancel flag so in-flight acts stop at their next
//! suspension point. The batch is then discarded and every role is rolled
//! back to where it stood before the round.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{instrument, warn};

use crate::budget::BudgetExceeded;
use crate::context::RunContext;
use crate::message::Message;
use crate::metrics::METRICS;
use crate::obs;
use crate::role::{ActReport, Role, RoleError, RoleSnapshot};

/// Errors that abort a round.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("role '{name}' is already hired")]
    DuplicateRole { name: String },

    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("bus corruption from role '{role}': {detail}")]
    BusCorruption { role: String, detail: String },
}

/// Result type for environment operations.
pub type EnvironmentResult<T> = std::result::Result<T, EnvironmentError>;

/// Publish capability handed to a role for one act.
///
/// Messages are staged, not delivered; the environment publishes them after
/// the round barrier. The handle is bound to one role identity.
#[derive(Debug, Clone)]
pub struct BusHandle {
    role: String,
    staged: Arc<Mutex<Vec<Message>>>,
}

impl BusHandle {
    pub(crate) fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Identity this handle publishes for.
    pub fn role(&self) -> &str {
        &self.role
    }

    pub async fn publish(&self, message: Message) {
        self.staged.lock().await.push(message);
    }

    async fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.staged.lock().await)
    }
}

/// A recoverable act failure reported for one role.
#[derive(Debug)]
pub struct RoleFailure {
    pub role: String,
    pub error: RoleError,
}

/// Outcome of one committed round.
#[derive(Debug)]
pub struct RoundReport {
    pub round: u64,
    /// Messages published at the end of the round, in publish order.
    pub produced: Vec<Arc<Message>>,
    /// Roles that had no news or decided not to act.
    pub idle: Vec<String>,
    pub acted: Vec<(String, ActReport)>,
    pub failures: Vec<RoleFailure>,
}

impl RoundReport {
    /// No role produced anything and no role is waiting to retry.
    pub fn is_quiescent(&self) -> bool {
        self.produced.is_empty() && self.failures.is_empty()
    }
}

/// Serializable environment state stored in team snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub round: u64,
    pub log: Vec<Arc<Message>>,
    pub roles: Vec<RoleSnapshot>,
}

#[derive(Debug, Default)]
pub struct Environment {
    roles: Vec<Role>,
    log: Vec<Arc<Message>>,
    round: u64,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role. Hire order is the fixed order of every round.
    pub fn add_role(&mut self, role: Role) -> EnvironmentResult<()> {
        if self.role(role.name()).is_some() {
            return Err(EnvironmentError::DuplicateRole {
                name: role.name().to_string(),
            });
        }
        self.roles.push(role);
        Ok(())
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name() == name)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name().to_string()).collect()
    }

    /// Stop delivering to and scheduling `name`. Returns whether it existed.
    pub fn retire(&mut self, name: &str) -> bool {
        match self.roles.iter_mut().find(|r| r.name() == name) {
            Some(role) => {
                role.terminate();
                true
            }
            None => false,
        }
    }

    /// Number of committed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Global ordered message log.
    pub fn history(&self) -> &[Arc<Message>] {
        &self.log
    }

    /// Append to the log and deliver to every matching inbox immediately.
    ///
    /// Used for messages originating outside a round (project kickoff).
    pub fn publish(&mut self, message: Message) -> Arc<Message> {
        let message = Arc::new(message);
        self.deliver(Arc::clone(&message));
        message
    }

    fn deliver(&mut self, message: Arc<Message>) {
        for role in self.roles.iter_mut() {
            if role.accepts(&message) {
                role.deliver(Arc::clone(&message));
            }
        }
        obs::emit_message_published(&message);
        METRICS.inc_messages_published();
        self.log.push(message);
    }

    /// Run one observe → think → act round across all roles.
    #[instrument(skip_all, fields(round = self.round + 1))]
    pub async fn run_round(&mut self, ctx: &RunContext) -> EnvironmentResult<RoundReport> {
        let round = self.round + 1;
        obs::emit_round_started(round, self.roles.len());
        let checkpoint = self.snapshot();

        // Phase 1: observe + think, no suspension.
        let mut idle = Vec::new();
        let mut ready = Vec::with_capacity(self.roles.len());
        for role in self.roles.iter_mut() {
            let acts = !role.is_terminated() && role.observe() > 0 && role.think();
            if !acts {
                idle.push(role.name().to_string());
            }
            ready.push(acts);
        }

        // Phase 2: concurrent acts behind a shared cancel flag.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = &cancel_tx;
        let acts = self
            .roles
            .iter_mut()
            .zip(ready)
            .filter(|(_, acts)| *acts)
            .map(|(role, _)| {
                let bus = BusHandle::new(role.name());
                let cancel = cancel_rx.clone();
                async move {
                    let name = role.name().to_string();
                    let result = role.act(ctx, &bus, cancel).await;
                    if matches!(&result, Err(e) if e.is_fatal()) {
                        let _ = cancel_tx.send(true);
                    }
                    (name, bus, result)
                }
            });
        let results = join_all(acts).await;

        // Phase 3: collect in hire order; any fatal error discards the batch.
        let mut staged = Vec::new();
        let mut acted = Vec::new();
        let mut failures = Vec::new();
        let mut fatal: Option<EnvironmentError> = None;
        for (name, bus, result) in results {
            match result {
                Ok(report) => {
                    for message in bus.drain().await {
                        if message.sender != name {
                            fatal.get_or_insert(EnvironmentError::BusCorruption {
                                role: name.clone(),
                                detail: format!(
                                    "staged a message with sender '{}'",
                                    message.sender
                                ),
                            });
                        }
                        staged.push(message);
                    }
                    acted.push((name, report));
                }
                Err(RoleError::BudgetExceeded(e)) => {
                    fatal.get_or_insert(EnvironmentError::BudgetExceeded(e));
                }
                Err(RoleError::Cancelled) => {}
                Err(error) => {
                    obs::emit_role_act_failed(&name, &error);
                    failures.push(RoleFailure { role: name, error });
                }
            }
        }

        if let Some(err) = fatal {
            self.restore(checkpoint);
            return Err(err);
        }

        let mut produced = Vec::with_capacity(staged.len());
        for message in staged {
            let message = Arc::new(message);
            self.deliver(Arc::clone(&message));
            produced.push(message);
        }
        self.round = round;
        obs::emit_round_finished(round, produced.len(), idle.len(), failures.len());

        Ok(RoundReport {
            round,
            produced,
            idle,
            acted,
            failures,
        })
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            round: self.round,
            log: self.log.clone(),
            roles: self.roles.iter().map(Role::snapshot).collect(),
        }
    }

    /// Roll every role, the log and the round counter back to `checkpoint`.
    fn restore(&mut self, checkpoint: EnvironmentSnapshot) {
        warn!(round = self.round + 1, "round discarded; roles rolled back");
        self.round = checkpoint.round;
        self.log = checkpoint.log;
        self.roles = checkpoint.roles.into_iter().map(Role::from_snapshot).collect();
    }

    pub fn from_snapshot(snapshot: EnvironmentSnapshot) -> EnvironmentResult<Self> {
        let mut env = Environment {
            roles: Vec::with_capacity(snapshot.roles.len()),
            log: snapshot.log,
            round: snapshot.round,
        };
        for role in snapshot.roles {
            env.add_role(Role::from_snapshot(role))?;
        }
        Ok(env)
    }
}
