//! Team orchestrator: budget guard, round loop, snapshot and resume.
//!
//! A `Team` owns one [`Environment`] and the [`RunContext`] shared by its
//! roles. Every committed round is followed by a full snapshot written to a
//! [`SnapshotStore`]; a failed round commits nothing, so the latest snapshot
//! is always a resumable state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roundtable_state::{
    ArtifactStore, SnapshotId, SnapshotRecord, SnapshotStore, StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::budget::{BudgetExceeded, BudgetGuard, BudgetState};
use crate::config::{ConfigError, TeamConfig};
use crate::context::RunContext;
use crate::environment::{Environment, EnvironmentError, EnvironmentSnapshot, RoundReport};
use crate::generation::Generator;
use crate::message::{Message, Recipients};
use crate::metrics::METRICS;
use crate::obs;
use crate::role::Role;

/// Version written into every snapshot document.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("environment error: {0}")]
    Environment(EnvironmentError),

    #[error("snapshot store error: {0}")]
    Snapshot(#[from] StorageError),

    #[error("snapshot format error: {0}")]
    SnapshotFormat(String),

    #[error("no snapshot to resume from")]
    NoSnapshot,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<EnvironmentError> for TeamError {
    fn from(e: EnvironmentError) -> Self {
        match e {
            EnvironmentError::BudgetExceeded(b) => TeamError::BudgetExceeded(b),
            other => TeamError::Environment(other),
        }
    }
}

pub type TeamResult<T> = std::result::Result<T, TeamError>;

/// The project a team is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: Uuid,
    pub idea: String,
    pub started_at: DateTime<Utc>,
}

/// Persisted team state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub format_version: u32,
    pub project: Option<ProjectInfo>,
    pub budget: BudgetState,
    pub environment: EnvironmentSnapshot,
}

impl TeamSnapshot {
    /// Canonical encoding: compact JSON.
    pub fn to_bytes(&self) -> TeamResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TeamError::SnapshotFormat(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> TeamResult<Self> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| TeamError::SnapshotFormat(e.to_string()))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(TeamError::SnapshotFormat(format!(
                "unsupported format version {} (expected {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Why [`Team::run`] stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A round produced no messages and left no role waiting to retry.
    Quiescent,
    /// The requested number of rounds ran.
    RoundsExhausted,
}

#[derive(Debug)]
pub struct RunSummary {
    pub rounds_run: u32,
    pub stop: StopReason,
    pub reports: Vec<RoundReport>,
    pub last_snapshot: Option<SnapshotRecord>,
}

pub struct Team {
    env: Environment,
    ctx: RunContext,
    snapshots: Arc<dyn SnapshotStore>,
    project: Option<ProjectInfo>,
    last_snapshot: Option<SnapshotRecord>,
}

impl Team {
    pub fn new(ctx: RunContext, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            env: Environment::new(),
            ctx,
            snapshots,
            project: None,
            last_snapshot: None,
        }
    }

    /// Build a team with the configured roles, budget and generation settings.
    pub fn from_config(
        config: &TeamConfig,
        generator: Arc<dyn Generator>,
        artifacts: Arc<dyn ArtifactStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> TeamResult<Self> {
        config.validate()?;
        let ctx = RunContext::new(
            generator,
            Arc::new(BudgetGuard::new(config.investment)),
            artifacts,
        )
        .with_generation(config.generation.clone())
        .with_cost(config.cost)
        .with_max_context_messages(config.context.max_messages);

        let mut team = Self::new(ctx, snapshots);
        for role in config.build_roles() {
            team.hire(role)?;
        }
        Ok(team)
    }

    /// Restore a team from a committed snapshot, `latest` when `id` is `None`.
    ///
    /// `ctx` supplies the collaborators; its budget guard is overwritten with
    /// the persisted spend and cap.
    pub async fn resume(
        ctx: RunContext,
        snapshots: Arc<dyn SnapshotStore>,
        id: Option<&SnapshotId>,
    ) -> TeamResult<Self> {
        let record = match id {
            Some(id) => snapshots
                .list()
                .await?
                .into_iter()
                .rev()
                .find(|r| &r.id == id),
            None => Some(snapshots.latest().await?.ok_or(TeamError::NoSnapshot)?),
        };
        let target = match (&record, id) {
            (Some(r), _) => r.id.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => return Err(TeamError::NoSnapshot),
        };

        let bytes = snapshots.load(&target).await?;
        let snapshot = TeamSnapshot::from_bytes(&bytes)?;
        ctx.budget.restore(snapshot.budget);
        let env = Environment::from_snapshot(snapshot.environment)?;
        info!(
            snapshot = %target.short(),
            round = env.round(),
            roles = env.roles().len(),
            "team resumed"
        );

        Ok(Self {
            env,
            ctx,
            snapshots,
            project: snapshot.project,
            last_snapshot: record,
        })
    }

    pub fn hire(&mut self, role: Role) -> TeamResult<()> {
        self.env.add_role(role)?;
        Ok(())
    }

    /// Set the budget cap.
    pub fn invest(&self, investment: f64) {
        self.ctx.budget.set_cap(investment);
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.ctx.budget
    }

    pub fn project(&self) -> Option<&ProjectInfo> {
        self.project.as_ref()
    }

    pub fn last_snapshot(&self) -> Option<&SnapshotRecord> {
        self.last_snapshot.as_ref()
    }

    /// Global ordered message log.
    pub fn history(&self) -> &[Arc<Message>] {
        self.env.history()
    }

    /// Publish the human idea and commit the starting snapshot.
    ///
    /// `send_to` restricts delivery to the named roles; otherwise the idea is
    /// broadcast and reaches whoever watches user requirements.
    pub async fn run_project(
        &mut self,
        idea: &str,
        send_to: Option<&str>,
    ) -> TeamResult<SnapshotRecord> {
        self.project = Some(ProjectInfo {
            id: Uuid::new_v4(),
            idea: idea.to_string(),
            started_at: Utc::now(),
        });
        let mut message = Message::human(idea);
        if let Some(name) = send_to {
            message = message.to(Recipients::to([name]));
        }
        self.env.publish(message);
        self.commit("round-0").await
    }

    /// Drive up to `n_rounds` rounds.
    ///
    /// Before each round the budget is checked; once spend has reached the
    /// cap no further round starts. After each committed round a snapshot is
    /// written. A quiescent round ends the run early.
    #[instrument(skip(self), fields(start_round = self.env.round()))]
    pub async fn run(&mut self, n_rounds: u32) -> TeamResult<RunSummary> {
        let result = self.run_rounds(n_rounds).await;
        METRICS.flush();
        if let Err(e) = &result {
            obs::emit_team_halted(e);
        }
        result
    }

    async fn run_rounds(&mut self, n_rounds: u32) -> TeamResult<RunSummary> {
        let mut reports = Vec::new();
        let mut stop = StopReason::RoundsExhausted;

        for _ in 0..n_rounds {
            self.ctx.budget.ensure_available()?;
            let report = self.env.run_round(&self.ctx).await?;
            self.commit(&format!("round-{}", report.round)).await?;
            METRICS.inc_rounds_completed();

            let quiescent = report.is_quiescent();
            reports.push(report);
            if quiescent {
                stop = StopReason::Quiescent;
                break;
            }
        }

        Ok(RunSummary {
            rounds_run: reports.len() as u32,
            stop,
            reports,
            last_snapshot: self.last_snapshot.clone(),
        })
    }

    pub fn snapshot(&self) -> TeamSnapshot {
        TeamSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            project: self.project.clone(),
            budget: self.ctx.budget.snapshot(),
            environment: self.env.snapshot(),
        }
    }

    pub fn snapshot_bytes(&self) -> TeamResult<Vec<u8>> {
        self.snapshot().to_bytes()
    }

    async fn commit(&mut self, label: &str) -> TeamResult<SnapshotRecord> {
        let bytes = self.snapshot_bytes()?;
        let record = self.snapshots.save(label, &bytes).await?;
        obs::emit_snapshot_committed(label, record.id.short(), record.size_bytes);
        self.last_snapshot = Some(record.clone());
        Ok(record)
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("roles", &self.env.role_names())
            .field("round", &self.env.round())
            .field("project", &self.project)
            .field("last_snapshot", &self.last_snapshot)
            .finish_non_exhaustive()
    }
}
