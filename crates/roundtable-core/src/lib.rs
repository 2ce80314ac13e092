//! Roundtable Core Library
//!
//! Roles exchange typed messages over a round-based bus, refine a shared
//! task plan, and run under a team-wide budget with per-round snapshots.

pub mod budget;
pub mod config;
pub mod context;
pub mod environment;
pub mod generation;
pub mod message;
pub mod metrics;
pub mod obs;
pub mod plan;
pub mod role;
pub mod team;
pub mod telemetry;

pub use budget::{BudgetExceeded, BudgetGuard, BudgetState, CostModel};
pub use config::{ConfigError, ContextConfig, RoleConfig, TeamConfig};
pub use context::RunContext;
pub use environment::{
    BusHandle, Environment, EnvironmentError, EnvironmentResult, EnvironmentSnapshot,
    RoleFailure, RoundReport,
};
pub use generation::{
    GenerateOptions, Generation, GenerationConfig, GenerationError, Generator, RetryPolicy,
    ScriptStep, ScriptedGenerator, TokenUsage,
};
pub use message::{ActionKind, Message, Recipients};
pub use plan::{
    parse_task_proposal, Plan, PlanError, PlanProgress, PlanResult, PlanUpdate, Task, TaskStatus,
};
pub use role::{
    ActReport, Memory, Role, RoleError, RoleKind, RoleProfile, RoleResult, RoleSettings,
    RoleSnapshot, RoleState,
};
pub use telemetry::init_tracing;
pub use team::{
    ProjectInfo, RunSummary, StopReason, Team, TeamError, TeamResult, TeamSnapshot,
    SNAPSHOT_FORMAT_VERSION,
};

pub use roundtable_state::{
    ArtifactHandle, ArtifactStore, ContentDigest, FsArtifactStore, FsSnapshotStore, SnapshotId,
    SnapshotRecord, SnapshotStore, StorageError,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
