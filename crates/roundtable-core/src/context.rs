//! Per-run collaborators shared by every role.

use std::sync::Arc;

use roundtable_state::ArtifactStore;

use crate::budget::{BudgetGuard, CostModel};
use crate::generation::{GenerationConfig, Generator};

/// Everything an act needs beyond the role's own state. Built once per team
/// and passed by reference into each round.
#[derive(Clone)]
pub struct RunContext {
    pub generator: Arc<dyn Generator>,
    pub budget: Arc<BudgetGuard>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub generation: GenerationConfig,
    pub cost: CostModel,
    /// Most recent memory messages included in an act context; 0 means all.
    pub max_context_messages: usize,
}

impl RunContext {
    pub fn new(
        generator: Arc<dyn Generator>,
        budget: Arc<BudgetGuard>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            generator,
            budget,
            artifacts,
            generation: GenerationConfig::default(),
            cost: CostModel::default(),
            max_context_messages: 32,
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_max_context_messages(mut self, max: usize) -> Self {
        self.max_context_messages = max;
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("budget", &self.budget.snapshot())
            .field("generation", &self.generation)
            .field("cost", &self.cost)
            .field("max_context_messages", &self.max_context_messages)
            .finish_non_exhaustive()
    }
}
