//! Shared spend accounting.
//!
//! [`BudgetGuard`] is the only state mutated by several roles within one
//! round. Every charge takes the same lock, so overshoot is observed by the
//! charge that causes it.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::generation::TokenUsage;
use crate::obs;

/// Spend reached or passed the cap. Fatal to the whole team.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("budget exceeded: spent {spent:.4} of cap {cap:.4}")]
pub struct BudgetExceeded {
    pub spent: f64,
    pub cap: f64,
}

/// Serializable view of a guard, stored in team snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub spent: f64,
    pub cap: f64,
}

#[derive(Debug, Default)]
pub struct BudgetGuard {
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    pub fn new(cap: f64) -> Self {
        Self::from_state(BudgetState { spent: 0.0, cap })
    }

    pub fn from_state(state: BudgetState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BudgetState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Record `amount` of spend. The charge is kept even when it crosses the
    /// cap; the error tells the caller to stop.
    pub fn charge(&self, amount: f64) -> Result<f64, BudgetExceeded> {
        let state = self.with_state(|s| {
            s.spent += amount.max(0.0);
            *s
        });
        obs::emit_budget_charged(amount, state.spent, state.cap);
        if state.spent > state.cap {
            return Err(BudgetExceeded {
                spent: state.spent,
                cap: state.cap,
            });
        }
        Ok(state.spent)
    }

    /// Fails once spend has reached the cap.
    pub fn ensure_available(&self) -> Result<(), BudgetExceeded> {
        let state = self.snapshot();
        if state.spent >= state.cap {
            return Err(BudgetExceeded {
                spent: state.spent,
                cap: state.cap,
            });
        }
        Ok(())
    }

    pub fn total_spent(&self) -> f64 {
        self.snapshot().spent
    }

    pub fn cap(&self) -> f64 {
        self.snapshot().cap
    }

    pub fn remaining(&self) -> f64 {
        let s = self.snapshot();
        (s.cap - s.spent).max(0.0)
    }

    /// Set a new cap; spend so far is kept.
    pub fn set_cap(&self, cap: f64) {
        self.with_state(|s| s.cap = cap);
    }

    pub fn snapshot(&self) -> BudgetState {
        self.with_state(|s| *s)
    }

    pub fn restore(&self, state: BudgetState) {
        self.with_state(|s| *s = state);
    }
}

/// Token pricing used to turn generation usage into a charge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Price per 1000 prompt tokens.
    pub prompt_per_1k: f64,
    /// Price per 1000 completion tokens.
    pub completion_per_1k: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            prompt_per_1k: 0.0015,
            completion_per_1k: 0.002,
        }
    }
}

impl CostModel {
    pub fn price(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.prompt_per_1k
            + usage.completion_tokens as f64 * self.completion_per_1k)
            / 1000.0
    }
}
