//! Text-generation collaborator seam.
//!
//! Roles never talk to a model directly. They call a [`Generator`] with the
//! messages they have observed plus a list of directives, and get text and
//! token usage back. Retry, timeout and budget policy live in the caller.
//!
//! - [`scripted`]: `ScriptedGenerator`, a deterministic generator driven by
//!   per-action queues (tests and the CLI)

pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{ActionKind, Message};

pub use scripted::{ScriptStep, ScriptedGenerator};

/// Token counts reported by a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    pub action: ActionKind,
    /// Identity of the calling role.
    pub role: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Failures of the generation collaborator. All of them are recoverable and
/// retried by the calling role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("generation rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("generation output malformed: {detail}")]
    MalformedOutput { detail: String },

    #[error("generation backend unavailable: {detail}")]
    Unavailable { detail: String },
}

impl GenerationError {
    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Opaque text-generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        context: &[Arc<Message>],
        directives: &[String],
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError>;
}

/// Bounded exponential backoff for generation attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        let ms = if base.is_finite() {
            (base as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(ms)
    }
}

/// Generation settings shared by every role in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
