//! Deterministic generator driven by per-action response queues.
//!
//! Each [`ActionKind`] owns a FIFO of [`ScriptStep`]s. A call pops the next
//! step for its action; an exhausted queue answers `Unavailable`. Every call
//! is recorded so tests can assert on what roles asked for.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerateOptions, Generation, GenerationError, Generator, TokenUsage};
use crate::message::{ActionKind, Message};

/// One canned outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptStep {
    Reply {
        text: String,
        #[serde(default)]
        usage: TokenUsage,
    },
    Timeout,
    RateLimited {
        #[serde(default)]
        retry_after_ms: Option<u64>,
    },
    Malformed {
        detail: String,
    },
    Unavailable {
        detail: String,
    },
    /// Sleep for `ms`, then reply with `text`.
    Stall {
        ms: u64,
        text: String,
    },
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Reply {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn reply_with_usage(text: impl Into<String>, prompt: u64, completion: u64) -> Self {
        ScriptStep::Reply {
            text: text.into(),
            usage: TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
            },
        }
    }
}

/// A call observed by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub action: ActionKind,
    pub role: String,
    pub attempt: u32,
    pub context: Vec<Message>,
    pub directives: Vec<String>,
}

#[derive(Debug, Default)]
struct ScriptState {
    queues: HashMap<ActionKind, VecDeque<ScriptStep>>,
    calls: Vec<RecordedCall>,
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    state: Mutex<ScriptState>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a script document: `{ "<action>": [step, ...], ... }`.
    pub fn from_script(script: BTreeMap<ActionKind, Vec<ScriptStep>>) -> Self {
        let generator = Self::new();
        for (action, steps) in script {
            for step in steps {
                generator.push(action, step);
            }
        }
        generator
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let script: BTreeMap<ActionKind, Vec<ScriptStep>> = serde_json::from_str(json)?;
        Ok(Self::from_script(script))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Queue `step` for `action`.
    pub fn push(&self, action: ActionKind, step: ScriptStep) {
        self.with_state(|s| s.queues.entry(action).or_default().push_back(step));
    }

    /// Builder form of [`push`](Self::push).
    pub fn then(self, action: ActionKind, step: ScriptStep) -> Self {
        self.push(action, step);
        self
    }

    /// Builder shorthand for a plain reply.
    pub fn reply(self, action: ActionKind, text: impl Into<String>) -> Self {
        self.then(action, ScriptStep::reply(text))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn call_count(&self, action: ActionKind) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| c.action == action).count())
    }

    pub fn total_calls(&self) -> usize {
        self.with_state(|s| s.calls.len())
    }

    pub fn remaining(&self, action: ActionKind) -> usize {
        self.with_state(|s| s.queues.get(&action).map_or(0, VecDeque::len))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        context: &[Arc<Message>],
        directives: &[String],
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError> {
        let step = self.with_state(|s| {
            s.calls.push(RecordedCall {
                action: options.action,
                role: options.role.clone(),
                attempt: options.attempt,
                context: context.iter().map(|m| Message::clone(m)).collect(),
                directives: directives.to_vec(),
            });
            s.queues
                .get_mut(&options.action)
                .and_then(VecDeque::pop_front)
        });

        match step {
            None => Err(GenerationError::Unavailable {
                detail: format!("script exhausted for {}", options.action),
            }),
            Some(ScriptStep::Reply { text, usage }) => Ok(Generation { text, usage }),
            Some(ScriptStep::Timeout) => Err(GenerationError::Timeout { after_ms: 0 }),
            Some(ScriptStep::RateLimited { retry_after_ms }) => {
                Err(GenerationError::RateLimited { retry_after_ms })
            }
            Some(ScriptStep::Malformed { detail }) => {
                Err(GenerationError::MalformedOutput { detail })
            }
            Some(ScriptStep::Unavailable { detail }) => Err(GenerationError::Unavailable { detail }),
            Some(ScriptStep::Stall { ms, text }) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Generation {
                    text,
                    usage: TokenUsage::default(),
                })
            }
        }
    }
}
