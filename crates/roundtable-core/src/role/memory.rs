//! Append-only message log with value-based deduplication.

use std::collections::HashSet;
use std::sync::Arc;

use roundtable_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::message::{ActionKind, Message};

/// Ordered message log. Adding a message equal by value to one already held
/// is a no-op.
///
/// Serializes as a plain list of messages; the digest index is rebuilt on
/// load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Arc<Message>>", into = "Vec<Arc<Message>>")]
pub struct Memory {
    storage: Vec<Arc<Message>>,
    index: HashSet<ContentDigest>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` unless an equal one is already stored. Returns
    /// whether it was added.
    pub fn add(&mut self, message: Arc<Message>) -> bool {
        if !self.index.insert(message.digest()) {
            return false;
        }
        self.storage.push(message);
        true
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.index.contains(&message.digest())
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.storage
    }

    /// The last `k` messages, oldest first. `k = 0` means all.
    pub fn recent(&self, k: usize) -> &[Arc<Message>] {
        if k == 0 || k >= self.storage.len() {
            &self.storage
        } else {
            &self.storage[self.storage.len() - k..]
        }
    }

    pub fn by_cause(&self, cause: ActionKind) -> impl Iterator<Item = &Arc<Message>> {
        self.storage.iter().filter(move |m| m.cause == cause)
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.index.clear();
    }
}

impl From<Vec<Arc<Message>>> for Memory {
    fn from(messages: Vec<Arc<Message>>) -> Self {
        let mut memory = Memory::new();
        for m in messages {
            memory.add(m);
        }
        memory
    }
}

impl From<Memory> for Vec<Arc<Message>> {
    fn from(memory: Memory) -> Self {
        memory.storage
    }
}
