//! Message vocabulary: `ActionKind`, `Recipients`, `Message`.
//!
//! A message is immutable once published. The bus shares a single
//! `Arc<Message>` between the global log and every inbox it lands in.

use std::collections::BTreeSet;
use std::fmt;

use roundtable_state::ContentDigest;
use serde::{Deserialize, Serialize};

/// The action or event that produced a message.
///
/// This is the `cause` key roles subscribe to and dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Project kickoff from a human.
    UserRequirement,
    WriteRequirements,
    ReviewRequirements,
    WritePlan,
    ProvideFeedback,
    PublishPlan,
    WriteCode,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::UserRequirement,
        ActionKind::WriteRequirements,
        ActionKind::ReviewRequirements,
        ActionKind::WritePlan,
        ActionKind::ProvideFeedback,
        ActionKind::PublishPlan,
        ActionKind::WriteCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::UserRequirement => "user_requirement",
            ActionKind::WriteRequirements => "write_requirements",
            ActionKind::ReviewRequirements => "review_requirements",
            ActionKind::WritePlan => "write_plan",
            ActionKind::ProvideFeedback => "provide_feedback",
            ActionKind::PublishPlan => "publish_plan",
            ActionKind::WriteCode => "write_code",
        }
    }

    /// Whether the generated output of this action is a task-list proposal.
    pub fn yields_task_list(&self) -> bool {
        matches!(self, ActionKind::WritePlan | ActionKind::PublishPlan)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown action kind: {s}"))
    }
}

/// Addressing of a message.
///
/// `Broadcast` reaches every inbox but does not name anyone, so it only
/// becomes news for roles that watch the message's cause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "roles", rename_all = "snake_case")]
pub enum Recipients {
    #[default]
    Broadcast,
    Roles(BTreeSet<String>),
}

impl Recipients {
    pub fn to<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Recipients::Roles(names.into_iter().map(Into::into).collect())
    }

    /// True when `name` is addressed explicitly.
    pub fn names(&self, name: &str) -> bool {
        match self {
            Recipients::Broadcast => false,
            Recipients::Roles(names) => names.contains(name),
        }
    }

    /// True when the message should be delivered to `name`'s inbox.
    pub fn reaches(&self, name: &str) -> bool {
        matches!(self, Recipients::Broadcast) || self.names(name)
    }
}

/// Immutable unit of communication between roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Role identity; empty for human or system origin.
    pub sender: String,
    pub cause: ActionKind,
    #[serde(default)]
    pub recipients: Recipients,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruct_content: Option<serde_json::Value>,
}

impl Message {
    pub fn new(content: impl Into<String>, sender: impl Into<String>, cause: ActionKind) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            cause,
            recipients: Recipients::Broadcast,
            instruct_content: None,
        }
    }

    /// A kickoff message from a human, as published at project start.
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(content, "", ActionKind::UserRequirement)
    }

    pub fn to(mut self, recipients: Recipients) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_instruct_content(mut self, value: serde_json::Value) -> Self {
        self.instruct_content = Some(value);
        self
    }

    pub fn is_from_human(&self) -> bool {
        self.sender.is_empty()
    }

    /// Value digest used for duplicate detection in role memory.
    ///
    /// Each field is length-prefixed so distinct messages never share an
    /// encoding.
    pub fn digest(&self) -> ContentDigest {
        let mut buf = Vec::with_capacity(self.content.len() + 64);
        let mut field = |bytes: &[u8]| {
            buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            buf.extend_from_slice(bytes);
        };
        field(self.content.as_bytes());
        field(self.sender.as_bytes());
        field(self.cause.as_str().as_bytes());
        match &self.recipients {
            Recipients::Broadcast => field(b"broadcast"),
            Recipients::Roles(names) => {
                field(b"roles");
                field(&(names.len() as u64).to_le_bytes());
                for name in names {
                    field(name.as_bytes());
                }
            }
        }
        match &self.instruct_content {
            Some(value) => field(value.to_string().as_bytes()),
            None => field(b""),
        }
        ContentDigest::from_bytes(&buf)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sender = if self.sender.is_empty() {
            "human"
        } else {
            &self.sender
        };
        write!(f, "{sender} [{}]: {}", self.cause, self.content)
    }
}
