use serde::{Deserialize, Serialize};

use super::attachment::Attachment;
use super::{generate_id, now_millis};

/// Content of the transient message shown while a webhook reply is pending.
pub const TYPING_PLACEHOLDER: &str = "Agent is typing...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

/// A single chat message as held in the live sequence and in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub sender: Sender,
    /// Creation instant, Unix epoch milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Set on the pending-reply placeholder and on replies still being revealed.
    #[serde(default)]
    pub is_typing: bool,
    /// Marks the pending-reply placeholder of an in-flight turn. Never stored.
    #[serde(skip)]
    pub pending: bool,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: generate_id(),
            content: content.into(),
            sender: Sender::User,
            timestamp: now_millis(),
            attachments,
            is_typing: false,
            pending: false,
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            content: content.into(),
            sender: Sender::Agent,
            timestamp: now_millis(),
            attachments: Vec::new(),
            is_typing: false,
            pending: false,
        }
    }

    /// Placeholder appended while the webhook call for a turn is in flight.
    pub fn typing_placeholder(is_typing: bool) -> Self {
        Self {
            is_typing,
            pending: true,
            ..Self::agent(TYPING_PLACEHOLDER)
        }
    }

    /// Agent reply built from a transport failure; persisted like any other message.
    pub fn agent_error(user_message: &str) -> Self {
        Self::agent(format!("Error: {}", user_message))
    }

    pub fn with_typing(mut self, is_typing: bool) -> Self {
        self.is_typing = is_typing;
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.pending
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}
