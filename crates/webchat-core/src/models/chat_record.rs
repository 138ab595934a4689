use serde::{Deserialize, Serialize};

use super::message::Message;
use super::settings::ChatSettings;

fn default_record_name() -> String {
    "Untitled chat".to_string()
}

/// Persisted unit of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryRecord {
    pub id: String,
    #[serde(default = "default_record_name")]
    pub name: String,
    pub messages: Vec<Message>,
    /// Settings snapshot taken when the record was created
    #[serde(default)]
    pub settings: ChatSettings,
    /// Last write, Unix epoch milliseconds. Zero for records written before
    /// this field existed.
    #[serde(default)]
    pub updated_at: i64,
}

impl ChatHistoryRecord {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            message_count: self.messages.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight record metadata for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub message_count: usize,
    pub updated_at: i64,
}
