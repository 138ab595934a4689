pub mod attachment;
pub mod chat_record;
pub mod message;
pub mod settings;

pub use attachment::{Attachment, AttachmentSource};
pub use chat_record::{ChatHistoryRecord, ChatSummary};
pub use message::{Message, Sender, TYPING_PLACEHOLDER};
pub use settings::ChatSettings;

/// Generate an opaque unique identifier for messages, attachments and chats.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
