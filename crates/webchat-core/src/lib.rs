//! Core of a webhook-backed chat client.
//!
//! The crate owns the message lifecycle for one active chat: attachments are
//! materialised by [`services::attachment_codec`], turns are sent through a
//! [`services::WebhookTransport`], and history is kept in a size-bounded
//! key-value medium by [`repositories::ConversationStore`]. Presentation
//! surfaces call into [`controllers::ChatSession`].

pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;

pub use controllers::{ChatSession, SessionError, SessionEvent, TurnOutcome};
pub use models::{Attachment, AttachmentSource, ChatHistoryRecord, ChatSettings, Message, Sender};
pub use repositories::{ConversationStore, StoreError};
pub use services::{TransportError, WebhookClient, WebhookTransport};
