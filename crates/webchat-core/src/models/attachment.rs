use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::services::attachment_codec;

/// Authoritative binary source of an attachment.
///
/// Fresh attachments hold their bytes in memory for the current session.
/// Once serialized for storage they carry a `data:` URL instead, which is
/// the only form that survives a reload.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    Live(Bytes),
    Durable(String),
}

/// A file-like payload attached to a message (image, audio, generic file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredAttachment", try_from = "StoredAttachment")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
    /// Session-scoped preview for images, never written to storage
    pub preview_url: Option<String>,
    pub source: AttachmentSource,
}

impl Attachment {
    pub fn is_live(&self) -> bool {
        matches!(self.source, AttachmentSource::Live(_))
    }

    /// In-memory bytes, present only for same-session attachments.
    pub fn live_data(&self) -> Option<&Bytes> {
        match &self.source {
            AttachmentSource::Live(data) => Some(data),
            AttachmentSource::Durable(_) => None,
        }
    }

    /// Durable encoded form, present after serialization or reload.
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            AttachmentSource::Live(_) => None,
            AttachmentSource::Durable(url) => Some(url),
        }
    }
}

/// On-disk shape of an attachment. Serializing a live attachment goes through
/// the codec, so the live handle can never reach storage.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAttachment {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default)]
    url: Option<String>,
}

impl From<Attachment> for StoredAttachment {
    fn from(attachment: Attachment) -> Self {
        let durable = attachment_codec::serialize(attachment);
        let url = durable.url().map(str::to_string);
        Self {
            id: durable.id,
            name: durable.name,
            mime_type: durable.mime_type,
            size: durable.size,
            url,
        }
    }
}

impl TryFrom<StoredAttachment> for Attachment {
    type Error = String;

    fn try_from(stored: StoredAttachment) -> Result<Self, Self::Error> {
        let url = stored
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| format!("attachment '{}' has no stored url", stored.name))?;

        Ok(Self {
            id: stored.id,
            name: stored.name,
            mime_type: stored.mime_type,
            size: stored.size,
            preview_url: None,
            source: AttachmentSource::Durable(url),
        })
    }
}
