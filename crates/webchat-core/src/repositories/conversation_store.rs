use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::error::{StorageError, StoreError, StoreResult};
use super::storage::StorageBackend;
use crate::models::{ChatHistoryRecord, ChatSettings, ChatSummary, Message, generate_id, now_millis};
use crate::services::LoginSession;
use crate::services::attachment_codec;

pub const HISTORY_KEY: &str = "chatHistory";
pub const SETTINGS_KEY: &str = "chatSettings";
pub const LOGIN_KEY: &str = "chat_user";

/// Records kept when a history write runs into the storage quota.
pub const EVICTION_KEEP: usize = 3;

const IMPORTED_SUFFIX: &str = " (imported)";

/// A downloadable snapshot of one chat.
#[derive(Debug, Clone)]
pub struct ExportedRecord {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Durable mapping from chat id to its history record, plus the settings and
/// login entries that share the same storage medium.
pub struct ConversationStore {
    storage: Arc<dyn StorageBackend>,
}

impl ConversationStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn load_history(&self) -> StoreResult<Vec<ChatHistoryRecord>> {
        match self.storage.get(HISTORY_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Stored messages for a chat, empty if the chat is unknown.
    pub async fn load(&self, chat_id: &str) -> StoreResult<Vec<Message>> {
        let messages = self
            .load_history()
            .await?
            .into_iter()
            .find(|record| record.id == chat_id)
            .map(|record| record.messages)
            .unwrap_or_default();
        debug!(chat_id = %chat_id, count = messages.len(), "Loaded messages");
        Ok(messages)
    }

    pub async fn list(&self) -> StoreResult<Vec<ChatSummary>> {
        Ok(self
            .load_history()
            .await?
            .iter()
            .map(ChatHistoryRecord::summary)
            .collect())
    }

    /// Replace the stored messages of `chat_id`, creating the record on first
    /// write. Placeholders are dropped and attachments serialized first.
    ///
    /// An empty chat id is ignored.
    pub async fn save(&self, chat_id: &str, messages: &[Message]) -> StoreResult<()> {
        if chat_id.is_empty() {
            debug!("Skipping save without chat id");
            return Ok(());
        }

        let persisted = prepare_for_storage(messages);
        let mut history = self.load_history().await?;
        let now = now_millis();

        if let Some(record) = history.iter_mut().find(|record| record.id == chat_id) {
            record.messages = persisted;
            record.updated_at = now;
        } else {
            let name = format!("Chat {}", history.len() + 1);
            info!(chat_id = %chat_id, name = %name, "Creating chat record");
            history.push(ChatHistoryRecord {
                id: chat_id.to_string(),
                name,
                messages: persisted,
                settings: self.load_settings().await?,
                updated_at: now,
            });
        }

        self.write_history(history).await
    }

    /// Remove the record for `chat_id` entirely.
    pub async fn clear(&self, chat_id: &str) -> StoreResult<()> {
        let mut history = self.load_history().await?;
        let before = history.len();
        history.retain(|record| record.id != chat_id);
        if history.len() == before {
            debug!(chat_id = %chat_id, "Nothing to clear");
            return Ok(());
        }

        info!(chat_id = %chat_id, "Cleared chat record");
        self.write_history(history).await
    }

    pub async fn export_record(&self, chat_id: &str) -> StoreResult<ExportedRecord> {
        let record = self
            .load_history()
            .await?
            .into_iter()
            .find(|record| record.id == chat_id)
            .ok_or_else(|| StoreError::NotFound {
                id: chat_id.to_string(),
            })?;

        Ok(ExportedRecord {
            file_name: export_file_name(&record.name),
            bytes: serde_json::to_vec_pretty(&record)?,
        })
    }

    /// Parse an exported record and store it under a fresh id.
    ///
    /// Stored records are untouched if the input is rejected.
    pub async fn import_record(&self, raw: &str) -> StoreResult<ChatHistoryRecord> {
        let value: Value = serde_json::from_str(raw).map_err(|e| StoreError::ImportFormat {
            message: e.to_string(),
        })?;

        if !is_truthy(value.get("id")) || !is_truthy(value.get("messages")) {
            return Err(StoreError::ImportFormat {
                message: "Invalid chat history format".to_string(),
            });
        }

        let mut record: ChatHistoryRecord =
            serde_json::from_value(value).map_err(|e| StoreError::ImportFormat {
                message: e.to_string(),
            })?;

        let original_id = std::mem::replace(&mut record.id, generate_id());
        record.name.push_str(IMPORTED_SUFFIX);
        record.messages = prepare_for_storage(&record.messages);
        record.updated_at = now_millis();

        let mut history = self.load_history().await?;
        history.push(record.clone());
        self.write_history(history).await?;

        info!(original_id = %original_id, chat_id = %record.id, "Imported chat record");
        Ok(record)
    }

    pub async fn load_settings(&self) -> StoreResult<ChatSettings> {
        match self.storage.get(SETTINGS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(ChatSettings::default()),
        }
    }

    pub async fn save_settings(&self, settings: &ChatSettings) -> StoreResult<()> {
        let json = serde_json::to_string(settings)?;
        self.storage.set(SETTINGS_KEY, json).await?;
        debug!(chat_id = %settings.chat_id, "Saved settings");
        Ok(())
    }

    pub async fn remember_login(&self, session: &LoginSession) -> StoreResult<()> {
        let json = serde_json::to_string(session)?;
        self.storage.set(LOGIN_KEY, json).await?;
        Ok(())
    }

    pub async fn load_login(&self) -> StoreResult<Option<LoginSession>> {
        match self.storage.get(LOGIN_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn forget_login(&self) -> StoreResult<()> {
        self.storage.remove(LOGIN_KEY).await?;
        Ok(())
    }

    /// Write the full record set. On quota rejection, retry exactly once with
    /// only the most recently updated records.
    async fn write_history(&self, history: Vec<ChatHistoryRecord>) -> StoreResult<()> {
        let json = serde_json::to_string(&history)?;
        match self.storage.set(HISTORY_KEY, json).await {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded { needed, quota }) => {
                let total = history.len();
                let reduced = keep_most_recent(history, EVICTION_KEEP);
                warn!(
                    needed,
                    quota,
                    kept = reduced.len(),
                    evicted = total - reduced.len(),
                    "Chat history over quota, evicting older chats"
                );

                let json = serde_json::to_string(&reduced)?;
                self.storage.set(HISTORY_KEY, json).await.map_err(|e| {
                    error!(error = %e, "Chat history still exceeds quota after eviction");
                    match e {
                        StorageError::QuotaExceeded { .. } => StoreError::QuotaExceeded,
                        other => StoreError::Storage(other),
                    }
                })
            }
            Err(e) => {
                error!(error = %e, "Failed to write chat history");
                Err(e.into())
            }
        }
    }
}

/// Storage form of a live sequence: no placeholders, durable attachments and
/// no reveal flags.
fn prepare_for_storage(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|message| !message.is_placeholder())
        .map(|message| Message {
            attachments: message
                .attachments
                .iter()
                .cloned()
                .map(attachment_codec::serialize)
                .collect(),
            is_typing: false,
            ..message.clone()
        })
        .collect()
}

/// The `keep` records with the latest `updated_at` (later position wins
/// ties), in their original order.
fn keep_most_recent(records: Vec<ChatHistoryRecord>, keep: usize) -> Vec<ChatHistoryRecord> {
    if records.len() <= keep {
        return records;
    }

    let mut ranked: Vec<(usize, i64)> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (index, record.updated_at))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    let mut kept: Vec<usize> = ranked.into_iter().take(keep).map(|(index, _)| index).collect();
    kept.sort_unstable();

    records
        .into_iter()
        .enumerate()
        .filter(|(index, _)| kept.binary_search(index).is_ok())
        .map(|(_, record)| record)
        .collect()
}

/// `chat-history-<name>.json` with every whitespace run turned into one dash.
fn export_file_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                slug.push('-');
            }
            in_whitespace = true;
        } else {
            slug.extend(c.to_lowercase());
            in_whitespace = false;
        }
    }
    format!("chat-history-{}.json", slug)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, AttachmentSource, Sender, TYPING_PLACEHOLDER};
    use crate::repositories::{InMemoryStorage, JsonFileStorage};
    use bytes::Bytes;

    fn store() -> (ConversationStore, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        (ConversationStore::new(Arc::new(storage.clone())), storage)
    }

    fn image() -> Attachment {
        attachment_codec::materialize("cat.png", "image/png", Bytes::from_static(b"\x89PNG"))
    }

    #[tokio::test]
    async fn test_load_unknown_chat_is_empty() {
        let (store, _) = store();
        assert!(store.load("missing").await.unwrap().is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_messages_and_serializes_attachments() {
        let (store, _) = store();
        let attachment = image();
        let preview = attachment.preview_url.clone().unwrap();
        let user = Message::user("look at this", vec![attachment]);
        let reply = Message::agent("nice cat").with_typing(true);

        store.save("chat-1", &[user.clone(), reply.clone()]).await.unwrap();
        let loaded = store.load("chat-1").await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, user.id);
        assert_eq!(loaded[0].sender, Sender::User);
        assert_eq!(loaded[0].timestamp, user.timestamp);
        assert_eq!(loaded[0].content, "look at this");
        assert!(!loaded[1].is_typing, "reveal flag is never persisted");

        let stored = &loaded[0].attachments[0];
        assert!(matches!(&stored.source, AttachmentSource::Durable(url) if *url == preview));

        // A second pass over reloaded data changes nothing.
        store.save("chat-1", &loaded).await.unwrap();
        let reloaded = store.load("chat-1").await.unwrap();
        assert_eq!(reloaded, loaded);
    }

    #[tokio::test]
    async fn test_placeholder_is_never_persisted() {
        let (store, _) = store();
        let messages = vec![
            Message::user("hi", Vec::new()),
            Message::typing_placeholder(true),
        ];

        store.save("chat-1", &messages).await.unwrap();
        let loaded = store.load("chat-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.iter().all(|m| !m.is_placeholder()));
    }

    #[tokio::test]
    async fn test_agent_text_equal_to_placeholder_is_kept() {
        let (store, _) = store();
        let messages = vec![
            Message::user("hi", Vec::new()),
            Message::agent(TYPING_PLACEHOLDER),
        ];

        store.save("chat-1", &messages).await.unwrap();
        let loaded = store.load("chat-1").await.unwrap();
        assert_eq!(loaded, messages);
    }

    #[tokio::test]
    async fn test_new_records_are_numbered_and_snapshot_settings() {
        let (store, _) = store();
        let settings = ChatSettings {
            webhook_url: "https://hook.example/a".to_string(),
            ..ChatSettings::default()
        };
        store.save_settings(&settings).await.unwrap();

        store.save("a", &[Message::user("1", Vec::new())]).await.unwrap();
        store.save("b", &[Message::user("2", Vec::new())]).await.unwrap();
        store.save("a", &[Message::user("3", Vec::new())]).await.unwrap();

        let history = store.load_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].name, "Chat 1");
        assert_eq!(history[1].name, "Chat 2");
        assert_eq!(history[0].messages[0].content, "3");
        assert_eq!(history[0].settings, settings);
    }

    #[tokio::test]
    async fn test_empty_chat_id_is_not_saved() {
        let (store, storage) = store();
        store.save("", &[Message::user("x", Vec::new())]).await.unwrap();
        assert_eq!(storage.get(HISTORY_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let (store, _) = store();
        store.save("a", &[Message::user("1", Vec::new())]).await.unwrap();
        store.save("b", &[Message::user("2", Vec::new())]).await.unwrap();

        store.clear("a").await.unwrap();
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b"]);
        store.clear("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_eviction_keeps_three_most_recent() {
        let body = "x".repeat(1000);

        // Measure what three chats take, then allow a little less than four.
        let probe = InMemoryStorage::new();
        let probe_store = ConversationStore::new(Arc::new(probe.clone()));
        for i in 0..3 {
            probe_store
                .save(&format!("chat-{}", i), &[Message::user(body.clone(), Vec::new())])
                .await
                .unwrap();
        }
        let quota = probe.used_bytes() + 500;

        let storage = InMemoryStorage::with_quota(quota);
        let store = ConversationStore::new(Arc::new(storage));
        for i in 0..5 {
            store
                .save(&format!("chat-{}", i), &[Message::user(body.clone(), Vec::new())])
                .await
                .unwrap();
        }

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["chat-2", "chat-3", "chat-4"]);
    }

    #[tokio::test]
    async fn test_quota_failure_after_retry_is_surfaced() {
        let storage = InMemoryStorage::with_quota(200);
        let store = ConversationStore::new(Arc::new(storage));

        let result = store
            .save("chat-1", &[Message::user("y".repeat(500), Vec::new())])
            .await;
        assert!(matches!(result, Err(StoreError::QuotaExceeded)));
    }

    #[test]
    fn test_keep_most_recent_preserves_order() {
        let record = |id: &str, updated_at| ChatHistoryRecord {
            id: id.to_string(),
            name: id.to_string(),
            messages: Vec::new(),
            settings: ChatSettings::default(),
            updated_at,
        };
        let records = vec![
            record("a", 50),
            record("b", 10),
            record("c", 40),
            record("d", 20),
            record("e", 40),
        ];

        let kept: Vec<_> = keep_most_recent(records, 3)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(kept, vec!["a", "c", "e"]);
    }

    #[tokio::test]
    async fn test_export_file_name_and_contents() {
        let (store, _) = store();
        store.save("chat-1", &[Message::user("hello", Vec::new())]).await.unwrap();

        let exported = store.export_record("chat-1").await.unwrap();
        assert_eq!(exported.file_name, "chat-history-chat-1.json");

        let value: Value = serde_json::from_slice(&exported.bytes).unwrap();
        assert_eq!(value["id"], "chat-1");
        assert_eq!(value["messages"][0]["content"], "hello");

        assert!(matches!(
            store.export_record("nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_export_file_name_collapses_whitespace() {
        assert_eq!(export_file_name("My  Support\tChat"), "chat-history-my-support-chat.json");
    }

    #[tokio::test]
    async fn test_import_assigns_new_id_and_suffix() {
        let (store, _) = store();
        store.save("chat-1", &[Message::user("hello", Vec::new())]).await.unwrap();
        let exported = store.export_record("chat-1").await.unwrap();
        let raw = String::from_utf8(exported.bytes).unwrap();

        let imported = store.import_record(&raw).await.unwrap();
        assert_ne!(imported.id, "chat-1");
        assert_eq!(imported.name, "Chat 1 (imported)");
        assert_eq!(imported.messages[0].content, "hello");

        let history = store.load_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, imported.id);
    }

    #[tokio::test]
    async fn test_import_without_messages_leaves_store_unchanged() {
        let (store, storage) = store();
        store.save("chat-1", &[Message::user("hello", Vec::new())]).await.unwrap();
        let before = storage.get(HISTORY_KEY).await.unwrap();

        let result = store.import_record(r#"{"id":"x","name":"Broken"}"#).await;
        assert!(matches!(result, Err(StoreError::ImportFormat { .. })));

        let result = store.import_record("not json at all").await;
        assert!(matches!(result, Err(StoreError::ImportFormat { .. })));

        assert_eq!(storage.get(HISTORY_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_import_rejects_attachment_without_url() {
        let (store, _) = store();
        let raw = r#"{
            "id": "x",
            "name": "With file",
            "messages": [{
                "id": "m1", "content": "", "sender": "user", "timestamp": 1,
                "attachments": [{"id": "a1", "name": "f.txt", "type": "text/plain"}]
            }]
        }"#;

        let result = store.import_record(raw).await;
        assert!(matches!(result, Err(StoreError::ImportFormat { .. })));
        assert!(store.load_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_default_and_persist() {
        let (store, _) = store();
        let defaults = store.load_settings().await.unwrap();
        assert_eq!(defaults.chat_name, "Chat with n8n");

        let updated = ChatSettings {
            chat_name: "Support".to_string(),
            typing_animation: false,
            ..defaults
        };
        store.save_settings(&updated).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_login_is_remembered_and_forgotten() {
        let (store, _) = store();
        assert!(store.load_login().await.unwrap().is_none());

        let session = LoginSession {
            name: "Alice".to_string(),
            webhook_url: "https://host/webhook/chat/alice".to_string(),
        };
        store.remember_login(&session).await.unwrap();
        assert_eq!(store.load_login().await.unwrap(), Some(session));

        store.forget_login().await.unwrap();
        assert!(store.load_login().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_survives_file_storage_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let message = Message::user("persisted", Vec::new());
        {
            let storage = JsonFileStorage::new(dir.path(), 1024 * 1024);
            let store = ConversationStore::new(Arc::new(storage));
            store.save("chat-1", &[message.clone()]).await.unwrap();
        }

        let storage = JsonFileStorage::new(dir.path(), 1024 * 1024);
        let store = ConversationStore::new(Arc::new(storage));
        assert_eq!(store.load("chat-1").await.unwrap(), vec![message]);
    }
}
