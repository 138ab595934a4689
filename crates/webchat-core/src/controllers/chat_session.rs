use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{Attachment, ChatHistoryRecord, ChatSettings, Message};
use crate::repositories::{ConversationStore, ExportedRecord, StoreError};
use crate::services::{TransportError, WebhookFile, WebhookRequest, WebhookTransport};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A message is already being sent")]
    Busy,

    #[error("Nothing to send: add a message or an attachment")]
    EmptyMessage,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Changes to the live message sequence, for presentation surfaces.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended {
        chat_id: String,
        message: Message,
    },
    MessageRemoved {
        chat_id: String,
        message_id: String,
    },
    MessageUpdated {
        chat_id: String,
        message: Message,
    },
    SendingChanged {
        chat_id: String,
        is_sending: bool,
    },
    PersistenceFailed {
        chat_id: String,
        error: String,
    },
    /// The whole sequence was replaced (clear, import, chat switch).
    ChatReset {
        chat_id: String,
    },
}

/// Result of one completed user turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub user_message: Message,
    /// The agent reply, or the `Error: ...` message standing in for it.
    pub reply: Message,
    pub transport_error: Option<TransportError>,
    pub persistence_errors: Vec<StoreError>,
}

struct SessionState {
    settings: ChatSettings,
    messages: Vec<Message>,
    is_sending: bool,
}

/// Owner of the live message sequence of the active chat.
///
/// At most one turn is in flight at a time; a second `send_message` while one
/// is pending is rejected with [`SessionError::Busy`].
pub struct ChatSession {
    store: Arc<ConversationStore>,
    transport: Arc<dyn WebhookTransport>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Start a session for `settings.chat_id`, loading its stored messages.
    pub async fn open(
        store: Arc<ConversationStore>,
        transport: Arc<dyn WebhookTransport>,
        settings: ChatSettings,
    ) -> SessionResult<Self> {
        let messages = store.load(&settings.chat_id).await?;
        info!(chat_id = %settings.chat_id, messages = messages.len(), "Opened chat session");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            transport,
            state: Mutex::new(SessionState {
                settings,
                messages,
                is_sending: false,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn settings(&self) -> ChatSettings {
        self.state.lock().settings.clone()
    }

    pub fn chat_id(&self) -> String {
        self.state.lock().settings.chat_id.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.state.lock().is_sending
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Run one full turn: user message, placeholder, webhook call, reply.
    ///
    /// Transport failures do not fail the turn; they become a persisted
    /// `Error: ...` agent message and are reported in the outcome.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> SessionResult<TurnOutcome> {
        let text = content.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut turn = self.begin_turn()?;
        let settings = self.settings();
        let mut persistence_errors = Vec::new();

        let user_message = Message::user(text, attachments);
        self.append(user_message.clone());
        self.persist(&settings.chat_id, &mut persistence_errors).await;

        let placeholder = Message::typing_placeholder(settings.typing_animation);
        turn.placeholder_id = Some(placeholder.id.clone());
        self.append(placeholder);

        let request = WebhookRequest {
            endpoint: settings.webhook_url.clone(),
            chat_id: settings.chat_id.clone(),
            text: (!text.is_empty()).then(|| text.to_string()),
            files: user_message
                .attachments
                .iter()
                .filter_map(WebhookFile::from_attachment)
                .collect(),
        };
        let result = self.transport.send(request).await;

        if let Some(placeholder_id) = turn.placeholder_id.take() {
            self.remove(&placeholder_id);
        }

        let (reply, transport_error) = match result {
            Ok(reply) => (
                Message::agent(reply).with_typing(settings.typing_animation),
                None,
            ),
            Err(e) => {
                warn!(chat_id = %settings.chat_id, error = %e, "Webhook turn failed");
                (Message::agent_error(&e.user_message()), Some(e))
            }
        };
        self.append(reply.clone());
        self.persist(&settings.chat_id, &mut persistence_errors).await;

        Ok(TurnOutcome {
            user_message,
            reply,
            transport_error,
            persistence_errors,
        })
    }

    /// Mark a revealed reply as final. Returns false if no such message is typing.
    pub fn finish_reveal(&self, message_id: &str) -> bool {
        let updated = {
            let mut state = self.state.lock();
            state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id && m.is_typing && !m.is_placeholder())
                .map(|m| {
                    m.is_typing = false;
                    m.clone()
                })
        };

        match updated {
            Some(message) => {
                self.emit(SessionEvent::MessageUpdated {
                    chat_id: self.chat_id(),
                    message,
                });
                true
            }
            None => false,
        }
    }

    /// Remove one message and persist the shortened sequence.
    pub async fn delete_message(&self, message_id: &str) -> SessionResult<bool> {
        if !self.remove(message_id) {
            return Ok(false);
        }

        let chat_id = self.chat_id();
        self.store.save(&chat_id, &self.messages()).await?;
        Ok(true)
    }

    /// Drop all messages of the active chat, in memory and in storage.
    pub async fn clear(&self) -> SessionResult<()> {
        let chat_id = {
            let mut state = self.state.lock();
            if state.is_sending {
                return Err(SessionError::Busy);
            }
            state.messages.clear();
            state.settings.chat_id.clone()
        };

        self.emit(SessionEvent::ChatReset {
            chat_id: chat_id.clone(),
        });
        self.store.clear(&chat_id).await?;
        Ok(())
    }

    /// Save new settings. Switching `chat_id` loads that chat's messages.
    pub async fn update_settings(&self, settings: ChatSettings) -> SessionResult<()> {
        if self.is_sending() {
            return Err(SessionError::Busy);
        }

        self.store.save_settings(&settings).await?;

        let switched = self.chat_id() != settings.chat_id;
        let messages = if switched {
            Some(self.store.load(&settings.chat_id).await?)
        } else {
            None
        };

        let chat_id = settings.chat_id.clone();
        {
            let mut state = self.state.lock();
            state.settings = settings;
            if let Some(messages) = messages {
                state.messages = messages;
            }
        }

        if switched {
            info!(chat_id = %chat_id, "Switched active chat");
            self.emit(SessionEvent::ChatReset { chat_id });
        }
        Ok(())
    }

    /// Import an exported chat and make it the active one.
    pub async fn import_chat(&self, raw: &str) -> SessionResult<ChatHistoryRecord> {
        if self.is_sending() {
            return Err(SessionError::Busy);
        }

        let record = self.store.import_record(raw).await?;
        let settings = ChatSettings {
            chat_id: record.id.clone(),
            chat_name: record.name.clone(),
            ..self.settings()
        };
        self.store.save_settings(&settings).await?;

        {
            let mut state = self.state.lock();
            state.settings = settings;
            state.messages = record.messages.clone();
        }

        self.emit(SessionEvent::ChatReset {
            chat_id: record.id.clone(),
        });
        Ok(record)
    }

    pub async fn export_chat(&self) -> SessionResult<ExportedRecord> {
        Ok(self.store.export_record(&self.chat_id()).await?)
    }

    fn begin_turn(&self) -> SessionResult<TurnGuard<'_>> {
        let chat_id = {
            let mut state = self.state.lock();
            if state.is_sending {
                debug!("Rejecting send while a turn is in flight");
                return Err(SessionError::Busy);
            }
            state.is_sending = true;
            state.settings.chat_id.clone()
        };

        self.emit(SessionEvent::SendingChanged {
            chat_id,
            is_sending: true,
        });
        Ok(TurnGuard {
            session: self,
            placeholder_id: None,
        })
    }

    fn append(&self, message: Message) {
        let chat_id = {
            let mut state = self.state.lock();
            state.messages.push(message.clone());
            state.settings.chat_id.clone()
        };
        self.emit(SessionEvent::MessageAppended { chat_id, message });
    }

    fn remove(&self, message_id: &str) -> bool {
        let (removed, chat_id) = {
            let mut state = self.state.lock();
            let before = state.messages.len();
            state.messages.retain(|m| m.id != message_id);
            (state.messages.len() != before, state.settings.chat_id.clone())
        };

        if removed {
            self.emit(SessionEvent::MessageRemoved {
                chat_id,
                message_id: message_id.to_string(),
            });
        }
        removed
    }

    async fn persist(&self, chat_id: &str, errors: &mut Vec<StoreError>) {
        if let Err(e) = self.store.save(chat_id, &self.messages()).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to persist chat history");
            self.emit(SessionEvent::PersistenceFailed {
                chat_id: chat_id.to_string(),
                error: e.to_string(),
            });
            errors.push(e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Clears the sending flag and any leftover placeholder however a turn ends,
/// including when the caller drops the `send_message` future.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    placeholder_id: Option<String>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if let Some(placeholder_id) = self.placeholder_id.take() {
            debug!(placeholder_id = %placeholder_id, "Turn abandoned, removing placeholder");
            self.session.remove(&placeholder_id);
        }

        let chat_id = {
            let mut state = self.session.state.lock();
            state.is_sending = false;
            state.settings.chat_id.clone()
        };
        self.session.emit(SessionEvent::SendingChanged {
            chat_id,
            is_sending: false,
        });
    }
}
