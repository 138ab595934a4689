use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};

use super::response_extractor::interpret_body;
use crate::models::Attachment;

/// Default bound on one webhook round trip.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Failure kinds of a webhook turn. The display text is what ends up in the
/// chat-visible error message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Webhook URL is not set")]
    Configuration,

    #[error("Request timed out. The webhook server might be unavailable.")]
    Timeout,

    #[error(
        "Network error: Cannot connect to the webhook. Please check your internet connection and webhook URL."
    )]
    Network { detail: String },

    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    #[error("Invalid response format. The webhook did not return valid JSON data.")]
    Format,

    #[error("Failed to send message: {0}")]
    Request(String),
}

impl TransportError {
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Whether the user may reasonably try the same turn again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network { .. })
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_builder() {
            Self::Request(error.to_string())
        } else if error.is_decode() {
            Self::Format
        } else {
            Self::Network {
                detail: error.to_string(),
            }
        }
    }
}

/// One binary part of a webhook turn.
#[derive(Debug, Clone)]
pub struct WebhookFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl WebhookFile {
    /// Raw file for a same-session attachment. Reloaded attachments no longer
    /// hold their original file and are not re-sent.
    pub fn from_attachment(attachment: &Attachment) -> Option<Self> {
        attachment.live_data().map(|data| Self {
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            data: data.clone(),
        })
    }
}

/// One user turn addressed to the configured endpoint.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub endpoint: String,
    pub chat_id: String,
    pub text: Option<String>,
    pub files: Vec<WebhookFile>,
}

impl WebhookRequest {
    fn into_form(self) -> Result<Form, TransportError> {
        let mut form = Form::new().text("chatId", self.chat_id);

        if let Some(text) = self.text.filter(|t| !t.is_empty()) {
            form = form.text("message", text);
        }

        for file in self.files {
            let mime_type = if file.mime_type.is_empty() {
                FALLBACK_MIME.to_string()
            } else {
                file.mime_type
            };
            let part = Part::bytes(file.data.to_vec())
                .file_name(file.name)
                .mime_str(&mime_type)
                .map_err(|e| TransportError::Request(e.to_string()))?;
            form = form.part("files", part);
        }

        Ok(form)
    }
}

/// Delivery of one turn to the external endpoint, normalised to reply text.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: WebhookRequest) -> Result<String, TransportError>;
}

/// `multipart/form-data` webhook client with a bounded round trip.
#[derive(Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_client(reqwest::Client::new(), timeout)
    }

    /// Use a preconfigured HTTP client (proxy, user agent, TLS settings).
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn exchange(&self, endpoint: &str, form: Form) -> Result<String, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Webhook returned error status");
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(TransportError::from_reqwest)?;
        debug!(status = status.as_u16(), content_type = ?content_type, bytes = body.len(), "Received webhook response");

        interpret_body(status.as_u16(), content_type.as_deref(), &body)
    }
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for WebhookClient {
    async fn send(&self, request: WebhookRequest) -> Result<String, TransportError> {
        let endpoint = request.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(TransportError::Configuration);
        }

        info!(
            chat_id = %request.chat_id,
            files = request.files.len(),
            has_text = request.text.as_ref().is_some_and(|t| !t.is_empty()),
            "Sending turn to webhook"
        );

        let form = request.into_form()?;

        // Dropping the exchange future on expiry aborts the in-flight request.
        match tokio::time::timeout(self.timeout, self.exchange(&endpoint, form)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs_f64(), "Webhook request timed out");
                Err(TransportError::Timeout)
            }
        }
    }
}
