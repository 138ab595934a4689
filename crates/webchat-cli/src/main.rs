use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use webchat_core::repositories::{ConversationStore, JsonFileStorage};
use webchat_core::services::{AudioRecorder, CommandAudioDevice, LoginClient, WebhookClient};
use webchat_core::{ChatSession, ChatSettings};

mod config;
mod logging;
mod render;
mod repl;

use config::AppConfig;
use repl::Repl;

/// Settings for this run: stored values, then a remembered login, then
/// command-line overrides.
async fn resolve_settings(store: &ConversationStore, config: &AppConfig) -> Result<ChatSettings> {
    let mut settings = store
        .load_settings()
        .await
        .context("Failed to load settings")?;

    if !settings.has_webhook()
        && let Some(login) = store.load_login().await.context("Failed to load login")?
    {
        info!(user = %login.name, "Using webhook of remembered login");
        settings.webhook_url = login.webhook_url;
    }

    if let Some(url) = &config.webhook_url {
        settings.webhook_url = url.clone();
    }

    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::parse();
    let storage_dir = config.storage_dir()?;
    let notices = logging::init(config.log_level.as_deref(), &storage_dir)?;
    info!(storage = %storage_dir.display(), "Starting webchat");

    let storage = JsonFileStorage::new(&storage_dir, config.quota_bytes);
    let store = Arc::new(ConversationStore::new(Arc::new(storage)));
    let settings = resolve_settings(&store, &config).await?;

    let transport = Arc::new(WebhookClient::with_timeout(config.timeout()));
    let session = ChatSession::open(store, transport, settings)
        .await
        .context("Failed to open chat session")?;

    let device = CommandAudioDevice::from_command_line(&config.audio_command, &config.audio_mime)
        .context("Audio command is empty")?;
    let recorder = AudioRecorder::new(Arc::new(device));
    let login = LoginClient::with_timeout(config.timeout());

    Repl::new(
        Arc::new(session),
        recorder,
        login,
        config.login_url.clone(),
        notices,
    )
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use webchat_core::repositories::InMemoryStorage;
    use webchat_core::services::LoginSession;

    fn config(args: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(std::iter::once("webchat").chain(args.iter().copied())).unwrap()
    }

    #[tokio::test]
    async fn test_remembered_login_supplies_missing_webhook() {
        let store = ConversationStore::new(Arc::new(InMemoryStorage::new()));
        store
            .remember_login(&LoginSession {
                name: "Alice".to_string(),
                webhook_url: "https://host/webhook/chat/alice".to_string(),
            })
            .await
            .unwrap();

        let settings = resolve_settings(&store, &config(&[])).await.unwrap();
        assert_eq!(settings.webhook_url, "https://host/webhook/chat/alice");
    }

    #[tokio::test]
    async fn test_command_line_webhook_wins() {
        let store = ConversationStore::new(Arc::new(InMemoryStorage::new()));
        let stored = ChatSettings {
            webhook_url: "https://stored.example/hook".to_string(),
            ..ChatSettings::default()
        };
        store.save_settings(&stored).await.unwrap();

        let settings = resolve_settings(&store, &config(&["--webhook-url", "https://cli.example/hook"]))
            .await
            .unwrap();
        assert_eq!(settings.webhook_url, "https://cli.example/hook");
        assert_eq!(settings.chat_id, stored.chat_id);
    }
}
