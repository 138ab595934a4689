use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use webchat_core::repositories::DEFAULT_QUOTA_BYTES;
use webchat_core::services::webhook_service::DEFAULT_TIMEOUT_SECS;

#[derive(Debug, Parser)]
#[command(name = "webchat")]
#[command(about = "Terminal chat client for a webhook-backed agent", long_about = None)]
pub struct AppConfig {
    /// Directory holding chat history, settings and the log file
    #[arg(long, env = "WEBCHAT_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Upper bound on stored data, in bytes
    #[arg(long, env = "WEBCHAT_QUOTA_BYTES", default_value_t = DEFAULT_QUOTA_BYTES)]
    pub quota_bytes: u64,

    /// Webhook round-trip timeout, in seconds
    #[arg(long, env = "WEBCHAT_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Log filter directive (overrides RUST_LOG), e.g. `debug` or `webchat_core=trace`
    #[arg(long, env = "WEBCHAT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Use this webhook instead of the stored setting
    #[arg(long, env = "WEBCHAT_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Base URL of the login server used by `/login`
    #[arg(long, env = "WEBCHAT_LOGIN_URL")]
    pub login_url: Option<String>,

    /// Command that writes recorded audio to stdout
    #[arg(long, env = "WEBCHAT_AUDIO_COMMAND", default_value = "arecord -q -f cd -t wav -")]
    pub audio_command: String,

    /// MIME type of what the audio command produces
    #[arg(long, env = "WEBCHAT_AUDIO_MIME", default_value = "audio/wav")]
    pub audio_mime: String,
}

impl AppConfig {
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .context("Could not determine data directory")?
                .join("webchat")),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::try_parse_from(["webchat"]).unwrap();
        assert_eq!(config.quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.webhook_url.is_none());
        assert_eq!(config.audio_mime, "audio/wav");
    }

    #[test]
    fn test_explicit_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::try_parse_from([
            "webchat",
            "--storage-dir",
            dir.path().to_str().unwrap(),
            "--timeout-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(config.storage_dir().unwrap(), dir.path());
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }
}
