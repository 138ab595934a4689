use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use anyhow::{Context, Result};
use tracing::{
    Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE: &str = "webchat.log";
const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A warning or error raised anywhere in the process, shown to the user.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.level {
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        write!(f, "{}: {}", label, self.message)?;
        if let Some(error) = self.fields.get("error") {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }
}

/// Forwards WARN and ERROR events to the REPL so failures are never only in the log.
pub struct NoticeLayer {
    sender: SyncSender<Notice>,
}

impl NoticeLayer {
    pub fn new() -> (Self, Receiver<Notice>) {
        let (tx, rx) = sync_channel(NOTICE_CAPACITY);
        (Self { sender: tx }, rx)
    }
}

impl<S> Layer<S> for NoticeLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => NoticeLevel::Error,
            Level::WARN => NoticeLevel::Warning,
            _ => return,
        };

        let mut visitor = FieldVisitor {
            message: None,
            fields: BTreeMap::new(),
        };
        event.record(&mut visitor);

        // Dropped when the REPL falls behind
        let _ = self.sender.try_send(Notice {
            level,
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        });
    }
}

/// Log to `<storage_dir>/webchat.log` and collect notices for the terminal.
pub fn init(log_level: Option<&str>, storage_dir: &Path) -> Result<Receiver<Notice>> {
    std::fs::create_dir_all(storage_dir)
        .with_context(|| format!("Failed to create {}", storage_dir.display()))?;
    let log_path = storage_dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let filter = match log_level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("Invalid log level '{}'", directive))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (notices, rx) = NoticeLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .with(notices)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_collector() -> (impl Subscriber, Receiver<Notice>) {
        let (layer, rx) = NoticeLayer::new();
        (tracing_subscriber::registry().with(layer), rx)
    }

    #[test]
    fn test_captures_warnings_with_error_field() {
        let (subscriber, rx) = setup_collector();
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(error = %"quota exceeded", chat_id = "abc", "Failed to persist chat history");
        });

        let notice = rx.try_recv().expect("should receive a notice");
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(notice.fields.get("chat_id").map(String::as_str), Some("abc"));
        assert_eq!(
            notice.to_string(),
            "warning: Failed to persist chat history (quota exceeded)"
        );
    }

    #[test]
    fn test_captures_errors() {
        let (subscriber, rx) = setup_collector();
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("something failed");
        });

        let notice = rx.try_recv().expect("should receive a notice");
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.to_string(), "error: something failed");
    }

    #[test]
    fn test_ignores_info_events() {
        let (subscriber, rx) = setup_collector();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("just info");
            tracing::debug!("and debug");
        });

        assert!(rx.try_recv().is_err());
    }
}
