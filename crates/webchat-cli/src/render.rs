use chrono::{Local, TimeZone};
use webchat_core::models::{Attachment, ChatSettings, ChatSummary, Message, Sender};
use webchat_core::services::attachment_codec;

pub fn format_time(timestamp_millis: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_millis)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "You",
        Sender::Agent => "Agent",
    }
}

pub fn attachment_line(attachment: &Attachment) -> String {
    let kind = if attachment_codec::is_image(attachment) {
        "image"
    } else if attachment_codec::is_audio(attachment) {
        "voice"
    } else {
        "file"
    };
    match attachment.size {
        Some(size) => format!(
            "[{}] {} ({})",
            kind,
            attachment.name,
            attachment_codec::format_size(size)
        ),
        None => format!("[{}] {}", kind, attachment.name),
    }
}

/// Message header line, e.g. `3. [14:02] Agent:`.
pub fn message_header(index: usize, message: &Message) -> String {
    format!(
        "{}. [{}] {}:",
        index,
        format_time(message.timestamp),
        sender_label(message.sender)
    )
}

pub fn message(index: usize, message: &Message) -> String {
    let mut out = message_header(index, message);
    if !message.content.is_empty() {
        out.push(' ');
        out.push_str(&message.content);
    }
    for attachment in &message.attachments {
        out.push_str("\n     ");
        out.push_str(&attachment_line(attachment));
    }
    out
}

pub fn chat_summary(summary: &ChatSummary, active_chat_id: &str) -> String {
    let marker = if summary.id == active_chat_id { "*" } else { " " };
    format!(
        "{} {} ({} messages) id={}",
        marker, summary.name, summary.message_count, summary.id
    )
}

pub fn settings(settings: &ChatSettings) -> String {
    let webhook = if settings.has_webhook() {
        settings.webhook_url.as_str()
    } else {
        "(not set)"
    };
    format!(
        "Chat name:        {}\nChat id:          {}\nWebhook URL:      {}\nTyping animation: {}",
        settings.chat_name,
        settings.chat_id,
        webhook,
        if settings.typing_animation { "on" } else { "off" }
    )
}
