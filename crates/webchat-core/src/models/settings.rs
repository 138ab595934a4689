use serde::{Deserialize, Serialize};

use super::generate_id;

pub const DEFAULT_CHAT_NAME: &str = "Chat with n8n";

fn default_typing_animation() -> bool {
    true
}

fn default_chat_name() -> String {
    DEFAULT_CHAT_NAME.to_string()
}

/// User-facing chat configuration, treated as an immutable snapshot per turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_chat_name")]
    pub chat_name: String,
    #[serde(default = "generate_id")]
    pub chat_id: String,
    #[serde(default = "default_typing_animation")]
    pub typing_animation: bool,
}

impl ChatSettings {
    pub fn has_webhook(&self) -> bool {
        !self.webhook_url.trim().is_empty()
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            chat_name: default_chat_name(),
            chat_id: generate_id(),
            typing_animation: default_typing_animation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ChatSettings::default();
        assert!(settings.webhook_url.is_empty());
        assert!(settings.typing_animation);
        assert_eq!(settings.chat_name, "Chat with n8n");
        assert!(!settings.chat_id.is_empty());
        assert!(!settings.has_webhook());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: ChatSettings =
            serde_json::from_str(r#"{"webhookUrl":"https://hook.example/x"}"#).unwrap();
        assert!(settings.has_webhook());
        assert!(settings.typing_animation);
        assert!(!settings.chat_id.is_empty());
    }
}
