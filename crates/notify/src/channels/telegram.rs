//! Telegram Bot API notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{post_json, NotifyChannel};
use crate::error::ChannelError;
use crate::message::AlertMessage;

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram notification channel (`sendMessage` with Markdown).
pub struct TelegramChannel {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Create a Telegram channel. It is enabled only when both the bot token
    /// and the chat id are present.
    #[must_use]
    pub fn new(
        bot_token: Option<String>,
        chat_id: Option<String>,
        api_url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        if bot_token.is_some() && chat_id.is_some() {
            debug!("Telegram notifications enabled");
        } else {
            debug!("Telegram notifications disabled (TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set)");
        }

        Self {
            bot_token,
            chat_id,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Render the Markdown message body. Alert-supplied values are escaped.
    fn format_text(message: &AlertMessage) -> String {
        let title = format!(
            "{} *{}*",
            message.severity.emoji(),
            escape_markdown(&message.alert_name)
        );
        format!(
            "{title}\n\n\
             📝 *Summary:* {summary}\n\
             🔧 *Service:* {service}\n\
             📊 *Category:* {category}\n\
             🎯 *Instance:* {instance}\n\
             ⏰ *Time:* {time}\n\n\
             📄 *Description:*\n{description}\n\n\
             🔗 *Status:* {status}",
            summary = escape_markdown(&message.summary),
            service = escape_markdown(&message.service),
            category = escape_markdown(&message.category),
            instance = escape_markdown(&message.instance),
            time = message.timestamp.to_rfc3339(),
            description = escape_markdown(&message.description),
            status = escape_markdown(&message.status),
        )
    }
}

/// Backslash-escape the characters legacy Markdown treats as entity markers.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl NotifyChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Err(ChannelError::NotConfigured(
                "TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID".to_string(),
            ));
        };

        let url = format!("{}/bot{token}/sendMessage", self.api_url);
        let payload = TelegramPayload {
            chat_id,
            text: Self::format_text(message),
            parse_mode: "Markdown",
        };

        debug!(channel = "telegram", alert = %message.alert_name, "Sending notification");

        post_json(&self.client, self.name(), &url, &payload).await
    }
}

#[derive(Debug, Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Severity;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_telegram_requires_token_and_chat() {
        let client = reqwest::Client::new();
        let only_token = TelegramChannel::new(
            Some("token".to_string()),
            None,
            DEFAULT_API_URL,
            client.clone(),
        );
        assert!(!only_token.enabled());

        let both = TelegramChannel::new(
            Some("token".to_string()),
            Some("42".to_string()),
            DEFAULT_API_URL,
            client,
        );
        assert!(both.enabled());
    }

    #[test]
    fn test_telegram_text_contains_fields() {
        let mut message = AlertMessage::new("GPUTemperatureHigh");
        message.severity = Severity::Warning;
        message.service = "gpu".to_string();

        let text = TelegramChannel::format_text(&message);

        assert!(text.starts_with("⚠️ *GPUTemperatureHigh*"));
        assert!(text.contains("*Service:* gpu"));
        assert!(text.contains("*Status:* unknown"));
    }

    #[test]
    fn test_telegram_text_escapes_alert_values() {
        let mut message = AlertMessage::new("Disk_Full");
        message.summary = "disk *almost* full on [db]".to_string();
        message.instance = "node_exporter:9100".to_string();
        message.description = "see `df -h`".to_string();

        let text = TelegramChannel::format_text(&message);

        assert!(text.starts_with("ℹ️ *Disk\\_Full*"));
        assert!(text.contains("*Summary:* disk \\*almost\\* full on \\[db]"));
        assert!(text.contains("*Instance:* node\\_exporter:9100"));
        assert!(text.contains("see \\`df -h\\`"));
    }

    #[test]
    fn test_escape_markdown_leaves_plain_text() {
        assert_eq!(escape_markdown("ollama down (GPU 0)"), "ollama down (GPU 0)");
        assert_eq!(escape_markdown("a_b"), "a\\_b");
    }

    #[tokio::test]
    async fn test_telegram_send_uses_bot_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botsecret-token/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100123",
                "parse_mode": "Markdown"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = TelegramChannel::new(
            Some("secret-token".to_string()),
            Some("-100123".to_string()),
            format!("{}/", server.uri()),
            reqwest::Client::new(),
        );

        channel.send(&AlertMessage::new("Test")).await.unwrap();
    }
}
