//! Discord webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{post_json, NotifyChannel};
use crate::error::ChannelError;
use crate::message::AlertMessage;

/// Bot name shown on posted messages.
const USERNAME: &str = "Alert Receiver";

/// Discord webhook notification channel.
pub struct DiscordChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl DiscordChannel {
    /// Create a Discord channel; `None` leaves it disabled.
    #[must_use]
    pub fn new(webhook_url: Option<String>, client: reqwest::Client) -> Self {
        if webhook_url.is_some() {
            debug!("Discord notifications enabled");
        } else {
            debug!("Discord notifications disabled (DISCORD_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client,
        }
    }

    /// Format a message as a Discord webhook payload.
    fn format_payload(message: &AlertMessage) -> DiscordPayload {
        let mut fields = vec![
            DiscordField::inline("🚦 Severity", message.severity.style().label),
            DiscordField::inline("🔧 Service", &message.service),
            DiscordField::inline("📊 Category", &message.category),
            DiscordField::inline("🎯 Instance", &message.instance),
            DiscordField::block("📝 Description", &message.description),
        ];
        if let Some(group) = message.group_summary() {
            fields.push(DiscordField::block("🏷️ Group", group));
        }

        let embed = DiscordEmbed {
            title: message.title(),
            description: message.summary.clone(),
            color: message.severity.color(),
            timestamp: message.timestamp.to_rfc3339(),
            footer: DiscordFooter {
                text: format!("Alert Receiver • Status: {}", message.status),
            },
            fields,
        };

        DiscordPayload {
            username: USERNAME,
            embeds: vec![embed],
        }
    }
}

#[async_trait]
impl NotifyChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("DISCORD_WEBHOOK_URL".to_string()))?;

        let payload = Self::format_payload(message);

        debug!(channel = "discord", alert = %message.alert_name, "Sending notification");

        post_json(&self.client, self.name(), webhook_url, &payload).await
    }
}

// =============================================================================
// Discord API types
// =============================================================================

#[derive(Debug, Serialize)]
struct DiscordPayload {
    username: &'static str,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    footer: DiscordFooter,
    fields: Vec<DiscordField>,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

impl DiscordField {
    fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }

    fn block(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }
}
