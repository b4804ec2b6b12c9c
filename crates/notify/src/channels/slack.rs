//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{post_json, NotifyChannel};
use crate::error::ChannelError;
use crate::message::AlertMessage;

/// Bot name shown on posted messages.
const USERNAME: &str = "Alert Receiver";

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a Slack channel; `None` leaves it disabled.
    #[must_use]
    pub fn new(webhook_url: Option<String>, client: reqwest::Client) -> Self {
        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client,
        }
    }

    /// Format a message as a Slack webhook payload.
    fn format_payload(message: &AlertMessage) -> SlackPayload {
        let style = message.severity.style();
        let mut fields = vec![
            SlackField::short("Service", &message.service),
            SlackField::short("Instance", &message.instance),
            SlackField::long("Description", &message.description),
        ];
        if let Some(group) = message.group_summary() {
            fields.push(SlackField::long("Group", group));
        }

        let attachment = SlackAttachment {
            color: style.slack_color,
            title: message.title(),
            text: message.summary.clone(),
            fields,
            footer: format!("{USERNAME} • {}", style.label),
            ts: message.timestamp.timestamp(),
        };

        SlackPayload {
            username: USERNAME,
            attachments: vec![attachment],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("SLACK_WEBHOOK_URL".to_string()))?;

        let payload = Self::format_payload(message);

        debug!(channel = "slack", alert = %message.alert_name, "Sending notification");

        post_json(&self.client, self.name(), webhook_url, &payload).await
    }
}

// =============================================================================
// Slack API types (legacy attachments)
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    username: &'static str,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    /// Color strip (`danger`, `warning`, `good` or hex)
    color: &'static str,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    footer: String,
    /// Epoch seconds
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

impl SlackField {
    fn short(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            short: true,
        }
    }

    fn long(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            short: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Severity;

    #[test]
    fn test_slack_channel_disabled_without_url() {
        let channel = SlackChannel::new(None, reqwest::Client::new());
        assert!(!channel.enabled());
    }

    #[test]
    fn test_slack_payload_uses_severity_table() {
        let mut message = AlertMessage::new("HighLatency");
        message.severity = Severity::Warning;

        let payload = SlackChannel::format_payload(&message);
        let attachment = &payload.attachments[0];

        assert_eq!(attachment.color, "warning");
        assert_eq!(attachment.title, "⚠️ HighLatency");
        assert_eq!(attachment.footer, "Alert Receiver • Warning");
        assert_eq!(attachment.fields.len(), 3);
    }

    #[test]
    fn test_slack_payload_lists_group_labels() {
        let mut message = AlertMessage::new("HighLatency");
        message
            .group_labels
            .insert("job".to_string(), serde_json::Value::from("api"));

        let payload = SlackChannel::format_payload(&message);
        let fields = &payload.attachments[0].fields;

        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].title, "Group");
        assert_eq!(fields[3].value, "job=api");
        assert!(!fields[3].short);
    }

    #[test]
    fn test_slack_payload_serializes_as_attachment() {
        let message = AlertMessage::new("DiskFull");
        let json = serde_json::to_value(SlackChannel::format_payload(&message)).unwrap();

        assert_eq!(json["attachments"][0]["color"], "good");
        assert_eq!(json["attachments"][0]["fields"][0]["title"], "Service");
        assert_eq!(json["username"], USERNAME);
    }
}
