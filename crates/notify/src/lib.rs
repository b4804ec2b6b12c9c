//! Alert notification fan-out.
//!
//! This crate renders alerts received by the alert receiver into
//! channel-specific chat messages and delivers them to Discord, Slack and
//! Telegram.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{AlertMessage, Notifier, NotifyConfig};
//!
//! # async fn run() {
//! let notifier = Notifier::from_config(&NotifyConfig::from_env());
//!
//! let report = notifier.fan_out(&AlertMessage::new("OllamaDown")).await;
//! for failure in &report.failed {
//!     eprintln!("{}: {}", failure.channel, failure.error);
//! }
//! # }
//! ```
//!
//! # Configuration
//!
//! - `DISCORD_WEBHOOK_URL`: Discord webhook URL (enables Discord channel)
//! - `SLACK_WEBHOOK_URL`: Slack webhook URL (enables Slack channel)
//! - `TELEGRAM_BOT_TOKEN` + `TELEGRAM_CHAT_ID`: enable Telegram
//! - `TELEGRAM_API_URL`: Bot API base URL override
//! - `NOTIFICATION_TIMEOUT`: per-request timeout in seconds (default 10)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`Severity::style`] is the one presentation table every channel reads
//! - [`Notifier`] delivers a message to every enabled channel independently

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod message;

pub use channels::discord::DiscordChannel;
pub use channels::slack::SlackChannel;
pub use channels::telegram::TelegramChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use message::{AlertMessage, Severity, SeverityStyle, UnknownSeverity};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Default per-request timeout for outbound webhook calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel settings, usually read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Discord webhook URL.
    pub discord_webhook_url: Option<String>,
    /// Slack incoming webhook URL.
    pub slack_webhook_url: Option<String>,
    /// Telegram bot token.
    pub telegram_bot_token: Option<String>,
    /// Telegram chat id.
    pub telegram_chat_id: Option<String>,
    /// Telegram Bot API base URL.
    pub telegram_api_url: String,
    /// Timeout applied to every outbound request.
    pub timeout: Duration,
    /// Whether all notifications are disabled.
    pub disabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            slack_webhook_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_url: channels::telegram::DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            disabled: false,
        }
    }
}

impl NotifyConfig {
    /// Read channel settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read channel settings through an arbitrary lookup function.
    ///
    /// Empty values count as unset. An unparseable `NOTIFICATION_TIMEOUT`
    /// falls back to the default with a warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = match get("NOTIFICATION_TIMEOUT") {
            Some(raw) => raw.trim().parse().map(Duration::from_secs).unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid NOTIFICATION_TIMEOUT, using default");
                DEFAULT_TIMEOUT
            }),
            None => DEFAULT_TIMEOUT,
        };

        Self {
            discord_webhook_url: get("DISCORD_WEBHOOK_URL"),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| channels::telegram::DEFAULT_API_URL.to_string()),
            timeout,
            disabled: get(ENV_NOTIFY_DISABLED)
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        }
    }
}

/// One channel that failed to deliver.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelFailure {
    /// Channel name
    pub channel: &'static str,
    /// Rendered error
    pub error: String,
}

/// Outcome of delivering one message to every channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FanOutReport {
    /// Channels that accepted the message
    pub delivered: Vec<&'static str>,
    /// Channels that failed, with their errors
    pub failed: Vec<ChannelFailure>,
}

impl FanOutReport {
    /// `true` when no channel failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and delivers each
/// message to all enabled channels. A failing channel never prevents
/// delivery to the others.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Build the enabled channels from configuration.
    ///
    /// All channels share one HTTP client carrying the configured timeout.
    #[must_use]
    pub fn from_config(config: &NotifyConfig) -> Self {
        if config.disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let client = match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to build HTTP client, notifications disabled");
                return Self::disabled();
            }
        };

        let candidates: Vec<Arc<dyn NotifyChannel>> = vec![
            Arc::new(DiscordChannel::new(
                config.discord_webhook_url.clone(),
                client.clone(),
            )),
            Arc::new(SlackChannel::new(
                config.slack_webhook_url.clone(),
                client.clone(),
            )),
            Arc::new(TelegramChannel::new(
                config.telegram_bot_token.clone(),
                config.telegram_chat_id.clone(),
                config.telegram_api_url.clone(),
                client,
            )),
        ];

        let channels: Vec<_> = candidates.into_iter().filter(|c| c.enabled()).collect();

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                channels = ?channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Deliver a message to every enabled channel and wait for all of them.
    ///
    /// Channels run concurrently; each outcome is logged and recorded
    /// independently in the returned report.
    pub async fn fan_out(&self, message: &AlertMessage) -> FanOutReport {
        if !self.has_channels() {
            debug!("No channels configured, skipping notification");
            return FanOutReport::default();
        }

        let sends = self
            .channels
            .iter()
            .filter(|channel| channel.enabled())
            .map(|channel| async move { (channel.name(), channel.send(message).await) });

        let mut report = FanOutReport::default();
        for (channel, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    info!(channel, alert = %message.alert_name, "Notification sent");
                    report.delivered.push(channel);
                }
                Err(e) => {
                    error!(
                        channel,
                        alert = %message.alert_name,
                        error = %e,
                        "Failed to send notification"
                    );
                    report.failed.push(ChannelFailure {
                        channel,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
