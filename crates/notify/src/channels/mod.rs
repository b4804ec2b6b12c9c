//! Notification channel implementations.

pub mod discord;
pub mod slack;
pub mod telegram;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::AlertMessage;

/// Trait for notification channels (Discord, Slack, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send one alert message to this channel.
    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError>;
}

/// POST a JSON payload and map the response status onto a [`ChannelError`].
pub(crate) async fn post_json<T: Serialize + Sync>(
    client: &reqwest::Client,
    channel: &'static str,
    url: &str,
    payload: &T,
) -> Result<(), ChannelError> {
    let response = client.post(url).json(payload).send().await?;
    let status = response.status();

    if status.is_success() {
        debug!(channel, "Notification sent successfully");
        return Ok(());
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        warn!(channel, retry_after_secs = retry_after, "Rate limited by channel");

        return Err(ChannelError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    warn!(channel, status = %status, body = %body, "Webhook request failed");

    Err(ChannelError::Rejected {
        channel,
        status: status.as_u16(),
        body,
    })
}
