//! Render-only alert message and the shared severity presentation table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Severity levels carried by alert labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate action required
    Critical,
    /// Something needs attention
    Warning,
    /// Informational
    Info,
    /// Diagnostic noise
    Debug,
}

/// How a severity is presented on every channel.
///
/// All renderers read from this table so Discord, Slack and Telegram
/// never disagree on what "critical" looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityStyle {
    /// Display name
    pub label: &'static str,
    /// Marker prefixed to titles
    pub emoji: &'static str,
    /// RGB color for embeds
    pub color: u32,
    /// Slack attachment color keyword (or hex)
    pub slack_color: &'static str,
}

const CRITICAL_STYLE: SeverityStyle = SeverityStyle {
    label: "Critical",
    emoji: "🚨",
    color: 0x00e7_4c3c, // Red
    slack_color: "danger",
};

const WARNING_STYLE: SeverityStyle = SeverityStyle {
    label: "Warning",
    emoji: "⚠️",
    color: 0x00f3_9c12, // Orange
    slack_color: "warning",
};

const INFO_STYLE: SeverityStyle = SeverityStyle {
    label: "Info",
    emoji: "ℹ️",
    color: 0x0034_98db, // Blue
    slack_color: "good",
};

const DEBUG_STYLE: SeverityStyle = SeverityStyle {
    label: "Debug",
    emoji: "🔍",
    color: 0x0095_a5a6, // Grey
    slack_color: "#95a5a6",
};

impl Severity {
    /// All known severities, most severe first.
    pub const ALL: [Self; 4] = [Self::Critical, Self::Warning, Self::Info, Self::Debug];

    /// Presentation for this severity.
    #[must_use]
    pub const fn style(self) -> &'static SeverityStyle {
        match self {
            Self::Critical => &CRITICAL_STYLE,
            Self::Warning => &WARNING_STYLE,
            Self::Info => &INFO_STYLE,
            Self::Debug => &DEBUG_STYLE,
        }
    }

    /// Get the embed color for this severity.
    #[must_use]
    pub const fn color(self) -> u32 {
        self.style().color
    }

    /// Get emoji for this severity.
    #[must_use]
    pub const fn emoji(self) -> &'static str {
        self.style().emoji
    }

    /// Lowercase wire name (`critical`, `warning`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a severity label is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("severity must be one of critical, warning, info, debug; got `{0}`")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str() == normalized)
            .ok_or(UnknownSeverity(normalized))
    }
}

/// Channel-independent view of one alert, ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    /// `alertname` label
    pub alert_name: String,
    /// Severity (info when the alert carried none)
    pub severity: Severity,
    /// `service` label
    pub service: String,
    /// `category` label
    pub category: String,
    /// Alert status (`firing`, `resolved`, ...)
    pub status: String,
    /// `summary` annotation
    pub summary: String,
    /// `description` annotation
    pub description: String,
    /// `instance` label
    pub instance: String,
    /// When the message was rendered
    pub timestamp: DateTime<Utc>,
    /// Labels shared by the whole alert group
    pub group_labels: Map<String, Value>,
}

impl AlertMessage {
    /// Start a message with the default placeholders for every optional part.
    #[must_use]
    pub fn new(alert_name: impl Into<String>) -> Self {
        Self {
            alert_name: alert_name.into(),
            severity: Severity::Info,
            service: "unknown".to_string(),
            category: "general".to_string(),
            status: "unknown".to_string(),
            summary: "No summary available".to_string(),
            description: "No description available".to_string(),
            instance: "unknown".to_string(),
            timestamp: Utc::now(),
            group_labels: Map::new(),
        }
    }

    /// Title shared by all channels: severity marker plus alert name.
    #[must_use]
    pub fn title(&self) -> String {
        format!("{} {}", self.severity.emoji(), self.alert_name)
    }

    /// Group labels as `key=value` pairs, `None` when the group has none.
    #[must_use]
    pub fn group_summary(&self) -> Option<String> {
        if self.group_labels.is_empty() {
            return None;
        }

        let pairs: Vec<String> = self
            .group_labels
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect();
        Some(pairs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_summary() {
        let mut message = AlertMessage::new("OllamaDown");
        assert_eq!(message.group_summary(), None);

        message.group_labels.insert("job".to_string(), Value::from("ollama"));
        message.group_labels.insert("gpu".to_string(), Value::from(0));
        assert_eq!(message.group_summary().as_deref(), Some("gpu=0, job=ollama"));
    }

    #[test]
    fn test_severity_parse_is_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!(" Warning ".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("debug".parse::<Severity>(), Ok(Severity::Debug));
    }

    #[test]
    fn test_severity_parse_rejects_unknown() {
        let err = "urgent".parse::<Severity>().unwrap_err();
        assert_eq!(err, UnknownSeverity("urgent".to_string()));
    }

    #[test]
    fn test_severity_styles_are_distinct() {
        let colors: std::collections::HashSet<u32> =
            Severity::ALL.iter().map(|s| s.color()).collect();
        let emojis: std::collections::HashSet<&str> =
            Severity::ALL.iter().map(|s| s.emoji()).collect();
        assert_eq!(colors.len(), Severity::ALL.len());
        assert_eq!(emojis.len(), Severity::ALL.len());
    }

    #[test]
    fn test_message_defaults() {
        let message = AlertMessage::new("DiskFull");
        assert_eq!(message.severity, Severity::Info);
        assert_eq!(message.service, "unknown");
        assert_eq!(message.category, "general");
        assert_eq!(message.summary, "No summary available");
        assert_eq!(message.title(), "ℹ️ DiskFull");
    }
}
