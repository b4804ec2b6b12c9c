//! Alert routing: which endpoint an alert arrived on and what to do with it.

use std::fmt;

use notify::Severity;
use serde::Serialize;

use crate::models::Alert;

/// Alert type derived from the receiving endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertRoute {
    /// `POST /webhook/critical`
    Critical,
    /// `POST /webhook/warning`
    Warning,
    /// `POST /webhook/gpu`
    Gpu,
    /// `POST /webhook/ai`
    Ai,
    /// `POST /webhook/database`
    Database,
    /// `POST /webhook`
    General,
}

impl AlertRoute {
    /// Every route, in registration order.
    pub const ALL: [Self; 6] = [
        Self::General,
        Self::Critical,
        Self::Warning,
        Self::Gpu,
        Self::Ai,
        Self::Database,
    ];

    /// Lowercase type name, also used as the archive file prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Gpu => "gpu",
            Self::Ai => "ai",
            Self::Database => "database",
            Self::General => "general",
        }
    }

    /// HTTP path this route is served on.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Critical => "/webhook/critical",
            Self::Warning => "/webhook/warning",
            Self::Gpu => "/webhook/gpu",
            Self::Ai => "/webhook/ai",
            Self::Database => "/webhook/database",
            Self::General => "/webhook",
        }
    }

    /// Human-readable kind used in response messages.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Warning => "Warning",
            Self::Gpu => "GPU",
            Self::Ai => "AI",
            Self::Database => "Database",
            Self::General => "General",
        }
    }

    /// Message returned in a successful webhook response.
    #[must_use]
    pub fn success_message(self) -> String {
        format!("{} alerts processed", self.display_name())
    }
}

impl fmt::Display for AlertRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect requested for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run the recovery script mapped to `service`
    RunRecovery {
        /// `service` label, or `unknown` when absent
        service: String,
    },
    /// Log GPU identification details
    LogGpuDetail {
        /// `gpu_id` label
        gpu_id: Option<String>,
        /// `component` label
        component: Option<String>,
    },
    /// Elevated warning for GPU temperature alerts
    GpuTemperatureWarning,
    /// Write the alert to the archive
    Persist,
    /// Fan out to the configured notification channels
    Notify,
}

/// Decide the actions for one alert.
///
/// Rules are independent; one alert can trigger recovery, GPU logging and
/// notification all at once. `Persist` is always emitted.
#[must_use]
pub fn route(alert: &Alert, hint: AlertRoute, notify_enabled: bool) -> Vec<Action> {
    let labels = &alert.labels;
    let mut actions = Vec::new();

    if hint == AlertRoute::Critical || labels.severity == Some(Severity::Critical) {
        actions.push(Action::RunRecovery {
            service: labels
                .service
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        });
    }

    if hint == AlertRoute::Gpu || labels.service.as_deref() == Some("gpu") {
        actions.push(Action::LogGpuDetail {
            gpu_id: labels.gpu_id.clone(),
            component: labels.component.clone(),
        });
        if labels.alertname.to_lowercase().contains("temperature") {
            actions.push(Action::GpuTemperatureWarning);
        }
    }

    actions.push(Action::Persist);

    if notify_enabled {
        actions.push(Action::Notify);
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertPayload;
    use serde_json::json;

    fn alert(labels: serde_json::Value) -> Alert {
        let body = json!({ "alerts": [{ "labels": labels, "status": "firing" }] });
        AlertPayload::from_value(&body)
            .unwrap()
            .alerts
            .remove(0)
    }

    #[test]
    fn test_critical_by_hint() {
        let actions = route(
            &alert(json!({ "alertname": "OllamaDown", "service": "ollama" })),
            AlertRoute::Critical,
            false,
        );

        assert_eq!(
            actions,
            vec![
                Action::RunRecovery {
                    service: "ollama".to_string()
                },
                Action::Persist,
            ]
        );
    }

    #[test]
    fn test_critical_by_severity_without_service() {
        let actions = route(
            &alert(json!({ "alertname": "Down", "severity": "Critical" })),
            AlertRoute::General,
            true,
        );

        assert_eq!(
            actions,
            vec![
                Action::RunRecovery {
                    service: "unknown".to_string()
                },
                Action::Persist,
                Action::Notify,
            ]
        );
    }

    #[test]
    fn test_gpu_temperature() {
        let actions = route(
            &alert(json!({ "alertname": "GPUTemperatureHigh", "gpu_id": "0", "component": "nvidia" })),
            AlertRoute::Gpu,
            false,
        );

        assert_eq!(
            actions,
            vec![
                Action::LogGpuDetail {
                    gpu_id: Some("0".to_string()),
                    component: Some("nvidia".to_string()),
                },
                Action::GpuTemperatureWarning,
                Action::Persist,
            ]
        );
    }

    #[test]
    fn test_rules_are_independent() {
        let actions = route(
            &alert(json!({ "alertname": "GpuMemory", "severity": "critical", "service": "gpu" })),
            AlertRoute::Warning,
            true,
        );

        assert_eq!(actions.len(), 4);
        assert!(matches!(actions[0], Action::RunRecovery { .. }));
        assert!(matches!(actions[1], Action::LogGpuDetail { .. }));
    }

    #[test]
    fn test_plain_alert_is_only_persisted() {
        let actions = route(
            &alert(json!({ "alertname": "SlowQuery", "severity": "warning" })),
            AlertRoute::Database,
            false,
        );
        assert_eq!(actions, vec![Action::Persist]);
    }

    #[test]
    fn test_route_paths_and_messages() {
        assert_eq!(AlertRoute::General.path(), "/webhook");
        assert_eq!(AlertRoute::Gpu.path(), "/webhook/gpu");
        assert_eq!(AlertRoute::Gpu.success_message(), "GPU alerts processed");
        assert_eq!(AlertRoute::Ai.success_message(), "AI alerts processed");
        assert_eq!(AlertRoute::Critical.to_string(), "critical");
    }
}
