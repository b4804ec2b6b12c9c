//! Per-alert processing loop.
//!
//! Every alert in a payload is routed and its actions run in order. A
//! failing action is recorded against that alert and never stops the other
//! actions or the remaining alerts. A panic inside one alert's processing is
//! caught at the loop boundary and counted as that alert's error.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use notify::Notifier;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::archive::AlertArchive;
use crate::models::{Alert, AlertPayload};
use crate::recovery::RecoveryExecutor;
use crate::routing::{route, Action, AlertRoute};

/// Aggregate outcome of one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    /// Alerts that went through the loop, failed actions included
    pub processed: usize,
    /// Alerts in the payload
    pub total: usize,
    /// `"{alertname}: {error}"` for every failed action
    pub errors: Vec<String>,
    /// `"{channel}:{alertname}"` for every delivered notification
    pub notifications_sent: Vec<String>,
}

/// Runs routed actions against the recovery executor, notifier and archive.
pub struct AlertProcessor {
    executor: RecoveryExecutor,
    notifier: Notifier,
    archive: AlertArchive,
}

#[derive(Default)]
struct AlertOutcome {
    errors: Vec<String>,
    notifications_sent: Vec<String>,
}

impl AlertProcessor {
    /// Create a processor.
    #[must_use]
    pub const fn new(executor: RecoveryExecutor, notifier: Notifier, archive: AlertArchive) -> Self {
        Self {
            executor,
            notifier,
            archive,
        }
    }

    /// Archive backing the processor.
    #[must_use]
    pub const fn archive(&self) -> &AlertArchive {
        &self.archive
    }

    /// Process every alert in `payload`, received on `route`.
    pub async fn process(&self, payload: &AlertPayload, hint: AlertRoute) -> ProcessingSummary {
        let mut summary = ProcessingSummary {
            total: payload.alerts.len(),
            ..ProcessingSummary::default()
        };

        for alert in &payload.alerts {
            let name = &alert.labels.alertname;
            let result = AssertUnwindSafe(self.process_alert(alert, &payload.group_labels, hint))
                .catch_unwind()
                .await;

            match result {
                Ok(outcome) => {
                    summary
                        .errors
                        .extend(outcome.errors.into_iter().map(|e| format!("{name}: {e}")));
                    summary.notifications_sent.extend(outcome.notifications_sent);
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(alert = %name, route = %hint, reason = %reason, "Unexpected failure processing alert");
                    summary.errors.push(format!("{name}: unexpected error: {reason}"));
                }
            }
            summary.processed += 1;
        }

        info!(
            route = %hint,
            processed = summary.processed,
            total = summary.total,
            errors = summary.errors.len(),
            "Alert batch processed"
        );

        summary
    }

    async fn process_alert(
        &self,
        alert: &Alert,
        group_labels: &Map<String, Value>,
        hint: AlertRoute,
    ) -> AlertOutcome {
        let name = &alert.labels.alertname;
        let mut outcome = AlertOutcome::default();

        if hint == AlertRoute::Critical || alert.labels.severity == Some(notify::Severity::Critical) {
            error!(
                critical = true,
                alert = %name,
                service = alert.labels.service.as_deref().unwrap_or("unknown"),
                summary = alert.annotation("summary").unwrap_or("No summary"),
                "Critical alert received"
            );
        } else {
            info!(alert = %name, route = %hint, status = %alert.status, "Alert received");
        }

        for action in route(alert, hint, self.notifier.has_channels()) {
            match action {
                Action::RunRecovery { service } => {
                    if let Err(e) = self.executor.run(&service).await {
                        if e.is_reportable() {
                            outcome.errors.push(format!("recovery for {service} failed: {e}"));
                        }
                    }
                }
                Action::LogGpuDetail { gpu_id, component } => {
                    info!(
                        alert = %name,
                        gpu_id = gpu_id.as_deref().unwrap_or("unknown"),
                        component = component.as_deref().unwrap_or("unknown"),
                        "GPU alert"
                    );
                }
                Action::GpuTemperatureWarning => {
                    warn!(
                        alert = %name,
                        gpu_id = alert.labels.gpu_id.as_deref().unwrap_or("unknown"),
                        "GPU temperature alert, check cooling"
                    );
                }
                Action::Persist => match self.archive.persist(alert, hint) {
                    Ok(path) => info!(alert = %name, file = %path.display(), "Alert archived"),
                    Err(e) => {
                        error!(alert = %name, error = %e, "Failed to archive alert");
                        outcome.errors.push(format!("persist failed: {e}"));
                    }
                },
                Action::Notify => {
                    let report = self.notifier.fan_out(&alert.to_message(group_labels)).await;
                    outcome.notifications_sent.extend(
                        report
                            .delivered
                            .iter()
                            .map(|channel| format!("{channel}:{name}")),
                    );
                    outcome.errors.extend(
                        report
                            .failed
                            .iter()
                            .map(|f| format!("notification via {} failed: {}", f.channel, f.error)),
                    );
                }
            }
        }

        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::recovery::{RecoveryScripts, DEFAULT_TIMEOUT};
    use notify::{AlertMessage, ChannelError, NotifyChannel};
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Recording {
        name: &'static str,
        fail: bool,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl NotifyChannel for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
            self.seen.lock().unwrap().push(message.alert_name.clone());
            if self.fail {
                return Err(ChannelError::NotConfigured("test failure".to_string()));
            }
            Ok(())
        }
    }

    fn channel(name: &'static str, fail: bool) -> Arc<Recording> {
        Arc::new(Recording {
            name,
            fail,
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    struct Fixture {
        recovery: TempDir,
        alerts: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                recovery: TempDir::new().unwrap(),
                alerts: TempDir::new().unwrap(),
            }
        }

        fn script(&self, name: &str, body: &str) {
            let path = self.recovery.path().join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn processor(&self, notifier: Notifier) -> AlertProcessor {
            AlertProcessor::new(
                RecoveryExecutor::new(self.recovery.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT),
                notifier,
                AlertArchive::open(self.alerts.path()).unwrap(),
            )
        }

        fn archived(&self) -> usize {
            fs::read_dir(self.alerts.path()).unwrap().count()
        }
    }

    fn payload(value: &Value) -> AlertPayload {
        AlertPayload::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_processes_every_alert() {
        let fixture = Fixture::new();
        let processor = fixture.processor(Notifier::disabled());

        let summary = processor
            .process(
                &payload(&json!({
                    "alerts": [
                        { "labels": { "alertname": "A" }, "status": "firing" },
                        { "labels": { "alertname": "B" }, "status": "resolved" }
                    ]
                })),
                AlertRoute::General,
            )
            .await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.total, 2);
        assert!(summary.errors.is_empty());
        assert_eq!(fixture.archived(), 2);
    }

    #[tokio::test]
    async fn test_recovery_failure_does_not_stop_batch() {
        let fixture = Fixture::new();
        fixture.script("ollama-recovery.sh", "exit 1");
        let processor = fixture.processor(Notifier::disabled());

        let summary = processor
            .process(
                &payload(&json!({
                    "alerts": [
                        { "labels": { "alertname": "OllamaDown", "service": "ollama" }, "status": "firing" },
                        { "labels": { "alertname": "Other", "service": "postgres" }, "status": "firing" }
                    ]
                })),
                AlertRoute::Critical,
            )
            .await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("OllamaDown: recovery for ollama failed"));
        assert_eq!(fixture.archived(), 2);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let fixture = Fixture::new();
        let good = channel("discord", false);
        let bad = channel("slack", true);
        let channels = vec![
            good.clone() as Arc<dyn NotifyChannel>,
            bad.clone() as Arc<dyn NotifyChannel>,
        ];
        let processor = fixture.processor(Notifier::with_channels(channels));

        let summary = processor
            .process(
                &payload(&json!({
                    "alerts": [{ "labels": { "alertname": "DiskFull", "severity": "warning" }, "status": "firing" }]
                })),
                AlertRoute::Warning,
            )
            .await;

        assert_eq!(summary.notifications_sent, vec!["discord:DiskFull"]);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("notification via slack failed"));
        assert_eq!(good.seen.lock().unwrap().as_slice(), ["DiskFull"]);
        assert_eq!(bad.seen.lock().unwrap().as_slice(), ["DiskFull"]);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
