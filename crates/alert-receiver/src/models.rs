//! Alert group payload model and its boundary validation.
//!
//! Payloads are parsed into a [`serde_json::Value`] first and then walked
//! field by field, so a rejected payload reports every offending field at
//! once instead of stopping at the first one. There is no partial
//! acceptance: one invalid alert rejects the whole batch.

use std::fmt;
use std::sync::LazyLock;

use notify::{AlertMessage, Severity};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Allowed characters for the `service` label.
static SERVICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Allowed characters for the `gpu_id` label.
static GPU_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid regex"));

const MAX_ALERTNAME_LEN: usize = 256;
const MAX_SERVICE_LEN: usize = 128;
const MAX_CATEGORY_LEN: usize = 128;
const MAX_GPU_ID_LEN: usize = 32;
const MAX_COMPONENT_LEN: usize = 128;
const MAX_INSTANCE_LEN: usize = 256;

/// Validated alert labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertLabels {
    /// Alert rule name
    pub alertname: String,
    /// Normalized severity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Affected service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Free-form category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// GPU identifier for GPU alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_id: Option<String>,
    /// Component (e.g. `nvidia`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Scrape instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// One validated alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Labels
    pub labels: AlertLabels,
    /// Free-form annotations (`summary`, `description`, ...)
    pub annotations: Map<String, Value>,
    /// `firing`, `resolved`, ...
    pub status: String,
}

/// One webhook body: a group of alerts with shared labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    /// Alerts in delivery order
    pub alerts: Vec<Alert>,
    /// Labels shared by the group
    #[serde(rename = "groupLabels")]
    pub group_labels: Map<String, Value>,
}

/// One offending field in a rejected payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Path of the field, e.g. `alerts[0].labels.severity`
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Why a payload was rejected.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Body is not JSON
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Body is JSON but violates the schema
    #[error("payload validation failed: {}", join_errors(.0))]
    Invalid(Vec<FieldError>),
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AlertPayload {
    /// Parse and validate a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(&value)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let mut errors = Errors::default();
        let payload = validate_payload(value, &mut errors);

        match payload {
            Some(payload) if errors.0.is_empty() => Ok(payload),
            _ => Err(PayloadError::Invalid(errors.0)),
        }
    }
}

impl Alert {
    /// String annotation by key, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).and_then(Value::as_str)
    }

    /// Render-only view consumed by the notification channels.
    #[must_use]
    pub fn to_message(&self, group_labels: &Map<String, Value>) -> AlertMessage {
        let labels = &self.labels;
        let mut message = AlertMessage::new(labels.alertname.clone());

        message.severity = labels.severity.unwrap_or(Severity::Info);
        message.status.clone_from(&self.status);
        message.group_labels = group_labels.clone();
        if let Some(service) = &labels.service {
            message.service.clone_from(service);
        }
        if let Some(category) = &labels.category {
            message.category.clone_from(category);
        }
        if let Some(instance) = &labels.instance {
            message.instance.clone_from(instance);
        }
        if let Some(summary) = self.annotation("summary") {
            message.summary = summary.to_string();
        }
        if let Some(description) = self.annotation("description") {
            message.description = description.to_string();
        }

        message
    }
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Default)]
struct Errors(Vec<FieldError>);

impl Errors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
}

fn validate_payload(value: &Value, errors: &mut Errors) -> Option<AlertPayload> {
    let Some(object) = value.as_object() else {
        errors.push("$", "payload must be a JSON object");
        return None;
    };

    let alerts = match object.get("alerts") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| validate_alert(item, &format!("alerts[{i}]"), errors))
            .collect(),
        Some(_) => {
            errors.push("alerts", "must be an array");
            Vec::new()
        }
        None => {
            errors.push("alerts", "field required");
            Vec::new()
        }
    };

    let group_labels = object_or_empty(object.get("groupLabels"), "groupLabels", errors);

    Some(AlertPayload {
        alerts,
        group_labels,
    })
}

fn validate_alert(value: &Value, path: &str, errors: &mut Errors) -> Option<Alert> {
    let Some(object) = value.as_object() else {
        errors.push(path, "alert must be a JSON object");
        return None;
    };

    let labels = match object.get("labels") {
        Some(Value::Object(labels)) => validate_labels(labels, &format!("{path}.labels"), errors),
        Some(_) => {
            errors.push(format!("{path}.labels"), "must be an object");
            None
        }
        None => {
            errors.push(format!("{path}.labels"), "field required");
            None
        }
    };

    let annotations = object_or_empty(
        object.get("annotations"),
        &format!("{path}.annotations"),
        errors,
    );

    let status = match object.get("status") {
        Some(Value::String(status)) => Some(status.clone()),
        Some(_) => {
            errors.push(format!("{path}.status"), "must be a string");
            None
        }
        None => {
            errors.push(format!("{path}.status"), "field required");
            None
        }
    };

    Some(Alert {
        labels: labels?,
        annotations,
        status: status?,
    })
}

fn validate_labels(labels: &Map<String, Value>, path: &str, errors: &mut Errors) -> Option<AlertLabels> {
    let before = errors.0.len();
    let field = |name: &str| format!("{path}.{name}");

    let alertname = match optional_str(labels, "alertname", path, errors) {
        Some(name) if name.is_empty() => {
            errors.push(field("alertname"), "cannot be empty");
            None
        }
        Some(name) if name.contains('\0') => {
            errors.push(field("alertname"), "cannot contain null bytes");
            None
        }
        Some(name) if name.chars().count() > MAX_ALERTNAME_LEN => {
            errors.push(
                field("alertname"),
                format!("cannot exceed {MAX_ALERTNAME_LEN} characters"),
            );
            None
        }
        Some(name) => Some(name),
        None => {
            if labels.get("alertname").map_or(true, Value::is_null) {
                errors.push(field("alertname"), "field required");
            }
            None
        }
    };

    let severity = optional_str(labels, "severity", path, errors).and_then(|raw| {
        raw.parse::<Severity>()
            .map_err(|e| errors.push(field("severity"), e.to_string()))
            .ok()
    });

    let service = optional_str(labels, "service", path, errors);
    if let Some(service) = &service {
        if service.chars().count() > MAX_SERVICE_LEN {
            errors.push(
                field("service"),
                format!("cannot exceed {MAX_SERVICE_LEN} characters"),
            );
        } else if !SERVICE_PATTERN.is_match(service) {
            errors.push(
                field("service"),
                "must contain only alphanumeric characters, hyphens, or underscores",
            );
        }
    }

    let category = optional_str(labels, "category", path, errors);
    check_len(category.as_deref(), MAX_CATEGORY_LEN, &field("category"), errors);

    let gpu_id = optional_str(labels, "gpu_id", path, errors);
    if let Some(gpu_id) = &gpu_id {
        if gpu_id.chars().count() > MAX_GPU_ID_LEN {
            errors.push(
                field("gpu_id"),
                format!("cannot exceed {MAX_GPU_ID_LEN} characters"),
            );
        } else if !GPU_ID_PATTERN.is_match(gpu_id) {
            errors.push(field("gpu_id"), "must be alphanumeric with optional hyphens");
        }
    }

    let component = optional_str(labels, "component", path, errors);
    check_len(component.as_deref(), MAX_COMPONENT_LEN, &field("component"), errors);

    let instance = optional_str(labels, "instance", path, errors);
    check_len(instance.as_deref(), MAX_INSTANCE_LEN, &field("instance"), errors);

    if errors.0.len() > before {
        return None;
    }

    Some(AlertLabels {
        alertname: alertname?,
        severity,
        service,
        category,
        gpu_id,
        component,
        instance,
    })
}

/// Trimmed string label; `null` and absent both mean `None`.
fn optional_str(
    labels: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Errors,
) -> Option<String> {
    match labels.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.trim().to_string()),
        Some(_) => {
            errors.push(format!("{path}.{key}"), "must be a string");
            None
        }
    }
}

fn check_len(value: Option<&str>, max: usize, field: &str, errors: &mut Errors) {
    if value.is_some_and(|v| v.chars().count() > max) {
        errors.push(field, format!("cannot exceed {max} characters"));
    }
}

/// Object field that defaults to empty when absent or `null`.
fn object_or_empty(value: Option<&Value>, field: &str, errors: &mut Errors) -> Map<String, Value> {
    match value {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            errors.push(field, "must be an object");
            Map::new()
        }
    }
}
