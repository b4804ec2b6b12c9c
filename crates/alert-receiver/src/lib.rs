//! Alertmanager webhook receiver with automated recovery.
//!
//! This crate provides:
//! - HMAC-SHA256 signature verification of raw webhook bodies
//! - Typed alert payload validation that reports every offending field
//! - Per-route, per-client fixed-window rate limiting
//! - Alert routing by endpoint, severity and service
//! - Sandboxed, time-bounded recovery script execution
//! - Chat notification fan-out (via the `notify` crate)
//! - A filesystem archive of processed alerts
//! - The HTTP server tying it together

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod archive;
pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod rate_limit;
pub mod recovery;
pub mod routing;
pub mod server;
pub mod webhooks;

pub use archive::{AlertArchive, ArchivedAlert};
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use models::{Alert, AlertLabels, AlertPayload, FieldError, PayloadError};
pub use processor::{AlertProcessor, ProcessingSummary};
pub use rate_limit::RateLimiter;
pub use recovery::{RecoveryError, RecoveryExecutor, RecoveryScripts};
pub use routing::{route, Action, AlertRoute};
pub use server::{build_router, AppState};
pub use webhooks::{sign, verify_signature};
