//! HTTP server for alert webhooks.
//!
//! Provides REST API endpoints for:
//! - Receiving Alertmanager webhooks (`/webhook` and one path per alert type)
//! - Health checks
//! - Listing recently archived alerts

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use notify::Notifier;
use serde::Serialize;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::archive::{AlertArchive, ArchiveError, ArchivedAlert};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::AlertPayload;
use crate::processor::{AlertProcessor, ProcessingSummary};
use crate::rate_limit::{RateLimiter, ALERTS_KEY, HEALTH_KEY};
use crate::recovery::{RecoveryExecutor, RecoveryScripts};
use crate::routing::AlertRoute;
use crate::webhooks::{verify_signature, SIGNATURE_HEADER};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "alert-receiver";

/// Server state shared across handlers.
pub struct AppState {
    /// Shared signing secret
    secret: String,
    /// Per-route, per-client request quotas
    pub limiter: RateLimiter,
    /// Alert processing pipeline
    pub processor: AlertProcessor,
    /// Entries returned by `GET /alerts`
    pub alerts_list_limit: usize,
}

impl AppState {
    /// Build the state from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the configured alerts directory nor the
    /// fallback can be written.
    pub fn new(config: &Config) -> Result<Self, ArchiveError> {
        let archive = AlertArchive::open(&config.alerts_dir)?;
        info!(dir = %archive.dir().display(), "Alert archive ready");

        let executor = RecoveryExecutor::new(
            &config.recovery_dir,
            RecoveryScripts::builtin(),
            config.recovery_timeout,
        );
        if !executor.dir().is_dir() {
            warn!(dir = %executor.dir().display(), "Recovery directory does not exist");
        }

        Ok(Self {
            secret: config.webhook_secret.clone(),
            limiter: RateLimiter::from_limits(&config.rate_limits),
            processor: AlertProcessor::new(executor, Notifier::from_config(&config.notify), archive),
            alerts_list_limit: config.alerts_list_limit,
        })
    }
}

/// Build the HTTP router.
///
/// Handlers read the peer address from [`ConnectInfo`], so the router must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/alerts", get(alerts_handler));

    for route in AlertRoute::ALL {
        router = router.route(
            route.path(),
            post(
                move |State(state): State<Arc<AppState>>,
                      ConnectInfo(peer): ConnectInfo<SocketAddr>,
                      headers: HeaderMap,
                      body: Bytes| async move {
                    webhook_handler(&state, route, peer, &headers, &body).await
                },
            ),
        );
    }

    router
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Response types
// ============================================================================

/// Successful webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    status: &'static str,
    message: String,
    alert_type: AlertRoute,
    #[serde(flatten)]
    summary: ProcessingSummary,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct AlertsResponse {
    alerts: Vec<ArchivedAlert>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Rate limit → signature → validation → processing.
async fn webhook_handler(
    state: &AppState,
    route: AlertRoute,
    peer: SocketAddr,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookResponse>, ApiError> {
    state
        .limiter
        .check(route.path(), peer.ip())
        .map_err(|limited| ApiError::RateLimited {
            retry_after: limited.retry_after,
        })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !verify_signature(&state.secret, body, signature) {
        warn!(route = %route, signature_present = signature.is_some(), "Invalid webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let payload = AlertPayload::parse(body).inspect_err(|e| {
        warn!(route = %route, error = %e, "Rejected alert payload");
    })?;

    info!(route = %route, alerts = payload.alerts.len(), "Received alert webhook");

    let summary = state.processor.process(&payload, route).await;

    Ok(Json(WebhookResponse {
        status: "success",
        message: route.success_message(),
        alert_type: route,
        summary,
    }))
}

/// Health check handler.
async fn health_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<HealthResponse>, ApiError> {
    state
        .limiter
        .check(HEALTH_KEY, peer.ip())
        .map_err(|limited| ApiError::RateLimited {
            retry_after: limited.retry_after,
        })?;

    Ok(Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Recent archive listing.
async fn alerts_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<AlertsResponse>, ApiError> {
    state
        .limiter
        .check(ALERTS_KEY, peer.ip())
        .map_err(|limited| ApiError::RateLimited {
            retry_after: limited.retry_after,
        })?;

    let alerts = state
        .processor
        .archive()
        .list_recent(state.alerts_list_limit)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(AlertsResponse { alerts }))
}
