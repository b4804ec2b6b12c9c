//! Per-route, per-client fixed-window rate limiting.
//!
//! Each `(route, client address)` pair owns its own counter, so one noisy or
//! hostile client cannot use up the quota of another. A window opens on the
//! first request and resets once at least a full window has elapsed since it
//! opened. All counters live behind a single mutex so concurrent requests can
//! never push a client past its quota.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::RateLimits;
use crate::routing::AlertRoute;

/// Length of one rate-limit window.
///
/// The boundary is inclusive: a request arriving exactly one window after the
/// window opened starts a fresh window (`elapsed >= WINDOW`).
pub const WINDOW: Duration = Duration::from_secs(60);

/// Route key for `GET /health`.
pub const HEALTH_KEY: &str = "/health";

/// Route key for `GET /alerts`.
pub const ALERTS_KEY: &str = "/alerts";

/// Tracked windows above which expired ones are swept on the next request.
const SWEEP_THRESHOLD: usize = 4096;

/// How many requests a client may make to a route per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl Quota {
    /// `max_requests` per minute.
    #[must_use]
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: WINDOW,
        }
    }
}

/// Outcome of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// Time until the current window resets
    pub retry_after: Duration,
}

#[derive(Debug)]
struct FixedWindow {
    started: Instant,
    length: Duration,
    count: u32,
}

impl FixedWindow {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }
}

/// Fixed-window limiter keyed by route path and client address.
#[derive(Debug)]
pub struct RateLimiter {
    quotas: HashMap<String, Quota>,
    windows: Mutex<HashMap<(String, IpAddr), FixedWindow>>,
}

impl RateLimiter {
    /// Limiter with explicit per-route quotas. Routes without a quota are never limited.
    #[must_use]
    pub fn new(quotas: HashMap<String, Quota>) -> Self {
        Self {
            quotas,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter covering every webhook route plus `/health` and `/alerts`.
    #[must_use]
    pub fn from_limits(limits: &RateLimits) -> Self {
        let mut quotas: HashMap<String, Quota> = AlertRoute::ALL
            .iter()
            .map(|route| {
                (
                    route.path().to_string(),
                    Quota::per_minute(limits.webhook_per_minute),
                )
            })
            .collect();
        quotas.insert(HEALTH_KEY.to_string(), Quota::per_minute(limits.health_per_minute));
        quotas.insert(ALERTS_KEY.to_string(), Quota::per_minute(limits.alerts_per_minute));

        Self::new(quotas)
    }

    /// Record one request from `client` against `route`.
    pub fn check(&self, route: &str, client: IpAddr) -> Result<(), RateLimited> {
        self.check_at(route, client, Instant::now())
    }

    /// Record one request from `client` against `route` as if it arrived at `now`.
    ///
    /// The window resets when `now - started >= quota.window`.
    pub fn check_at(&self, route: &str, client: IpAddr, now: Instant) -> Result<(), RateLimited> {
        let Some(quota) = self.quotas.get(route) else {
            return Ok(());
        };

        // A poisoned lock only means another request panicked mid-update;
        // the counters themselves are still usable.
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, window| !window.expired(now));
        }

        let window = windows
            .entry((route.to_string(), client))
            .or_insert(FixedWindow {
                started: now,
                length: quota.window,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= quota.window {
            window.started = now;
            window.length = quota.window;
            window.count = 0;
        }

        if window.count >= quota.max_requests {
            let retry_after = quota.window.saturating_sub(elapsed);
            warn!(route, client = %client, limit = quota.max_requests, "Rate limit exceeded");
            return Err(RateLimited { retry_after });
        }

        window.count += 1;
        Ok(())
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
