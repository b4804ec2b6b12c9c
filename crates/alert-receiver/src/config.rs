//! Configuration for the alert receiver.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use notify::NotifyConfig;
use thiserror::Error;

/// Minimum accepted length of the shared webhook secret.
pub const MIN_SECRET_LEN: usize = 16;

/// Secret value shipped in sample configs; never valid in a running service.
pub const PLACEHOLDER_SECRET: &str = "test-secret-placeholder";

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `ALERTMANAGER_WEBHOOK_SECRET` is not set
    #[error("ALERTMANAGER_WEBHOOK_SECRET must be configured")]
    MissingSecret,

    /// The secret is shorter than [`MIN_SECRET_LEN`]
    #[error("ALERTMANAGER_WEBHOOK_SECRET must be at least {MIN_SECRET_LEN} characters (got {len})")]
    SecretTooShort {
        /// Actual length in characters
        len: usize,
    },

    /// The secret is still the sample placeholder
    #[error("ALERTMANAGER_WEBHOOK_SECRET is set to the placeholder value")]
    PlaceholderSecret,

    /// A variable holds a value that does not parse
    #[error("invalid value for {var}: `{value}`")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },
}

/// Requests per minute for each rate-limited surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Quota for each `/webhook*` endpoint.
    pub webhook_per_minute: u32,
    /// Quota for `/health`.
    pub health_per_minute: u32,
    /// Quota for `/alerts`.
    pub alerts_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            webhook_per_minute: 10,
            health_per_minute: 60,
            alerts_per_minute: 30,
        }
    }
}

/// Alert receiver configuration.
#[derive(Clone)]
pub struct Config {
    /// Address to bind.
    pub bind: IpAddr,
    /// HTTP server port.
    pub port: u16,
    /// Shared secret for `X-Signature` verification.
    pub webhook_secret: String,
    /// Directory holding the recovery scripts.
    pub recovery_dir: PathBuf,
    /// Wall-clock limit for one recovery script run.
    pub recovery_timeout: Duration,
    /// Preferred directory for archived alerts.
    pub alerts_dir: PathBuf,
    /// How many archive entries `GET /alerts` returns.
    pub alerts_list_limit: usize,
    /// Rate-limit quotas.
    pub rate_limits: RateLimits,
    /// Notification channels.
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// Empty values are treated as unset. The webhook secret is validated
    /// here so a misconfigured service never starts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let webhook_secret = validate_secret(get("ALERTMANAGER_WEBHOOK_SECRET"))?;

        let alerts_dir = get("ALERTS_DIR")
            .or_else(|| get("LOG_DIR"))
            .map_or_else(|| PathBuf::from("/app/logs"), PathBuf::from);

        let defaults = RateLimits::default();

        Ok(Self {
            bind: parse_or(get("WEBHOOK_BIND"), "WEBHOOK_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_or(get("WEBHOOK_PORT"), "WEBHOOK_PORT", 9093)?,
            webhook_secret,
            recovery_dir: get("RECOVERY_DIR")
                .map_or_else(|| PathBuf::from("/app/scripts/recovery"), PathBuf::from),
            recovery_timeout: Duration::from_secs(parse_or(
                get("RECOVERY_SCRIPT_TIMEOUT"),
                "RECOVERY_SCRIPT_TIMEOUT",
                30,
            )?),
            alerts_dir,
            alerts_list_limit: parse_or(get("ALERTS_LIST_LIMIT"), "ALERTS_LIST_LIMIT", 20)?,
            rate_limits: RateLimits {
                webhook_per_minute: parse_or(
                    get("WEBHOOK_RATE_LIMIT"),
                    "WEBHOOK_RATE_LIMIT",
                    defaults.webhook_per_minute,
                )?,
                health_per_minute: parse_or(
                    get("HEALTH_RATE_LIMIT"),
                    "HEALTH_RATE_LIMIT",
                    defaults.health_per_minute,
                )?,
                alerts_per_minute: parse_or(
                    get("ALERTS_RATE_LIMIT"),
                    "ALERTS_RATE_LIMIT",
                    defaults.alerts_per_minute,
                )?,
            },
            notify: NotifyConfig::from_lookup(&lookup),
        })
    }
}

fn validate_secret(secret: Option<String>) -> Result<String, ConfigError> {
    let secret = secret.ok_or(ConfigError::MissingSecret)?;

    if secret == PLACEHOLDER_SECRET {
        return Err(ConfigError::PlaceholderSecret);
    }

    let len = secret.chars().count();
    if len < MIN_SECRET_LEN {
        return Err(ConfigError::SecretTooShort { len });
    }

    Ok(secret)
}

fn parse_or<T: FromStr>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
