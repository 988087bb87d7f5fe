// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use liveline_core::fanout::push::DEFAULT_PUSH_CONCURRENCY;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgreSQL with LISTEN/NOTIFY change delivery.
    Postgres,
    /// Process-local store for development; starts empty.
    Memory,
}

/// VAPID signing material for Web Push.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    /// PKCS#8 PEM of the P-256 signing key.
    pub private_key_pem: String,
    /// Base64url uncompressed public key, sent as `k=`.
    pub public_key: String,
    /// Contact URI (`mailto:` or `https:`).
    pub subject: String,
}

/// Liveline server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend
    pub store: StoreBackend,
    /// PostgreSQL connection URL (required for the postgres backend)
    pub database_url: Option<String>,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Shared secret for the sweep endpoints; sweeps are refused when unset
    pub cron_secret: Option<String>,
    /// CORS allowlist; empty means any origin
    pub cors_allowed_origins: Vec<String>,
    /// Run both sweeps in-process
    pub scheduler_enabled: bool,
    /// In-process sweep cadence
    pub scheduler_interval: Duration,
    /// Web Push signing, when configured
    pub vapid: Option<VapidConfig>,
    /// Concurrent push deliveries per update
    pub push_concurrency: usize,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LIVELINE_DATABASE_URL`: PostgreSQL connection string, unless
    ///   `LIVELINE_STORE=memory`
    ///
    /// Optional (with defaults):
    /// - `LIVELINE_STORE`: `postgres` or `memory` (default: postgres)
    /// - `LIVELINE_HTTP_PORT`: listen port (default: 8080)
    /// - `LIVELINE_CRON_SECRET`: sweep token (default: unset, sweeps refused)
    /// - `LIVELINE_CORS_ALLOWED_ORIGINS`: comma-separated origins (default: any)
    /// - `LIVELINE_SCHEDULER_ENABLED`: run sweeps in-process (default: false)
    /// - `LIVELINE_SCHEDULER_INTERVAL_SECS`: sweep cadence (default: 60)
    /// - `LIVELINE_VAPID_PRIVATE_KEY_PEM`, `LIVELINE_VAPID_PUBLIC_KEY`,
    ///   `LIVELINE_VAPID_SUBJECT`: push signing, all three or none
    /// - `LIVELINE_PUSH_CONCURRENCY`: concurrent deliveries (default: 64)
    /// - `LIVELINE_LOG_JSON`: JSON logs (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = match non_empty("LIVELINE_STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(_) => {
                return Err(ConfigError::Invalid(
                    "LIVELINE_STORE",
                    "must be 'postgres' or 'memory'",
                ));
            }
        };

        let database_url = non_empty("LIVELINE_DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("LIVELINE_DATABASE_URL"));
        }

        let http_port: u16 = non_empty("LIVELINE_HTTP_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("LIVELINE_HTTP_PORT", "must be a valid port number"))?;

        let cors_allowed_origins = non_empty("LIVELINE_CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty() && *o != "*")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let scheduler_interval_secs: u64 = non_empty("LIVELINE_SCHEDULER_INTERVAL_SECS")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::Invalid(
                "LIVELINE_SCHEDULER_INTERVAL_SECS",
                "must be a positive integer",
            ))?;

        let push_concurrency: usize = match non_empty("LIVELINE_PUSH_CONCURRENCY") {
            None => DEFAULT_PUSH_CONCURRENCY,
            Some(raw) => raw.parse().ok().filter(|n| *n > 0).ok_or(ConfigError::Invalid(
                "LIVELINE_PUSH_CONCURRENCY",
                "must be a positive integer",
            ))?,
        };

        let vapid = match (
            non_empty("LIVELINE_VAPID_PRIVATE_KEY_PEM"),
            non_empty("LIVELINE_VAPID_PUBLIC_KEY"),
            non_empty("LIVELINE_VAPID_SUBJECT"),
        ) {
            (Some(private_key_pem), Some(public_key), Some(subject)) => Some(VapidConfig {
                // Single-line env files carry the PEM with literal "\n".
                private_key_pem: private_key_pem.replace("\\n", "\n"),
                public_key,
                subject,
            }),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "LIVELINE_VAPID_PRIVATE_KEY_PEM",
                    "VAPID key, public key and subject must be set together",
                ));
            }
        };

        Ok(Self {
            store,
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            cron_secret: non_empty("LIVELINE_CRON_SECRET"),
            cors_allowed_origins,
            scheduler_enabled: flag("LIVELINE_SCHEDULER_ENABLED")?,
            scheduler_interval: Duration::from_secs(scheduler_interval_secs),
            vapid,
            push_concurrency,
            log_json: flag("LIVELINE_LOG_JSON")?,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a boolean variable; unset means `false`.
fn flag(key: &'static str) -> Result<bool, ConfigError> {
    match non_empty(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false" | "0" | "no") => Ok(false),
        Some("true" | "1" | "yes") => Ok(true),
        Some(_) => Err(ConfigError::Invalid(key, "must be true or false")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
