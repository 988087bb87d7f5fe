// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process sweep scheduler.
//!
//! Runs the scheduled-publish and sponsor-lifecycle sweeps on a fixed
//! interval. Deployments that drive the sweeps from an external cron over
//! HTTP leave it disabled; both paths can run at once because every sweep
//! transition is guarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::publish::{DEFAULT_PUBLISH_LIMIT, Publisher};
use crate::sponsor_lifecycle::run_sponsor_sweep;
use crate::store::Store;

/// Sweep scheduler configuration.
#[derive(Debug, Clone)]
pub struct SweepSchedulerConfig {
    /// Delay between sweeps.
    pub interval: Duration,
    /// Rows per publish sweep.
    pub publish_limit: i64,
}

impl Default for SweepSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            publish_limit: DEFAULT_PUBLISH_LIMIT,
        }
    }
}

/// Background task running both sweeps periodically.
pub struct SweepScheduler {
    store: Arc<dyn Store>,
    publisher: Publisher,
    config: SweepSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl SweepScheduler {
    /// Create a scheduler.
    pub fn new(store: Arc<dyn Store>, publisher: Publisher, config: SweepSchedulerConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            publish_limit = self.config.publish_limit,
            "Sweep scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Sweep scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// Run both sweeps once. Failures are logged.
    pub async fn tick(&self) {
        let now = Utc::now();

        if let Err(e) = self.publisher.run_sweep(now, self.config.publish_limit).await {
            error!(error = %e, "Scheduled publish sweep failed");
        }

        if let Err(e) = run_sponsor_sweep(self.store.as_ref(), now).await {
            error!(error = %e, "Sponsor lifecycle sweep failed");
        }
    }
}
