// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Liveline Server - realtime liveblog delivery
//!
//! Serves the embed feed and change stream, records reactions and votes,
//! and exposes the sweep endpoints that publish scheduled updates and move
//! sponsor slots through their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use liveline_core::fanout::{Fanout, HttpChatNotifier, VapidSigner, WebPushSender};
use liveline_core::migrations;
use liveline_core::publish::Publisher;
use liveline_core::scheduler::{SweepScheduler, SweepSchedulerConfig};
use liveline_core::store::{MemoryStore, PostgresStore, Store};
use liveline_server::api;
use liveline_server::config::{Config, ConfigError, StoreBackend};
use liveline_server::state::{AppState, CronSecret};

/// Timeout for outbound webhook and push requests.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// How long open connections (mostly change streams) get to close after Ctrl-C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("liveline_server=info,liveline_core=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// A background task and the handle that stops it.
struct Background {
    name: &'static str,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting Liveline Server");

    let config = config.map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        store = ?config.store,
        http_addr = %config.http_addr,
        scheduler_enabled = config.scheduler_enabled,
        cors_origins = config.cors_allowed_origins.len(),
        push_concurrency = config.push_concurrency,
        "Configuration loaded"
    );

    let mut background = Vec::new();

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("LIVELINE_DATABASE_URL"))?;

            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(database_url)
                .await?;
            info!("Database connection established");

            info!("Running database migrations...");
            migrations::run(&pool).await?;
            info!("Migrations completed");

            let store = Arc::new(PostgresStore::new(pool));
            let listener = store.change_listener();
            background.push(Background {
                name: "change listener",
                shutdown: listener.shutdown_handle(),
                handle: tokio::spawn(listener.run()),
            });
            store
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let vapid = match &config.vapid {
        Some(vapid) => Some(VapidSigner::from_pem(
            vapid.private_key_pem.as_bytes(),
            vapid.public_key.clone(),
            vapid.subject.clone(),
        )?),
        None => {
            warn!("VAPID keys not configured, push services may reject deliveries");
            None
        }
    };
    let fanout = Fanout::new(
        store.clone(),
        Arc::new(HttpChatNotifier::new(OUTBOUND_TIMEOUT)?),
        Arc::new(WebPushSender::new(OUTBOUND_TIMEOUT, vapid)?),
        config.push_concurrency,
    );
    let publisher = Publisher::new(store.clone(), fanout);

    if config.scheduler_enabled {
        let scheduler = SweepScheduler::new(
            store.clone(),
            publisher.clone(),
            SweepSchedulerConfig {
                interval: config.scheduler_interval,
                ..Default::default()
            },
        );
        background.push(Background {
            name: "sweep scheduler",
            shutdown: scheduler.shutdown_handle(),
            handle: tokio::spawn(scheduler.run()),
        });
    }

    if config.cron_secret.is_none() {
        warn!("LIVELINE_CRON_SECRET not set, sweep endpoints will reject every call");
    }
    let state = AppState::new(
        store,
        publisher,
        CronSecret::new(config.cron_secret.as_deref()),
    );
    let app = api::router(state, &config.cors_allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    let stop = Arc::new(Notify::new());
    let server = {
        let stop = stop.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.notified().await })
                .await
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    stop.notify_one();

    match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => return Err(anyhow!("HTTP server task failed: {e}")),
        Err(_) => warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Open connections did not drain in time"
        ),
    }

    for task in background {
        task.shutdown.notify_one();
        if let Err(e) = task.handle.await {
            error!(task = task.name, error = %e, "Background task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
