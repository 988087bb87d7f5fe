// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sweep endpoints for the external periodic trigger.
//!
//! Both require the shared cron secret and are safe to call concurrently
//! and repeatedly.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;

use liveline_core::publish::{PublishSweepReport, clamp_publish_limit};
use liveline_core::sponsor_lifecycle::{SponsorSweepReport, run_sponsor_sweep};

use super::json_body;
use crate::error::ApiError;
use crate::state::AppState;

/// Publish sweep body.
#[derive(Debug, Default, Deserialize)]
pub struct PublishBody {
    /// Maximum rows to publish.
    pub limit: Option<i64>,
}

/// `POST /internal/sponsors/lifecycle`
#[instrument(skip_all)]
pub async fn sponsor_lifecycle(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SponsorSweepReport>, ApiError> {
    state.cron_secret.authorize(&headers)?;
    let report = run_sponsor_sweep(state.store.as_ref(), Utc::now()).await?;
    Ok(Json(report))
}

/// `POST /internal/publish/scheduled`
#[instrument(skip_all)]
pub async fn publish_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublishSweepReport>, ApiError> {
    state.cron_secret.authorize(&headers)?;
    let body: PublishBody = json_body(&body)?;
    let report = state
        .publisher
        .run_sweep(Utc::now(), clamp_publish_limit(body.limit))
        .await?;
    Ok(Json(report))
}
