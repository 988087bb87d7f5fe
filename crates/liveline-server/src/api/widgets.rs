// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interactive widget endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use liveline_core::ledger::{self, VoteRequest};

use super::{json_body, parse_id, user_agent};
use crate::error::ApiError;
use crate::state::AppState;

/// Vote body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBody {
    /// Requested value, 0 to 100.
    pub value: Option<f64>,
    /// Client device identifier.
    pub device_id: Option<String>,
}

/// Vote response.
#[derive(Debug, Serialize)]
pub struct VoteResponse {
    /// Always `true`.
    pub ok: bool,
    /// Mean of all votes, one decimal place.
    pub mean: f64,
    /// Number of votes.
    pub total: i64,
    /// Present and `true` when the device had already voted.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// `POST /widgets/hot-take/{widget_id}/vote`
#[instrument(skip(state, headers, body))]
pub async fn vote(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VoteResponse>, ApiError> {
    let widget_id = parse_id(&widget_id, "Widget")?;
    let body: VoteBody = json_body(&body)?;

    let request = VoteRequest {
        widget_id,
        value: body.value,
        device_id: body.device_id,
        user_agent: user_agent(&headers),
    };
    let outcome = ledger::cast_vote(state.store.as_ref(), &request).await?;

    Ok(Json(VoteResponse {
        ok: true,
        mean: outcome.mean,
        total: outcome.total,
        duplicate: outcome.duplicate,
    }))
}
