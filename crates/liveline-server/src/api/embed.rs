// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Viewer-facing embed endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use liveline_core::feed::{self, FEED_CACHE_CONTROL, clamp_limit, load_feed};
use liveline_core::ledger::{self, LedgerError, ReactionRequest, ReactionState, ReactionSummary};
use liveline_core::model::SponsorSlot;
use liveline_core::sponsor_lifecycle::visible_sponsors;
use liveline_core::subscriptions::{self, PushRegistration};

use super::{json_body, parse_id, user_agent};
use crate::error::ApiError;
use crate::state::AppState;

/// Reconnect delay advertised in the first stream frame.
pub const STREAM_RETRY: Duration = Duration::from_millis(3000);

/// Idle keep-alive comment cadence.
pub const STREAM_KEEP_ALIVE: Duration = Duration::from_secs(15);

// ============================================================================
// Feed
// ============================================================================

/// Feed query string.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Requested number of updates.
    pub limit: Option<i64>,
}

/// `GET /embed/{liveblog_id}/feed`
#[instrument(skip(state, headers))]
pub async fn feed(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
    Query(query): Query<FeedQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let snapshot = load_feed(state.store.as_ref(), liveblog_id, clamp_limit(query.limit)).await?;

    let if_none_match = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    let cache_headers = [
        (ETAG, snapshot.etag.clone()),
        (CACHE_CONTROL, FEED_CACHE_CONTROL.to_string()),
    ];

    if snapshot.is_not_modified(if_none_match) {
        debug!(%liveblog_id, "Feed not modified");
        return Ok((StatusCode::NOT_MODIFIED, cache_headers).into_response());
    }

    Ok((cache_headers, Json(snapshot.body)).into_response())
}

// ============================================================================
// Change stream
// ============================================================================

/// `GET /embed/{liveblog_id}/stream`
///
/// The subscription lives inside the response body stream, so a client
/// disconnect drops it and unregisters it from the hub.
#[instrument(skip(state))]
pub async fn stream(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    feed::require_readable(state.store.as_ref(), liveblog_id).await?;
    let mut subscription = state.store.subscribe_changes(liveblog_id).await?;
    info!(%liveblog_id, "Change stream opened");

    let events = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().retry(STREAM_RETRY));
        yield Ok(Event::default().comment("connected"));

        while let Some(change) = subscription.recv().await {
            match Event::default().json_data(&change) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!(error = %e, "Dropping unencodable change event"),
            }
        }
        debug!(%liveblog_id, "Change hub closed the stream");
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(STREAM_KEEP_ALIVE)))
}

// ============================================================================
// Sponsors
// ============================================================================

/// Sponsors response.
#[derive(Debug, Serialize)]
pub struct SponsorsResponse {
    /// Slots visible right now, `pinned desc, priority desc`.
    pub sponsors: Vec<SponsorSlot>,
}

/// `GET /embed/{liveblog_id}/sponsors`
#[instrument(skip(state))]
pub async fn sponsors(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
) -> Result<Json<SponsorsResponse>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let sponsors = visible_sponsors(state.store.as_ref(), liveblog_id, Utc::now()).await?;
    Ok(Json(SponsorsResponse { sponsors }))
}

// ============================================================================
// Reactions
// ============================================================================

/// Reaction toggle body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionBody {
    /// Update to react to.
    pub update_id: Option<String>,
    /// Reaction kind.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Client device identifier.
    pub device_id: Option<String>,
}

/// Reaction toggle response.
#[derive(Debug, Serialize)]
pub struct ReactionResponse {
    /// Always `true`.
    pub ok: bool,
    /// Post-toggle aggregate.
    #[serde(flatten)]
    pub state: ReactionState,
}

/// `POST /embed/{liveblog_id}/reactions`
#[instrument(skip(state, headers, body))]
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReactionResponse>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let body: ReactionBody = json_body(&body)?;

    let request = ReactionRequest {
        liveblog_id,
        update_id: body.update_id,
        kind: body.kind,
        device_id: body.device_id,
        user_agent: user_agent(&headers),
    };
    let reactions = ledger::toggle_reaction(state.store.as_ref(), &request).await?;
    Ok(Json(ReactionResponse {
        ok: true,
        state: reactions,
    }))
}

/// Summary query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    /// Comma-separated update ids.
    pub update_ids: Option<String>,
    /// Client device identifier.
    pub device_id: Option<String>,
}

/// `GET /embed/{liveblog_id}/reactions/summary`
#[instrument(skip(state, headers, query))]
pub async fn reaction_summary(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
    Query(query): Query<SummaryQuery>,
    headers: HeaderMap,
) -> Result<Json<ReactionSummary>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let raw_ids = query
        .update_ids
        .ok_or_else(|| LedgerError::BadRequest("updateIds is required".to_string()))?;
    let update_ids = ledger::parse_update_ids(&raw_ids)?;

    let summary = ledger::reaction_summary(
        state.store.as_ref(),
        liveblog_id,
        &update_ids,
        query.device_id.as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;
    Ok(Json(summary))
}

// ============================================================================
// Push subscriptions
// ============================================================================

/// Browser push keys.
#[derive(Debug, Default, Deserialize)]
pub struct PushKeysBody {
    /// Client public key.
    pub p256dh: Option<String>,
    /// Authentication secret.
    pub auth: Option<String>,
}

/// Push subscribe body, shaped like a browser `PushSubscription.toJSON()`.
#[derive(Debug, Default, Deserialize)]
pub struct PushSubscribeBody {
    /// Push service endpoint.
    pub endpoint: Option<String>,
    /// Encryption keys.
    #[serde(default)]
    pub keys: PushKeysBody,
}

/// Push unsubscribe body.
#[derive(Debug, Default, Deserialize)]
pub struct PushUnsubscribeBody {
    /// Push service endpoint.
    pub endpoint: Option<String>,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct Ack {
    /// Always `true`.
    pub ok: bool,
    /// Whether a row was removed (unsubscribe only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

/// `POST /embed/{liveblog_id}/push/subscribe`
#[instrument(skip(state, headers, body))]
pub async fn push_subscribe(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let body: PushSubscribeBody = json_body(&body)?;

    let registration = PushRegistration {
        liveblog_id,
        endpoint: body.endpoint,
        p256dh: body.keys.p256dh,
        auth: body.keys.auth,
        user_agent: user_agent(&headers),
    };
    subscriptions::register(state.store.as_ref(), &registration).await?;
    Ok(Json(Ack {
        ok: true,
        removed: None,
    }))
}

/// `POST /embed/{liveblog_id}/push/unsubscribe`
#[instrument(skip(state, body))]
pub async fn push_unsubscribe(
    State(state): State<AppState>,
    Path(liveblog_id): Path<String>,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let liveblog_id = parse_id(&liveblog_id, "Liveblog")?;
    let body: PushUnsubscribeBody = json_body(&body)?;

    let removed =
        subscriptions::unregister(state.store.as_ref(), liveblog_id, body.endpoint.as_deref())
            .await?;
    Ok(Json(Ack {
        ok: true,
        removed: Some(removed),
    }))
}
