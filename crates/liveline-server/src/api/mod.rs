// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes.
//!
//! ```text
//! GET  /health
//! GET  /embed/{liveblog_id}/feed
//! GET  /embed/{liveblog_id}/stream
//! GET  /embed/{liveblog_id}/sponsors
//! POST /embed/{liveblog_id}/reactions
//! GET  /embed/{liveblog_id}/reactions/summary
//! POST /embed/{liveblog_id}/push/subscribe
//! POST /embed/{liveblog_id}/push/unsubscribe
//! POST /widgets/hot-take/{widget_id}/vote
//! POST /internal/sponsors/lifecycle
//! POST /internal/publish/scheduled
//! ```

pub mod embed;
pub mod internal;
pub mod widgets;

use axum::extract::State;
use axum::http::header::{ETAG, HeaderName, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use liveline_core::ledger::LedgerError;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the application router.
///
/// `allowed_origins` scopes CORS to an allowlist; empty allows any origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/embed/{liveblog_id}/feed", get(embed::feed))
        .route("/embed/{liveblog_id}/stream", get(embed::stream))
        .route("/embed/{liveblog_id}/sponsors", get(embed::sponsors))
        .route("/embed/{liveblog_id}/reactions", post(embed::toggle_reaction))
        .route(
            "/embed/{liveblog_id}/reactions/summary",
            get(embed::reaction_summary),
        )
        .route("/embed/{liveblog_id}/push/subscribe", post(embed::push_subscribe))
        .route(
            "/embed/{liveblog_id}/push/unsubscribe",
            post(embed::push_unsubscribe),
        )
        .route("/widgets/hot-take/{widget_id}/vote", post(widgets::vote))
        .route("/internal/sponsors/lifecycle", post(internal::sponsor_lifecycle))
        .route("/internal/publish/scheduled", post(internal::publish_scheduled))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([ETAG]);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = match state.store.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(error = %e, "Health check failed");
            false
        }
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "healthy": healthy,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

// ============================================================================
// Extraction helpers
// ============================================================================

/// Parse a path identifier; an unparseable id is simply not found.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| LedgerError::NotFound(format!("{what} '{raw}'")).into())
}

/// Decode a JSON body regardless of its declared content type.
///
/// Beacon-style clients send `text/plain`; an empty body decodes as `{}`.
pub(crate) fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let bytes: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

pub(crate) fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_str(headers, USER_AGENT)
}
