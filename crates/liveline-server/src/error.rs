// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping.
//!
//! Every failure body is `{"ok": false, "error": "<code>"}`. Validation and
//! visibility failures get their taxonomy status (400/403/404). Storage
//! failures on engagement endpoints are answered with 200 so best-effort
//! clients never see a 5xx; everywhere else they are a 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use liveline_core::ErrorKind;
use liveline_core::feed::FeedError;
use liveline_core::ledger::LedgerError;
use liveline_core::publish::PublishError;
use liveline_core::store::StoreError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Viewer read path failure.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Engagement endpoint failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Malformed request detected at the HTTP layer.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or mismatched sweep secret.
    #[error("Missing or invalid cron secret")]
    Unauthorized,

    /// Publish sweep failure.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Direct storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest | ErrorKind::InvalidPayload => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Taxonomy classification; `None` for an authorization failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Feed(e) => Some(e.kind()),
            Self::Ledger(e) => Some(e.kind()),
            Self::BadRequest(_) => Some(ErrorKind::BadRequest),
            Self::Unauthorized => None,
            Self::Publish(e) => Some(e.kind()),
            Self::Store(e) => Some(e.kind()),
        }
    }

    /// Wire code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        self.kind().map_or("unauthorized", |kind| kind.as_str())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ledger(e) if e.kind() == ErrorKind::ServerError => StatusCode::OK,
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            other => other.kind().map_or(StatusCode::UNAUTHORIZED, status_for),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.kind() == Some(ErrorKind::ServerError) {
            error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(json!({ "ok": false, "error": self.code() }))).into_response()
    }
}
