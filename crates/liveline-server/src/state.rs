// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};

use liveline_core::publish::Publisher;
use liveline_core::store::Store;

use crate::error::ApiError;

/// Header carrying the sweep secret.
pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Sweep capability check. Both sides are hashed before comparison.
#[derive(Clone, Default)]
pub struct CronSecret {
    digest: Option<[u8; 32]>,
}

impl CronSecret {
    /// Build from the configured secret. `None` refuses every caller.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            digest: secret.filter(|s| !s.is_empty()).map(digest),
        }
    }

    /// Check the `x-cron-secret` header, falling back to `Authorization: Bearer`.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let expected = self.digest.as_ref().ok_or(ApiError::Unauthorized)?;
        let provided = headers
            .get(CRON_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            })
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        if digest(provided) == *expected {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Storage gateway.
    pub store: Arc<dyn Store>,
    /// Publish pipeline used by the sweep endpoint.
    pub publisher: Publisher,
    /// Sweep secret check.
    pub cron_secret: CronSecret,
}

impl AppState {
    /// Assemble handler state.
    pub fn new(store: Arc<dyn Store>, publisher: Publisher, cron_secret: CronSecret) -> Self {
        Self {
            store,
            publisher,
            cron_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_secret_header_and_bearer_are_accepted() {
        let secret = CronSecret::new(Some("s3cret"));
        assert!(secret.authorize(&headers(CRON_SECRET_HEADER, "s3cret")).is_ok());
        assert!(secret.authorize(&headers("authorization", "Bearer s3cret")).is_ok());
    }

    #[test]
    fn test_wrong_or_missing_secret_is_rejected() {
        let secret = CronSecret::new(Some("s3cret"));
        assert!(secret.authorize(&headers(CRON_SECRET_HEADER, "nope")).is_err());
        assert!(secret.authorize(&headers("authorization", "s3cret")).is_err());
        assert!(secret.authorize(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_unset_secret_rejects_everyone() {
        let secret = CronSecret::new(None);
        assert!(secret.authorize(&headers(CRON_SECRET_HEADER, "")).is_err());
        assert!(secret.authorize(&headers(CRON_SECRET_HEADER, "anything")).is_err());
        assert!(CronSecret::new(Some("")).authorize(&headers(CRON_SECRET_HEADER, "")).is_err());
    }
}
