// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Feed snapshots and conditional delivery.
//!
//! A feed snapshot is the ordered list of publicly visible updates of one
//! liveblog, serialized deterministically and fingerprinted with SHA-256. The
//! fingerprint is served as a weak `ETag`; a request whose first
//! `If-None-Match` token equals it gets a "not modified" answer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::{Liveblog, Update};
use crate::store::{Store, StoreError};

/// Number of updates served when the caller does not ask for a size.
pub const DEFAULT_FEED_LIMIT: i64 = 50;

/// Hard cap on the feed size.
pub const MAX_FEED_LIMIT: i64 = 200;

/// Cache directive sent with both full and "not modified" responses.
pub const FEED_CACHE_CONTROL: &str = "public, max-age=5, s-maxage=5, stale-while-revalidate=30";

/// Errors from loading a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// No such liveblog.
    #[error("Liveblog {0} not found")]
    NotFound(Uuid),

    /// The liveblog exists but is private or still a draft.
    #[error("Liveblog {0} is not readable")]
    Forbidden(Uuid),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FeedError {
    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Store(_) => ErrorKind::ServerError,
        }
    }

    /// Wire code for this error.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Public projection of an update as it appears in the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    /// Update identifier.
    pub id: Uuid,
    /// Content document, verbatim.
    pub content: Value,
    /// Pinned flag.
    pub pinned: bool,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
}

impl From<Update> for FeedEntry {
    fn from(update: Update) -> Self {
        Self {
            id: update.id,
            content: update.content,
            pinned: update.pinned,
            published_at: update.published_at,
        }
    }
}

/// Response body of a feed read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedBody {
    /// Visible updates, `pinned desc, published_at desc`.
    pub updates: Vec<FeedEntry>,
}

/// A fingerprinted feed.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Weak validator for [`FeedSnapshot::body`].
    pub etag: String,
    /// Serialized body.
    pub body: FeedBody,
}

impl FeedSnapshot {
    /// Fingerprint `body`. Serialization failure falls back to a random,
    /// always-miss validator so delivery still succeeds.
    pub fn new(body: FeedBody) -> Self {
        let etag = match serde_json::to_vec(&body) {
            Ok(bytes) => fingerprint(&bytes),
            Err(e) => {
                warn!(error = %e, "Feed fingerprint failed, serving uncacheable validator");
                fallback_validator()
            }
        };
        Self { etag, body }
    }

    /// Whether the caller's `If-None-Match` header matches this snapshot.
    pub fn is_not_modified(&self, if_none_match: Option<&str>) -> bool {
        is_not_modified(if_none_match, &self.etag)
    }
}

/// Clamp a requested feed size into `[1, MAX_FEED_LIMIT]`.
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT)
}

/// Weak validator `W/"<hex sha256>"` over the serialized bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("W/\"{}\"", hex::encode(Sha256::digest(bytes)))
}

/// Random validator that never matches a later request.
pub fn fallback_validator() -> String {
    format!("W/\"nocache-{}\"", Uuid::new_v4())
}

/// First comma-separated token of an `If-None-Match` header, trimmed.
pub fn first_validator(header: &str) -> Option<&str> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Exact comparison of the first `If-None-Match` token against `etag`.
pub fn is_not_modified(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match
        .and_then(first_validator)
        .is_some_and(|token| token == etag)
}

/// Fetch a liveblog and check that anonymous viewers may read it.
pub async fn require_readable(store: &dyn Store, liveblog_id: Uuid) -> Result<Liveblog, FeedError> {
    let liveblog = store
        .get_liveblog(liveblog_id)
        .await?
        .ok_or(FeedError::NotFound(liveblog_id))?;

    if !liveblog.is_readable() {
        return Err(FeedError::Forbidden(liveblog_id));
    }
    Ok(liveblog)
}

/// Load and fingerprint the feed of a readable liveblog.
pub async fn load_feed(
    store: &dyn Store,
    liveblog_id: Uuid,
    limit: i64,
) -> Result<FeedSnapshot, FeedError> {
    require_readable(store, liveblog_id).await?;

    let updates = store.list_published_updates(liveblog_id, limit).await?;
    let body = FeedBody {
        updates: updates
            .into_iter()
            .filter(Update::is_public)
            .map(FeedEntry::from)
            .collect(),
    };

    Ok(FeedSnapshot::new(body))
}
