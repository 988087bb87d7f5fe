// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engagement ledger: anonymous reactions and hot-take votes.
//!
//! Rows are keyed by a one-way device hash and are only ever inserted or
//! deleted. The existence check that precedes a write is not atomic with it;
//! the storage unique constraint is the real backstop, and a
//! [`StoreError::UniqueViolation`] on insert is treated as "already present".
//! Aggregates are recomputed from rows after every write.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use futures::future::try_join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::feed::{self, FeedError};
use crate::model::{HOT_TAKE_WIDGET, Liveblog, ReactionKind};
use crate::store::{ReactionRecord, Store, StoreError, VoteRecord};

/// Maximum number of update ids accepted by a summary request.
pub const MAX_SUMMARY_IDS: usize = 100;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or semantically invalid field.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The liveblog is not open for engagement.
    #[error("Liveblog {0} does not accept engagement")]
    Forbidden(Uuid),

    /// Target missing or not owned by the claimed liveblog.
    #[error("{0} not found")]
    NotFound(String),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::ServerError,
        }
    }

    /// Wire code for this error.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl From<FeedError> for LedgerError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::NotFound(id) => Self::NotFound(format!("Liveblog {id}")),
            FeedError::Forbidden(id) => Self::Forbidden(id),
            FeedError::Store(e) => Self::Store(e),
        }
    }
}

type Result<T> = std::result::Result<T, LedgerError>;

/// One-way anonymous identifier: hex SHA-256 of the device id followed by
/// the user agent.
pub fn device_hash(device_id: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fetch a liveblog and check that it is active and public or unlisted.
pub async fn require_engageable(store: &dyn Store, liveblog_id: Uuid) -> Result<Liveblog> {
    let liveblog = store
        .get_liveblog(liveblog_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("Liveblog {liveblog_id}")))?;

    if !liveblog.accepts_engagement() {
        return Err(LedgerError::Forbidden(liveblog_id));
    }
    Ok(liveblog)
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::InvalidPayload(format!("{field} is required")))
}

// ============================================================================
// Reactions
// ============================================================================

/// Raw reaction toggle input, as received from a viewer.
#[derive(Debug, Clone, Default)]
pub struct ReactionRequest {
    /// Liveblog the viewer claims the update belongs to.
    pub liveblog_id: Uuid,
    /// Update to react to.
    pub update_id: Option<String>,
    /// Reaction kind name.
    pub kind: Option<String>,
    /// Client-generated device identifier.
    pub device_id: Option<String>,
    /// Request user agent.
    pub user_agent: Option<String>,
}

/// Per-kind counts and the device's active kinds for one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionState {
    /// Count per kind; every kind is present.
    pub counts: BTreeMap<ReactionKind, i64>,
    /// Whether the device has each kind active; every kind is present.
    pub active: BTreeMap<ReactionKind, bool>,
}

impl Default for ReactionState {
    fn default() -> Self {
        Self {
            counts: ReactionKind::ALL.iter().map(|k| (*k, 0)).collect(),
            active: ReactionKind::ALL.iter().map(|k| (*k, false)).collect(),
        }
    }
}

/// Batch summary keyed by update id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReactionSummary {
    /// Counts per update.
    pub counts: BTreeMap<Uuid, BTreeMap<ReactionKind, i64>>,
    /// Active kinds per update for the requesting device.
    pub active: BTreeMap<Uuid, BTreeMap<ReactionKind, bool>>,
}

async fn load_states(
    store: &dyn Store,
    target_ids: &[Uuid],
    device_hash: Option<&str>,
) -> Result<BTreeMap<Uuid, ReactionState>> {
    let mut states: BTreeMap<Uuid, ReactionState> = target_ids
        .iter()
        .map(|id| (*id, ReactionState::default()))
        .collect();
    if target_ids.is_empty() {
        return Ok(states);
    }

    for row in store.reaction_counts(target_ids).await? {
        if let Some(state) = states.get_mut(&row.target_id) {
            state.counts.insert(row.kind, row.count);
        }
    }

    if let Some(hash) = device_hash {
        for (target_id, kind) in store.device_reactions(target_ids, hash).await? {
            if let Some(state) = states.get_mut(&target_id) {
                state.active.insert(kind, true);
            }
        }
    }

    Ok(states)
}

/// Toggle one reaction: delete it if the device has it, insert it otherwise.
///
/// Returns the post-toggle aggregate for the update.
#[instrument(skip(store, request), fields(liveblog_id = %request.liveblog_id))]
pub async fn toggle_reaction(store: &dyn Store, request: &ReactionRequest) -> Result<ReactionState> {
    let update_id = required(&request.update_id, "updateId")?;
    let update_id = Uuid::parse_str(update_id)
        .map_err(|_| LedgerError::InvalidPayload("updateId is not a valid id".to_string()))?;
    let kind: ReactionKind = required(&request.kind, "type")?
        .parse()
        .map_err(|e: crate::model::ParseEnumError| LedgerError::InvalidPayload(e.to_string()))?;
    let device_id = required(&request.device_id, "deviceId")?;
    let hash = device_hash(device_id, request.user_agent.as_deref().unwrap_or_default());

    require_engageable(store, request.liveblog_id).await?;

    let update = store
        .get_update(update_id)
        .await?
        .filter(|u| u.liveblog_id == request.liveblog_id && u.is_public())
        .ok_or_else(|| LedgerError::NotFound(format!("Update {update_id}")))?;

    if store.reaction_exists(update.id, &hash, kind).await? {
        store.delete_reaction(update.id, &hash, kind).await?;
        debug!(update_id = %update.id, kind = %kind, "Reaction removed");
    } else {
        let record = ReactionRecord {
            target_id: update.id,
            device_hash: hash.clone(),
            kind,
            created_at: Utc::now(),
        };
        match store.insert_reaction(&record).await {
            Ok(()) => debug!(update_id = %update.id, kind = %kind, "Reaction added"),
            Err(StoreError::UniqueViolation(constraint)) => {
                debug!(update_id = %update.id, %constraint, "Concurrent duplicate reaction");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut states = load_states(store, &[update.id], Some(&hash)).await?;
    Ok(states.remove(&update.id).unwrap_or_default())
}

/// Parse a comma-separated list of update ids.
pub fn parse_update_ids(raw: &str) -> Result<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let id = Uuid::parse_str(token)
            .map_err(|_| LedgerError::BadRequest(format!("'{token}' is not a valid update id")))?;
        if seen.insert(id) {
            ids.push(id);
        }
    }

    if ids.len() > MAX_SUMMARY_IDS {
        return Err(LedgerError::BadRequest(format!(
            "at most {MAX_SUMMARY_IDS} update ids per request"
        )));
    }
    Ok(ids)
}

/// Counts and device-active maps for several updates of one liveblog.
///
/// Updates that are not publicly visible in the liveblog are omitted.
#[instrument(skip(store, update_ids, device_id, user_agent), fields(requested = update_ids.len()))]
pub async fn reaction_summary(
    store: &dyn Store,
    liveblog_id: Uuid,
    update_ids: &[Uuid],
    device_id: Option<&str>,
    user_agent: Option<&str>,
) -> Result<ReactionSummary> {
    feed::require_readable(store, liveblog_id).await?;

    let updates = try_join_all(update_ids.iter().map(|id| store.get_update(*id))).await?;
    let visible: Vec<Uuid> = updates
        .into_iter()
        .flatten()
        .filter(|u| u.liveblog_id == liveblog_id && u.is_public())
        .map(|u| u.id)
        .collect();

    let hash = device_id
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| device_hash(d, user_agent.unwrap_or_default()));

    let mut summary = ReactionSummary::default();
    for (id, state) in load_states(store, &visible, hash.as_deref()).await? {
        summary.counts.insert(id, state.counts);
        summary.active.insert(id, state.active);
    }
    Ok(summary)
}

// ============================================================================
// Votes
// ============================================================================

/// Raw vote input, as received from a viewer.
#[derive(Debug, Clone, Default)]
pub struct VoteRequest {
    /// Hot-take widget being voted on.
    pub widget_id: Uuid,
    /// Requested value; clamped to 0..=100 and rounded.
    pub value: Option<f64>,
    /// Client-generated device identifier.
    pub device_id: Option<String>,
    /// Request user agent.
    pub user_agent: Option<String>,
}

/// Result of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoteOutcome {
    /// Mean of all votes, one decimal place.
    pub mean: f64,
    /// Number of votes.
    pub total: i64,
    /// The device had already voted; nothing was written.
    pub duplicate: bool,
}

/// Clamp to `[0, 100]` and round to the nearest integer.
pub fn clamp_vote(value: f64) -> i32 {
    value.clamp(0.0, 100.0).round() as i32
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Record the first vote of a device on a hot-take widget.
///
/// Repeat votes report `duplicate: true` and leave the aggregate untouched.
#[instrument(skip(store, request), fields(widget_id = %request.widget_id))]
pub async fn cast_vote(store: &dyn Store, request: &VoteRequest) -> Result<VoteOutcome> {
    let value = request
        .value
        .ok_or_else(|| LedgerError::InvalidPayload("value is required".to_string()))?;
    if !value.is_finite() {
        return Err(LedgerError::InvalidPayload("value must be a number".to_string()));
    }
    let device_id = required(&request.device_id, "deviceId")?;
    let hash = device_hash(device_id, request.user_agent.as_deref().unwrap_or_default());

    let widget = store
        .get_widget(request.widget_id)
        .await?
        .filter(|w| w.kind == HOT_TAKE_WIDGET)
        .ok_or_else(|| LedgerError::NotFound(format!("Widget {}", request.widget_id)))?;

    require_engageable(store, widget.liveblog_id).await?;

    let duplicate = if store.vote_exists(widget.id, &hash).await? {
        true
    } else {
        let record = VoteRecord {
            target_id: widget.id,
            device_hash: hash,
            value: clamp_vote(value),
            created_at: Utc::now(),
        };
        match store.insert_vote(&record).await {
            Ok(()) => false,
            Err(StoreError::UniqueViolation(_)) => true,
            Err(e) => return Err(e.into()),
        }
    };

    let aggregate = store.vote_aggregate(widget.id).await?;
    info!(
        widget_id = %widget.id,
        duplicate,
        total = aggregate.total,
        "Vote processed"
    );

    Ok(VoteOutcome {
        mean: round_one_decimal(aggregate.mean),
        total: aggregate.total,
        duplicate,
    })
}
