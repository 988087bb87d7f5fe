// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage gateway interface and backends.
//!
//! All persistent state sits behind [`Store`]. Mutual exclusion is expressed
//! only as conditional writes: [`Store::apply_transition`] updates the rows
//! matching a status guard and reports how many actually changed, so a sweep
//! racing with another sweep (or with an editor) loses with a zero count
//! instead of clobbering.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::{PgChangeListener, PostgresStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Liveblog, PushSubscription, ReactionKind, SponsorSlot, SponsorStatus, Update, Widget,
};
use crate::relay::Subscription;

/// Storage errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An insert collided with a unique constraint.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped onto the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backend is not reachable or not ready.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation(
                db_err
                    .constraint()
                    .map(str::to_string)
                    .unwrap_or_else(|| db_err.message().to_string()),
            ),
            _ => StoreError::Database(err),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A guarded status change: the optimistic-concurrency primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `scheduled → published`, guarded by `status = scheduled AND deleted_at IS NULL`.
    PublishUpdate {
        /// Update to publish.
        update_id: Uuid,
        /// Value stamped into `published_at`.
        published_at: DateTime<Utc>,
    },
    /// Move a sponsor slot to `next`, guarded by `status IN (expected)`.
    Sponsor {
        /// Slot to move.
        slot_id: Uuid,
        /// Statuses the slot must currently have.
        expected: Vec<SponsorStatus>,
        /// Status to write.
        next: SponsorStatus,
    },
}

/// One stored reaction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionRecord {
    /// Reacted-to update.
    pub target_id: Uuid,
    /// Anonymous device hash.
    pub device_hash: String,
    /// Reaction kind.
    pub kind: ReactionKind,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

/// One stored vote row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    /// Voted-on widget.
    pub target_id: Uuid,
    /// Anonymous device hash.
    pub device_hash: String,
    /// Vote value, already clamped to 0..=100.
    pub value: i32,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

/// Count of one reaction kind on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCount {
    /// Target update.
    pub target_id: Uuid,
    /// Reaction kind.
    pub kind: ReactionKind,
    /// Number of rows.
    pub count: i64,
}

/// Aggregate of all votes on a target, recomputed from rows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoteAggregate {
    /// Arithmetic mean of all values (0 when there are none).
    pub mean: f64,
    /// Number of votes.
    pub total: i64,
}

/// Storage gateway used by every core component.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the backend.
    async fn health_check(&self) -> Result<bool>;

    // ---- reads -------------------------------------------------------------

    /// Fetch a liveblog.
    async fn get_liveblog(&self, id: Uuid) -> Result<Option<Liveblog>>;

    /// Fetch an update, including drafts and tombstones.
    async fn get_update(&self, id: Uuid) -> Result<Option<Update>>;

    /// Fetch a widget.
    async fn get_widget(&self, id: Uuid) -> Result<Option<Widget>>;

    /// Publicly visible updates of a liveblog, ordered
    /// `pinned desc, published_at desc, id desc`, at most `limit`.
    async fn list_published_updates(&self, liveblog_id: Uuid, limit: i64) -> Result<Vec<Update>>;

    /// Scheduled, non-deleted updates with `scheduled_at <= now`, oldest first.
    async fn list_due_updates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Update>>;

    /// Slots due for a lifecycle move at `now`: `scheduled` slots whose window
    /// has opened, plus `scheduled`/`active` slots whose window has closed.
    /// Ordered by the boundary that made them due, earliest first.
    async fn list_due_sponsor_slots(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SponsorSlot>>;

    /// Active slots of a liveblog whose window contains `now`, ordered
    /// `pinned desc, priority desc`.
    async fn list_visible_sponsor_slots(
        &self,
        liveblog_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SponsorSlot>>;

    // ---- conditional writes ------------------------------------------------

    /// Apply a guarded transition; returns the number of rows changed (0 or 1).
    async fn apply_transition(&self, transition: &Transition) -> Result<u64>;

    // ---- reaction ledger ---------------------------------------------------

    /// Whether a `(target, device, kind)` row exists.
    async fn reaction_exists(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<bool>;

    /// Insert a reaction row. Fails with [`StoreError::UniqueViolation`] on a duplicate.
    async fn insert_reaction(&self, record: &ReactionRecord) -> Result<()>;

    /// Delete a reaction row; returns rows removed.
    async fn delete_reaction(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<u64>;

    /// Per-kind counts for the given targets. Kinds with no rows are omitted.
    async fn reaction_counts(&self, target_ids: &[Uuid]) -> Result<Vec<ReactionCount>>;

    /// `(target, kind)` pairs the device currently has active.
    async fn device_reactions(
        &self,
        target_ids: &[Uuid],
        device_hash: &str,
    ) -> Result<Vec<(Uuid, ReactionKind)>>;

    // ---- vote ledger -------------------------------------------------------

    /// Whether the device already voted on the target.
    async fn vote_exists(&self, target_id: Uuid, device_hash: &str) -> Result<bool>;

    /// Insert a vote row. Fails with [`StoreError::UniqueViolation`] on a duplicate.
    async fn insert_vote(&self, record: &VoteRecord) -> Result<()>;

    /// Mean and count over every vote row of the target.
    async fn vote_aggregate(&self, target_id: Uuid) -> Result<VoteAggregate>;

    // ---- push subscriptions ------------------------------------------------

    /// Subscriptions of a liveblog, at most `limit`.
    async fn list_push_subscriptions(
        &self,
        liveblog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PushSubscription>>;

    /// Insert or refresh a subscription, unique on `(liveblog_id, endpoint)`.
    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()>;

    /// Remove a subscription; returns rows removed.
    async fn delete_push_subscription(&self, liveblog_id: Uuid, endpoint: &str) -> Result<u64>;

    /// Record a successful delivery.
    async fn touch_push_subscription(
        &self,
        liveblog_id: Uuid,
        endpoint: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<()>;

    // ---- change notification ----------------------------------------------

    /// Open a change subscription for one liveblog's updates.
    ///
    /// Returns only once the subscription is confirmed by the backend.
    async fn subscribe_changes(&self, liveblog_id: Uuid) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_is_database_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::UniqueViolation("reactions_pkey".to_string());
        assert_eq!(err.to_string(), "Unique constraint violated: reactions_pkey");
        let err = StoreError::Unavailable("listener not connected".to_string());
        assert_eq!(err.to_string(), "Store unavailable: listener not connected");
    }
}
