// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL storage backend.
//!
//! Change notification relies on the `updates_change_notify` trigger, which
//! publishes every row change on the `liveline_updates` channel. A single
//! [`PgChangeListener`] task holds the only `LISTEN` connection and feeds the
//! store's [`ChangeHub`], so the number of upstream subscriptions stays at one
//! regardless of how many clients are streaming.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ReactionCount, ReactionRecord, Result, Store, StoreError, Transition, VoteAggregate,
    VoteRecord,
};
use crate::model::{
    ChangeEvent, Liveblog, PushKeys, PushSubscription, ReactionKind, SponsorSlot, Update, Widget,
};
use crate::relay::{ChangeHub, Subscription};

/// NOTIFY channel written by the `updates` trigger.
pub const UPDATES_CHANNEL: &str = "liveline_updates";

const UPDATE_COLUMNS: &str =
    "id, liveblog_id, content, status, pinned, scheduled_at, published_at, deleted_at";

const SPONSOR_COLUMNS: &str = "id, liveblog_id, name, status, starts_at, ends_at, priority, pinned";

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct LiveblogRow {
    id: Uuid,
    title: String,
    status: String,
    privacy: String,
    chat_webhook_url: Option<String>,
}

impl TryFrom<LiveblogRow> for Liveblog {
    type Error = StoreError;

    fn try_from(row: LiveblogRow) -> Result<Self> {
        Ok(Liveblog {
            id: row.id,
            title: row.title,
            status: row.status.parse().map_err(corrupt)?,
            privacy: row.privacy.parse().map_err(corrupt)?,
            chat_webhook_url: row.chat_webhook_url,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UpdateRow {
    id: Uuid,
    liveblog_id: Uuid,
    content: serde_json::Value,
    status: String,
    pinned: bool,
    scheduled_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<UpdateRow> for Update {
    type Error = StoreError;

    fn try_from(row: UpdateRow) -> Result<Self> {
        Ok(Update {
            id: row.id,
            liveblog_id: row.liveblog_id,
            content: row.content,
            status: row.status.parse().map_err(corrupt)?,
            pinned: row.pinned,
            scheduled_at: row.scheduled_at,
            published_at: row.published_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SponsorRow {
    id: Uuid,
    liveblog_id: Uuid,
    name: String,
    status: String,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    priority: i32,
    pinned: bool,
}

impl TryFrom<SponsorRow> for SponsorSlot {
    type Error = StoreError;

    fn try_from(row: SponsorRow) -> Result<Self> {
        Ok(SponsorSlot {
            id: row.id,
            liveblog_id: row.liveblog_id,
            name: row.name,
            status: row.status.parse().map_err(corrupt)?,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            priority: row.priority,
            pinned: row.pinned,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PushRow {
    liveblog_id: Uuid,
    endpoint: String,
    keys: Json<PushKeys>,
    user_agent: Option<String>,
    last_notified_at: Option<DateTime<Utc>>,
}

impl From<PushRow> for PushSubscription {
    fn from(row: PushRow) -> Self {
        PushSubscription {
            liveblog_id: row.liveblog_id,
            endpoint: row.endpoint,
            keys: row.keys.0,
            user_agent: row.user_agent,
            last_notified_at: row.last_notified_at,
        }
    }
}

fn corrupt(err: crate::model::ParseEnumError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    hub: ChangeHub,
    listener_ready: Arc<AtomicBool>,
}

impl PostgresStore {
    /// Create a store over an existing pool. Call [`PostgresStore::change_listener`]
    /// and run the listener before serving change streams.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: ChangeHub::new(),
            listener_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Hub fed by the change listener.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Build the listener task that feeds this store's hub.
    pub fn change_listener(&self) -> PgChangeListener {
        PgChangeListener {
            pool: self.pool.clone(),
            hub: self.hub.clone(),
            ready: self.listener_ready.clone(),
            shutdown: Arc::new(Notify::new()),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }

    async fn get_liveblog(&self, id: Uuid) -> Result<Option<Liveblog>> {
        let row = sqlx::query_as::<_, LiveblogRow>(
            r#"
            SELECT id, title, status, privacy, chat_webhook_url
            FROM liveblogs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Liveblog::try_from).transpose()
    }

    async fn get_update(&self, id: Uuid) -> Result<Option<Update>> {
        let row = sqlx::query_as::<_, UpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Update::try_from).transpose()
    }

    async fn get_widget(&self, id: Uuid) -> Result<Option<Widget>> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, liveblog_id, kind FROM widgets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, liveblog_id, kind)| Widget {
            id,
            liveblog_id,
            kind,
        }))
    }

    async fn list_published_updates(&self, liveblog_id: Uuid, limit: i64) -> Result<Vec<Update>> {
        let rows = sqlx::query_as::<_, UpdateRow>(&format!(
            r#"
            SELECT {UPDATE_COLUMNS}
            FROM updates
            WHERE liveblog_id = $1
              AND status = 'published'
              AND deleted_at IS NULL
            ORDER BY pinned DESC, published_at DESC NULLS LAST, id DESC
            LIMIT $2
            "#
        ))
        .bind(liveblog_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn list_due_updates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Update>> {
        let rows = sqlx::query_as::<_, UpdateRow>(&format!(
            r#"
            SELECT {UPDATE_COLUMNS}
            FROM updates
            WHERE status = 'scheduled'
              AND scheduled_at <= $1
              AND deleted_at IS NULL
            ORDER BY scheduled_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn list_due_sponsor_slots(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SponsorSlot>> {
        let rows = sqlx::query_as::<_, SponsorRow>(&format!(
            r#"
            SELECT {SPONSOR_COLUMNS}
            FROM sponsor_slots
            WHERE (status = 'scheduled' AND (starts_at IS NULL OR starts_at <= $1))
               OR (status IN ('scheduled', 'active') AND ends_at IS NOT NULL AND ends_at <= $1)
            ORDER BY COALESCE(ends_at, starts_at) NULLS FIRST, id
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn list_visible_sponsor_slots(
        &self,
        liveblog_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SponsorSlot>> {
        let rows = sqlx::query_as::<_, SponsorRow>(&format!(
            r#"
            SELECT {SPONSOR_COLUMNS}
            FROM sponsor_slots
            WHERE liveblog_id = $1
              AND status = 'active'
              AND (starts_at IS NULL OR starts_at <= $2)
              AND (ends_at IS NULL OR ends_at > $2)
            ORDER BY pinned DESC, priority DESC, id
            "#
        ))
        .bind(liveblog_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn apply_transition(&self, transition: &Transition) -> Result<u64> {
        let result = match transition {
            Transition::PublishUpdate {
                update_id,
                published_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE updates
                    SET status = 'published', published_at = $2
                    WHERE id = $1
                      AND status = 'scheduled'
                      AND deleted_at IS NULL
                    "#,
                )
                .bind(update_id)
                .bind(published_at)
                .execute(&self.pool)
                .await?
            }
            Transition::Sponsor {
                slot_id,
                expected,
                next,
            } => {
                let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
                sqlx::query(
                    r#"
                    UPDATE sponsor_slots
                    SET status = $2, updated_at = NOW()
                    WHERE id = $1
                      AND status = ANY($3)
                    "#,
                )
                .bind(slot_id)
                .bind(next.as_str())
                .bind(&expected)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn reaction_exists(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM reactions
                WHERE target_id = $1 AND device_hash = $2 AND kind = $3
            )
            "#,
        )
        .bind(target_id)
        .bind(device_hash)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn insert_reaction(&self, record: &ReactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reactions (target_id, device_hash, kind, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.target_id)
        .bind(&record.device_hash)
        .bind(record.kind.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_reaction(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM reactions WHERE target_id = $1 AND device_hash = $2 AND kind = $3",
        )
        .bind(target_id)
        .bind(device_hash)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reaction_counts(&self, target_ids: &[Uuid]) -> Result<Vec<ReactionCount>> {
        let rows: Vec<(Uuid, String, i64)> = sqlx::query_as(
            r#"
            SELECT target_id, kind, COUNT(*) AS count
            FROM reactions
            WHERE target_id = ANY($1)
            GROUP BY target_id, kind
            "#,
        )
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(target_id, kind, count)| {
                Ok(ReactionCount {
                    target_id,
                    kind: kind.parse().map_err(corrupt)?,
                    count,
                })
            })
            .collect()
    }

    async fn device_reactions(
        &self,
        target_ids: &[Uuid],
        device_hash: &str,
    ) -> Result<Vec<(Uuid, ReactionKind)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT target_id, kind FROM reactions WHERE target_id = ANY($1) AND device_hash = $2",
        )
        .bind(target_ids)
        .bind(device_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(target_id, kind)| Ok((target_id, kind.parse().map_err(corrupt)?)))
            .collect()
    }

    async fn vote_exists(&self, target_id: Uuid, device_hash: &str) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM votes WHERE target_id = $1 AND device_hash = $2)",
        )
        .bind(target_id)
        .bind(device_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn insert_vote(&self, record: &VoteRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (target_id, device_hash, value, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.target_id)
        .bind(&record.device_hash)
        .bind(record.value)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn vote_aggregate(&self, target_id: Uuid) -> Result<VoteAggregate> {
        let (mean, total): (f64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(AVG(value)::FLOAT8, 0) AS mean, COUNT(*) AS total
            FROM votes
            WHERE target_id = $1
            "#,
        )
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(VoteAggregate { mean, total })
    }

    async fn list_push_subscriptions(
        &self,
        liveblog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PushSubscription>> {
        let rows = sqlx::query_as::<_, PushRow>(
            r#"
            SELECT liveblog_id, endpoint, keys, user_agent, last_notified_at
            FROM push_subscriptions
            WHERE liveblog_id = $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(liveblog_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PushSubscription::from).collect())
    }

    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO push_subscriptions (liveblog_id, endpoint, keys, user_agent)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (liveblog_id, endpoint) DO UPDATE
            SET keys = EXCLUDED.keys,
                user_agent = EXCLUDED.user_agent
            "#,
        )
        .bind(subscription.liveblog_id)
        .bind(&subscription.endpoint)
        .bind(Json(&subscription.keys))
        .bind(&subscription.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_push_subscription(&self, liveblog_id: Uuid, endpoint: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE liveblog_id = $1 AND endpoint = $2")
                .bind(liveblog_id)
                .bind(endpoint)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn touch_push_subscription(
        &self,
        liveblog_id: Uuid,
        endpoint: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE push_subscriptions
            SET last_notified_at = $3
            WHERE liveblog_id = $1 AND endpoint = $2
            "#,
        )
        .bind(liveblog_id)
        .bind(endpoint)
        .bind(notified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn subscribe_changes(&self, liveblog_id: Uuid) -> Result<Subscription> {
        if !self.listener_ready.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "change listener is not connected".to_string(),
            ));
        }
        Ok(self.hub.subscribe(liveblog_id))
    }
}

// ============================================================================
// Change Listener
// ============================================================================

/// Background task holding the `LISTEN liveline_updates` connection.
pub struct PgChangeListener {
    pool: PgPool,
    hub: ChangeHub,
    ready: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    reconnect_delay: Duration,
}

impl PgChangeListener {
    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the listen loop until shutdown, reconnecting after failures.
    pub async fn run(self) {
        info!(channel = UPDATES_CHANNEL, "Change listener started");

        loop {
            match self.connect().await {
                Ok(mut listener) => {
                    self.ready.store(true, Ordering::SeqCst);
                    info!(channel = UPDATES_CHANNEL, "Change listener connected");

                    loop {
                        tokio::select! {
                            biased;

                            _ = self.shutdown.notified() => {
                                self.ready.store(false, Ordering::SeqCst);
                                info!("Change listener shutting down");
                                return;
                            }

                            notification = listener.recv() => match notification {
                                Ok(notification) => self.forward(notification.payload()),
                                Err(e) => {
                                    self.ready.store(false, Ordering::SeqCst);
                                    warn!(error = %e, "Change listener connection lost");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to start change listener");
                }
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Change listener shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn connect(&self) -> std::result::Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(UPDATES_CHANNEL).await?;
        Ok(listener)
    }

    fn forward(&self, payload: &str) {
        match serde_json::from_str::<ChangeEvent>(payload) {
            Ok(event) => {
                let delivered = self.hub.publish(event);
                debug!(delivered, "Forwarded update change");
            }
            Err(e) => warn!(error = %e, "Dropping malformed change notification"),
        }
    }
}
