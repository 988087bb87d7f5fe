// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test fixtures for liveline-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use liveline_core::fanout::mock::{RecordingChatNotifier, RecordingPushSender};
use liveline_core::fanout::Fanout;
use liveline_core::model::{
    HOT_TAKE_WIDGET, Liveblog, LiveblogStatus, Privacy, PushKeys, PushSubscription, ReactionKind,
    SponsorSlot, SponsorStatus, Update, UpdateStatus, Widget,
};
use liveline_core::publish::Publisher;
use liveline_core::relay::Subscription;
use liveline_core::store::{
    MemoryStore, ReactionCount, ReactionRecord, Result, Store, Transition, VoteAggregate,
    VoteRecord,
};

// ============================================================================
// Fixtures
// ============================================================================

pub fn liveblog(status: LiveblogStatus, privacy: Privacy) -> Liveblog {
    Liveblog {
        id: Uuid::new_v4(),
        title: "Cup Final".to_string(),
        status,
        privacy,
        chat_webhook_url: Some("https://hooks.example.com/T000/B000".to_string()),
    }
}

pub fn active_liveblog() -> Liveblog {
    liveblog(LiveblogStatus::Active, Privacy::Public)
}

pub fn published_update(liveblog_id: Uuid, secs_ago: i64) -> Update {
    Update {
        id: Uuid::new_v4(),
        liveblog_id,
        content: json!({"type": "text", "text": format!("posted {secs_ago}s ago")}),
        status: UpdateStatus::Published,
        pinned: false,
        scheduled_at: None,
        published_at: Some(Utc::now() - Duration::seconds(secs_ago)),
        deleted_at: None,
    }
}

pub fn scheduled_update(liveblog_id: Uuid, scheduled_at: DateTime<Utc>) -> Update {
    Update {
        id: Uuid::new_v4(),
        liveblog_id,
        content: json!({"type": "text", "text": "scheduled"}),
        status: UpdateStatus::Scheduled,
        pinned: false,
        scheduled_at: Some(scheduled_at),
        published_at: None,
        deleted_at: None,
    }
}

pub fn sponsor_slot(
    liveblog_id: Uuid,
    status: SponsorStatus,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) -> SponsorSlot {
    SponsorSlot {
        id: Uuid::new_v4(),
        liveblog_id,
        name: "Acme".to_string(),
        status,
        starts_at,
        ends_at,
        priority: 0,
        pinned: false,
    }
}

pub fn hot_take(liveblog_id: Uuid) -> Widget {
    Widget {
        id: Uuid::new_v4(),
        liveblog_id,
        kind: HOT_TAKE_WIDGET.to_string(),
    }
}

pub fn push_subscription(liveblog_id: Uuid, endpoint: &str) -> PushSubscription {
    PushSubscription {
        liveblog_id,
        endpoint: endpoint.to_string(),
        keys: PushKeys {
            p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA".to_string(),
            auth: "tBHItJI5svbpez7KI4CCXg".to_string(),
        },
        user_agent: Some("Mozilla/5.0".to_string()),
        last_notified_at: None,
    }
}

/// Memory store with one active public liveblog already seeded.
pub async fn seeded_store() -> (Arc<MemoryStore>, Liveblog) {
    let store = Arc::new(MemoryStore::new());
    let liveblog = active_liveblog();
    store.put_liveblog(liveblog.clone()).await;
    (store, liveblog)
}

/// Publish pipeline wired to recording channels.
pub struct PublishHarness {
    pub publisher: Publisher,
    pub chat: Arc<RecordingChatNotifier>,
    pub push: Arc<RecordingPushSender>,
}

pub fn publish_harness(store: Arc<dyn Store>, chat: RecordingChatNotifier) -> PublishHarness {
    let chat = Arc::new(chat);
    let push = Arc::new(RecordingPushSender::new());
    let fanout = Fanout::new(store.clone(), chat.clone(), push.clone(), 8);
    PublishHarness {
        publisher: Publisher::new(store, fanout),
        chat,
        push,
    }
}

// ============================================================================
// Racing store
// ============================================================================

/// Store wrapper that reports every ledger row as missing, so the ledger
/// always attempts an insert. Models two concurrent requests that both
/// passed the existence check.
pub struct RacingStore {
    inner: Arc<MemoryStore>,
}

impl RacingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Store for RacingStore {
    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    async fn get_liveblog(&self, id: Uuid) -> Result<Option<Liveblog>> {
        self.inner.get_liveblog(id).await
    }

    async fn get_update(&self, id: Uuid) -> Result<Option<Update>> {
        self.inner.get_update(id).await
    }

    async fn get_widget(&self, id: Uuid) -> Result<Option<Widget>> {
        self.inner.get_widget(id).await
    }

    async fn list_published_updates(&self, liveblog_id: Uuid, limit: i64) -> Result<Vec<Update>> {
        self.inner.list_published_updates(liveblog_id, limit).await
    }

    async fn list_due_updates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Update>> {
        self.inner.list_due_updates(now, limit).await
    }

    async fn list_due_sponsor_slots(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SponsorSlot>> {
        self.inner.list_due_sponsor_slots(now, limit).await
    }

    async fn list_visible_sponsor_slots(
        &self,
        liveblog_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SponsorSlot>> {
        self.inner.list_visible_sponsor_slots(liveblog_id, now).await
    }

    async fn apply_transition(&self, transition: &Transition) -> Result<u64> {
        self.inner.apply_transition(transition).await
    }

    async fn reaction_exists(&self, _: Uuid, _: &str, _: ReactionKind) -> Result<bool> {
        Ok(false)
    }

    async fn insert_reaction(&self, record: &ReactionRecord) -> Result<()> {
        self.inner.insert_reaction(record).await
    }

    async fn delete_reaction(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<u64> {
        self.inner.delete_reaction(target_id, device_hash, kind).await
    }

    async fn reaction_counts(&self, target_ids: &[Uuid]) -> Result<Vec<ReactionCount>> {
        self.inner.reaction_counts(target_ids).await
    }

    async fn device_reactions(
        &self,
        target_ids: &[Uuid],
        device_hash: &str,
    ) -> Result<Vec<(Uuid, ReactionKind)>> {
        self.inner.device_reactions(target_ids, device_hash).await
    }

    async fn vote_exists(&self, _: Uuid, _: &str) -> Result<bool> {
        Ok(false)
    }

    async fn insert_vote(&self, record: &VoteRecord) -> Result<()> {
        self.inner.insert_vote(record).await
    }

    async fn vote_aggregate(&self, target_id: Uuid) -> Result<VoteAggregate> {
        self.inner.vote_aggregate(target_id).await
    }

    async fn list_push_subscriptions(
        &self,
        liveblog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PushSubscription>> {
        self.inner.list_push_subscriptions(liveblog_id, limit).await
    }

    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        self.inner.upsert_push_subscription(subscription).await
    }

    async fn delete_push_subscription(&self, liveblog_id: Uuid, endpoint: &str) -> Result<u64> {
        self.inner.delete_push_subscription(liveblog_id, endpoint).await
    }

    async fn touch_push_subscription(
        &self,
        liveblog_id: Uuid,
        endpoint: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .touch_push_subscription(liveblog_id, endpoint, notified_at)
            .await
    }

    async fn subscribe_changes(&self, liveblog_id: Uuid) -> Result<Subscription> {
        self.inner.subscribe_changes(liveblog_id).await
    }
}
