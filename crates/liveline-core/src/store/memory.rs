// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage backend.
//!
//! Mirrors the Postgres backend's semantics (ordering, status guards, unique
//! constraints, change events) without a database. Used by tests and by
//! `LIVELINE_STORE=memory` for local development.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ReactionCount, ReactionRecord, Result, Store, StoreError, Transition, VoteAggregate,
    VoteRecord,
};
use crate::model::{
    ChangeEvent, ChangeKind, Liveblog, PushSubscription, ReactionKind, SponsorSlot,
    SponsorStatus, Update, UpdateStatus, Widget,
};
use crate::relay::{ChangeHub, Subscription};

#[derive(Default)]
struct State {
    liveblogs: HashMap<Uuid, Liveblog>,
    updates: HashMap<Uuid, Update>,
    sponsor_slots: HashMap<Uuid, SponsorSlot>,
    widgets: HashMap<Uuid, Widget>,
    reactions: BTreeMap<(Uuid, String, ReactionKind), DateTime<Utc>>,
    votes: BTreeMap<(Uuid, String), (i32, DateTime<Utc>)>,
    push_subscriptions: BTreeMap<(Uuid, String), PushSubscription>,
}

/// In-memory [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    hub: ChangeHub,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub the store publishes update changes to.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Simulate a backend outage: every operation fails with
    /// [`StoreError::Unavailable`] while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    /// Insert or replace a liveblog.
    pub async fn put_liveblog(&self, liveblog: Liveblog) {
        self.state.lock().await.liveblogs.insert(liveblog.id, liveblog);
    }

    /// Insert or replace an update, emitting the matching change event.
    pub async fn put_update(&self, update: Update) {
        let mut state = self.state.lock().await;
        let old = state.updates.insert(update.id, update.clone());
        let event = match old {
            Some(old) => change(ChangeKind::Update, Some(&update), Some(&old)),
            None => change(ChangeKind::Insert, Some(&update), None),
        };
        self.hub.publish(event);
    }

    /// Hard-delete an update, emitting a delete event.
    pub async fn remove_update(&self, id: Uuid) -> Option<Update> {
        let mut state = self.state.lock().await;
        let removed = state.updates.remove(&id)?;
        self.hub
            .publish(change(ChangeKind::Delete, None, Some(&removed)));
        Some(removed)
    }

    /// Insert or replace a sponsor slot.
    pub async fn put_sponsor_slot(&self, slot: SponsorSlot) {
        self.state.lock().await.sponsor_slots.insert(slot.id, slot);
    }

    /// Fetch a sponsor slot.
    pub async fn sponsor_slot(&self, id: Uuid) -> Option<SponsorSlot> {
        self.state.lock().await.sponsor_slots.get(&id).cloned()
    }

    /// Insert or replace a widget.
    pub async fn put_widget(&self, widget: Widget) {
        self.state.lock().await.widgets.insert(widget.id, widget);
    }
}

fn change(kind: ChangeKind, new: Option<&Update>, old: Option<&Update>) -> ChangeEvent {
    let liveblog_id = new.or(old).map(|u| u.liveblog_id).unwrap_or_default();
    ChangeEvent {
        liveblog_id,
        event: kind,
        new: new.and_then(|u| serde_json::to_value(u).ok()),
        old: old.and_then(|u| serde_json::to_value(u).ok()),
    }
}

fn take_limit<T>(items: impl Iterator<Item = T>, limit: i64) -> Vec<T> {
    items.take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX)).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<bool> {
        self.check_online()?;
        Ok(true)
    }

    async fn get_liveblog(&self, id: Uuid) -> Result<Option<Liveblog>> {
        self.check_online()?;
        Ok(self.state.lock().await.liveblogs.get(&id).cloned())
    }

    async fn get_update(&self, id: Uuid) -> Result<Option<Update>> {
        self.check_online()?;
        Ok(self.state.lock().await.updates.get(&id).cloned())
    }

    async fn get_widget(&self, id: Uuid) -> Result<Option<Widget>> {
        self.check_online()?;
        Ok(self.state.lock().await.widgets.get(&id).cloned())
    }

    async fn list_published_updates(&self, liveblog_id: Uuid, limit: i64) -> Result<Vec<Update>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut updates: Vec<Update> = state
            .updates
            .values()
            .filter(|u| u.liveblog_id == liveblog_id && u.is_public())
            .cloned()
            .collect();
        // Postgres sorts NULL first under DESC; Option orders None lowest, so
        // reversing puts None last. Published rows always carry a timestamp.
        updates.sort_by_key(|u| Reverse((u.pinned, u.published_at, u.id)));
        Ok(take_limit(updates.into_iter(), limit))
    }

    async fn list_due_updates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Update>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut due: Vec<Update> = state
            .updates
            .values()
            .filter(|u| {
                u.status == UpdateStatus::Scheduled
                    && u.deleted_at.is_none()
                    && u.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|u| (u.scheduled_at, u.id));
        Ok(take_limit(due.into_iter(), limit))
    }

    async fn list_due_sponsor_slots(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SponsorSlot>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut slots: Vec<SponsorSlot> = state
            .sponsor_slots
            .values()
            .filter(|s| {
                let opened = s.status == SponsorStatus::Scheduled
                    && s.starts_at.is_none_or(|start| start <= now);
                let closed = matches!(s.status, SponsorStatus::Scheduled | SponsorStatus::Active)
                    && s.ends_at.is_some_and(|end| end <= now);
                opened || closed
            })
            .cloned()
            .collect();
        // Option orders None first, matching NULLS FIRST.
        slots.sort_by_key(|s| (s.ends_at.or(s.starts_at), s.id));
        Ok(take_limit(slots.into_iter(), limit))
    }

    async fn list_visible_sponsor_slots(
        &self,
        liveblog_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SponsorSlot>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut slots: Vec<SponsorSlot> = state
            .sponsor_slots
            .values()
            .filter(|s| s.liveblog_id == liveblog_id && s.is_visible_at(now))
            .cloned()
            .collect();
        slots.sort_by_key(|s| (Reverse(s.pinned), Reverse(s.priority), s.id));
        Ok(slots)
    }

    async fn apply_transition(&self, transition: &Transition) -> Result<u64> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        match transition {
            Transition::PublishUpdate {
                update_id,
                published_at,
            } => {
                let Some(update) = state.updates.get_mut(update_id) else {
                    return Ok(0);
                };
                if update.status != UpdateStatus::Scheduled || update.deleted_at.is_some() {
                    return Ok(0);
                }
                let old = update.clone();
                update.status = UpdateStatus::Published;
                update.published_at = Some(*published_at);
                let event = change(ChangeKind::Update, Some(&*update), Some(&old));
                self.hub.publish(event);
                Ok(1)
            }
            Transition::Sponsor {
                slot_id,
                expected,
                next,
            } => match state.sponsor_slots.get_mut(slot_id) {
                Some(slot) if expected.contains(&slot.status) => {
                    slot.status = *next;
                    Ok(1)
                }
                _ => Ok(0),
            },
        }
    }

    async fn reaction_exists(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<bool> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state
            .reactions
            .contains_key(&(target_id, device_hash.to_string(), kind)))
    }

    async fn insert_reaction(&self, record: &ReactionRecord) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let key = (record.target_id, record.device_hash.clone(), record.kind);
        if state.reactions.contains_key(&key) {
            return Err(StoreError::UniqueViolation("reactions_pkey".to_string()));
        }
        state.reactions.insert(key, record.created_at);
        Ok(())
    }

    async fn delete_reaction(
        &self,
        target_id: Uuid,
        device_hash: &str,
        kind: ReactionKind,
    ) -> Result<u64> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let removed = state
            .reactions
            .remove(&(target_id, device_hash.to_string(), kind));
        Ok(u64::from(removed.is_some()))
    }

    async fn reaction_counts(&self, target_ids: &[Uuid]) -> Result<Vec<ReactionCount>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut counts: BTreeMap<(Uuid, ReactionKind), i64> = BTreeMap::new();
        for (target_id, _, kind) in state.reactions.keys() {
            if target_ids.contains(target_id) {
                *counts.entry((*target_id, *kind)).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|((target_id, kind), count)| ReactionCount {
                target_id,
                kind,
                count,
            })
            .collect())
    }

    async fn device_reactions(
        &self,
        target_ids: &[Uuid],
        device_hash: &str,
    ) -> Result<Vec<(Uuid, ReactionKind)>> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state
            .reactions
            .keys()
            .filter(|(target_id, hash, _)| target_ids.contains(target_id) && hash == device_hash)
            .map(|(target_id, _, kind)| (*target_id, *kind))
            .collect())
    }

    async fn vote_exists(&self, target_id: Uuid, device_hash: &str) -> Result<bool> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state
            .votes
            .contains_key(&(target_id, device_hash.to_string())))
    }

    async fn insert_vote(&self, record: &VoteRecord) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let key = (record.target_id, record.device_hash.clone());
        if state.votes.contains_key(&key) {
            return Err(StoreError::UniqueViolation("votes_pkey".to_string()));
        }
        state.votes.insert(key, (record.value, record.created_at));
        Ok(())
    }

    async fn vote_aggregate(&self, target_id: Uuid) -> Result<VoteAggregate> {
        self.check_online()?;
        let state = self.state.lock().await;
        let values: Vec<i32> = state
            .votes
            .iter()
            .filter(|((target, _), _)| *target == target_id)
            .map(|(_, (value, _))| *value)
            .collect();
        if values.is_empty() {
            return Ok(VoteAggregate::default());
        }
        let total = values.len() as i64;
        let sum: i64 = values.iter().map(|v| i64::from(*v)).sum();
        Ok(VoteAggregate {
            mean: sum as f64 / total as f64,
            total,
        })
    }

    async fn list_push_subscriptions(
        &self,
        liveblog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PushSubscription>> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(take_limit(
            state
                .push_subscriptions
                .values()
                .filter(|s| s.liveblog_id == liveblog_id)
                .cloned(),
            limit,
        ))
    }

    async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let key = (subscription.liveblog_id, subscription.endpoint.clone());
        let last_notified_at = state
            .push_subscriptions
            .get(&key)
            .and_then(|existing| existing.last_notified_at);
        let mut stored = subscription.clone();
        stored.last_notified_at = stored.last_notified_at.or(last_notified_at);
        state.push_subscriptions.insert(key, stored);
        Ok(())
    }

    async fn delete_push_subscription(&self, liveblog_id: Uuid, endpoint: &str) -> Result<u64> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let removed = state
            .push_subscriptions
            .remove(&(liveblog_id, endpoint.to_string()));
        Ok(u64::from(removed.is_some()))
    }

    async fn touch_push_subscription(
        &self,
        liveblog_id: Uuid,
        endpoint: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        if let Some(subscription) = state
            .push_subscriptions
            .get_mut(&(liveblog_id, endpoint.to_string()))
        {
            subscription.last_notified_at = Some(notified_at);
        }
        Ok(())
    }

    async fn subscribe_changes(&self, liveblog_id: Uuid) -> Result<Subscription> {
        self.check_online()?;
        Ok(self.hub.subscribe(liveblog_id))
    }
}
