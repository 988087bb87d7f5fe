// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engagement ledger tests: reaction toggles, summaries, votes, push registration.

mod common;

use std::sync::Arc;

use liveline_core::ledger::{
    LedgerError, ReactionRequest, VoteRequest, cast_vote, reaction_summary, toggle_reaction,
};
use liveline_core::model::{LiveblogStatus, Privacy, ReactionKind, Widget};
use liveline_core::store::Store;
use liveline_core::subscriptions::{self, PushRegistration};
use uuid::Uuid;

use common::*;

fn reaction(liveblog_id: Uuid, update_id: Uuid, kind: &str, device: &str) -> ReactionRequest {
    ReactionRequest {
        liveblog_id,
        update_id: Some(update_id.to_string()),
        kind: Some(kind.to_string()),
        device_id: Some(device.to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    }
}

fn vote(widget_id: Uuid, value: f64, device: &str) -> VoteRequest {
    VoteRequest {
        widget_id,
        value: Some(value),
        device_id: Some(device.to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    }
}

// ============================================================================
// Reactions
// ============================================================================

#[tokio::test]
async fn test_toggle_reaction_adds_then_removes() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    store.put_update(u1.clone()).await;
    let request = reaction(liveblog.id, u1.id, "heart", "dA");

    let state = toggle_reaction(store.as_ref(), &request).await.unwrap();
    assert_eq!(state.counts[&ReactionKind::Heart], 1);
    assert!(state.active[&ReactionKind::Heart]);

    let state = toggle_reaction(store.as_ref(), &request).await.unwrap();
    assert_eq!(state.counts[&ReactionKind::Heart], 0);
    assert!(!state.active[&ReactionKind::Heart]);
}

#[tokio::test]
async fn test_double_toggle_restores_prior_counts() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    store.put_update(u1.clone()).await;

    toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "fire", "dB"))
        .await
        .unwrap();
    let before = toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "clap", "dB"))
        .await
        .unwrap();

    let request = reaction(liveblog.id, u1.id, "fire", "dA");
    toggle_reaction(store.as_ref(), &request).await.unwrap();
    let after = toggle_reaction(store.as_ref(), &request).await.unwrap();

    assert_eq!(before.counts, after.counts);
}

#[tokio::test]
async fn test_counts_are_per_device() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    store.put_update(u1.clone()).await;

    toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "heart", "dA"))
        .await
        .unwrap();
    let state = toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "heart", "dB"))
        .await
        .unwrap();

    assert_eq!(state.counts[&ReactionKind::Heart], 2);
    assert!(state.active[&ReactionKind::Heart]);
    assert!(!state.active[&ReactionKind::Fire]);
}

#[tokio::test]
async fn test_concurrent_duplicate_insert_is_not_an_error() {
    let (memory, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    memory.put_update(u1.clone()).await;
    let racing = RacingStore::new(memory.clone());
    let request = reaction(liveblog.id, u1.id, "wow", "dA");

    toggle_reaction(&racing, &request).await.unwrap();
    // The existence check misses the row, the insert collides.
    let state = toggle_reaction(&racing, &request).await.unwrap();

    assert_eq!(state.counts[&ReactionKind::Wow], 1);
    assert!(state.active[&ReactionKind::Wow]);
}

#[tokio::test]
async fn test_reaction_validation() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    store.put_update(u1.clone()).await;

    let err = toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "thumbs", "dA"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_payload");

    let mut missing_device = reaction(liveblog.id, u1.id, "heart", "dA");
    missing_device.device_id = Some("   ".to_string());
    let err = toggle_reaction(store.as_ref(), &missing_device)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_payload");

    let mut missing_target = reaction(liveblog.id, u1.id, "heart", "dA");
    missing_target.update_id = None;
    let err = toggle_reaction(store.as_ref(), &missing_target)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_payload");
}

#[tokio::test]
async fn test_reaction_visibility_gate() {
    let (store, _) = seeded_store().await;

    for (status, privacy) in [
        (LiveblogStatus::Ended, Privacy::Public),
        (LiveblogStatus::Active, Privacy::Private),
        (LiveblogStatus::Draft, Privacy::Unlisted),
    ] {
        let closed = liveblog(status, privacy);
        store.put_liveblog(closed.clone()).await;
        let update = published_update(closed.id, 1);
        store.put_update(update.clone()).await;

        let err = toggle_reaction(store.as_ref(), &reaction(closed.id, update.id, "heart", "dA"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));
    }
}

#[tokio::test]
async fn test_update_must_belong_to_liveblog() {
    let (store, liveblog) = seeded_store().await;
    let other = active_liveblog();
    store.put_liveblog(other.clone()).await;
    let foreign = published_update(other.id, 1);
    let mut draft = published_update(liveblog.id, 1);
    draft.status = liveline_core::model::UpdateStatus::Draft;
    store.put_update(foreign.clone()).await;
    store.put_update(draft.clone()).await;

    for target in [foreign.id, draft.id, Uuid::new_v4()] {
        let err = toggle_reaction(store.as_ref(), &reaction(liveblog.id, target, "heart", "dA"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    // Nothing was written to the foreign update.
    let counts = store.reaction_counts(&[foreign.id]).await.unwrap();
    assert!(counts.is_empty());
}

#[tokio::test]
async fn test_storage_failure_surfaces_as_server_error() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    store.put_update(u1.clone()).await;
    store.set_offline(true);

    let err = toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "heart", "dA"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "server_error");
}

#[tokio::test]
async fn test_summary_covers_every_kind_and_omits_foreign_updates() {
    let (store, liveblog) = seeded_store().await;
    let u1 = published_update(liveblog.id, 1);
    let u2 = published_update(liveblog.id, 2);
    let other = active_liveblog();
    store.put_liveblog(other.clone()).await;
    let foreign = published_update(other.id, 1);
    for u in [&u1, &u2, &foreign] {
        store.put_update(u.clone()).await;
    }

    toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "heart", "dA"))
        .await
        .unwrap();
    toggle_reaction(store.as_ref(), &reaction(liveblog.id, u1.id, "laugh", "dB"))
        .await
        .unwrap();

    let summary = reaction_summary(
        store.as_ref(),
        liveblog.id,
        &[u1.id, u2.id, foreign.id],
        Some("dA"),
        Some("Mozilla/5.0"),
    )
    .await
    .unwrap();

    assert_eq!(summary.counts.len(), 2);
    assert!(!summary.counts.contains_key(&foreign.id));
    assert_eq!(summary.counts[&u1.id][&ReactionKind::Heart], 1);
    assert_eq!(summary.counts[&u1.id][&ReactionKind::Laugh], 1);
    assert_eq!(summary.counts[&u2.id].len(), ReactionKind::ALL.len());
    assert!(summary.active[&u1.id][&ReactionKind::Heart]);
    assert!(!summary.active[&u1.id][&ReactionKind::Laugh]);

    // Without a device nothing is active.
    let anonymous = reaction_summary(store.as_ref(), liveblog.id, &[u1.id], None, None)
        .await
        .unwrap();
    assert!(anonymous.active[&u1.id].values().all(|active| !active));
}

// ============================================================================
// Votes
// ============================================================================

#[tokio::test]
async fn test_vote_is_recorded_once() {
    let (store, liveblog) = seeded_store().await;
    let widget = hot_take(liveblog.id);
    store.put_widget(widget.clone()).await;

    let first = cast_vote(store.as_ref(), &vote(widget.id, 80.0, "dA"))
        .await
        .unwrap();
    assert_eq!(first.total, 1);
    assert_eq!(first.mean, 80.0);
    assert!(!first.duplicate);

    let repeat = cast_vote(store.as_ref(), &vote(widget.id, 10.0, "dA"))
        .await
        .unwrap();
    assert!(repeat.duplicate);
    assert_eq!(repeat.total, 1);
    assert_eq!(repeat.mean, 80.0);
}

#[tokio::test]
async fn test_vote_mean_over_all_rows() {
    let (store, liveblog) = seeded_store().await;
    let widget = hot_take(liveblog.id);
    store.put_widget(widget.clone()).await;

    cast_vote(store.as_ref(), &vote(widget.id, 150.0, "dA"))
        .await
        .unwrap();
    cast_vote(store.as_ref(), &vote(widget.id, -20.0, "dB"))
        .await
        .unwrap();
    let outcome = cast_vote(store.as_ref(), &vote(widget.id, 33.6, "dC"))
        .await
        .unwrap();

    // 100 + 0 + 34
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.mean, 44.7);
}

#[tokio::test]
async fn test_racing_vote_reports_duplicate() {
    let (memory, liveblog) = seeded_store().await;
    let widget = hot_take(liveblog.id);
    memory.put_widget(widget.clone()).await;
    let racing = RacingStore::new(memory.clone());

    cast_vote(&racing, &vote(widget.id, 60.0, "dA")).await.unwrap();
    let outcome = cast_vote(&racing, &vote(widget.id, 90.0, "dA")).await.unwrap();

    assert!(outcome.duplicate);
    assert_eq!(outcome.total, 1);
    assert_eq!(outcome.mean, 60.0);
}

#[tokio::test]
async fn test_vote_requires_hot_take_widget() {
    let (store, liveblog) = seeded_store().await;
    let poll = Widget {
        id: Uuid::new_v4(),
        liveblog_id: liveblog.id,
        kind: "poll".to_string(),
    };
    store.put_widget(poll.clone()).await;

    let err = cast_vote(store.as_ref(), &vote(poll.id, 50.0, "dA"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "not_found");

    let mut missing = vote(poll.id, 50.0, "dA");
    missing.value = None;
    let err = cast_vote(store.as_ref(), &missing).await.unwrap_err();
    assert_eq!(err.error_code(), "invalid_payload");
}

#[tokio::test]
async fn test_vote_gate_uses_widget_liveblog() {
    let store = Arc::new(liveline_core::store::MemoryStore::new());
    let ended = liveblog(LiveblogStatus::Ended, Privacy::Public);
    store.put_liveblog(ended.clone()).await;
    let widget = hot_take(ended.id);
    store.put_widget(widget.clone()).await;

    let err = cast_vote(store.as_ref(), &vote(widget.id, 50.0, "dA"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "forbidden");
}

// ============================================================================
// Push registration
// ============================================================================

#[tokio::test]
async fn test_push_registration_round_trip() {
    let (store, liveblog) = seeded_store().await;
    let registration = PushRegistration {
        liveblog_id: liveblog.id,
        endpoint: Some("https://push.example.com/send/abc".to_string()),
        p256dh: Some("BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA".to_string()),
        auth: Some("tBHItJI5svbpez7KI4CCXg".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    };

    subscriptions::register(store.as_ref(), &registration)
        .await
        .unwrap();
    subscriptions::register(store.as_ref(), &registration)
        .await
        .unwrap();
    let stored = store
        .list_push_subscriptions(liveblog.id, 100)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user_agent.as_deref(), Some("Mozilla/5.0"));

    let removed = subscriptions::unregister(
        store.as_ref(),
        liveblog.id,
        Some("https://push.example.com/send/abc"),
    )
    .await
    .unwrap();
    assert!(removed);
    assert!(
        store
            .list_push_subscriptions(liveblog.id, 100)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_push_registration_requires_keys() {
    let (store, liveblog) = seeded_store().await;
    let registration = PushRegistration {
        liveblog_id: liveblog.id,
        endpoint: Some("https://push.example.com/send/abc".to_string()),
        p256dh: None,
        auth: Some("secret".to_string()),
        user_agent: None,
    };

    let err = subscriptions::register(store.as_ref(), &registration)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_payload");
}
