// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled publish pipeline and fan-out tests.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use liveline_core::fanout::mock::{PushFailure, RecordingChatNotifier};
use liveline_core::feed::load_feed;
use liveline_core::model::{ChangeKind, UpdateStatus};
use liveline_core::store::{MemoryStore, Store};

use common::*;

#[tokio::test]
async fn test_due_update_is_published_and_visible_in_feed() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    let u1 = scheduled_update(liveblog.id, now - Duration::seconds(1));
    store.put_update(u1.clone()).await;
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let report = harness.publisher.run_sweep(now, 10).await.unwrap();
    assert_eq!(report.published, 1);

    let stored = store.get_update(u1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, UpdateStatus::Published);
    assert_eq!(stored.published_at, Some(now));

    let feed = load_feed(store.as_ref(), liveblog.id, 50).await.unwrap();
    assert!(feed.body.updates.iter().any(|u| u.id == u1.id));
}

#[tokio::test]
async fn test_future_and_deleted_rows_are_not_due() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    let future = scheduled_update(liveblog.id, now + Duration::minutes(5));
    let mut deleted = scheduled_update(liveblog.id, now - Duration::minutes(5));
    deleted.deleted_at = Some(now - Duration::minutes(1));
    store.put_update(future.clone()).await;
    store.put_update(deleted.clone()).await;
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let report = harness.publisher.run_sweep(now, 10).await.unwrap();
    assert_eq!(report.published, 0);
    assert!(harness.chat.messages().await.is_empty());
}

#[tokio::test]
async fn test_limit_bounds_sweep_oldest_first() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    let oldest = scheduled_update(liveblog.id, now - Duration::minutes(30));
    let middle = scheduled_update(liveblog.id, now - Duration::minutes(20));
    let newest = scheduled_update(liveblog.id, now - Duration::minutes(10));
    for u in [&newest, &oldest, &middle] {
        store.put_update(u.clone()).await;
    }
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let report = harness.publisher.run_sweep(now, 2).await.unwrap();
    assert_eq!(report.published, 2);
    let status = |id| {
        let store = store.clone();
        async move { store.get_update(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(oldest.id).await, UpdateStatus::Published);
    assert_eq!(status(middle.id).await, UpdateStatus::Published);
    assert_eq!(status(newest.id).await, UpdateStatus::Scheduled);
}

#[tokio::test]
async fn test_overlapping_sweeps_publish_and_notify_once() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    for minutes in 1..=10 {
        store
            .put_update(scheduled_update(liveblog.id, now - Duration::minutes(minutes)))
            .await;
    }
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let (a, b) = tokio::join!(
        harness.publisher.run_sweep(now, 100),
        harness.publisher.run_sweep(now, 100)
    );
    assert_eq!(a.unwrap().published + b.unwrap().published, 10);
    assert_eq!(harness.chat.messages().await.len(), 10);

    let again = harness.publisher.run_sweep(now, 100).await.unwrap();
    assert_eq!(again.published, 0);
    assert_eq!(harness.chat.messages().await.len(), 10);
}

#[tokio::test]
async fn test_push_notice_describes_the_published_update() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    let update = scheduled_update(liveblog.id, now - Duration::seconds(1));
    store.put_update(update.clone()).await;
    store
        .upsert_push_subscription(&push_subscription(liveblog.id, "https://push.example.com/a"))
        .await
        .unwrap();
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    harness.publisher.run_sweep(now, 10).await.unwrap();

    let notices = harness.push.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].liveblog_id, liveblog.id);
    assert_eq!(notices[0].update_id, update.id);
    assert_eq!(notices[0].title, liveblog.title);
    assert_eq!(notices[0].body, "scheduled");
}

#[tokio::test]
async fn test_chat_failure_does_not_block_push() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    store
        .put_update(scheduled_update(liveblog.id, now - Duration::seconds(1)))
        .await;
    store
        .upsert_push_subscription(&push_subscription(liveblog.id, "https://push.example.com/a"))
        .await
        .unwrap();
    let harness = publish_harness(store.clone(), RecordingChatNotifier::failing());

    let report = harness.publisher.run_sweep(now, 10).await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(harness.chat.messages().await.len(), 1);
    assert_eq!(
        harness.push.delivered_endpoints().await,
        vec!["https://push.example.com/a".to_string()]
    );
}

#[tokio::test]
async fn test_push_failures_are_isolated_per_subscriber() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    store
        .put_update(scheduled_update(liveblog.id, now - Duration::seconds(1)))
        .await;
    for endpoint in ["https://push.example.com/ok", "https://push.example.com/gone", "https://push.example.com/flaky"] {
        store
            .upsert_push_subscription(&push_subscription(liveblog.id, endpoint))
            .await
            .unwrap();
    }
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());
    harness
        .push
        .fail_endpoint("https://push.example.com/gone", PushFailure::Gone)
        .await;
    harness
        .push
        .fail_endpoint("https://push.example.com/flaky", PushFailure::Rejected)
        .await;

    let report = harness.publisher.run_sweep(now, 10).await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(
        harness.push.delivered_endpoints().await,
        vec!["https://push.example.com/ok".to_string()]
    );

    let remaining = store.list_push_subscriptions(liveblog.id, 100).await.unwrap();
    let endpoints: Vec<_> = remaining.iter().map(|s| s.endpoint.as_str()).collect();
    assert_eq!(
        endpoints,
        vec!["https://push.example.com/flaky", "https://push.example.com/ok"]
    );
    let ok = remaining
        .iter()
        .find(|s| s.endpoint.ends_with("/ok"))
        .unwrap();
    assert!(ok.last_notified_at.is_some());
}

#[tokio::test]
async fn test_liveblog_without_webhook_skips_chat() {
    let store = Arc::new(MemoryStore::new());
    let mut liveblog = active_liveblog();
    liveblog.chat_webhook_url = None;
    store.put_liveblog(liveblog.clone()).await;
    let now = Utc::now();
    store
        .put_update(scheduled_update(liveblog.id, now - Duration::seconds(1)))
        .await;
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let report = harness.publisher.run_sweep(now, 10).await.unwrap();
    assert_eq!(report.published, 1);
    assert!(harness.chat.messages().await.is_empty());
}

#[tokio::test]
async fn test_publish_emits_update_change_event() {
    let (store, liveblog) = seeded_store().await;
    let now = Utc::now();
    let u1 = scheduled_update(liveblog.id, now - Duration::seconds(1));
    store.put_update(u1.clone()).await;
    let mut subscription = store.subscribe_changes(liveblog.id).await.unwrap();
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    harness.publisher.run_sweep(now, 10).await.unwrap();

    let event = subscription.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Update);
    assert_eq!(event.new.unwrap()["status"], "published");
    assert_eq!(event.old.unwrap()["status"], "scheduled");
}

#[tokio::test]
async fn test_storage_failure_fails_sweep() {
    let (store, _) = seeded_store().await;
    store.set_offline(true);
    let harness = publish_harness(store.clone(), RecordingChatNotifier::new());

    let err = harness.publisher.run_sweep(Utc::now(), 10).await.unwrap_err();
    assert_eq!(err.error_code(), "server_error");
}
