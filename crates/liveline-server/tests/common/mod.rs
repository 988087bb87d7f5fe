// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common helpers for liveline-server HTTP tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use liveline_core::fanout::Fanout;
use liveline_core::fanout::mock::{RecordingChatNotifier, RecordingPushSender};
use liveline_core::model::{
    HOT_TAKE_WIDGET, Liveblog, LiveblogStatus, Privacy, Update, UpdateStatus, Widget,
};
use liveline_core::publish::Publisher;
use liveline_core::store::MemoryStore;
use liveline_server::api;
use liveline_server::state::{AppState, CronSecret};

pub const CRON_SECRET: &str = "test-cron-secret";
pub const USER_AGENT: &str = "Mozilla/5.0 (liveline-test)";

/// Router over a memory store with one active public liveblog.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub liveblog: Liveblog,
    pub chat: Arc<RecordingChatNotifier>,
    pub push: Arc<RecordingPushSender>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_origins(&[]).await
    }

    pub async fn with_origins(origins: &[String]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let liveblog = Liveblog {
            id: Uuid::new_v4(),
            title: "Election Night".to_string(),
            status: LiveblogStatus::Active,
            privacy: Privacy::Public,
            chat_webhook_url: Some("https://hooks.example.com/T000/B000".to_string()),
        };
        store.put_liveblog(liveblog.clone()).await;

        let chat = Arc::new(RecordingChatNotifier::new());
        let push = Arc::new(RecordingPushSender::new());
        let fanout = Fanout::new(store.clone(), chat.clone(), push.clone(), 4);
        let publisher = Publisher::new(store.clone(), fanout);
        let state = AppState::new(store.clone(), publisher, CronSecret::new(Some(CRON_SECRET)));

        Self {
            router: api::router(state, origins),
            store,
            liveblog,
            chat,
            push,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .header("user-agent", USER_AGENT)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// A published update of the seeded liveblog, not yet stored.
    pub fn liveblog_update(&self, text: &str) -> Update {
        Update {
            id: Uuid::new_v4(),
            liveblog_id: self.liveblog.id,
            content: json!({"type": "text", "text": text}),
            status: UpdateStatus::Published,
            pinned: false,
            scheduled_at: None,
            published_at: Some(Utc::now()),
            deleted_at: None,
        }
    }

    /// Store a published update on the seeded liveblog.
    pub async fn publish_update(&self, text: &str) -> Update {
        let update = self.liveblog_update(text);
        self.store.put_update(update.clone()).await;
        update
    }

    pub async fn schedule_update(&self, at: DateTime<Utc>) -> Update {
        let update = Update {
            id: Uuid::new_v4(),
            liveblog_id: self.liveblog.id,
            content: json!({"type": "text", "text": "scheduled"}),
            status: UpdateStatus::Scheduled,
            pinned: false,
            scheduled_at: Some(at),
            published_at: None,
            deleted_at: None,
        };
        self.store.put_update(update.clone()).await;
        update
    }

    pub async fn hot_take(&self) -> Widget {
        let widget = Widget {
            id: Uuid::new_v4(),
            liveblog_id: self.liveblog.id,
            kind: HOT_TAKE_WIDGET.to_string(),
        };
        self.store.put_widget(widget.clone()).await;
        widget
    }

    /// Replace the seeded liveblog's status and privacy.
    pub async fn set_liveblog(&self, status: LiveblogStatus, privacy: Privacy) {
        let mut liveblog = self.liveblog.clone();
        liveblog.status = status;
        liveblog.privacy = privacy;
        self.store.put_liveblog(liveblog).await;
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes()
        .to_vec()
}

pub async fn json_body(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    let value = serde_json::from_slice(&bytes).expect("response is JSON");
    (status, value)
}
