// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fan-out of a newly published update to secondary channels.
//!
//! The chat webhook and push channels run side by side and are both awaited.
//! Neither channel's failure reaches the other or the caller: the result is
//! a [`FanoutReport`] that is only ever logged.

pub mod chat;
pub mod encryption;
pub mod mock;
pub mod push;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{Liveblog, Update};
use crate::store::Store;

pub use self::chat::{ChatError, ChatMessage, ChatNotifier, HttpChatNotifier, format_chat_message};
pub use self::push::{
    DEFAULT_PUSH_CONCURRENCY, PushError, PushNotice, PushReport, PushSender, VapidSigner,
    WebPushSender, fan_out_push,
};

/// What happened on the chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Message accepted.
    Sent,
    /// No webhook configured for the liveblog.
    Skipped,
    /// Delivery failed; dropped.
    Failed,
}

/// Per-update fan-out summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    /// Chat webhook result.
    pub webhook: WebhookOutcome,
    /// Push deliveries. `None` if the subscriber list could not be loaded.
    pub push: Option<PushReport>,
}

/// Dispatches published updates to every secondary channel.
#[derive(Clone)]
pub struct Fanout {
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatNotifier>,
    push: Arc<dyn PushSender>,
    push_concurrency: usize,
}

impl Fanout {
    /// Create a dispatcher over the given channels.
    pub fn new(
        store: Arc<dyn Store>,
        chat: Arc<dyn ChatNotifier>,
        push: Arc<dyn PushSender>,
        push_concurrency: usize,
    ) -> Self {
        Self {
            store,
            chat,
            push,
            push_concurrency,
        }
    }

    /// Fan `update` out to chat and push, waiting for both.
    pub async fn dispatch(&self, liveblog: &Liveblog, update: &Update) -> FanoutReport {
        let (webhook, push) = tokio::join!(
            self.send_chat(liveblog, update),
            self.send_push(liveblog, update)
        );

        let report = FanoutReport { webhook, push };
        info!(
            update_id = %update.id,
            liveblog_id = %liveblog.id,
            webhook = ?report.webhook,
            push_delivered = report.push.map(|p| p.delivered).unwrap_or(0),
            push_removed = report.push.map(|p| p.removed).unwrap_or(0),
            push_failed = report.push.map(|p| p.failed).unwrap_or(0),
            "Fan-out finished"
        );
        report
    }

    async fn send_chat(&self, liveblog: &Liveblog, update: &Update) -> WebhookOutcome {
        let Some(url) = liveblog
            .chat_webhook_url
            .as_deref()
            .filter(|u| !u.is_empty())
        else {
            return WebhookOutcome::Skipped;
        };

        let message = format_chat_message(liveblog, update);
        match self.chat.notify(url, &message).await {
            Ok(()) => WebhookOutcome::Sent,
            Err(e) => {
                warn!(update_id = %update.id, error = %e, "Chat webhook delivery failed");
                WebhookOutcome::Failed
            }
        }
    }

    async fn send_push(&self, liveblog: &Liveblog, update: &Update) -> Option<PushReport> {
        let notice = PushNotice::for_update(liveblog, update);
        match fan_out_push(
            self.store.as_ref(),
            self.push.as_ref(),
            &notice,
            self.push_concurrency,
        )
        .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(liveblog_id = %liveblog.id, error = %e, "Push fan-out could not load subscribers");
                None
            }
        }
    }
}
