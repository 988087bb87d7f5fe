// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Web Push channel.
//!
//! Each delivery is an RFC 8030 push whose body is a small JSON notice
//! (`liveblogId`, `updateId`, `title`, `body`) encrypted for the subscriber
//! with [`encryption`](super::encryption). When VAPID keys are configured,
//! each request carries an RFC 8292 `Authorization: vapid` header signed
//! with ES256.
//!
//! Fan-out to a liveblog's subscribers runs every delivery concurrently and
//! awaits all of them. Outcomes are independent: success stamps
//! `last_notified_at`, a gone endpoint (404/410) is deleted, anything else is
//! dropped until the next publish.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::encryption::{self, CONTENT_ENCODING};
use crate::model::{Liveblog, PushSubscription, Update, UpdateContent};
use crate::store::{self, Store};

/// Upper bound on subscriptions loaded for one publish event.
pub const PUSH_BATCH_LIMIT: i64 = 10_000;

/// Default number of deliveries in flight at once.
pub const DEFAULT_PUSH_CONCURRENCY: usize = 64;

/// Longest notification title or body, in characters.
pub const PUSH_TEXT_MAX_CHARS: usize = 160;

/// Lifetime of a VAPID token.
const VAPID_TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

/// Push delivery errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// The push service says the subscription no longer exists.
    #[error("Push endpoint gone (status {0})")]
    Gone(u16),

    /// Any other non-2xx answer.
    #[error("Push service rejected delivery with status {0}")]
    Rejected(u16),

    /// The request never completed.
    #[error("Push transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// VAPID key or token problem.
    #[error("VAPID error: {0}")]
    Vapid(String),

    /// The payload could not be encrypted for the subscription's keys.
    #[error("Push encryption error: {0}")]
    Encryption(String),
}

impl PushError {
    /// Whether the subscription should be removed.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_))
    }
}

/// What a push tells the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotice {
    /// Liveblog with a new update. Also used as the replacement topic, so a
    /// device that was offline receives only the latest notice.
    pub liveblog_id: Uuid,
    /// The update just published.
    pub update_id: Uuid,
    /// Notification title (the liveblog title).
    pub title: String,
    /// Notification text derived from the update content.
    pub body: String,
    /// Seconds the push service should keep the message.
    #[serde(skip)]
    pub ttl_secs: u32,
}

impl PushNotice {
    /// Notice for a freshly published update, with a one-hour TTL.
    pub fn for_update(liveblog: &Liveblog, update: &Update) -> Self {
        let body = match update.typed_content() {
            UpdateContent::Text { text } => text,
            UpdateContent::Link { url, title, .. } => title.filter(|t| !t.is_empty()).unwrap_or(url),
            UpdateContent::Image { caption, .. } => caption
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "New image".to_string()),
            UpdateContent::Other => "New update posted".to_string(),
        };

        Self {
            liveblog_id: liveblog.id,
            update_id: update.id,
            title: truncate(&liveblog.title),
            body: truncate(&body),
            ttl_secs: 3600,
        }
    }

    /// `Topic` header value: at most 32 base64url characters.
    pub fn topic(&self) -> String {
        self.liveblog_id.simple().to_string()
    }

    /// JSON payload handed to the service worker.
    pub fn payload(&self) -> Result<Vec<u8>, PushError> {
        serde_json::to_vec(self).map_err(|e| PushError::Encryption(e.to_string()))
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(PUSH_TEXT_MAX_CHARS) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Delivers one notice to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Deliver `notice` to `subscription`.
    async fn send(&self, subscription: &PushSubscription, notice: &PushNotice)
    -> Result<(), PushError>;
}

// ============================================================================
// VAPID
// ============================================================================

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signs VAPID tokens for push service origins.
#[derive(Clone)]
pub struct VapidSigner {
    key: EncodingKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// Load a P-256 private key (PEM) together with its base64url public key
    /// and a `mailto:` or `https:` contact subject.
    pub fn from_pem(
        private_key_pem: &[u8],
        public_key: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, PushError> {
        let key =
            EncodingKey::from_ec_pem(private_key_pem).map_err(|e| PushError::Vapid(e.to_string()))?;

        // Uncompressed P-256 point.
        let public_key = public_key.into();
        let decoded = URL_SAFE_NO_PAD
            .decode(public_key.trim_end_matches('='))
            .map_err(|e| PushError::Vapid(format!("public key is not base64url: {e}")))?;
        if decoded.len() != 65 || decoded[0] != 0x04 {
            return Err(PushError::Vapid(
                "public key must be an uncompressed P-256 point".to_string(),
            ));
        }

        Ok(Self {
            key,
            public_key,
            subject: subject.into(),
        })
    }

    /// `Authorization` header value for a push endpoint.
    pub fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let url = url::Url::parse(endpoint).map_err(|e| PushError::Vapid(e.to_string()))?;
        let audience = url.origin().ascii_serialization();
        let claims = VapidClaims {
            aud: &audience,
            exp: Utc::now().timestamp() + VAPID_TOKEN_TTL_SECS,
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.key)
            .map_err(|e| PushError::Vapid(e.to_string()))?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

// ============================================================================
// HTTP sender
// ============================================================================

/// [`PushSender`] speaking the Web Push protocol over HTTP.
#[derive(Clone)]
pub struct WebPushSender {
    client: reqwest::Client,
    vapid: Option<VapidSigner>,
}

impl WebPushSender {
    /// Build a sender with a per-request timeout.
    pub fn new(timeout: Duration, vapid: Option<VapidSigner>) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, vapid })
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notice: &PushNotice,
    ) -> Result<(), PushError> {
        let body = encryption::encrypt(&subscription.keys, &notice.payload()?)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", notice.ttl_secs.to_string())
            .header("Urgency", "normal")
            .header("Topic", notice.topic())
            .header("Content-Type", "application/octet-stream")
            .header("Content-Encoding", CONTENT_ENCODING)
            .body(body);

        if let Some(vapid) = &self.vapid {
            request = request.header("Authorization", vapid.authorization(&subscription.endpoint)?);
        }

        let status = request.send().await?.status();
        match status.as_u16() {
            _ if status.is_success() => Ok(()),
            code @ (404 | 410) => Err(PushError::Gone(code)),
            code => Err(PushError::Rejected(code)),
        }
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Aggregate outcome of one push fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Deliveries accepted by the push service.
    pub delivered: usize,
    /// Gone subscriptions removed.
    pub removed: usize,
    /// Other failures, dropped.
    pub failed: usize,
}

enum Outcome {
    Delivered,
    Removed,
    Failed,
}

async fn deliver_one(
    store: &dyn Store,
    sender: &dyn PushSender,
    subscription: &PushSubscription,
    notice: &PushNotice,
) -> Outcome {
    match sender.send(subscription, notice).await {
        Ok(()) => {
            if let Err(e) = store
                .touch_push_subscription(subscription.liveblog_id, &subscription.endpoint, Utc::now())
                .await
            {
                warn!(error = %e, "Failed to record push delivery");
            }
            Outcome::Delivered
        }
        Err(e) if e.is_gone() => {
            if let Err(e) = store
                .delete_push_subscription(subscription.liveblog_id, &subscription.endpoint)
                .await
            {
                warn!(error = %e, "Failed to remove gone push subscription");
            }
            debug!(endpoint = %subscription.endpoint, "Removed gone push subscription");
            Outcome::Removed
        }
        Err(e) => {
            debug!(endpoint = %subscription.endpoint, error = %e, "Push delivery failed");
            Outcome::Failed
        }
    }
}

/// Deliver `notice` to every subscriber of its liveblog.
///
/// Only loading the subscriber list can fail; per-subscriber failures are
/// counted in the report.
pub async fn fan_out_push(
    store: &dyn Store,
    sender: &dyn PushSender,
    notice: &PushNotice,
    concurrency: usize,
) -> store::Result<PushReport> {
    let subscriptions = store
        .list_push_subscriptions(notice.liveblog_id, PUSH_BATCH_LIMIT)
        .await?;

    let deliveries: Vec<_> = subscriptions
        .iter()
        .map(|subscription| deliver_one(store, sender, subscription, notice))
        .collect();
    let outcomes: Vec<Outcome> = stream::iter(deliveries)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = PushReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Delivered => report.delivered += 1,
            Outcome::Removed => report.removed += 1,
            Outcome::Failed => report.failed += 1,
        }
    }
    Ok(report)
}
