// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording channels for testing.
//!
//! Both record every call and can be told to fail, so fan-out isolation can
//! be exercised without network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::chat::{ChatError, ChatMessage, ChatNotifier};
use super::push::{PushError, PushNotice, PushSender};
use crate::model::PushSubscription;

/// Chat notifier that records messages instead of posting them.
#[derive(Default)]
pub struct RecordingChatNotifier {
    messages: Mutex<Vec<(String, ChatMessage)>>,
    fail: AtomicBool,
}

impl RecordingChatNotifier {
    /// Create a notifier that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose every call fails with status 500.
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    /// `(webhook_url, message)` pairs received so far, including failed attempts.
    pub async fn messages(&self) -> Vec<(String, ChatMessage)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl ChatNotifier for RecordingChatNotifier {
    async fn notify(&self, webhook_url: &str, message: &ChatMessage) -> Result<(), ChatError> {
        self.messages
            .lock()
            .await
            .push((webhook_url.to_string(), message.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatError::Status(500));
        }
        Ok(())
    }
}

/// Scripted failure for one push endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    /// Answer 410 Gone.
    Gone,
    /// Answer 500.
    Rejected,
}

/// Push sender that records deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingPushSender {
    sent: Mutex<Vec<(String, PushNotice)>>,
    failures: Mutex<HashMap<String, PushFailure>>,
}

impl RecordingPushSender {
    /// Create a sender that accepts every delivery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `endpoint` fail.
    pub async fn fail_endpoint(&self, endpoint: impl Into<String>, failure: PushFailure) {
        self.failures.lock().await.insert(endpoint.into(), failure);
    }

    /// Notices successfully delivered, in completion order.
    pub async fn notices(&self) -> Vec<PushNotice> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, notice)| notice.clone())
            .collect()
    }

    /// Endpoints that received a successful delivery, in completion order.
    pub async fn delivered_endpoints(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notice: &PushNotice,
    ) -> Result<(), PushError> {
        match self.failures.lock().await.get(&subscription.endpoint) {
            Some(PushFailure::Gone) => return Err(PushError::Gone(410)),
            Some(PushFailure::Rejected) => return Err(PushError::Rejected(500)),
            None => {}
        }
        self.sent
            .lock()
            .await
            .push((subscription.endpoint.clone(), notice.clone()));
        Ok(())
    }
}
