// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Change stream relay hub.
//!
//! One upstream change source (the Postgres listener, or the memory store's
//! own writes) publishes into a [`ChangeHub`]. Every open client stream holds
//! exactly one [`Subscription`], keyed by liveblog. Dropping the subscription
//! removes its registration immediately, so an aborted client connection
//! cannot leak a subscriber.
//!
//! Each subscription buffers at most [`SUBSCRIPTION_BUFFER`] events. A client
//! that stops reading while staying connected overflows its buffer; the hub
//! then drops the registration, the stream ends after the buffered events,
//! and the client reconnects and re-fetches the feed.
//!
//! ```text
//!   pg_notify / MemoryStore ──► ChangeHub ──┬──► Subscription (stream A)
//!                                           ├──► Subscription (stream B)
//!                                           └──► ...
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::ChangeEvent;

/// Events a subscription may hold before it is closed as a slow consumer.
pub const SUBSCRIPTION_BUFFER: usize = 256;

type Senders = HashMap<u64, mpsc::Sender<ChangeEvent>>;

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<Uuid, Senders>>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Senders>> {
        // The map holds no invariants a panicking holder could break.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes change events to the subscriptions registered for their liveblog.
#[derive(Clone, Default)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl ChangeHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription for `liveblog_id`.
    pub fn subscribe(&self, liveblog_id: Uuid) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner
            .lock()
            .entry(liveblog_id)
            .or_default()
            .insert(id, tx);

        debug!(liveblog_id = %liveblog_id, subscription_id = id, "Change subscription opened");

        Subscription {
            liveblog_id,
            id,
            receiver: rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Forward `event` to every subscription of its liveblog, in call order.
    ///
    /// Never waits: a subscription whose buffer is full is closed instead.
    /// Returns the number of subscriptions that received the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut subscribers = self.inner.lock();
        let Some(senders) = subscribers.get_mut(&event.liveblog_id) else {
            return 0;
        };

        senders.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    liveblog_id = %event.liveblog_id,
                    subscription_id = *id,
                    "Change subscription fell behind, closing it"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        let delivered = senders.len();
        if senders.is_empty() {
            subscribers.remove(&event.liveblog_id);
        }
        delivered
    }

    /// Number of open subscriptions for a liveblog.
    pub fn subscriber_count(&self, liveblog_id: Uuid) -> usize {
        self.inner
            .lock()
            .get(&liveblog_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

/// Cancellable handle for one client's change stream.
///
/// Yields events in the order the hub received them. Dropping the handle
/// unregisters it.
pub struct Subscription {
    liveblog_id: Uuid,
    id: u64,
    receiver: mpsc::Receiver<ChangeEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// Liveblog this subscription follows.
    pub fn liveblog_id(&self) -> Uuid {
        self.liveblog_id
    }

    /// Wait for the next change. Returns `None` once the hub is gone or has
    /// closed this subscription for falling behind.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut subscribers = hub.lock();
        if let Some(senders) = subscribers.get_mut(&self.liveblog_id) {
            senders.remove(&self.id);
            if senders.is_empty() {
                subscribers.remove(&self.liveblog_id);
            }
        }
        debug!(
            liveblog_id = %self.liveblog_id,
            subscription_id = self.id,
            "Change subscription released"
        );
    }
}
