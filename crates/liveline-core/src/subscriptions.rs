// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Viewer push subscription registration.

use tracing::info;
use uuid::Uuid;

use crate::ledger::{LedgerError, require_engageable};
use crate::model::{PushKeys, PushSubscription};
use crate::store::Store;

/// Raw registration input, as received from a browser.
#[derive(Debug, Clone, Default)]
pub struct PushRegistration {
    /// Liveblog to follow.
    pub liveblog_id: Uuid,
    /// Push service endpoint.
    pub endpoint: Option<String>,
    /// Client public key.
    pub p256dh: Option<String>,
    /// Authentication secret.
    pub auth: Option<String>,
    /// Request user agent.
    pub user_agent: Option<String>,
}

fn validate_endpoint(endpoint: Option<&str>) -> Result<String, LedgerError> {
    let endpoint = endpoint
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| LedgerError::InvalidPayload("endpoint is required".to_string()))?;

    let url = url::Url::parse(endpoint)
        .map_err(|_| LedgerError::InvalidPayload("endpoint is not a valid URL".to_string()))?;
    if url.scheme() != "https" {
        return Err(LedgerError::InvalidPayload(
            "endpoint must use https".to_string(),
        ));
    }
    Ok(endpoint.to_string())
}

fn required_key(value: Option<&str>, field: &str) -> Result<String, LedgerError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LedgerError::InvalidPayload(format!("keys.{field} is required")))
}

/// Store or refresh a push subscription for an engageable liveblog.
pub async fn register(store: &dyn Store, registration: &PushRegistration) -> Result<(), LedgerError> {
    let endpoint = validate_endpoint(registration.endpoint.as_deref())?;
    let keys = PushKeys {
        p256dh: required_key(registration.p256dh.as_deref(), "p256dh")?,
        auth: required_key(registration.auth.as_deref(), "auth")?,
    };

    require_engageable(store, registration.liveblog_id).await?;

    store
        .upsert_push_subscription(&PushSubscription {
            liveblog_id: registration.liveblog_id,
            endpoint,
            keys,
            user_agent: registration.user_agent.clone(),
            last_notified_at: None,
        })
        .await?;

    info!(liveblog_id = %registration.liveblog_id, "Push subscription registered");
    Ok(())
}

/// Remove a push subscription. Returns whether a row was deleted.
pub async fn unregister(
    store: &dyn Store,
    liveblog_id: Uuid,
    endpoint: Option<&str>,
) -> Result<bool, LedgerError> {
    let endpoint = validate_endpoint(endpoint)?;
    require_engageable(store, liveblog_id).await?;
    let removed = store.delete_push_subscription(liveblog_id, &endpoint).await?;
    Ok(removed > 0)
}
