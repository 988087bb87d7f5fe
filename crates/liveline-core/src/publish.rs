// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled publish pipeline.
//!
//! One sweep selects due updates oldest first, moves each one
//! `scheduled → published` through a guarded transition, and fans out only
//! the rows whose transition actually applied. Overlapping sweeps therefore
//! publish and notify every row exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::fanout::Fanout;
use crate::model::{Liveblog, UpdateStatus};
use crate::store::{Store, StoreError, Transition};

/// Rows published per sweep when the caller gives no limit.
pub const DEFAULT_PUBLISH_LIMIT: i64 = 50;

/// Hard cap on rows published per sweep.
pub const MAX_PUBLISH_LIMIT: i64 = 100;

/// Publish sweep errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Storage failure while selecting or transitioning rows.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PublishError {
    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServerError
    }

    /// Wire code for this error.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Outcome of one publish sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSweepReport {
    /// Rows this sweep moved to `published`.
    pub published: u64,
}

/// Clamp a requested sweep size into `[1, MAX_PUBLISH_LIMIT]`.
pub fn clamp_publish_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_PUBLISH_LIMIT)
        .clamp(1, MAX_PUBLISH_LIMIT)
}

/// Promotes due updates and fans them out.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn Store>,
    fanout: Fanout,
}

impl Publisher {
    /// Create a publisher.
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self { store, fanout }
    }

    /// Publish up to `limit` updates due at `now`.
    ///
    /// The returned count covers transitions only; fan-out results are logged.
    #[instrument(skip(self))]
    pub async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<PublishSweepReport, PublishError> {
        let due = self.store.list_due_updates(now, limit).await?;
        let mut report = PublishSweepReport::default();
        let mut liveblogs: HashMap<Uuid, Option<Liveblog>> = HashMap::new();

        for mut update in due {
            let changed = self
                .store
                .apply_transition(&Transition::PublishUpdate {
                    update_id: update.id,
                    published_at: now,
                })
                .await?;

            if changed == 0 {
                debug!(update_id = %update.id, "Update already published or removed, skipping");
                continue;
            }
            report.published += 1;
            update.status = UpdateStatus::Published;
            update.published_at = Some(now);

            let liveblog = match liveblogs.get(&update.liveblog_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = match self.store.get_liveblog(update.liveblog_id).await {
                        Ok(liveblog) => liveblog,
                        Err(e) => {
                            warn!(update_id = %update.id, error = %e, "Could not load liveblog for fan-out");
                            None
                        }
                    };
                    liveblogs.insert(update.liveblog_id, loaded.clone());
                    loaded
                }
            };

            match liveblog {
                Some(liveblog) => {
                    self.fanout.dispatch(&liveblog, &update).await;
                }
                None => warn!(update_id = %update.id, "Published update has no liveblog, fan-out skipped"),
            }
        }

        info!(published = report.published, "Scheduled publish sweep finished");
        Ok(report)
    }
}
