// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sponsor slot lifecycle engine.
//!
//! ```text
//!   ┌───────────┐  window open   ┌────────┐  window closed  ┌──────────┐
//!   │ SCHEDULED │───────────────►│ ACTIVE │────────────────►│ ARCHIVED │
//!   └─────┬─────┘                └────────┘                 └──────────┘
//!         │            window already closed                     ▲
//!         └──────────────────────────────────────────────────────┘
//!
//!   PAUSED is an editor override; the sweep never reads or writes it.
//! ```
//!
//! Each planned move is applied as a guarded transition on the slot's
//! last-known status, so a sweep racing an editor or another sweep simply
//! counts nothing for that slot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::feed::{self, FeedError};
use crate::model::{SponsorSlot, SponsorStatus};
use crate::store::{self, Store, Transition};

/// Slots examined per sweep invocation.
pub const SPONSOR_SWEEP_BATCH: i64 = 500;

/// A planned status move for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTransition {
    /// Status the slot must still have for the move to apply.
    pub expected: SponsorStatus,
    /// Status to write.
    pub next: SponsorStatus,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SponsorSweepReport {
    /// Slots moved to `active`.
    pub activated: u64,
    /// Slots moved to `archived`.
    pub archived: u64,
}

/// Decide where `slot` should move at `now`, if anywhere.
///
/// Archival takes priority: a slot whose window already closed is archived
/// even if it was never activated.
pub fn plan_transition(slot: &SponsorSlot, now: DateTime<Utc>) -> Option<PlannedTransition> {
    if !matches!(
        slot.status,
        SponsorStatus::Scheduled | SponsorStatus::Active
    ) {
        return None;
    }

    if slot.ends_at.is_some_and(|end| now >= end) {
        return Some(PlannedTransition {
            expected: slot.status,
            next: SponsorStatus::Archived,
        });
    }

    if slot.status == SponsorStatus::Scheduled && slot.window_contains(now) {
        return Some(PlannedTransition {
            expected: SponsorStatus::Scheduled,
            next: SponsorStatus::Active,
        });
    }

    None
}

/// Run one lifecycle sweep at `now`.
#[instrument(skip(store))]
pub async fn run_sponsor_sweep(
    store: &dyn Store,
    now: DateTime<Utc>,
) -> store::Result<SponsorSweepReport> {
    let slots = store
        .list_due_sponsor_slots(now, SPONSOR_SWEEP_BATCH)
        .await?;
    let mut report = SponsorSweepReport::default();

    for slot in &slots {
        let Some(plan) = plan_transition(slot, now) else {
            continue;
        };

        let changed = store
            .apply_transition(&Transition::Sponsor {
                slot_id: slot.id,
                expected: vec![plan.expected],
                next: plan.next,
            })
            .await?;

        if changed == 0 {
            debug!(slot_id = %slot.id, "Sponsor slot changed concurrently, skipping");
            continue;
        }

        match plan.next {
            SponsorStatus::Active => report.activated += changed,
            SponsorStatus::Archived => report.archived += changed,
            _ => {}
        }
    }

    info!(
        examined = slots.len(),
        activated = report.activated,
        archived = report.archived,
        "Sponsor lifecycle sweep finished"
    );
    Ok(report)
}

/// Sponsor slots a viewer of `liveblog_id` should see at `now`.
pub async fn visible_sponsors(
    store: &dyn Store,
    liveblog_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<SponsorSlot>, FeedError> {
    feed::require_readable(store, liveblog_id).await?;
    let slots = store.list_visible_sponsor_slots(liveblog_id, now).await?;
    Ok(slots.into_iter().filter(|s| s.is_visible_at(now)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn slot(status: SponsorStatus, starts: Option<i64>, ends: Option<i64>) -> (SponsorSlot, DateTime<Utc>) {
        let now = Utc::now();
        let slot = SponsorSlot {
            id: Uuid::new_v4(),
            liveblog_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            status,
            starts_at: starts.map(|s| now + Duration::minutes(s)),
            ends_at: ends.map(|s| now + Duration::minutes(s)),
            priority: 0,
            pinned: false,
        };
        (slot, now)
    }

    #[test]
    fn test_scheduled_slot_activates_inside_window() {
        let (s, now) = slot(SponsorStatus::Scheduled, Some(-5), Some(5));
        assert_eq!(
            plan_transition(&s, now),
            Some(PlannedTransition {
                expected: SponsorStatus::Scheduled,
                next: SponsorStatus::Active
            })
        );

        let (s, now) = slot(SponsorStatus::Scheduled, None, None);
        assert_eq!(plan_transition(&s, now).map(|p| p.next), Some(SponsorStatus::Active));
    }

    #[test]
    fn test_future_slot_waits() {
        let (s, now) = slot(SponsorStatus::Scheduled, Some(5), Some(10));
        assert_eq!(plan_transition(&s, now), None);
    }

    #[test]
    fn test_closed_window_archives_before_activation() {
        let (s, now) = slot(SponsorStatus::Scheduled, Some(-10), Some(-5));
        assert_eq!(
            plan_transition(&s, now),
            Some(PlannedTransition {
                expected: SponsorStatus::Scheduled,
                next: SponsorStatus::Archived
            })
        );

        let (s, now) = slot(SponsorStatus::Active, None, Some(0));
        assert_eq!(plan_transition(&s, now).map(|p| p.next), Some(SponsorStatus::Archived));
    }

    #[test]
    fn test_active_slot_inside_window_stays() {
        let (s, now) = slot(SponsorStatus::Active, Some(-5), Some(5));
        assert_eq!(plan_transition(&s, now), None);
    }

    #[test]
    fn test_paused_and_archived_are_ignored() {
        let (s, now) = slot(SponsorStatus::Paused, None, Some(-5));
        assert_eq!(plan_transition(&s, now), None);
        let (s, now) = slot(SponsorStatus::Archived, None, Some(-5));
        assert_eq!(plan_transition(&s, now), None);
    }
}
