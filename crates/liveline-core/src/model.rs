// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records shared by every liveline component.
//!
//! Records are owned by the storage layer. The core only reads them for
//! delivery and mutates status fields through [`crate::store::Transition`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl $name {
            /// Storage / wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle of a liveblog as a whole.
    LiveblogStatus, "liveblog status" {
        Draft => "draft",
        Active => "active",
        Ended => "ended",
        Archived => "archived",
    }
}

string_enum! {
    /// Who may see a liveblog.
    Privacy, "privacy" {
        Public => "public",
        Unlisted => "unlisted",
        Private => "private",
    }
}

string_enum! {
    /// Publication status of an update.
    UpdateStatus, "update status" {
        Draft => "draft",
        Scheduled => "scheduled",
        Published => "published",
        Deleted => "deleted",
    }
}

string_enum! {
    /// Sponsor slot lifecycle state. `Paused` is an editor override the
    /// lifecycle engine never touches.
    SponsorStatus, "sponsor status" {
        Scheduled => "scheduled",
        Active => "active",
        Paused => "paused",
        Archived => "archived",
    }
}

string_enum! {
    /// Reaction kinds a viewer may toggle on an update.
    ReactionKind, "reaction kind" {
        Heart => "heart",
        Fire => "fire",
        Clap => "clap",
        Laugh => "laugh",
        Wow => "wow",
        Sad => "sad",
    }
}

impl ReactionKind {
    /// Every kind, in display order.
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Heart,
        ReactionKind::Fire,
        ReactionKind::Clap,
        ReactionKind::Laugh,
        ReactionKind::Wow,
        ReactionKind::Sad,
    ];
}

/// A liveblog: the parent of updates, sponsor slots and widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liveblog {
    /// Liveblog identifier.
    pub id: Uuid,
    /// Headline shown in chat notifications.
    pub title: String,
    /// Editorial status.
    pub status: LiveblogStatus,
    /// Visibility to anonymous viewers.
    pub privacy: Privacy,
    /// Chat webhook that receives newly published updates, if configured.
    pub chat_webhook_url: Option<String>,
}

impl Liveblog {
    /// Whether anonymous viewers may read this liveblog's feed and stream.
    pub fn is_readable(&self) -> bool {
        self.privacy != Privacy::Private && self.status != LiveblogStatus::Draft
    }

    /// Whether anonymous viewers may react, vote or subscribe.
    pub fn accepts_engagement(&self) -> bool {
        self.status == LiveblogStatus::Active
            && matches!(self.privacy, Privacy::Public | Privacy::Unlisted)
    }
}

/// One editorial entry in a liveblog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Update identifier.
    pub id: Uuid,
    /// Owning liveblog.
    pub liveblog_id: Uuid,
    /// Tagged content document (`{"type": "text", ...}`), passed through verbatim.
    pub content: Value,
    /// Publication status.
    pub status: UpdateStatus,
    /// Pinned updates sort before all others.
    pub pinned: bool,
    /// When a scheduled update becomes due.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the update was published.
    pub published_at: Option<DateTime<Utc>>,
    /// Soft-delete tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Update {
    /// Only published, non-tombstoned updates are publicly visible.
    pub fn is_public(&self) -> bool {
        self.deleted_at.is_none() && self.status == UpdateStatus::Published
    }

    /// Typed view of [`Update::content`]. Unknown or malformed documents
    /// map to [`UpdateContent::Other`].
    pub fn typed_content(&self) -> UpdateContent {
        serde_json::from_value(self.content.clone()).unwrap_or(UpdateContent::Other)
    }
}

/// Content variants an update can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateContent {
    /// Plain text body.
    Text {
        /// Body text.
        text: String,
    },
    /// An image with optional caption.
    Image {
        /// Image URL.
        url: String,
        /// Caption shown under the image.
        #[serde(default)]
        caption: Option<String>,
        /// Alt text.
        #[serde(default)]
        alt: Option<String>,
    },
    /// A link card.
    Link {
        /// Target URL.
        url: String,
        /// Link title.
        #[serde(default)]
        title: Option<String>,
        /// Short description.
        #[serde(default)]
        description: Option<String>,
    },
    /// Anything else (embeds, quotes, widgets...).
    #[serde(other)]
    Other,
}

/// A time-boxed sponsor placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorSlot {
    /// Slot identifier.
    pub id: Uuid,
    /// Owning liveblog.
    pub liveblog_id: Uuid,
    /// Sponsor display name.
    pub name: String,
    /// Lifecycle state.
    pub status: SponsorStatus,
    /// Start of the placement window (inclusive).
    pub starts_at: Option<DateTime<Utc>>,
    /// End of the placement window (exclusive).
    pub ends_at: Option<DateTime<Utc>>,
    /// Higher priority sorts first.
    pub priority: i32,
    /// Pinned slots sort before all others.
    pub pinned: bool,
}

impl SponsorSlot {
    /// Whether `now` falls inside `[starts_at, ends_at)`. Open bounds always match.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.is_none_or(|start| now >= start) && self.ends_at.is_none_or(|end| now < end)
    }

    /// Viewer visibility: active and inside the window.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SponsorStatus::Active && self.window_contains(now)
    }
}

/// Widget kind accepting 0-100 votes.
pub const HOT_TAKE_WIDGET: &str = "hot_take";

/// An interactive widget embedded in a liveblog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Widget identifier.
    pub id: Uuid,
    /// Owning liveblog.
    pub liveblog_id: Uuid,
    /// Widget kind, e.g. [`HOT_TAKE_WIDGET`].
    pub kind: String,
}

/// Encryption keys a browser hands out with a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    /// Client public key (base64url).
    pub p256dh: String,
    /// Authentication secret (base64url).
    pub auth: String,
}

/// A browser push subscription for one liveblog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Liveblog the viewer subscribed to.
    pub liveblog_id: Uuid,
    /// Push service endpoint URL, unique per liveblog.
    pub endpoint: String,
    /// Subscription keys.
    pub keys: PushKeys,
    /// User agent that registered the subscription.
    pub user_agent: Option<String>,
    /// Last successful delivery.
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Kind of row change reported by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

/// A single change on the `updates` relation, scoped to one liveblog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Liveblog the changed row belongs to. Used for routing, not sent to clients.
    #[serde(skip_serializing)]
    pub liveblog_id: Uuid,
    /// What happened.
    pub event: ChangeKind,
    /// Row after the change (absent for deletes).
    pub new: Option<Value>,
    /// Row before the change (absent for inserts).
    pub old: Option<Value>,
}
