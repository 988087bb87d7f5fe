// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Liveline Core - live update distribution engine
//!
//! This crate holds the stateful part of a liveblog platform: delivering
//! published updates to many passive viewers, deduplicating anonymous
//! engagement, moving sponsor placements through their lifecycle, and
//! publishing scheduled content with fan-out to chat and push channels.
//!
//! # Architecture
//!
//! ```text
//!        viewers (pull)          viewers (push)         cron / scheduler
//!             │                       │                        │
//!             ▼                       ▼                        ▼
//!   ┌──────────────────┐   ┌──────────────────┐   ┌─────────────────────────┐
//!   │ feed             │   │ relay::ChangeHub │   │ publish::Publisher      │
//!   │ ETag / 304       │   │ one Subscription │   │ sponsor_lifecycle       │
//!   └────────┬─────────┘   │ per connection   │   └──────┬───────────┬──────┘
//!            │             └────────▲─────────┘          │           │
//!   ┌────────┴─────────┐            │                    │           ▼
//!   │ ledger           │            │ change events      │   ┌───────────────┐
//!   │ reactions, votes │            │                    │   │ fanout        │
//!   └────────┬─────────┘            │                    │   │ chat  │ push  │
//!            ▼                      │                    ▼   └───────────────┘
//!   ┌────────────────────────────────────────────────────────────┐
//!   │ store::Store   (PostgresStore + LISTEN, or MemoryStore)    │
//!   └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! There are no locks across requests. Every status change made by a sweep
//! goes through [`store::Store::apply_transition`], a conditional write that
//! reports the number of rows it changed. A sweep that loses a race sees `0`
//! and skips the row, including its fan-out.
//!
//! # Modules
//!
//! - [`model`]: domain records
//! - [`store`]: storage gateway trait and backends
//! - [`relay`]: change stream multiplexing
//! - [`feed`]: fingerprinted feed snapshots
//! - [`ledger`]: reactions and votes
//! - [`subscriptions`]: push subscription registration
//! - [`sponsor_lifecycle`]: sponsor slot sweep
//! - [`publish`]: scheduled publish sweep
//! - [`fanout`]: chat webhook and Web Push channels
//! - [`scheduler`]: in-process sweep timer

#![deny(missing_docs)]

/// Error taxonomy shared across components.
pub mod error;

/// Fingerprinted feed snapshots and conditional delivery.
pub mod feed;

/// Fan-out channels for newly published updates.
pub mod fanout;

/// Engagement ledger for reactions and hot-take votes.
pub mod ledger;

/// Embedded SQL migrations.
pub mod migrations;

/// Domain records.
pub mod model;

/// Scheduled publish sweep.
pub mod publish;

/// Change stream hub and per-connection subscriptions.
pub mod relay;

/// In-process sweep scheduler.
pub mod scheduler;

/// Sponsor slot lifecycle sweep.
pub mod sponsor_lifecycle;

/// Storage gateway and backends.
pub mod store;

/// Push subscription registration.
pub mod subscriptions;

pub use error::ErrorKind;
