// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Liveline Server - HTTP surface over `liveline-core`
//!
//! Embed endpoints are anonymous and CORS-enabled. Engagement endpoints
//! answer storage failures with `{ok: false}` and status 200. The sweep
//! endpoints under `/internal` are guarded by a shared secret and are meant
//! for an external periodic trigger; the same sweeps can also run in-process
//! through [`liveline_core::scheduler`].

#![deny(missing_docs)]

/// HTTP routes and handlers.
pub mod api;

/// Environment configuration.
pub mod config;

/// Handler error mapping.
pub mod error;

/// Shared handler state.
pub mod state;
