// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy shared by every operation surfaced to callers.
//!
//! Each component defines its own `thiserror` enum; all of them classify into
//! one [`ErrorKind`] so the HTTP layer can map status codes without knowing
//! component internals. `duplicate` is absent: an idempotent
//! repeat is a success flag, not an error.

use serde::Serialize;

/// Caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing required field.
    BadRequest,
    /// Field present but semantically invalid (e.g. unknown reaction kind).
    InvalidPayload,
    /// Visibility gate failed.
    Forbidden,
    /// Target absent, or not owned by the claimed parent.
    NotFound,
    /// Storage or transport failure.
    ServerError,
}

impl ErrorKind {
    /// Wire code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::InvalidPayload => "invalid_payload",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl crate::store::StoreError {
    /// Storage failures always classify as `server_error`.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServerError
    }

    /// Wire code for this error.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::BadRequest.as_str(), "bad_request");
        assert_eq!(ErrorKind::InvalidPayload.to_string(), "invalid_payload");
        assert_eq!(
            serde_json::to_value(ErrorKind::NotFound).unwrap(),
            serde_json::json!("not_found")
        );
    }
}
