// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use ferry_protocol::jsonrpc::error_codes;
use ferry_protocol::ErrorObject;

/// Internal error taxonomy.  Each kind has a fixed JSON-RPC mapping; handler
/// code returns these and the facade translates at the RPC boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed params or configuration.  Non-recoverable for the request.
    #[error("Invalid params: {0}")]
    Validation(String),

    /// The referenced session does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session already has a turn in flight.
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Admission denied or memory pressure.  The client may retry later.
    #[error("Resource exhausted: {0}")]
    Resource(String),

    /// Frame decode failure or protocol invariant violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend authentication is required or was rejected.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Adapter failure outside a running turn.  Failures inside a turn are
    /// surfaced in-band instead.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Anything unexpected.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn code(&self) -> i64 {
        match self {
            Self::Validation(_) => error_codes::INVALID_PARAMS,
            Self::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            Self::SessionBusy(_) => error_codes::SESSION_BUSY,
            Self::Resource(_) => error_codes::RESOURCE_EXHAUSTED,
            Self::Protocol(_) => error_codes::INVALID_REQUEST,
            Self::AuthRequired(_) => error_codes::AUTH_REQUIRED,
            Self::Backend(_) | Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string())
    }
}

impl From<BridgeError> for ErrorObject {
    fn from(e: BridgeError) -> Self {
        e.to_error_object()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
