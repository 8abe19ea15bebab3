// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// The descriptor is unusable (both/neither of command and url, …).
    #[error("invalid MCP config for '{service}': {reason}")]
    Config { service: String, reason: String },
    /// Transport could not be constructed or the handshake failed.
    #[error("failed to connect to MCP service '{service}': {reason}")]
    ConnectionFailed { service: String, reason: String },
    /// The live connection dropped while a call was in flight.  Retryable:
    /// the pool evicts the stale handle and the next call reconnects.
    #[error("connection to MCP service '{service}' lost: {reason}")]
    ConnectionLost { service: String, reason: String },
    /// The service answered with an error result.
    #[error("MCP call '{operation}' on '{service}' failed: {reason}")]
    CallFailed {
        service: String,
        operation: String,
        reason: String,
    },
    #[error("MCP call '{operation}' on '{service}' timed out after {seconds}s")]
    Timeout {
        service: String,
        operation: String,
        seconds: u64,
    },
    #[error("cancelled")]
    Cancelled,
}

impl McpError {
    /// True for failures where a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Timeout { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
