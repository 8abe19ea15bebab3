// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Classified provider-stream failure.
///
/// The variants mirror the retry policy: the wrapper retries exactly the
/// errors whose [`is_retryable`][StreamError::is_retryable] is true, and
/// surfaces everything else immediately.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Network-level failure: DNS, connect, reset, TLS.
    #[error("transport error: {0}")]
    Transport(String),
    /// HTTP 429 from the provider.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// HTTP 401/403 — the key is wrong; retrying cannot help.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// HTTP 5xx or 408 — the provider may recover.
    #[error("transient provider error (status {status}): {body}")]
    Transient { status: u16, body: String },
    /// Any other 4xx — the request itself is bad.
    #[error("provider rejected request (status {status}): {body}")]
    Permanent { status: u16, body: String },
    /// The socket closed with unconsumed data in the line buffer, i.e. the
    /// stream was cut mid-event.  Retryable: the wrapper restarts the call.
    #[error("stream truncated mid-event")]
    Truncated,
    /// Malformed payload that survived the fix-up pass.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The caller cancelled; never retried.
    #[error("cancelled")]
    Cancelled,
}

impl StreamError {
    /// Classify an HTTP error status per the retry policy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            401 | 403 => Self::Auth(body),
            408 => Self::Transient { status, body },
            s if s >= 500 => Self::Transient { status, body },
            s => Self::Permanent { status: s, body },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited(_) | Self::Transient { .. } | Self::Truncated
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
