// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{CompletionRequest, StreamError, StreamEvent};

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, StreamError>> + Send>>;

/// One wire dialect, normalized to [`StreamEvent`]s.
///
/// Implementations guarantee: single writer to the returned stream, reader
/// closed on cancellation (the underlying HTTP body is dropped), and usage
/// written to the persistent usage log when the provider reports it.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Dialect name for logs and status display.
    fn name(&self) -> &str;

    /// Model identifier forwarded to the API.
    fn model_name(&self) -> &str;

    /// Send a completion request and stream normalized chunks back.
    ///
    /// Errors returned here (as opposed to mid-stream items) are request
    /// setup failures; both paths use the same [`StreamError`] taxonomy so
    /// the retry wrapper treats them uniformly.
    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError>;
}

// ─── Shared adapter plumbing ─────────────────────────────────────────────────

/// Drain every complete `\n`-terminated SSE line from `buf`, returning the
/// `data:` payloads.  A trailing incomplete line stays in `buf` so the next
/// TCP chunk can extend it — a single SSE event may be split across packets.
pub(crate) fn drain_sse_data_lines(buf: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(nl) = buf.find('\n') {
        let line = buf[..nl].trim_end_matches('\r').to_string();
        buf.drain(..=nl);
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

/// End the stream as soon as `cancel` fires.  Dropping the inner stream
/// drops the HTTP body, which closes the reader.
pub(crate) fn with_cancellation(inner: ResponseStream, cancel: CancellationToken) -> ResponseStream {
    Box::pin(inner.take_until(Box::pin(async move { cancel.cancelled().await })))
}

/// Map a reqwest send/stream error into the transport taxonomy.
pub(crate) fn transport_err(e: reqwest::Error) -> StreamError {
    StreamError::Transport(e.to_string())
}

/// Convert a non-success HTTP response into a classified error.
pub(crate) async fn classify_response(resp: reqwest::Response) -> StreamError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StreamError::from_status(status, body)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
