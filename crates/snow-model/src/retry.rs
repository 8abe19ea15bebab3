// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Generator-level retry around a provider stream.
//!
//! The wrapper re-subscribes to the provider on retryable failures and emits
//! a [`StreamEvent::RetryStatus`] marker before each re-attempt.  The marker
//! is the contract with consumers: everything streamed since the previous
//! attempt began is void and will be re-streamed, so accumulators (text,
//! thinking, tool-call assembly) must reset there.  That is what makes a
//! retried stream observationally equal to a single successful one.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{provider::ResponseStream, CompletionRequest, ModelProvider, StreamError, StreamEvent};

/// Retry policy: at most five attempts, exponential backoff starting at 2s
/// capped at 30s, full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay for 1-based `attempt`: uniform over
    /// `0..=min(initial * 2^(attempt-1), max)`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_delay
            .as_millis()
            .saturating_mul(1u128 << (attempt.saturating_sub(1)).min(16));
        let capped = exp.min(self.max_delay.as_millis()) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=capped))
    }
}

/// Wrap `provider.stream(req)` in the retry policy.
///
/// Retries only on [`StreamError::is_retryable`] failures, aborts
/// immediately on cancellation, and surfaces non-retryable errors verbatim.
/// Setup errors (request construction, connect) and mid-stream errors are
/// treated uniformly.
pub fn stream_with_retry(
    provider: Arc<dyn ModelProvider>,
    req: CompletionRequest,
    cancel: CancellationToken,
    policy: RetryPolicy,
) -> ResponseStream {
    let stream = async_stream::stream! {
        let mut attempt = 0u32;
        'attempts: loop {
            attempt += 1;
            if cancel.is_cancelled() {
                yield Err(StreamError::Cancelled);
                return;
            }

            let inner = provider.stream(req.clone(), cancel.clone()).await;
            let mut inner = match inner {
                Ok(s) => s,
                Err(e) => {
                    match next_step(&e, attempt, &policy, &cancel) {
                        RetryStep::Retry(delay) => {
                            yield Ok(retry_status(attempt, &policy, &delay, &e));
                            tokio::time::sleep(delay).await;
                            continue 'attempts;
                        }
                        RetryStep::GiveUp => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            };

            use futures::StreamExt;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        match next_step(&e, attempt, &policy, &cancel) {
                            RetryStep::Retry(delay) => {
                                // The marker voids the partial attempt for
                                // consumers before the re-stream begins.
                                yield Ok(retry_status(attempt, &policy, &delay, &e));
                                tokio::time::sleep(delay).await;
                                continue 'attempts;
                            }
                            RetryStep::GiveUp => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
            }
            // Inner stream finished cleanly.
            return;
        }
    };
    Box::pin(stream)
}

enum RetryStep {
    Retry(Duration),
    GiveUp,
}

fn next_step(
    err: &StreamError,
    attempt: u32,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> RetryStep {
    if cancel.is_cancelled() || !err.is_retryable() || attempt >= policy.max_attempts {
        return RetryStep::GiveUp;
    }
    let delay = policy.delay_for(attempt);
    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "provider stream failed; retrying");
    RetryStep::Retry(delay)
}

fn retry_status(attempt: u32, policy: &RetryPolicy, delay: &Duration, err: &StreamError) -> StreamEvent {
    StreamEvent::RetryStatus {
        attempt,
        max_attempts: policy.max_attempts,
        delay_ms: delay.as_millis() as u64,
        reason: err.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
