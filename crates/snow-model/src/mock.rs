// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Scripted provider for tests.
//!
//! Each call to [`ModelProvider::stream`] pops the next scripted attempt and
//! replays its events.  Errors are scripted in-line, so retry behaviour and
//! multi-round tool loops are testable without a network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    provider::ResponseStream, CompletionRequest, ModelProvider, StreamError, StreamEvent,
};

type Attempt = Vec<Result<StreamEvent, StreamError>>;

pub struct MockProvider {
    attempts: Mutex<std::collections::VecDeque<Attempt>>,
    /// Requests observed, for assertions on what the loop sent.
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(attempts: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(attempts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Script a single successful text-only turn.
    pub fn text_turn(text: &str) -> Attempt {
        vec![
            Ok(StreamEvent::Content(text.to_string())),
            Ok(StreamEvent::Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
            }),
            Ok(StreamEvent::Done { thinking: None }),
        ]
    }

    /// Script a turn that issues the given tool calls.
    pub fn tool_turn(calls: Vec<crate::ToolCallRecord>) -> Attempt {
        vec![
            Ok(StreamEvent::ToolCalls(calls)),
            Ok(StreamEvent::Done { thinking: None }),
        ]
    }

    pub fn remaining(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        _cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError> {
        self.requests.lock().unwrap().push(req);
        let attempt = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok(StreamEvent::Done { thinking: None })]);
        Ok(Box::pin(futures::stream::iter(attempt)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn attempts_are_consumed_in_order() {
        let mock = MockProvider::new(vec![
            MockProvider::text_turn("first"),
            MockProvider::text_turn("second"),
        ]);
        let mut s = mock
            .stream(CompletionRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        match s.next().await.unwrap().unwrap() {
            StreamEvent::Content(t) => assert_eq!(t, "first"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn exhausted_script_yields_bare_done() {
        let mock = MockProvider::new(vec![]);
        let mut s = mock
            .stream(CompletionRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            s.next().await.unwrap().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("x")]);
        let mut req = CompletionRequest::default();
        req.cache_key = Some("session-1".into());
        let _ = mock.stream(req, CancellationToken::new()).await.unwrap();
        assert_eq!(
            mock.requests.lock().unwrap()[0].cache_key.as_deref(),
            Some("session-1")
        );
    }
}
