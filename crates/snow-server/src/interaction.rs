// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The scheduler's interaction callbacks, backed by SSE + response POSTs.
//!
//! A confirmation or question becomes a wire event carrying a fresh
//! `requestId`; the client answers with a `tool_confirmation_response` /
//! `user_question_response` message whose `requestId` resolves the pending
//! oneshot.  Timeouts fall back to rejection so a vanished client can never
//! wedge a turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use snow_core::{ConfirmationDecision, ConfirmationRequest, InteractionHandler};
use snow_tools::UserQuestion;

use crate::{
    state::{ConnectionRegistry, PendingRequests},
    wire::WireEvent,
};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct SseInteraction {
    connections: Arc<ConnectionRegistry>,
    pending: Arc<PendingRequests>,
}

impl SseInteraction {
    pub fn new(connections: Arc<ConnectionRegistry>, pending: Arc<PendingRequests>) -> Self {
        Self {
            connections,
            pending,
        }
    }
}

#[async_trait]
impl InteractionHandler for SseInteraction {
    async fn confirm_tool(&self, request: ConfirmationRequest) -> ConfirmationDecision {
        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.pending.insert(&request_id);

        let event = WireEvent::new(
            "tool_confirmation_request",
            json!({
                "call": {
                    "id": request.call.id,
                    "name": request.call.name,
                    "arguments": request.call.arguments,
                },
                "siblings": request.siblings,
                "isSensitive": request.is_sensitive,
            }),
        )
        .with_request_id(&request_id);
        self.connections.send_all(event).await;

        let payload = match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(v)) => v,
            _ => {
                warn!(request_id, "confirmation timed out; rejecting");
                self.pending.cancel(&request_id);
                return ConfirmationDecision::Reject;
            }
        };

        match payload["decision"].as_str().unwrap_or("reject") {
            "approve" => ConfirmationDecision::Approve,
            "approve_always" => ConfirmationDecision::ApproveAlways,
            "reject_with_reply" => ConfirmationDecision::RejectWithReply(
                payload["reply"].as_str().unwrap_or_default().to_string(),
            ),
            _ => match payload["reply"].as_str() {
                Some(reply) if !reply.is_empty() => {
                    ConfirmationDecision::RejectWithReply(reply.to_string())
                }
                _ => ConfirmationDecision::Reject,
            },
        }
    }

    async fn ask_user(&self, question: UserQuestion) -> Option<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.pending.insert(&request_id);

        let event = WireEvent::new(
            "user_question_request",
            json!({
                "question": question.question,
                "options": question.options,
            }),
        )
        .with_request_id(&request_id);
        self.connections.send_all(event).await;

        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(payload)) => payload["answer"].as_str().map(str::to_string),
            _ => {
                self.pending.cancel(&request_id);
                None
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use snow_model::ToolCallRecord;
    use tokio::sync::mpsc;

    fn interaction() -> (Arc<SseInteraction>, Arc<ConnectionRegistry>, Arc<PendingRequests>) {
        let connections = Arc::new(ConnectionRegistry::default());
        let pending = Arc::new(PendingRequests::default());
        (
            Arc::new(SseInteraction::new(
                Arc::clone(&connections),
                Arc::clone(&pending),
            )),
            connections,
            pending,
        )
    }

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            call: ToolCallRecord {
                id: "c1".into(),
                name: "terminal-execute".into(),
                arguments: r#"{"command":"rm -rf dist"}"#.into(),
            },
            siblings: vec!["terminal-execute".into()],
            is_sensitive: true,
        }
    }

    #[tokio::test]
    async fn confirmation_round_trip_via_request_id() {
        let (interaction, connections, pending) = interaction();
        let (tx, mut rx) = mpsc::channel(8);
        connections.register("conn1", tx);

        let pending2 = Arc::clone(&pending);
        let answerer = tokio::spawn(async move {
            // The client sees the wire event and answers by requestId.
            let event = rx.recv().await.expect("confirmation event");
            assert_eq!(event.kind, "tool_confirmation_request");
            assert_eq!(event.data["isSensitive"], true);
            let id = event.request_id.expect("request id");
            assert!(pending2.resolve(&id, serde_json::json!({"decision": "approve_always"})));
        });

        let decision = interaction.confirm_tool(request()).await;
        answerer.await.unwrap();
        assert!(matches!(decision, ConfirmationDecision::ApproveAlways));
    }

    #[tokio::test]
    async fn reject_with_reply_carries_the_text() {
        let (interaction, connections, pending) = interaction();
        let (tx, mut rx) = mpsc::channel(8);
        connections.register("conn1", tx);

        let pending2 = Arc::clone(&pending);
        tokio::spawn(async move {
            let event = rx.recv().await.unwrap();
            let id = event.request_id.unwrap();
            pending2.resolve(
                &id,
                serde_json::json!({"decision": "reject", "reply": "not in prod"}),
            );
        });

        match interaction.confirm_tool(request()).await {
            ConfirmationDecision::RejectWithReply(reply) => assert_eq!(reply, "not in prod"),
            other => panic!("expected reply rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn question_answer_round_trip() {
        let (interaction, connections, pending) = interaction();
        let (tx, mut rx) = mpsc::channel(8);
        connections.register("conn1", tx);

        let pending2 = Arc::clone(&pending);
        tokio::spawn(async move {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, "user_question_request");
            let id = event.request_id.unwrap();
            pending2.resolve(&id, serde_json::json!({"answer": "option B"}));
        });

        let answer = interaction
            .ask_user(UserQuestion {
                call_id: "c1".into(),
                question: "Which one?".into(),
                options: vec!["A".into(), "B".into()],
            })
            .await;
        assert_eq!(answer.as_deref(), Some("option B"));
    }
}
