// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Shared server state: connection registry, session bindings, pending
//! interactive requests, live turn tokens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use snow_config::SubAgentConfig;
use snow_core::Engine;
use snow_model::ImagePart;
use snow_tools::TodoStore;

use crate::wire::WireEvent;

/// Per-connection outbound queue.  Streaming deltas arrive in bursts, so
/// the channel is generously sized; a consumer that falls behind loses the
/// connection rather than stalling a turn.
pub const CONNECTION_BUFFER: usize = 1024;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, mpsc::Sender<WireEvent>>>,
}

impl ConnectionRegistry {
    pub fn register(&self, id: &str, tx: mpsc::Sender<WireEvent>) {
        self.inner
            .lock()
            .expect("connection registry lock")
            .insert(id.to_string(), tx);
    }

    pub fn unregister(&self, id: &str) {
        self.inner
            .lock()
            .expect("connection registry lock")
            .remove(id);
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("connection registry lock").len()
    }

    /// Send to a specific connection; stale entries are dropped on failure.
    pub async fn send_to(&self, id: &str, event: WireEvent) {
        let tx = self
            .inner
            .lock()
            .expect("connection registry lock")
            .get(id)
            .cloned();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                debug!(connection = id, "dropping closed connection");
                self.unregister(id);
            }
        }
    }

    /// Broadcast — used for interactive requests when no binding is known.
    pub async fn send_all(&self, event: WireEvent) {
        let targets: Vec<(String, mpsc::Sender<WireEvent>)> = self
            .inner
            .lock()
            .expect("connection registry lock")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                self.unregister(&id);
            }
        }
    }
}

/// Pending interactive requests awaiting a `*_response` POST.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>,
}

impl PendingRequests {
    pub fn insert(&self, request_id: &str) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("pending lock")
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve a pending request.  Returns false for unknown/expired ids.
    pub fn resolve(&self, request_id: &str, payload: serde_json::Value) -> bool {
        match self.inner.lock().expect("pending lock").remove(request_id) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, request_id: &str) {
        self.inner.lock().expect("pending lock").remove(request_id);
    }
}

pub struct AppState {
    pub engine: Arc<Engine>,
    /// Shared with [`crate::interaction::SseInteraction`].
    pub connections: Arc<ConnectionRegistry>,
    pub pending: Arc<PendingRequests>,
    pub todo_store: Arc<TodoStore>,
    /// session id → connection id.
    pub bindings: Mutex<HashMap<String, String>>,
    /// session id → running turn's cancellation token.
    pub running_turns: Mutex<HashMap<String, CancellationToken>>,
    /// session id → images queued for the next chat message.
    pub pending_images: Mutex<HashMap<String, Vec<ImagePart>>>,
    /// session id → switched-to agent id.
    pub active_agents: Mutex<HashMap<String, String>>,
    /// Configured sub-agents, for switch_agent and agent_list.
    pub agents: Vec<SubAgentConfig>,
    /// Per-session turn serialization: turns on one session queue here.
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        connections: Arc<ConnectionRegistry>,
        pending: Arc<PendingRequests>,
        todo_store: Arc<TodoStore>,
        agents: Vec<SubAgentConfig>,
    ) -> Self {
        Self {
            engine,
            connections,
            pending,
            todo_store,
            bindings: Mutex::new(HashMap::new()),
            running_turns: Mutex::new(HashMap::new()),
            pending_images: Mutex::new(HashMap::new()),
            active_agents: Mutex::new(HashMap::new()),
            agents,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The per-session turn lock; acquiring it serializes turns at entry.
    pub fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .lock()
            .expect("session locks")
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn bind_session(&self, session_id: &str, connection_id: &str) {
        self.bindings
            .lock()
            .expect("bindings lock")
            .insert(session_id.to_string(), connection_id.to_string());
    }

    pub fn unbind_session(&self, session_id: &str) {
        self.bindings.lock().expect("bindings lock").remove(session_id);
    }

    pub fn connection_for(&self, session_id: &str) -> Option<String> {
        self.bindings
            .lock()
            .expect("bindings lock")
            .get(session_id)
            .cloned()
    }

    /// Deliver an event for a session: to its bound connection when known,
    /// otherwise to every connection.
    pub async fn deliver(&self, session_id: &str, event: WireEvent) {
        match self.connection_for(session_id) {
            Some(conn) => self.connections.send_to(&conn, event).await,
            None => self.connections.send_all(event).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_send_to_reaches_only_the_target() {
        let reg = ConnectionRegistry::default();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        reg.register("a", tx_a);
        reg.register("b", tx_b);

        reg.send_to("a", WireEvent::new("complete", json!({}))).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_drops_closed_connections_on_send() {
        let reg = ConnectionRegistry::default();
        let (tx, rx) = mpsc::channel(1);
        reg.register("gone", tx);
        drop(rx);
        reg.send_to("gone", WireEvent::new("x", json!({}))).await;
        assert_eq!(reg.count(), 0);
    }

    #[tokio::test]
    async fn pending_request_resolves_once() {
        let pending = PendingRequests::default();
        let rx = pending.insert("req-1");
        assert!(pending.resolve("req-1", json!({"decision": "approve"})));
        assert_eq!(rx.await.unwrap()["decision"], "approve");
        assert!(!pending.resolve("req-1", json!({})), "second resolve is a no-op");
    }

    #[test]
    fn unknown_request_id_does_not_resolve() {
        let pending = PendingRequests::default();
        assert!(!pending.resolve("ghost", json!({})));
    }
}
