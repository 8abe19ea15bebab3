// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! The `todo` service: a per-session structured task list.
//!
//! State lives at `~/.snow/todos/<project-id>/<session-id>.json` and is
//! shared between both operations through [`TodoStore`].  Updates are pushed
//! to the loop over the tool-event channel so the UI sees `todo_update`
//! without polling.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{TodoItem, ToolEvent},
    tool::{Tool, ToolCall, ToolOutput},
};

/// Shared todo state bound to the active session.
pub struct TodoStore {
    dir: PathBuf,
    session_id: Mutex<Option<String>>,
    items: Mutex<Vec<TodoItem>>,
    event_tx: mpsc::Sender<ToolEvent>,
}

impl TodoStore {
    pub fn new(dir: PathBuf, event_tx: mpsc::Sender<ToolEvent>) -> Arc<Self> {
        Arc::new(Self {
            dir,
            session_id: Mutex::new(None),
            items: Mutex::new(Vec::new()),
            event_tx,
        })
    }

    /// Bind to a session, loading its persisted list.
    pub async fn bind_session(&self, session_id: &str) {
        let path = self.dir.join(format!("{session_id}.json"));
        let items: Vec<TodoItem> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        *self.items.lock().await = items;
        *self.session_id.lock().await = Some(session_id.to_string());
    }

    pub async fn items(&self) -> Vec<TodoItem> {
        self.items.lock().await.clone()
    }

    async fn replace(&self, items: Vec<TodoItem>) -> anyhow::Result<()> {
        if let Some(session) = self.session_id.lock().await.as_deref() {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(format!("{session}.json"));
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, serde_json::to_string_pretty(&items)?)?;
            std::fs::rename(&tmp, &path)?;
        }
        *self.items.lock().await = items.clone();
        let _ = self.event_tx.send(ToolEvent::TodoUpdate(items)).await;
        Ok(())
    }
}

// ─── todo-read ───────────────────────────────────────────────────────────────

pub struct TodoReadTool {
    pub store: Arc<TodoStore>,
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo-read"
    }

    fn description(&self) -> &str {
        "Read the current session's todo list."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let items = self.store.items().await;
        if items.is_empty() {
            return ToolOutput::ok(&call.id, "(todo list is empty)");
        }
        let text = items
            .iter()
            .map(|t| format!("[{}] {} — {}", t.status, t.id, t.content))
            .collect::<Vec<_>>()
            .join("\n");
        ToolOutput::ok(&call.id, text)
    }
}

// ─── todo-write ──────────────────────────────────────────────────────────────

pub struct TodoWriteTool {
    pub store: Arc<TodoStore>,
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo-write"
    }

    fn description(&self) -> &str {
        "Replace the session todo list. Each item: {id, content, status} with \
         status one of pending, in_progress, completed, cancelled."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let items: Vec<TodoItem> = match call
            .args
            .get("todos")
            .map(|v| serde_json::from_value(v.clone()))
        {
            Some(Ok(items)) => items,
            Some(Err(e)) => return ToolOutput::err(&call.id, format!("invalid todos: {e}")),
            None => return ToolOutput::err(&call.id, "missing required field: todos"),
        };
        let count = items.len();
        match self.store.replace(items).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("todo list updated ({count} items)")),
            Err(e) => ToolOutput::err(&call.id, format!("failed to persist todos: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<TodoStore>, mpsc::Receiver<ToolEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let store = TodoStore::new(dir.path().join("todos"), tx);
        (dir, store, rx)
    }

    fn write_call(todos: Value) -> ToolCall {
        ToolCall {
            id: "w1".into(),
            name: "todo-write".into(),
            args: json!({ "todos": todos }),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_d, store, _rx) = setup();
        store.bind_session("s1").await;

        let write = TodoWriteTool { store: Arc::clone(&store) };
        let out = write
            .execute(
                &write_call(json!([{"id": "1", "content": "do it", "status": "pending"}])),
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);

        let read = TodoReadTool { store };
        let out = read
            .execute(
                &ToolCall { id: "r1".into(), name: "todo-read".into(), args: json!({}) },
                &CancellationToken::new(),
            )
            .await;
        assert!(out.content.contains("do it"));
        assert!(out.content.contains("[pending]"));
    }

    #[tokio::test]
    async fn write_emits_todo_update_event() {
        let (_d, store, mut rx) = setup();
        store.bind_session("s1").await;
        let write = TodoWriteTool { store };
        write
            .execute(
                &write_call(json!([{"id": "1", "content": "x", "status": "in_progress"}])),
                &CancellationToken::new(),
            )
            .await;
        match rx.recv().await {
            Some(ToolEvent::TodoUpdate(items)) => assert_eq!(items.len(), 1),
            other => panic!("expected TodoUpdate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn todos_persist_per_session_file() {
        let (_d, store, _rx) = setup();
        store.bind_session("s1").await;
        let write = TodoWriteTool { store: Arc::clone(&store) };
        write
            .execute(
                &write_call(json!([{"id": "1", "content": "persisted", "status": "pending"}])),
                &CancellationToken::new(),
            )
            .await;

        // Rebinding the same session reloads from disk.
        store.bind_session("s1").await;
        assert_eq!(store.items().await.len(), 1);

        // A different session starts empty.
        store.bind_session("s2").await;
        assert!(store.items().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_status_is_rejected() {
        let (_d, store, _rx) = setup();
        store.bind_session("s1").await;
        let write = TodoWriteTool { store };
        let out = write
            .execute(
                &write_call(json!([{"id": "1", "content": "x"}])), // missing status
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_empty_list_reports_empty() {
        let (_d, store, _rx) = setup();
        let read = TodoReadTool { store };
        let out = read
            .execute(
                &ToolCall { id: "r".into(), name: "todo-read".into(), args: json!({}) },
                &CancellationToken::new(),
            )
            .await;
        assert!(out.content.contains("empty"));
    }
}
