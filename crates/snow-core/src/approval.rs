// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Always-approved tool names, layered:
//!
//! - **session** — loaded from / persisted to the session file
//! - **memory** — process-wide for the remainder of the run; shared with
//!   every active sub-agent
//! - **yolo** — pre-declared safe in configuration
//!
//! Sub-agents additionally consult a local set (approvals granted inside
//! the sub-agent take effect for its remaining calls immediately).

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ApprovalState {
    session: Mutex<HashSet<String>>,
    memory: Mutex<HashSet<String>>,
    yolo: HashSet<String>,
}

impl ApprovalState {
    pub fn new(yolo_tools: impl IntoIterator<Item = String>) -> Self {
        Self {
            session: Mutex::new(HashSet::new()),
            memory: Mutex::new(HashSet::new()),
            yolo: yolo_tools.into_iter().collect(),
        }
    }

    /// Replace the session layer (called when a session is created/loaded).
    pub fn load_session(&self, names: impl IntoIterator<Item = String>) {
        *self.session.lock().expect("approval lock") = names.into_iter().collect();
    }

    pub fn is_approved(&self, tool: &str) -> bool {
        self.yolo.contains(tool)
            || self.session.lock().expect("approval lock").contains(tool)
            || self.memory.lock().expect("approval lock").contains(tool)
    }

    /// "Always approve": persists to the session layer and to the shared
    /// in-memory layer so running sub-agents see it this turn.
    pub fn approve_always(&self, tool: &str) {
        self.session
            .lock()
            .expect("approval lock")
            .insert(tool.to_string());
        self.memory
            .lock()
            .expect("approval lock")
            .insert(tool.to_string());
    }

    /// Session layer snapshot, for persisting into the session file.
    pub fn session_snapshot(&self) -> Vec<String> {
        let mut v: Vec<String> = self
            .session
            .lock()
            .expect("approval lock")
            .iter()
            .cloned()
            .collect();
        v.sort();
        v
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yolo_tools_are_pre_approved() {
        let a = ApprovalState::new(vec!["filesystem-read".to_string()]);
        assert!(a.is_approved("filesystem-read"));
        assert!(!a.is_approved("terminal-execute"));
    }

    #[test]
    fn approve_always_is_visible_immediately() {
        let a = ApprovalState::new(vec![]);
        a.approve_always("terminal-execute");
        assert!(a.is_approved("terminal-execute"));
    }

    #[test]
    fn session_layer_loads_and_snapshots() {
        let a = ApprovalState::new(vec![]);
        a.load_session(vec!["filesystem-edit".to_string()]);
        assert!(a.is_approved("filesystem-edit"));
        a.approve_always("todo-write");
        let snap = a.session_snapshot();
        assert_eq!(snap, vec!["filesystem-edit", "todo-write"]);
    }

    #[test]
    fn loading_a_new_session_replaces_the_session_layer() {
        let a = ApprovalState::new(vec![]);
        a.load_session(vec!["x".to_string()]);
        a.load_session(vec!["y".to_string()]);
        assert!(!a.session_snapshot().contains(&"x".to_string()));
        assert!(a.is_approved("y"));
    }

    #[test]
    fn memory_layer_survives_session_reload() {
        let a = ApprovalState::new(vec![]);
        a.approve_always("t");
        a.load_session(vec![]);
        assert!(a.is_approved("t"), "memory layer is process-scoped");
    }
}
