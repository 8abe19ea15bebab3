use serde::{Deserialize, Serialize};

/// A structured todo item managed by the todo service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Events emitted by stateful tools back to the conversation loop.
/// The loop translates these into transport events for the UI.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
}
