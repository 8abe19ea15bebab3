// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-tools` — tool registry, dispatcher, hook pipeline, and the built-in
//! services.
//!
//! Tool names are namespaced `service-operation`.  Built-ins are compiled
//! in; external MCP tools are probed into a cached catalog and routed
//! through the pooled client with the unprefixed operation name:
//!
//! ```text
//! dispatch("filesystem-edit")  ──► built-in handler
//! dispatch("github-create_pr") ──► pool.call_tool("github", "create_pr", …)
//! dispatch("askuser-ask_question") ──► UserInteractionNeeded signal
//! ```

pub mod builtin;
pub mod events;
pub mod hooks;
pub mod registry;
pub mod tool;

pub use builtin::{
    file_paths_of, AskQuestionTool, EditFileTool, EditSearchTool, ReadFileTool,
    TerminalExecuteTool, TodoReadTool, TodoStore, TodoWriteTool, WriteFileTool,
};
pub use events::{TodoItem, ToolEvent};
pub use hooks::{tool_hook_env, HookOutcome, HookPoint, HookReport, HookRunner};
pub use registry::{
    CatalogInputs, CatalogSnapshot, DispatchError, ServiceInfo, ToolRegistry, UserQuestion,
};
pub use tool::{Tool, ToolCall, ToolOutput, ToolOutputPart};
