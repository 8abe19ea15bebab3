// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Built-in services compiled into the binary: `filesystem`, `terminal`,
//! `todo`, and `askuser`.  Built-ins are never disconnected and their
//! schemas are always advertised.

mod askuser;
mod fs;
mod terminal;
mod todo;

pub use askuser::AskQuestionTool;
pub use fs::{file_paths_of, EditFileTool, EditSearchTool, ReadFileTool, WriteFileTool};
pub use terminal::TerminalExecuteTool;
pub use todo::{TodoReadTool, TodoStore, TodoWriteTool};
