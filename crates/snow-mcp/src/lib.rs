// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-mcp` — persistent client pool for external MCP services.
//!
//! Built-in services are in-process and never touch this crate; everything
//! here is about keeping subprocess/HTTP connections alive across tool
//! calls, evicting them when idle, and failing single invocations (not
//! sibling calls) when a connection drops.
//!
//! ```text
//! dispatcher ──► McpClientPool::call_tool(service, op, args)
//!                   │  get_or_open (mutex-atomic)
//!                   ▼
//!        stdio (TokioChildProcess) │ streamable HTTP │ legacy SSE fallback
//! ```

mod env;
mod error;
mod pool;

pub use env::{auth_header, expand_vars, merged_env};
pub use error::{McpError, McpResult};
pub use pool::{McpClientPool, ProgressWatch, DEFAULT_CALL_TIMEOUT, IDLE_TIMEOUT};

// Wire-model types consumers need to interpret probe/call results without
// depending on rmcp themselves.
pub use rmcp::model::{CallToolResult, Tool as McpToolInfo};
