// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-core` — the engine: conversation loop, tool scheduler, sub-agent
//! runtime, running-agent tracker, and context compressor.
//!
//! ```text
//! transport ──► Engine::run_turn
//!                 │  compaction gate (Compactor)
//!                 │  provider stream (snow-model retry wrapper)
//!                 ▼
//!           ToolScheduler ──► ToolRegistry ──► built-ins / MCP pool
//!                 │                   │
//!            approvals + ESC     SubAgentTool ──► isolated loop
//!                                      │
//!                             RunningAgentTracker (queues)
//! ```

pub mod agent;
pub mod approval;
pub mod compactor;
pub mod events;
pub mod insert;
pub mod scheduler;
pub mod subagent;
pub mod tracker;
pub mod turn;
pub mod useful_info;

pub use agent::{Engine, EngineParts};
pub use approval::ApprovalState;
pub use compactor::{Compactor, CompressionOutcome};
pub use events::EngineEvent;
pub use insert::safe_insert_index;
pub use scheduler::{
    resource_id, BatchOutcome, ConfirmationDecision, ConfirmationRequest, InteractionHandler,
    ToolScheduler,
};
pub use subagent::{SendMessageTool, SubAgentDeps, SubAgentRuntime, SubAgentTool};
pub use tracker::{
    InterAgentMessage, RunningAgentInfo, RunningAgentTracker, SpawnedResult,
};
pub use turn::{accumulate_stream, TurnOutcome};
pub use useful_info::UsefulInfoService;
