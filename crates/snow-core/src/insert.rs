// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Insertion safety for synthetic user messages.
//!
//! Tool-call blocks are atomic: an assistant message carrying tool calls and
//! the tool responses that answer it must stay contiguous.  When the loop
//! injects a message (compaction notice, spawned-agent result), the computed
//! position is adjusted to land *before* any block it would otherwise split.

use snow_model::{Message, Role};

/// Index at which a synthetic message may be inserted, starting from
/// `n_from_end` messages before the end and moving backwards out of any
/// tool-call block.
pub fn safe_insert_index(messages: &[Message], n_from_end: usize) -> usize {
    let len = messages.len();
    let mut idx = len.saturating_sub(n_from_end);

    // Inserting at `idx` puts the new message before `messages[idx]`.  If
    // that position sits on a tool response, it is inside a block; walk back
    // over the responses and the assistant head that opened the block.
    while idx > 0 && idx < len && messages[idx].role == Role::Tool {
        idx -= 1;
    }
    // `idx` now points at the block's assistant head (or an unrelated
    // message).  Inserting before a head keeps the block intact.
    idx
}

/// True when inserting at `idx` would split a tool-call block.
/// Exposed for assertions in tests.
pub fn splits_tool_block(messages: &[Message], idx: usize) -> bool {
    idx < messages.len() && messages[idx].role == Role::Tool
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
