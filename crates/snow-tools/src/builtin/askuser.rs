// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// The `askuser` service: `askuser-ask_question`.
///
/// This tool never produces a value by itself — valid calls are intercepted
/// by the dispatcher, which raises a user-interaction signal that the
/// scheduler forwards to the UI; the user's answer becomes the tool
/// response.  The struct exists so the schema is advertised like any other
/// built-in.
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn name(&self) -> &str {
        "askuser-ask_question"
    }

    fn description(&self) -> &str {
        "Ask the user a multiple-choice question and wait for their answer.\n\
         Provide a non-empty 'question' and at least two 'options'. Use this \
         for decisions that need an explicit choice; for open questions just \
         ask in your text response."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to present"
                },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 2,
                    "description": "The choices offered to the user"
                }
            },
            "required": ["question", "options"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        // Reaching this means the dispatcher's interception was bypassed
        // (e.g. direct registry use in a headless context).
        ToolOutput::err(
            &call.id,
            "ask_question requires an interactive client and cannot run headless",
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
