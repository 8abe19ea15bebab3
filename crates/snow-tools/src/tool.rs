// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use snow_model::ImagePart;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the provider (forwarded verbatim).
    pub id: String,
    /// Namespaced `service-operation` name.
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

impl ToolCall {
    /// Parse a wire-level call record into a dispatchable call.
    ///
    /// Invalid JSON arguments degrade to an empty object — the schema check
    /// inside the tool then produces a structured error the model can react
    /// to, instead of the whole turn failing.
    pub fn from_record(record: &snow_model::ToolCallRecord) -> Self {
        let args = serde_json::from_str(&record.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()));
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            args,
        }
    }
}

/// One content item of a rich tool output.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
    /// Base64 data URL.
    Image(ImagePart),
}

/// The result of executing one tool call.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all text parts.
    pub content: String,
    /// Image parts that ride along on the tool message.
    pub images: Vec<ImagePart>,
    /// True when the tool failed non-fatally; the message is returned to the
    /// model as the tool response so the conversation survives.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            images: Vec::new(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            images: Vec::new(),
            is_error: true,
        }
    }

    /// Assemble from mixed parts; `content` becomes the joined text.
    pub fn from_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let mut text_parts = Vec::new();
        let mut images = Vec::new();
        for p in parts {
            match p {
                ToolOutputPart::Text(t) => text_parts.push(t),
                ToolOutputPart::Image(img) => images.push(img),
            }
        }
        Self {
            call_id: call_id.into(),
            content: text_parts.join("\n"),
            images,
            is_error: false,
        }
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// Character-weighted token estimate for the result ceiling.
    pub fn approx_tokens(&self) -> usize {
        self.content.len() / 4 + self.images.len() * 765
    }
}

/// Trait implemented by every built-in tool.
///
/// External (MCP) tools never implement this — they are routed through the
/// client pool by the dispatcher.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Namespaced `service-operation` name, e.g. `filesystem-read`.
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Execute.  Failures are reported via [`ToolOutput::err`]; `cancel` is
    /// the turn's token (tools that spawn children must honour it).
    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_record_parses_arguments() {
        let rec = snow_model::ToolCallRecord {
            id: "c1".into(),
            name: "filesystem-read".into(),
            arguments: r#"{"filePath": "a.txt"}"#.into(),
        };
        let call = ToolCall::from_record(&rec);
        assert_eq!(call.args["filePath"], "a.txt");
    }

    #[test]
    fn from_record_degrades_bad_json_to_empty_object() {
        let rec = snow_model::ToolCallRecord {
            id: "c1".into(),
            name: "t".into(),
            arguments: "{broken".into(),
        };
        let call = ToolCall::from_record(&rec);
        assert!(call.args.as_object().unwrap().is_empty());
    }

    #[test]
    fn from_parts_splits_text_and_images() {
        let out = ToolOutput::from_parts(
            "c",
            vec![
                ToolOutputPart::Text("a".into()),
                ToolOutputPart::Image(ImagePart {
                    data_url: "data:image/png;base64,AA==".into(),
                    mime_type: "image/png".into(),
                }),
                ToolOutputPart::Text("b".into()),
            ],
        );
        assert_eq!(out.content, "a\nb");
        assert_eq!(out.images.len(), 1);
        assert!(out.has_images());
    }

    #[test]
    fn err_sets_flag() {
        let out = ToolOutput::err("c", "denied");
        assert!(out.is_error);
        assert_eq!(out.content, "denied");
    }

    #[test]
    fn approx_tokens_counts_text_and_images() {
        let mut out = ToolOutput::ok("c", "x".repeat(400));
        assert_eq!(out.approx_tokens(), 100);
        out.images.push(ImagePart {
            data_url: "data:image/png;base64,AA==".into(),
            mime_type: "image/png".into(),
        });
        assert_eq!(out.approx_tokens(), 865);
    }
}
