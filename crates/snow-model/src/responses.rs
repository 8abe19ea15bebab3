// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! OpenAI `/responses` dialect.
//!
//! Shares the OpenAI-like layout with the chat dialect but uses typed input
//! items (`message`, `function_call`, `function_call_output`) instead of
//! chat messages, and additionally carries a `prompt_cache_key` plus the
//! reasoning-effort knob.  Tool calls arrive as `output_item.added` followed
//! by `function_call_arguments.delta` fragments keyed by `output_index`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    provider::{classify_response, drain_sse_data_lines, transport_err, with_cancellation, ResponseStream},
    CompletionRequest, Message, ModelProvider, Role, StreamError, StreamEvent, UsageLog,
};

pub struct ResponsesProvider {
    model: String,
    api_key: String,
    responses_url: String,
    max_tokens: u32,
    /// Reasoning effort knob: `"low" | "medium" | "high"`, empty = omit.
    reasoning_effort: String,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
    usage_log: Option<Arc<UsageLog>>,
}

impl ResponsesProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: String,
        api_key: String,
        base_url: &str,
        max_tokens: u32,
        reasoning_effort: String,
        extra_headers: Vec<(String, String)>,
        usage_log: Option<Arc<UsageLog>>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            responses_url: format!("{base}/responses"),
            max_tokens,
            reasoning_effort,
            extra_headers,
            client: reqwest::Client::new(),
            usage_log,
        }
    }
}

#[async_trait]
impl ModelProvider for ResponsesProvider {
    fn name(&self) -> &str {
        "responses"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError> {
        let (instructions, input) = build_response_input(&req.messages, req.system_override.as_deref());

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                    "strict": false,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "input": input,
            "stream": true,
            "store": false,
            "max_output_tokens": self.max_tokens,
        });
        if !instructions.is_empty() {
            body["instructions"] = json!(instructions);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        // Pin all requests of one session to the same cached prefix.
        if let Some(key) = &req.cache_key {
            body["prompt_cache_key"] = json!(key);
        }
        if !self.reasoning_effort.is_empty() {
            body["reasoning"] = json!({ "effort": self.reasoning_effort });
        }

        debug!(
            model = %self.model,
            input_items = body["input"].as_array().map(Vec::len).unwrap_or(0),
            "sending responses request"
        );

        let mut http_req = self.client.post(&self.responses_url).json(&body);
        if !self.api_key.is_empty() {
            http_req = http_req.bearer_auth(&self.api_key);
        }
        for (name, val) in &self.extra_headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }

        let resp = http_req.send().await.map_err(transport_err)?;
        if !resp.status().is_success() {
            return Err(classify_response(resp).await);
        }

        let model = self.model.clone();
        let usage_log = self.usage_log.clone();
        let stream = async_stream::stream! {
            let mut bytes = resp.bytes_stream();
            let mut buf = String::new();
            let mut thinking = String::new();
            let mut completed = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(StreamError::Transport(e.to_string()));
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                for payload in drain_sse_data_lines(&mut buf) {
                    if payload == "[DONE]" {
                        continue;
                    }
                    let v: Value = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    match parse_responses_event(&v) {
                        Ok(events) => {
                            for event in events {
                                match &event {
                                    StreamEvent::ReasoningDelta(d) => thinking.push_str(d),
                                    StreamEvent::Usage { prompt_tokens, completion_tokens, cache_creation_tokens, cache_read_tokens } => {
                                        if let Some(log) = &usage_log {
                                            log.record(&model, *prompt_tokens, *completion_tokens, *cache_creation_tokens, *cache_read_tokens);
                                        }
                                    }
                                    StreamEvent::Done { .. } => completed = true,
                                    _ => {}
                                }
                                if let StreamEvent::Done { .. } = event {
                                    let t = if thinking.is_empty() { None } else { Some(std::mem::take(&mut thinking)) };
                                    yield Ok(StreamEvent::Done { thinking: t });
                                } else {
                                    yield Ok(event);
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if !buf.trim().is_empty() {
                yield Err(StreamError::Truncated);
                return;
            }
            if !completed {
                let t = if thinking.is_empty() { None } else { Some(thinking) };
                yield Ok(StreamEvent::Done { thinking: t });
            }
        };

        Ok(with_cancellation(Box::pin(stream), cancel))
    }
}

/// Parse one Responses-API SSE event.
pub(crate) fn parse_responses_event(v: &Value) -> Result<Vec<StreamEvent>, StreamError> {
    let kind = v["type"].as_str().unwrap_or("");
    match kind {
        "response.output_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("");
            if delta.is_empty() {
                Ok(vec![])
            } else {
                Ok(vec![StreamEvent::Content(delta.to_string())])
            }
        }
        // The API emits reasoning both as full text and as summaries
        // depending on the model; both carry the same semantics for us.
        "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("");
            if delta.is_empty() {
                Ok(vec![])
            } else {
                Ok(vec![StreamEvent::ReasoningDelta(delta.to_string())])
            }
        }
        "response.output_item.added" | "response.output_item.done" => {
            let item = &v["item"];
            if item["type"].as_str() != Some("function_call") {
                return Ok(vec![]);
            }
            let index = v["output_index"].as_u64().unwrap_or(0) as u32;
            let id = item["call_id"]
                .as_str()
                .or_else(|| item["id"].as_str())
                .unwrap_or("")
                .to_string();
            let name = item["name"].as_str().unwrap_or("").to_string();
            // `output_item.done` repeats the full arguments; the `added`
            // event precedes the argument deltas, so only forward the
            // arguments from `added` (always empty there) to avoid doubling.
            let arguments = if kind == "response.output_item.added" {
                item["arguments"].as_str().unwrap_or("").to_string()
            } else {
                String::new()
            };
            Ok(vec![StreamEvent::ToolCallDelta { index, id, name, arguments }])
        }
        "response.function_call_arguments.delta" => {
            let index = v["output_index"].as_u64().unwrap_or(0) as u32;
            let delta = v["delta"].as_str().unwrap_or("").to_string();
            Ok(vec![StreamEvent::ToolCallDelta {
                index,
                id: String::new(),
                name: String::new(),
                arguments: delta,
            }])
        }
        "response.completed" => {
            let mut events = Vec::new();
            if let Some(usage) = v["response"].get("usage") {
                let cache_read = usage
                    .get("input_tokens_details")
                    .and_then(|d| d.get("cached_tokens"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                events.push(StreamEvent::Usage {
                    prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_creation_tokens: 0,
                    cache_read_tokens: cache_read,
                });
            }
            events.push(StreamEvent::Done { thinking: None });
            Ok(events)
        }
        "response.failed" => {
            let message = v["response"]["error"]["message"]
                .as_str()
                .unwrap_or("response failed")
                .to_string();
            Err(StreamError::Protocol(message))
        }
        _ => Ok(vec![]),
    }
}

/// Convert the universal message list into `(instructions, input items)`.
///
/// The first system message becomes the `instructions` field (replaced by
/// `system_override` when set); everything else becomes typed input items.
pub(crate) fn build_response_input(
    messages: &[Message],
    system_override: Option<&str>,
) -> (String, Vec<Value>) {
    let mut instructions = String::new();
    let mut input = Vec::with_capacity(messages.len());

    for m in messages {
        match m.role {
            Role::System => {
                if instructions.is_empty() {
                    instructions = system_override.unwrap_or(&m.content).to_string();
                } else {
                    input.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": [{ "type": "input_text", "text": m.content }],
                    }));
                }
            }
            Role::User => {
                let mut content = vec![json!({ "type": "input_text", "text": m.content })];
                for img in &m.images {
                    content.push(json!({ "type": "input_image", "image_url": img.data_url }));
                }
                input.push(json!({ "type": "message", "role": "user", "content": content }));
            }
            Role::Assistant => {
                if !m.content.is_empty() {
                    input.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{ "type": "output_text", "text": m.content }],
                    }));
                }
                for tc in &m.tool_calls {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }));
                }
            }
            Role::Tool => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": m.tool_call_id.clone().unwrap_or_default(),
                    "output": m.content,
                }));
            }
        }
    }
    (instructions, input)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
