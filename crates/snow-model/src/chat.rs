// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! OpenAI-style `/chat/completions` dialect.
//!
//! The most widely spoken wire format: one JSON body, SSE response with
//! per-line `data:` records, parallel tool calls keyed by `index`, usage in
//! a final chunk when `stream_options.include_usage` is set.

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

pub struct ChatProvider {
    model: String,
    api_key: String,
    chat_url: String,
    max_tokens: u32,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
    usage_log: Option<Arc<UsageLog>>,
}

impl ChatProvider {
    pub fn new(
        model: String,
        api_key: String,
        base_url: &str,
        max_tokens: u32,
        extra_headers: Vec<(String, String)>,
        usage_log: Option<Arc<UsageLog>>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens,
            extra_headers,
            client: reqwest::Client::new(),
            usage_log,
        }
    }
}

#[async_trait]
impl ModelProvider for ChatProvider {
    fn name(&self) -> &str {
        "chat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError> {
        let messages = build_chat_messages(
            &req.messages,
            req.system_override.as_deref(),
            req.system_dynamic_suffix.as_deref(),
        );
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.max_tokens,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending chat completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
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
            let mut done_seen = false;

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
                        done_seen = true;
                        let t = if thinking.is_empty() { None } else { Some(std::mem::take(&mut thinking)) };
                        yield Ok(StreamEvent::Done { thinking: t });
                        continue;
                    }
                    let v: Value = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    for event in parse_chat_chunk(&v) {
                        match &event {
                            StreamEvent::ReasoningDelta(d) => thinking.push_str(d),
                            StreamEvent::Usage { prompt_tokens, completion_tokens, cache_creation_tokens, cache_read_tokens } => {
                                if let Some(log) = &usage_log {
                                    log.record(&model, *prompt_tokens, *completion_tokens, *cache_creation_tokens, *cache_read_tokens);
                                }
                            }
                            _ => {}
                        }
                        yield Ok(event);
                    }
                }
            }

            // Unconsumed bytes at socket close mean the stream was cut
            // mid-event; the retry wrapper restarts the call.
            if !buf.trim().is_empty() {
                yield Err(StreamError::Truncated);
                return;
            }
            if !done_seen {
                let t = if thinking.is_empty() { None } else { Some(thinking) };
                yield Ok(StreamEvent::Done { thinking: t });
            }
        };

        Ok(with_cancellation(Box::pin(stream), cancel))
    }
}

/// Parse one chat-completions SSE chunk into zero or more events.
pub(crate) fn parse_chat_chunk(v: &Value) -> Vec<StreamEvent> {
    // Usage-only chunk (emitted last when include_usage is set).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let cache_read = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        return vec![StreamEvent::Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cache_creation_tokens: 0,
            cache_read_tokens: cache_read,
        }];
    }

    let delta = &v["choices"][0]["delta"];
    let mut events = Vec::new();

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_calls {
            events.push(StreamEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            });
        }
        return events;
    }

    // Reasoning text arrives under `reasoning_content` (llama.cpp, DeepSeek)
    // or `reasoning` (OpenRouter); same semantics either way.
    let reasoning = delta
        .get("reasoning_content")
        .and_then(Value::as_str)
        .or_else(|| delta.get("reasoning").and_then(Value::as_str));
    if let Some(r) = reasoning {
        if !r.is_empty() {
            events.push(StreamEvent::ReasoningDelta(r.to_string()));
            return events;
        }
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(StreamEvent::Content(text.to_string()));
        }
    }
    events
}

/// Convert the universal message list into chat-completions wire messages.
///
/// `system_override` replaces the content of the first system message;
/// `dynamic_suffix` is appended to it (chat has no uncached-block concept,
/// so volatile context simply rides on the system text).
pub(crate) fn build_chat_messages(
    messages: &[Message],
    system_override: Option<&str>,
    dynamic_suffix: Option<&str>,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    let mut system_replaced = false;

    for m in messages {
        match m.role {
            Role::System => {
                let base = if !system_replaced {
                    system_replaced = true;
                    system_override.unwrap_or(&m.content)
                } else {
                    &m.content
                };
                let content = match dynamic_suffix {
                    Some(s) if !s.trim().is_empty() && out.is_empty() => {
                        format!("{base}\n\n{s}")
                    }
                    _ => base.to_string(),
                };
                out.push(json!({ "role": "system", "content": content }));
            }
            Role::User => {
                if m.images.is_empty() {
                    out.push(json!({ "role": "user", "content": m.content }));
                } else {
                    let mut parts = vec![json!({ "type": "text", "text": m.content })];
                    for img in &m.images {
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": img.data_url },
                        }));
                    }
                    out.push(json!({ "role": "user", "content": parts }));
                }
            }
            Role::Assistant => {
                if m.tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": m.content }));
                } else {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect();
                    let mut msg = json!({ "role": "assistant", "tool_calls": calls });
                    if !m.content.is_empty() {
                        msg["content"] = json!(m.content);
                    }
                    out.push(msg);
                }
            }
            Role::Tool => {
                let id = m.tool_call_id.clone().unwrap_or_default();
                if m.images.is_empty() {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": m.content,
                    }));
                } else {
                    let mut parts = vec![json!({ "type": "text", "text": m.content })];
                    for img in &m.images {
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": img.data_url },
                        }));
                    }
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": parts,
                    }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
