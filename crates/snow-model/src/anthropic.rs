// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic `/v1/messages` dialect.
//!
//! Differences from the OpenAI-like dialects: the system prompt is a
//! top-level field, split into two blocks — a static prefix carrying
//! `cache_control` (cached across turns) and a recent/dynamic block without
//! it; images are inline base64 source blocks; thinking blocks flow inline
//! with `tool_use` blocks in the assistant content array; tool results are
//! `tool_result` blocks on user turns.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    parse_data_url_parts,
    provider::{classify_response, drain_sse_data_lines, transport_err, with_cancellation, ResponseStream},
    CompletionRequest, Message, ModelProvider, Role, StreamError, StreamEvent, UsageLog,
};

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    /// Extra `anthropic-beta` features (comma-separated), from config.
    beta: String,
    /// `"1h"` switches the cache_control TTL from the 5-minute default.
    cache_ttl: String,
    /// Request extended thinking and replay stored thinking blocks.
    thinking: bool,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
    usage_log: Option<Arc<UsageLog>>,
}

impl AnthropicProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: String,
        api_key: String,
        base_url: &str,
        max_tokens: u32,
        beta: String,
        cache_ttl: String,
        thinking: bool,
        extra_headers: Vec<(String, String)>,
        usage_log: Option<Arc<UsageLog>>,
    ) -> Self {
        let base = if base_url.is_empty() {
            "https://api.anthropic.com".to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Self {
            model,
            api_key,
            base_url: base,
            max_tokens,
            beta,
            cache_ttl,
            thinking,
            extra_headers,
            client: reqwest::Client::new(),
            usage_log,
        }
    }

    fn cache_control(&self) -> Value {
        if self.cache_ttl == "1h" {
            json!({ "type": "ephemeral", "ttl": "1h" })
        } else {
            json!({ "type": "ephemeral" })
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError> {
        let (system_static, messages) =
            build_anthropic_messages(&req.messages, req.system_override.as_deref(), self.thinking);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": true,
        });

        // Two system blocks: the static prefix gets cache_control so the
        // provider caches it; the recent/dynamic block stays uncached so
        // volatile context never invalidates the prefix.
        let mut system_blocks: Vec<Value> = Vec::new();
        if !system_static.is_empty() {
            system_blocks.push(json!({
                "type": "text",
                "text": system_static,
                "cache_control": self.cache_control(),
            }));
        }
        if let Some(dynamic) = &req.system_dynamic_suffix {
            if !dynamic.trim().is_empty() {
                system_blocks.push(json!({ "type": "text", "text": dynamic }));
            }
        }
        if !system_blocks.is_empty() {
            body["system"] = json!(system_blocks);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if self.thinking {
            // Leave roughly half the output budget for the visible answer.
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": (self.max_tokens / 2).max(1024),
            });
        }

        debug!(
            model = %self.model,
            thinking = self.thinking,
            message_count = req.messages.len(),
            "sending anthropic request"
        );

        let mut http_req = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let mut betas: Vec<&str> = vec!["prompt-caching-2024-07-31"];
        if self.cache_ttl == "1h" {
            betas.push("extended-cache-ttl-2025-04-11");
        }
        if !self.beta.is_empty() {
            betas.push(&self.beta);
        }
        http_req = http_req.header("anthropic-beta", betas.join(","));
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
            // Input-side usage arrives in message_start, output-side in
            // message_delta; merge them into one Usage event at the end.
            let mut prompt_tokens = 0u32;
            let mut cache_read = 0u32;
            let mut cache_write = 0u32;
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
                    let v: Value = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    for event in parse_anthropic_event(&v, &mut prompt_tokens, &mut cache_read, &mut cache_write) {
                        match &event {
                            StreamEvent::ReasoningDelta(d) => thinking.push_str(d),
                            StreamEvent::Usage { prompt_tokens, completion_tokens, cache_creation_tokens, cache_read_tokens } => {
                                if let Some(log) = &usage_log {
                                    log.record(&model, *prompt_tokens, *completion_tokens, *cache_creation_tokens, *cache_read_tokens);
                                }
                            }
                            _ => {}
                        }
                        if let StreamEvent::Done { .. } = event {
                            done_seen = true;
                            let t = if thinking.is_empty() { None } else { Some(std::mem::take(&mut thinking)) };
                            yield Ok(StreamEvent::Done { thinking: t });
                        } else {
                            yield Ok(event);
                        }
                    }
                }
            }

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

/// Parse one Anthropic SSE event.
///
/// `prompt_tokens` / `cache_read` / `cache_write` accumulate across events:
/// Anthropic reports input usage in `message_start` but output usage only in
/// the final `message_delta`, so the single Usage event is emitted there.
pub(crate) fn parse_anthropic_event(
    v: &Value,
    prompt_tokens: &mut u32,
    cache_read: &mut u32,
    cache_write: &mut u32,
) -> Vec<StreamEvent> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                *prompt_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                *cache_read = usage["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32;
                *cache_write = usage["cache_creation_input_tokens"].as_u64().unwrap_or(0) as u32;
            }
            vec![]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                vec![StreamEvent::ToolCallDelta {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }]
            } else {
                vec![]
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![StreamEvent::Content(text.to_string())]
                    }
                }
                "input_json_delta" => vec![StreamEvent::ToolCallDelta {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }],
                "thinking_delta" => {
                    let t = delta["thinking"].as_str().unwrap_or("");
                    if t.is_empty() {
                        vec![]
                    } else {
                        vec![StreamEvent::ReasoningDelta(t.to_string())]
                    }
                }
                // Encrypted integrity blob at the end of a thinking block;
                // never surfaced.
                "signature_delta" => vec![],
                _ => vec![],
            }
        }
        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                vec![StreamEvent::Usage {
                    prompt_tokens: *prompt_tokens,
                    completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_creation_tokens: *cache_write,
                    cache_read_tokens: *cache_read,
                }]
            } else {
                vec![]
            }
        }
        "message_stop" => vec![StreamEvent::Done { thinking: None }],
        _ => vec![],
    }
}

fn image_block(data_url: &str) -> Value {
    match parse_data_url_parts(data_url) {
        Ok((mime, data)) => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime, "data": data }
        }),
        Err(_) => json!({
            "type": "image",
            "source": { "type": "url", "url": data_url }
        }),
    }
}

/// Convert the universal message list into `(system_text, wire_messages)`.
///
/// Assistant tool-call blocks become one assistant message whose content
/// array carries `thinking` (when enabled and recorded), then text, then the
/// `tool_use` blocks; consecutive tool responses collapse into one user
/// message of `tool_result` blocks so the block stays contiguous on the wire.
pub(crate) fn build_anthropic_messages(
    messages: &[Message],
    system_override: Option<&str>,
    replay_thinking: bool,
) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];
        match m.role {
            Role::System => {
                if system_text.is_empty() {
                    system_text = system_override.unwrap_or(&m.content).to_string();
                }
                i += 1;
            }
            Role::User => {
                if m.images.is_empty() {
                    out.push(json!({ "role": "user", "content": m.content }));
                } else {
                    let mut content = vec![json!({ "type": "text", "text": m.content })];
                    for img in &m.images {
                        content.push(image_block(&img.data_url));
                    }
                    out.push(json!({ "role": "user", "content": content }));
                }
                i += 1;
            }
            Role::Assistant => {
                if m.tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": m.content }));
                } else {
                    let mut content: Vec<Value> = Vec::new();
                    if replay_thinking {
                        if let Some(t) = &m.thinking {
                            if !t.is_empty() {
                                content.push(json!({ "type": "thinking", "thinking": t }));
                            }
                        }
                    }
                    if !m.content.is_empty() {
                        content.push(json!({ "type": "text", "text": m.content }));
                    }
                    for tc in &m.tool_calls {
                        let id = if tc.id.is_empty() { "call_fallback" } else { &tc.id };
                        content.push(json!({
                            "type": "tool_use",
                            "id": id,
                            "name": tc.name,
                            "input": serde_json::from_str::<Value>(&tc.arguments)
                                .unwrap_or(json!({})),
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": content }));
                }
                i += 1;
            }
            Role::Tool => {
                // Collapse the whole run of tool responses into one user turn.
                let mut blocks: Vec<Value> = Vec::new();
                while i < messages.len() && messages[i].role == Role::Tool {
                    let t = &messages[i];
                    let inner: Value = if t.images.is_empty() {
                        json!(t.content)
                    } else {
                        let mut parts = vec![json!({ "type": "text", "text": t.content })];
                        for img in &t.images {
                            parts.push(image_block(&img.data_url));
                        }
                        json!(parts)
                    };
                    blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": t.tool_call_id.clone().unwrap_or_default(),
                        "content": inner,
                    }));
                    i += 1;
                }
                out.push(json!({ "role": "user", "content": blocks }));
            }
        }
    }
    (system_text, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
