// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Google Gemini dialect — `{model}:streamGenerateContent?alt=sse`.
//!
//! Gemini folds the system prompt into `systemInstruction`, uses `model` /
//! `user` roles, and wraps tool responses as `functionResponse` parts on
//! user turns, matched to calls by function *name* rather than id.  Function
//! calls arrive complete (never as argument deltas).  Thinking-capable
//! models attach a `thoughtSignature` to the first function-call part; it
//! must be echoed on the function calls replayed in subsequent requests,
//! and the one captured signature is reused for sibling calls of the turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    parse_data_url_parts,
    provider::{classify_response, drain_sse_data_lines, transport_err, with_cancellation, ResponseStream},
    CompletionRequest, Message, ModelProvider, Role, StreamError, StreamEvent, ToolCallRecord,
    UsageLog,
};

pub struct GeminiProvider {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    /// `generationConfig.thinkingConfig.includeThoughts`.
    thinking: bool,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
    usage_log: Option<Arc<UsageLog>>,
    /// Signature captured from the last streamed function-call part,
    /// echoed on replayed function calls (shared across requests).
    thought_signature: Arc<Mutex<Option<String>>>,
}

impl GeminiProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: String,
        api_key: String,
        base_url: &str,
        max_tokens: u32,
        thinking: bool,
        extra_headers: Vec<(String, String)>,
        usage_log: Option<Arc<UsageLog>>,
    ) -> Self {
        let base = if base_url.is_empty() {
            "https://generativelanguage.googleapis.com".to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Self {
            model,
            api_key,
            base_url: base,
            max_tokens,
            thinking,
            extra_headers,
            client: reqwest::Client::new(),
            usage_log,
            thought_signature: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, StreamError> {
        let signature = self.thought_signature.lock().expect("signature lock").clone();
        let (system_parts, contents) = build_gemini_contents(
            &req.messages,
            req.system_override.as_deref(),
            req.system_dynamic_suffix.as_deref(),
            signature.as_deref(),
        );

        let mut generation_config = json!({ "maxOutputTokens": self.max_tokens });
        if self.thinking {
            generation_config["thinkingConfig"] = json!({ "includeThoughts": true });
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        if !req.tools.is_empty() {
            let decls: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": decls }]);
        }

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );

        debug!(model = %self.model, "sending gemini request");

        let mut http_req = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        for (name, val) in &self.extra_headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }

        let resp = http_req.send().await.map_err(transport_err)?;
        if !resp.status().is_success() {
            return Err(classify_response(resp).await);
        }

        let model = self.model.clone();
        let usage_log = self.usage_log.clone();
        let signature_slot = Arc::clone(&self.thought_signature);
        let stream = async_stream::stream! {
            let mut bytes = resp.bytes_stream();
            let mut buf = String::new();
            let mut thinking = String::new();
            // Gemini has no call ids; synthesize per-turn sequential ids.
            let mut call_seq = 0u32;
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
                    for event in parse_gemini_chunk(&v, &mut call_seq, &signature_slot) {
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

/// Parse one Gemini SSE chunk.
///
/// `call_seq` numbers synthesized call ids within the turn; a
/// `thoughtSignature` on any function-call part is stored into
/// `signature_slot` (captured once, reused for siblings).
pub(crate) fn parse_gemini_chunk(
    v: &Value,
    call_seq: &mut u32,
    signature_slot: &Arc<Mutex<Option<String>>>,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(meta) = v.get("usageMetadata") {
        events.push(StreamEvent::Usage {
            prompt_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            cache_creation_tokens: 0,
            cache_read_tokens: meta["cachedContentTokenCount"].as_u64().unwrap_or(0) as u32,
        });
    }

    let candidate = &v["candidates"][0];
    let mut calls: Vec<ToolCallRecord> = Vec::new();

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        events.push(StreamEvent::ReasoningDelta(text.to_string()));
                    }
                }
                continue;
            }
            if let Some(fc) = part.get("functionCall") {
                if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                    *signature_slot.lock().expect("signature lock") = Some(sig.to_string());
                }
                let name = fc["name"].as_str().unwrap_or("").to_string();
                let args = serde_json::to_string(&fc["args"]).unwrap_or_else(|_| "{}".into());
                calls.push(ToolCallRecord {
                    id: format!("call_{}", *call_seq),
                    name,
                    arguments: args,
                });
                *call_seq += 1;
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    events.push(StreamEvent::Content(text.to_string()));
                }
            }
        }
    }

    if !calls.is_empty() {
        events.push(StreamEvent::ToolCalls(calls));
    }
    if candidate["finishReason"].as_str().is_some() {
        events.push(StreamEvent::Done { thinking: None });
    }
    events
}

/// Wrap tool output so `functionResponse.response` is always a JSON object.
///
/// Gemini rejects non-object responses; output that already parses as an
/// object passes through verbatim, anything else is wrapped in a synthetic
/// `{content, _timestamp}` shape.
pub(crate) fn wrap_function_response(content: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(content) {
        if v.is_object() {
            return v;
        }
    }
    json!({
        "content": content,
        "_timestamp": chrono::Utc::now().timestamp_millis(),
    })
}

/// Convert the universal message list into `(system_parts, contents)`.
pub(crate) fn build_gemini_contents(
    messages: &[Message],
    system_override: Option<&str>,
    dynamic_suffix: Option<&str>,
    thought_signature: Option<&str>,
) -> (Vec<Value>, Vec<Value>) {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    // Gemini matches functionResponse to functionCall by name, not id.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for m in messages {
        for tc in &m.tool_calls {
            call_names.insert(tc.id.clone(), tc.name.clone());
        }
    }

    for m in messages {
        match m.role {
            Role::System => {
                if system_parts.is_empty() {
                    let base = system_override.unwrap_or(&m.content);
                    let text = match dynamic_suffix {
                        Some(s) if !s.trim().is_empty() => format!("{base}\n\n{s}"),
                        _ => base.to_string(),
                    };
                    system_parts.push(json!({ "text": text }));
                }
            }
            Role::User => {
                let mut parts = vec![json!({ "text": m.content })];
                for img in &m.images {
                    if let Ok((mime, data)) = parse_data_url_parts(&img.data_url) {
                        parts.push(json!({ "inline_data": { "mime_type": mime, "data": data } }));
                    }
                }
                contents.push(json!({ "role": "user", "parts": parts }));
            }
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                for tc in &m.tool_calls {
                    let args: Value = serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                    let mut part = json!({
                        "functionCall": { "name": tc.name, "args": args }
                    });
                    if let Some(sig) = thought_signature {
                        part["thoughtSignature"] = json!(sig);
                    }
                    parts.push(part);
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Role::Tool => {
                let id = m.tool_call_id.clone().unwrap_or_default();
                let fn_name = call_names.get(&id).cloned().unwrap_or(id);
                let mut parts = vec![json!({
                    "functionResponse": {
                        "name": fn_name,
                        "response": wrap_function_response(&m.content),
                    }
                })];
                for img in &m.images {
                    if let Ok((mime, data)) = parse_data_url_parts(&img.data_url) {
                        parts.push(json!({ "inline_data": { "mime_type": mime, "data": data } }));
                    }
                }
                contents.push(json!({ "role": "user", "parts": parts }));
            }
        }
    }
    (system_parts, contents)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
