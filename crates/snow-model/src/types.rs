use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Message model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// An ordered image attachment on a message.
///
/// The payload is always a data URL (`data:<mime>;base64,<b64>`); providers
/// that want raw base64 split it with [`parse_data_url_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePart {
    pub data_url: String,
    pub mime_type: String,
}

impl ImagePart {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::Engine;
        let mime_type = mime_type.into();
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            data_url: format!("data:{mime_type};base64,{b64}"),
            mime_type,
        }
    }
}

/// A finalized tool call issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Server-unique within a turn; echoed back on the tool response.
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// One message in a conversation.
///
/// The tool-call block invariants (spec'd over whole messages) make a flat
/// struct the natural shape here: an assistant message either carries
/// `tool_calls` or it doesn't, and a tool message always carries the
/// `tool_call_id` it responds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Ordered image attachments (user turns and multimodal tool results).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImagePart>,
    /// Set only on assistant messages that request tool execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Set only on tool messages; must reference a preceding assistant call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Reasoning trace captured from the provider, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            thinking: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<ImagePart>) -> Self {
        let mut m = Self::base(Role::User, content);
        m.images = images;
        m
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls — the head of a tool-call block.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        let mut m = Self::base(Role::Assistant, content);
        m.tool_calls = calls;
        m
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(call_id.into());
        m
    }

    pub fn tool_result_with_images(
        call_id: impl Into<String>,
        content: impl Into<String>,
        images: Vec<ImagePart>,
    ) -> Self {
        let mut m = Self::tool_result(call_id, content);
        m.images = images;
        m
    }

    /// Approximate token count used for budget decisions.
    ///
    /// Text uses the 4-chars-per-token heuristic; images use the typical
    /// 765-token estimate for a 512×512 region.  This is deliberately
    /// model-agnostic — the same estimate is applied at every call site so
    /// the budgets compose.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.arguments.len();
        }
        chars += self.images.len() * 765 * 4;
        (chars / 4).max(1)
    }
}

/// Sum of [`Message::approx_tokens`] over a slice.
pub fn approx_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::approx_tokens).sum()
}

// ─── Data URL helpers ────────────────────────────────────────────────────────

/// Parse `data:<mime>;base64,<b64>` into `(mime, b64)`.  Returns `Err` for
/// non-data URLs so callers can fall back to remote-reference handling.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Request handed to a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Replaces the first system message when set (active system-prompt
    /// store entry or per-config override).
    pub system_override: Option<String>,
    /// Volatile context (response language, project info) that must not
    /// pollute the cached system prefix.  Anthropic sends it as a second
    /// system block without `cache_control`; the other dialects append it
    /// to the system text.
    pub system_dynamic_suffix: Option<String>,
    /// Stable key for providers with explicit prompt-cache pinning
    /// (the Responses dialect's `prompt_cache_key`).  Session id in practice.
    pub cache_key: Option<String>,
}

// ─── Stream events ───────────────────────────────────────────────────────────

/// Normalized chunk emitted by every dialect adapter.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Assistant text delta.
    Content(String),
    /// Reasoning/thinking delta (extended thinking, reasoning_content, …).
    ReasoningDelta(String),
    /// Partial tool call; fragments with the same `index` accumulate.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Complete tool calls, for dialects that emit whole calls at once.
    ToolCalls(Vec<ToolCallRecord>),
    /// Final usage statistics for the request.
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        cache_creation_tokens: u32,
        cache_read_tokens: u32,
    },
    /// Emitted by the retry wrapper before a re-attempt so consumers can
    /// surface the state without aborting their own loop.
    RetryStatus {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Stream finished normally; carries the accumulated thinking block when
    /// the dialect separates reasoning from the answer.
    Done { thinking: Option<String> },
}

/// Accumulates [`StreamEvent::ToolCallDelta`] fragments into finalized calls.
///
/// Providers interleave fragments for parallel calls keyed by `index`; the
/// fragments for one index always arrive in order.  Calls with an empty name
/// cannot be dispatched and are dropped; an empty id gets a synthetic
/// fallback so the turn can still complete.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: std::collections::BTreeMap<u32, ToolCallRecord>,
    complete: Vec<ToolCallRecord>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, index: u32, id: &str, name: &str, arguments: &str) {
        let entry = self.pending.entry(index).or_insert_with(|| ToolCallRecord {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if !id.is_empty() {
            entry.id = id.to_string();
        }
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        entry.arguments.push_str(arguments);
    }

    pub fn push_complete(&mut self, calls: Vec<ToolCallRecord>) {
        self.complete.extend(calls);
    }

    /// True once any tool-call data has been observed.  The retry wrapper
    /// uses this to refuse mid-tool-call restarts.
    pub fn has_any(&self) -> bool {
        !self.pending.is_empty() || !self.complete.is_empty()
    }

    /// Finalize: complete calls first, then pending ones in index order.
    pub fn finish(self) -> Vec<ToolCallRecord> {
        let mut out = self.complete;
        for (i, (_, mut tc)) in self.pending.into_iter().enumerate() {
            if tc.name.is_empty() {
                tracing::warn!(tool_call_id = %tc.id, "dropping tool call with empty name");
                continue;
            }
            if tc.id.is_empty() {
                tc.id = format!("call_synthetic_{i}");
            }
            if tc.arguments.is_empty() {
                tc.arguments = "{}".to_string();
            }
            out.push(tc);
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
