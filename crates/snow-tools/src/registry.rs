// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool registry and dispatcher.
//!
//! Holds the compiled-in (built-in) tools, probes external MCP services
//! into a cached catalog, and routes namespaced `service-operation` calls:
//! built-ins execute in-process, external tools go through the client pool
//! with the unprefixed operation name.  The before/after hook points and the
//! per-result token ceiling are enforced here so every route shares them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use snow_config::McpServerConfig;
use snow_mcp::McpClientPool;
use snow_model::{ImagePart, ToolSchema};

use crate::{
    hooks::{tool_hook_env, HookOutcome, HookPoint, HookReport, HookRunner},
    Tool, ToolCall, ToolOutput,
};

/// Catalog cache lifetime; a config-hash change invalidates earlier.
const CATALOG_TTL: Duration = Duration::from_secs(300);

/// Argument fields that may legitimately arrive as JSON-encoded strings.
///
/// Kept strict on purpose: a string value for any *other* field passes
/// through verbatim even when it happens to look like `[…]`/`{…}`, and a
/// whitelisted field is only re-parsed when the encoded value actually is
/// an array or object.
const JSON_PARAM_WHITELIST: &[&str] = &["filePath", "files", "paths", "edits", "todos", "options"];

/// Dispatcher outcomes that are not tool responses.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// `askuser-ask_question` with valid input: the scheduler forwards the
    /// question to the UI and re-enters with the answer as the response.
    UserInteractionNeeded(UserQuestion),
    /// A before/after hook exited ≥2; the turn halts after this tool.
    HookAbort(HookReport),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuestion {
    /// The originating tool-call id; the answer resolves it.
    pub call_id: String,
    pub question: String,
    pub options: Vec<String>,
}

/// Per-service status in the catalog.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub builtin: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_count: usize,
}

/// A consistent snapshot of the advertised tool surface.
#[derive(Clone)]
pub struct CatalogSnapshot {
    pub tools: Vec<ToolSchema>,
    pub services: Vec<ServiceInfo>,
    pub config_hash: String,
    pub last_update: Instant,
}

/// Inputs whose hash invalidates the catalog cache.
#[derive(Debug, Clone, Default)]
pub struct CatalogInputs {
    pub mcp_config: HashMap<String, McpServerConfig>,
    pub agent_ids: Vec<String>,
    pub skills: Vec<String>,
    pub codebase_enabled: bool,
}

impl CatalogInputs {
    fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut services: Vec<_> = self.mcp_config.iter().collect();
        services.sort_by(|a, b| a.0.cmp(b.0));
        for (name, cfg) in services {
            hasher.update(name.as_bytes());
            hasher.update(serde_json::to_string(cfg).unwrap_or_default().as_bytes());
        }
        let mut agents = self.agent_ids.clone();
        agents.sort();
        for a in &agents {
            hasher.update(a.as_bytes());
        }
        let mut skills = self.skills.clone();
        skills.sort();
        for s in &skills {
            hasher.update(s.as_bytes());
        }
        hasher.update([self.codebase_enabled as u8]);
        hex::encode(hasher.finalize())
    }
}

pub struct ToolRegistry {
    builtins: HashMap<String, Arc<dyn Tool>>,
    pool: Arc<McpClientPool>,
    hooks: HookRunner,
    /// Per-result ceiling, character-weighted token estimate.
    token_limit: usize,
    cache: tokio::sync::Mutex<Option<Arc<CatalogSnapshot>>>,
}

impl ToolRegistry {
    pub fn new(pool: Arc<McpClientPool>, hooks: HookRunner, token_limit: usize) -> Self {
        Self {
            builtins: HashMap::new(),
            pool,
            hooks,
            token_limit,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.builtins.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.builtins.insert(tool.name().to_string(), tool);
    }

    pub fn builtin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn hooks(&self) -> &HookRunner {
        &self.hooks
    }

    /// Advertised tool surface: built-in schemas plus one probe per external
    /// service.  Copy-on-refresh — callers keep a consistent `Arc` snapshot
    /// while a refresh builds the next one.
    pub async fn catalog(&self, inputs: &CatalogInputs) -> Arc<CatalogSnapshot> {
        let hash = inputs.hash();
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.config_hash == hash && snapshot.last_update.elapsed() < CATALOG_TTL {
                return Arc::clone(snapshot);
            }
        }

        debug!("refreshing tool catalog");
        let mut tools: Vec<ToolSchema> = self
            .builtins
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        let mut services = vec![ServiceInfo {
            name: "builtin".to_string(),
            builtin: true,
            connected: true,
            error: None,
            tool_count: tools.len(),
        }];

        let mut external: Vec<_> = inputs.mcp_config.iter().collect();
        external.sort_by(|a, b| a.0.cmp(b.0));
        for (name, cfg) in external {
            match self.pool.probe(name, cfg).await {
                Ok(remote_tools) => {
                    let count = remote_tools.len();
                    for rt in remote_tools {
                        tools.push(ToolSchema {
                            name: format!("{name}-{}", rt.name),
                            description: rt
                                .description
                                .as_deref()
                                .unwrap_or_default()
                                .to_string(),
                            parameters: Value::Object((*rt.input_schema).clone()),
                        });
                    }
                    services.push(ServiceInfo {
                        name: name.clone(),
                        builtin: false,
                        connected: true,
                        error: None,
                        tool_count: count,
                    });
                }
                Err(e) => {
                    // Tools of a failed service drop out of the advertised
                    // list until the next refresh.
                    warn!(service = %name, "MCP probe failed: {e}");
                    services.push(ServiceInfo {
                        name: name.clone(),
                        builtin: false,
                        connected: false,
                        error: Some(e.to_string()),
                        tool_count: 0,
                    });
                }
            }
        }

        tools.sort_by(|a, b| a.name.cmp(&b.name));
        let snapshot = Arc::new(CatalogSnapshot {
            tools,
            services,
            config_hash: hash,
            last_update: Instant::now(),
        });
        *cache = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Execute one tool call end to end: before-hook, route, result
    /// conversion, after-hook, token ceiling.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        mcp_config: &HashMap<String, McpServerConfig>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, DispatchError> {
        // askuser raises a distinguished signal instead of returning a value.
        if call.name == "askuser-ask_question" {
            return match validate_ask_question(call) {
                Ok(question) => Err(DispatchError::UserInteractionNeeded(question)),
                Err(msg) => Ok(ToolOutput::err(&call.id, msg)),
            };
        }

        let args = normalize_arguments(call.args.clone());
        let normalized = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args,
        };

        let hook_env = tool_hook_env(&normalized.name, &normalized.args);
        let mut warning = String::new();
        match self.hooks.run(HookPoint::BeforeToolCall, &hook_env).await {
            HookOutcome::Abort(report) => return Err(DispatchError::HookAbort(report)),
            HookOutcome::Warn(w) | HookOutcome::ContinueWithMessage(w) => warning = w,
            HookOutcome::Continue => {}
        }

        let mut output = self.route(&normalized, mcp_config, cancel).await;

        let mut after_env = hook_env;
        after_env.insert("SNOW_RESULT".to_string(), clip(&output.content, 4096));
        after_env.insert("SNOW_RESULT_IS_ERROR".to_string(), output.is_error.to_string());
        match self.hooks.run(HookPoint::AfterToolCall, &after_env).await {
            HookOutcome::Abort(report) => return Err(DispatchError::HookAbort(report)),
            HookOutcome::Warn(w) | HookOutcome::ContinueWithMessage(w) => {
                if warning.is_empty() {
                    warning = w;
                } else {
                    warning = format!("{warning}\n{w}");
                }
            }
            HookOutcome::Continue => {}
        }

        if !warning.is_empty() {
            output.content = format!("{}\n\n[hook] {warning}", output.content);
        }

        // Oversize results are surfaced as an error the model can react to
        // by narrowing its parameters; the turn itself continues.
        let estimated = output.approx_tokens();
        if self.token_limit > 0 && estimated > self.token_limit {
            return Ok(ToolOutput::err(
                &call.id,
                format!(
                    "Tool result too large (~{estimated} tokens, limit {}). \
                     Retry with narrower parameters (smaller range, more specific \
                     pattern, or pagination).",
                    self.token_limit
                ),
            ));
        }

        Ok(output)
    }

    async fn route(
        &self,
        call: &ToolCall,
        mcp_config: &HashMap<String, McpServerConfig>,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        if let Some(tool) = self.builtins.get(&call.name) {
            return tool.execute(call, cancel).await;
        }

        // Longest prefix wins among configured external service names, so a
        // service literally named `filesystem-extra` beats `filesystem`.
        let mut best: Option<(&str, &McpServerConfig)> = None;
        for (service, cfg) in mcp_config {
            if call
                .name
                .strip_prefix(service.as_str())
                .map(|rest| rest.starts_with('-'))
                .unwrap_or(false)
            {
                let better = match best {
                    Some((current, _)) => service.len() > current.len(),
                    None => true,
                };
                if better {
                    best = Some((service, cfg));
                }
            }
        }

        let Some((service, cfg)) = best else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        let operation = &call.name[service.len() + 1..];

        let arguments = call.args.as_object().cloned();
        match self
            .pool
            .call_tool(service, cfg, operation, arguments, cancel)
            .await
        {
            Ok(result) => mcp_result_to_output(&call.id, &result),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

/// Re-parse whitelisted fields that arrived as JSON-encoded strings.
pub(crate) fn normalize_arguments(mut args: Value) -> Value {
    if let Some(map) = args.as_object_mut() {
        for key in JSON_PARAM_WHITELIST {
            if let Some(Value::String(s)) = map.get(*key) {
                let trimmed = s.trim();
                if trimmed.starts_with('[') || trimmed.starts_with('{') {
                    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                        if parsed.is_array() || parsed.is_object() {
                            map.insert((*key).to_string(), parsed);
                        }
                    }
                }
            }
        }
    }
    args
}

/// Split a multimodal MCP result into text + image attachments.
///
/// `CallToolResult.content` serializes to an array of
/// `{type: text|image|resource, …}` items; anything non-text/image is kept
/// as a JSON note so no information silently disappears.
fn mcp_result_to_output(call_id: &str, result: &snow_mcp::CallToolResult) -> ToolOutput {
    let value = serde_json::to_value(&result.content).unwrap_or(Value::Null);
    let mut texts: Vec<String> = Vec::new();
    let mut images: Vec<ImagePart> = Vec::new();

    if let Some(items) = value.as_array() {
        for item in items {
            match item["type"].as_str().unwrap_or("") {
                "text" => {
                    if let Some(t) = item["text"].as_str() {
                        texts.push(t.to_string());
                    }
                }
                "image" => {
                    let data = item["data"].as_str().unwrap_or("");
                    let mime = item["mimeType"].as_str().unwrap_or("image/png");
                    images.push(ImagePart {
                        data_url: format!("data:{mime};base64,{data}"),
                        mime_type: mime.to_string(),
                    });
                }
                _ => texts.push(item.to_string()),
            }
        }
    }

    let mut output = ToolOutput {
        call_id: call_id.to_string(),
        content: texts.join("\n"),
        images,
        is_error: result.is_error.unwrap_or(false),
    };
    if output.content.is_empty() && !output.has_images() {
        output.content = "(empty result)".to_string();
    }
    output
}

fn validate_ask_question(call: &ToolCall) -> Result<UserQuestion, String> {
    let question = call
        .args
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if question.is_empty() {
        return Err("ask_question requires a non-empty 'question'".to_string());
    }
    let options: Vec<String> = call
        .args
        .get("options")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if options.len() < 2 {
        return Err("ask_question requires an 'options' array of at least 2 strings".to_string());
    }
    Ok(UserQuestion {
        call_id: call.id.clone(),
        question,
        options,
    })
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        s[..cut].to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
