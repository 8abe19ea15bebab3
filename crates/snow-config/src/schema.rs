// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_max_context_tokens() -> usize {
    128_000
}
fn default_max_tokens() -> u32 {
    8_192
}
fn default_tool_result_token_limit() -> usize {
    100_000
}
fn default_edit_similarity() -> f32 {
    0.85
}

/// Which provider wire dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestMethod {
    /// OpenAI-style `/chat/completions`
    #[default]
    Chat,
    /// OpenAI `/responses` (carries prompt_cache_key + reasoning effort)
    Responses,
    /// Anthropic `/v1/messages`
    Anthropic,
    /// Google `{model}:streamGenerateContent?alt=sse`
    Gemini,
}

impl std::fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestMethod::Chat => write!(f, "chat"),
            RequestMethod::Responses => write!(f, "responses"),
            RequestMethod::Anthropic => write!(f, "anthropic"),
            RequestMethod::Gemini => write!(f, "gemini"),
        }
    }
}

/// One provider configuration — the `snowcfg` section of `config.json`,
/// or a named profile under `profiles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// API base, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: String,
    /// Explicit API key.  Empty string means "read from the provider's
    /// canonical environment variable".
    #[serde(default)]
    pub api_key: String,
    /// Wire dialect used for completion requests.
    #[serde(default)]
    pub request_method: RequestMethod,
    /// Main conversation model.
    #[serde(default)]
    pub advanced_model: String,
    /// Cheaper model used for compaction summaries and catalog probes.
    /// Falls back to `advanced_model` when empty.
    #[serde(default)]
    pub basic_model: String,

    // ── Budgets ──────────────────────────────────────────────────────────────
    /// Context-window ceiling used by the compaction trigger.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Maximum completion tokens requested per turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-tool-result ceiling (character-weighted token estimate).  Results
    /// above this are rejected with guidance rather than appended.
    #[serde(default = "default_tool_result_token_limit")]
    pub tool_result_token_limit: usize,

    /// Minimum similarity (0.0–1.0) for fuzzy filesystem-edit matching.
    #[serde(default = "default_edit_similarity")]
    pub edit_similarity_threshold: f32,

    // ── Dialect-specific toggles ─────────────────────────────────────────────
    /// Extra `anthropic-beta` header value (comma-separated features).
    #[serde(default)]
    pub anthropic_beta: String,
    /// Cache TTL for Anthropic prompt caching: `"5m"` (default) or `"1h"`.
    #[serde(default)]
    pub anthropic_cache_ttl: String,
    /// Enable Anthropic extended thinking.
    #[serde(default)]
    pub thinking: bool,
    /// Enable Gemini thought streaming (`thinkingConfig.includeThoughts`).
    #[serde(default)]
    pub gemini_thinking: bool,
    /// Reasoning effort for the Responses dialect: `"low"|"medium"|"high"`.
    #[serde(default)]
    pub responses_reasoning: String,

    // ── Loop behaviour ───────────────────────────────────────────────────────
    #[serde(default)]
    pub enable_prompt_optimization: bool,
    #[serde(default = "default_true")]
    pub enable_auto_compress: bool,
    #[serde(default = "default_true")]
    pub show_thinking: bool,

    // ── Per-config overrides of the global active selections ─────────────────
    /// Overrides the `active` entry of `system-prompt.json` for this config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_id: Option<String>,
    /// Overrides the `active` entry of `custom-headers.json` for this config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_headers_scheme_id: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_method: RequestMethod::Chat,
            advanced_model: String::new(),
            basic_model: String::new(),
            max_context_tokens: default_max_context_tokens(),
            max_tokens: default_max_tokens(),
            tool_result_token_limit: default_tool_result_token_limit(),
            edit_similarity_threshold: default_edit_similarity(),
            anthropic_beta: String::new(),
            anthropic_cache_ttl: String::new(),
            thinking: false,
            gemini_thinking: false,
            responses_reasoning: String::new(),
            enable_prompt_optimization: false,
            enable_auto_compress: true,
            show_thinking: true,
            system_prompt_id: None,
            custom_headers_scheme_id: None,
        }
    }
}

impl ProviderConfig {
    /// Model used for compaction and probing — `basic_model` when configured,
    /// otherwise the main model.
    pub fn basic_or_advanced(&self) -> &str {
        if self.basic_model.is_empty() {
            &self.advanced_model
        } else {
            &self.basic_model
        }
    }
}

/// A named sub-agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentConfig {
    /// Stable identifier; the spawn tool is advertised as `subagent-<id>`.
    pub id: String,
    /// Human-readable name shown in agent listings.
    pub name: String,
    /// Role/system prompt prefixed to the sub-agent's conversation.
    pub role_prompt: String,
    /// Glob patterns over tool names this agent may use (`*` and `?`).
    /// `_` and `-` are treated as equivalent when matching.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Optional named profile overriding the provider config for this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// One hook registration: either a shell command or a declarative prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookEntry {
    Command {
        command: String,
        /// Seconds before the hook process is killed (default 30).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Prompt {
        prompt: String,
    },
}

/// Hook registrations, one list per hook point.  Execution is sequential
/// within a list; the first abort wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HooksConfig {
    #[serde(default)]
    pub tool_confirmation: Vec<HookEntry>,
    #[serde(default)]
    pub before_tool_call: Vec<HookEntry>,
    #[serde(default)]
    pub after_tool_call: Vec<HookEntry>,
    #[serde(default)]
    pub on_sub_agent_complete: Vec<HookEntry>,
}

/// Top-level shape of `~/.snow/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// The active provider configuration.
    #[serde(default)]
    pub snowcfg: ProviderConfig,
    /// Named alternative configurations, selectable per sub-agent or via CLI.
    #[serde(default)]
    pub profiles: HashMap<String, ProviderConfig>,
    /// Sub-agent definitions.
    #[serde(default)]
    pub agents: Vec<SubAgentConfig>,
    /// Hook registrations.
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Tool names pre-declared safe: they execute without confirmation.
    #[serde(default)]
    pub yolo_tools: Vec<String>,
    /// Whether the project codebase search service is enabled (participates
    /// in the tool-catalog cache hash).
    #[serde(default)]
    pub codebase_enabled: bool,
}

impl ConfigFile {
    /// Resolve a profile by name, falling back to the main `snowcfg` section.
    pub fn profile(&self, name: Option<&str>) -> &ProviderConfig {
        match name {
            Some(n) => self.profiles.get(n).unwrap_or(&self.snowcfg),
            None => &self.snowcfg,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_method_is_chat() {
        assert_eq!(RequestMethod::default(), RequestMethod::Chat);
    }

    #[test]
    fn request_method_deserializes_lowercase() {
        let m: RequestMethod = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(m, RequestMethod::Anthropic);
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let cfg: ConfigFile = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.snowcfg.max_context_tokens, 128_000);
        assert_eq!(cfg.snowcfg.tool_result_token_limit, 100_000);
        assert!(cfg.snowcfg.enable_auto_compress);
        assert!(cfg.agents.is_empty());
    }

    #[test]
    fn snowcfg_section_parses_camel_case() {
        let cfg: ConfigFile = serde_json::from_str(
            r#"{"snowcfg": {"baseUrl": "http://localhost:1234/v1",
                "requestMethod": "gemini", "advancedModel": "gemini-2.0-flash"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.snowcfg.base_url, "http://localhost:1234/v1");
        assert_eq!(cfg.snowcfg.request_method, RequestMethod::Gemini);
        assert_eq!(cfg.snowcfg.advanced_model, "gemini-2.0-flash");
    }

    #[test]
    fn basic_or_advanced_falls_back() {
        let mut cfg = ProviderConfig::default();
        cfg.advanced_model = "big".into();
        assert_eq!(cfg.basic_or_advanced(), "big");
        cfg.basic_model = "small".into();
        assert_eq!(cfg.basic_or_advanced(), "small");
    }

    #[test]
    fn profile_lookup_falls_back_to_snowcfg() {
        let mut cfg = ConfigFile::default();
        cfg.snowcfg.advanced_model = "main".into();
        let mut alt = ProviderConfig::default();
        alt.advanced_model = "alt".into();
        cfg.profiles.insert("fast".into(), alt);

        assert_eq!(cfg.profile(Some("fast")).advanced_model, "alt");
        assert_eq!(cfg.profile(Some("missing")).advanced_model, "main");
        assert_eq!(cfg.profile(None).advanced_model, "main");
    }

    #[test]
    fn hook_entry_command_form_parses() {
        let h: HookEntry = serde_json::from_str(r#"{"command": "echo ok"}"#).unwrap();
        assert!(matches!(h, HookEntry::Command { ref command, .. } if command == "echo ok"));
    }

    #[test]
    fn hook_entry_prompt_form_parses() {
        let h: HookEntry = serde_json::from_str(r#"{"prompt": "check style"}"#).unwrap();
        assert!(matches!(h, HookEntry::Prompt { ref prompt } if prompt == "check style"));
    }

    #[test]
    fn sub_agent_config_round_trips() {
        let a = SubAgentConfig {
            id: "agent_plan".into(),
            name: "Planner".into(),
            role_prompt: "You plan.".into(),
            allowed_tools: vec!["filesystem-*".into()],
            profile: None,
        };
        let json = serde_json::to_string(&a).unwrap();
        let back: SubAgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "agent_plan");
        assert_eq!(back.allowed_tools, vec!["filesystem-*"]);
    }
}
