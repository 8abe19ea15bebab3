// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Small auxiliary stores under `~/.snow`: system prompts, custom header
//! schemes, the response language, and sensitive-command patterns.
//!
//! Each store follows the same pattern: a serde struct mirroring the file,
//! a `load` that tolerates a missing file, and the one or two lookups the
//! engine actually needs.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{loader::read_json_or_default, SnowPaths};

// ─── System prompts ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptEntry {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// `~/.snow/system-prompt.json` — `{active, prompts:[…]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptStore {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub prompts: Vec<SystemPromptEntry>,
}

impl SystemPromptStore {
    pub fn load(paths: &SnowPaths) -> anyhow::Result<Self> {
        read_json_or_default(&paths.system_prompt_file())
    }

    /// Content of the prompt selected by `override_id`, falling back to the
    /// store's own `active` entry.  `None` means "use the built-in prompt".
    pub fn resolve(&self, override_id: Option<&str>) -> Option<&str> {
        let id = override_id.or(self.active.as_deref())?;
        self.prompts
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.content.as_str())
    }
}

// ─── Custom headers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderScheme {
    pub id: String,
    pub name: String,
    pub headers: std::collections::HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// `~/.snow/custom-headers.json` — `{active, schemes:[…]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomHeadersStore {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub schemes: Vec<HeaderScheme>,
}

impl CustomHeadersStore {
    pub fn load(paths: &SnowPaths) -> anyhow::Result<Self> {
        read_json_or_default(&paths.custom_headers_file())
    }

    /// Headers of the scheme selected by `override_id` or the active scheme.
    /// Returns an empty list when neither resolves.
    pub fn resolve(&self, override_id: Option<&str>) -> Vec<(String, String)> {
        let id = match override_id.or(self.active.as_deref()) {
            Some(id) => id,
            None => return Vec::new(),
        };
        self.schemes
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

// ─── Language ────────────────────────────────────────────────────────────────

/// `~/.snow/language.json` — `{language}`.  When set, the loop appends a
/// respond-in-this-language instruction to the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageStore {
    #[serde(default)]
    pub language: Option<String>,
}

impl LanguageStore {
    pub fn load(paths: &SnowPaths) -> anyhow::Result<Self> {
        read_json_or_default(&paths.language_file())
    }
}

// ─── Sensitive commands ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivePattern {
    /// Substring or regex matched against the command line.
    pub pattern: String,
    #[serde(default = "crate::mcp::default_enabled")]
    pub enabled: bool,
}

/// `~/.snow/sensitive-commands.json`.
///
/// A `terminal-execute` command matching any enabled pattern gets
/// `isSensitive = true` on its confirmation request, so the UI can render a
/// stronger warning.  Matching never blocks by itself — the decision stays
/// with the confirmation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitiveCommandsStore {
    #[serde(default = "crate::mcp::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<SensitivePattern>,
}

impl Default for SensitiveCommandsStore {
    fn default() -> Self {
        let defaults = ["rm ", "sudo ", "chmod ", "chown ", "mkfs", "> /dev/", "dd "];
        Self {
            enabled: true,
            patterns: defaults
                .iter()
                .map(|p| SensitivePattern {
                    pattern: (*p).to_string(),
                    enabled: true,
                })
                .collect(),
        }
    }
}

impl SensitiveCommandsStore {
    pub fn load(paths: &SnowPaths) -> anyhow::Result<Self> {
        read_json_or_default(&paths.sensitive_commands_file())
    }

    /// Return the first enabled pattern that matches `command`.
    ///
    /// Patterns are tried as regexes first; a pattern that fails to compile
    /// is treated as a plain substring.
    pub fn matches(&self, command: &str) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        for p in self.patterns.iter().filter(|p| p.enabled) {
            let hit = match Regex::new(&p.pattern) {
                Ok(re) => re.is_match(command),
                Err(_) => command.contains(&p.pattern),
            };
            if hit {
                return Some(&p.pattern);
            }
        }
        None
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
