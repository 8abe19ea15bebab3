// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! MCP server configuration: the per-service descriptors from
//! `mcp-config.json` and the global/project merge.
//!
//! A descriptor with a `command` is a stdio server (spawned subprocess);
//! a descriptor with a `url` is an HTTP server (streamable-HTTP with legacy
//! SSE fallback).  Descriptors with both are rejected at load time.

use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{loader::read_json_or_default, SnowPaths};

/// One external MCP service entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// HTTP endpoint.  May contain `${VAR}` references resolved from the
    /// merged environment at connect time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Command to spawn for stdio transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides applied on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Disabled services stay in the file but are never connected.
    #[serde(default = "crate::mcp::default_enabled")]
    pub enabled: bool,
    /// Per-call timeout in seconds (default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

pub(crate) fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// Transport implied by the descriptor shape.
    pub fn transport(&self) -> anyhow::Result<McpTransportKind> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => anyhow::bail!("MCP entry has both 'command' and 'url'"),
            (Some(_), None) => Ok(McpTransportKind::Stdio),
            (None, Some(_)) => Ok(McpTransportKind::Http),
            (None, None) => anyhow::bail!("MCP entry has neither 'command' nor 'url'"),
        }
    }
}

/// Transport family for an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    Stdio,
    /// Streamable HTTP, with legacy SSE as a connect-time fallback.
    Http,
}

/// On-disk shape of `mcp-config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigFile {
    #[serde(default)]
    mcp_servers: HashMap<String, McpServerConfig>,
}

/// Load and merge the global and project MCP configs.
///
/// The project file overrides the global file per service name; disabled
/// entries are filtered out of the result.  The returned map is the input to
/// the tool catalog's config hash, so ordering does not matter here.
pub fn load_mcp_config(paths: &SnowPaths) -> anyhow::Result<HashMap<String, McpServerConfig>> {
    let global: McpConfigFile = read_json_or_default(&paths.global_mcp_config())
        .context("loading global MCP config")?;
    let project: McpConfigFile = read_json_or_default(&paths.project_mcp_config())
        .context("loading project MCP config")?;

    let mut merged = global.mcp_servers;
    for (name, entry) in project.mcp_servers {
        merged.insert(name, entry);
    }
    merged.retain(|_, e| e.enabled);
    Ok(merged)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
