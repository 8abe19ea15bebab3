// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Environment handling for MCP launches: `${VAR}` templating in URLs and
//! header values, and the conventional HTTP auth variables.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

/// The merged environment for a service: the inherited process environment
/// with the descriptor's `env` overrides applied on top.
pub fn merged_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in overrides {
        env.insert(k.clone(), v.clone());
    }
    env
}

/// Expand `${VAR}` references in `input` from `env`.
///
/// Unknown variables are left verbatim (and logged) rather than replaced
/// with an empty string — a visibly broken URL is easier to diagnose than a
/// silently truncated one.
pub fn expand_vars(input: &str, env: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match env.get(name) {
            Some(v) => v.clone(),
            None => {
                warn!(var = name, "unresolved ${{VAR}} reference in MCP config");
                caps[0].to_string()
            }
        }
    })
    .into_owned()
}

/// HTTP Authorization header value for a service, from the merged env:
/// `MCP_AUTH_HEADER` wins verbatim, else `MCP_API_KEY` becomes a bearer
/// token, else none.
pub fn auth_header(env: &HashMap<String, String>) -> Option<String> {
    if let Some(v) = env.get("MCP_AUTH_HEADER") {
        return Some(v.clone());
    }
    env.get("MCP_API_KEY").map(|k| format!("Bearer {k}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
