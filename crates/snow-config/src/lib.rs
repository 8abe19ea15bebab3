// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-config` — configuration schema and on-disk stores for snow.
//!
//! All user data lives under `~/.snow`, project data under `<cwd>/.snow`:
//!
//! ```text
//! ~/.snow/config.json                # main config (snowcfg section + profiles)
//! ~/.snow/mcp-config.json            # global MCP servers
//! ~/.snow/system-prompt.json         # {active, prompts:[{id,name,content,createdAt}]}
//! ~/.snow/custom-headers.json        # {active, schemes:[{id,name,headers,createdAt}]}
//! ~/.snow/language.json              # {language}
//! ~/.snow/sensitive-commands.json    # patterns + enabled flags
//! ~/.snow/sessions/<project>/<id>.json
//! ~/.snow/todos/<project>/<id>.json
//! <cwd>/.snow/mcp-config.json        # project-scoped override
//! ```
//!
//! Every store is JSON.  Loading is tolerant: a missing file yields the
//! store's default, a malformed file yields an error with the offending path
//! in context.

pub mod loader;
pub mod mcp;
pub mod paths;
pub mod schema;
pub mod stores;

pub use loader::load_config;
pub use mcp::{load_mcp_config, McpServerConfig, McpTransportKind};
pub use paths::SnowPaths;
pub use schema::{
    ConfigFile, HookEntry, HooksConfig, ProviderConfig, RequestMethod, SubAgentConfig,
};
pub use stores::{
    CustomHeadersStore, LanguageStore, SensitiveCommandsStore, SensitivePattern,
    SystemPromptStore,
};
