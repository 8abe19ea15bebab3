// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

/// Resolved locations of the user and project `.snow` directories.
///
/// Constructed once at startup and passed down by reference; nothing else in
/// the workspace touches `dirs` directly.
#[derive(Debug, Clone)]
pub struct SnowPaths {
    /// `~/.snow`
    pub user_root: PathBuf,
    /// `<project>/.snow`
    pub project_root: PathBuf,
}

impl SnowPaths {
    pub fn new(home: impl AsRef<Path>, project: impl AsRef<Path>) -> Self {
        Self {
            user_root: home.as_ref().join(".snow"),
            project_root: project.as_ref().join(".snow"),
        }
    }

    /// Resolve from the real home directory and current working directory.
    pub fn discover() -> anyhow::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot locate home directory"))?;
        let cwd = std::env::current_dir()?;
        Ok(Self::new(home, cwd))
    }

    pub fn config_file(&self) -> PathBuf {
        self.user_root.join("config.json")
    }
    pub fn global_mcp_config(&self) -> PathBuf {
        self.user_root.join("mcp-config.json")
    }
    pub fn project_mcp_config(&self) -> PathBuf {
        self.project_root.join("mcp-config.json")
    }
    pub fn system_prompt_file(&self) -> PathBuf {
        self.user_root.join("system-prompt.json")
    }
    pub fn custom_headers_file(&self) -> PathBuf {
        self.user_root.join("custom-headers.json")
    }
    pub fn language_file(&self) -> PathBuf {
        self.user_root.join("language.json")
    }
    pub fn sensitive_commands_file(&self) -> PathBuf {
        self.user_root.join("sensitive-commands.json")
    }
    pub fn usage_file(&self) -> PathBuf {
        self.user_root.join("usage.json")
    }
    pub fn sessions_dir(&self, project_id: &str) -> PathBuf {
        self.user_root.join("sessions").join(project_id)
    }
    pub fn todos_dir(&self, project_id: &str) -> PathBuf {
        self.user_root.join("todos").join(project_id)
    }
    pub fn snapshots_dir(&self, project_id: &str) -> PathBuf {
        self.user_root.join("snapshots").join(project_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
