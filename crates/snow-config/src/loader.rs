// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::{ConfigFile, SnowPaths};

/// Load the main config file.
///
/// A missing file yields `ConfigFile::default()`; a malformed file is a hard
/// error with the path in context so the user can fix it.
pub fn load_config(paths: &SnowPaths) -> anyhow::Result<ConfigFile> {
    read_json_or_default(&paths.config_file())
}

/// Read a JSON file into `T`, returning `T::default()` when the file does
/// not exist.
pub(crate) fn read_json_or_default<T>(path: &Path) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.is_file() {
        debug!(path = %path.display(), "config file absent; using defaults");
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Atomically persist a JSON store: write to `<path>.tmp`, then rename.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
