// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Persistent usage log, indexed by model.
//!
//! Every adapter appends observed usage here when the provider reports it.
//! Writes are synchronous read-modify-write under a mutex; usage arrives at
//! most once per request, so contention is irrelevant.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsageFile {
    #[serde(default)]
    models: HashMap<String, ModelUsage>,
}

/// Append-only accumulator backed by `~/.snow/usage.json`.
#[derive(Debug)]
pub struct UsageLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UsageLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Record one request's usage for `model`.  Failures are logged and
    /// swallowed — the usage log must never fail a turn.
    pub fn record(
        &self,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        cache_creation_tokens: u32,
        cache_read_tokens: u32,
    ) {
        let _guard = self.lock.lock().expect("usage log lock poisoned");
        let mut file = self.read();
        let entry = file.models.entry(model.to_string()).or_default();
        entry.prompt_tokens += u64::from(prompt_tokens);
        entry.completion_tokens += u64::from(completion_tokens);
        entry.cache_creation_tokens += u64::from(cache_creation_tokens);
        entry.cache_read_tokens += u64::from(cache_read_tokens);
        entry.requests += 1;
        if let Err(e) = self.write(&file) {
            warn!(path = %self.path.display(), "failed to persist usage log: {e}");
        }
    }

    /// Current per-model totals (for the `snow usage` listing).
    pub fn snapshot(&self) -> HashMap<String, ModelUsage> {
        let _guard = self.lock.lock().expect("usage log lock poisoned");
        self.read().models
    }

    fn read(&self) -> UsageFile {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => UsageFile::default(),
        }
    }

    fn write(&self, file: &UsageFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
