// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Content-addressed file snapshots and cross-turn rollback.
//!
//! One blob per SHA-256 under `blobs/`, so repeated identical content costs
//! nothing; an index maps `(session, messageIndex, path) → hash`.  The
//! snapshot at index N records the state that existed before message N was
//! appended.  A path first created at index ≥ M therefore has no snapshot
//! below M and is deleted on rollback to M.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry {
    message_index: usize,
    path: String,
    /// `None` records "the file was absent at this boundary".
    hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SnapshotIndex {
    #[serde(default)]
    sessions: BTreeMap<String, Vec<SnapshotEntry>>,
}

/// What rollback did to one file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolledBackFile {
    pub path: String,
    /// `"restored"` or `"deleted"`.
    pub action: String,
}

/// Rollback-point summary for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPoint {
    pub message_index: usize,
    pub file_count: usize,
}

/// Both sides of a rollback preview, nothing mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPreview {
    pub path: String,
    pub current: Option<String>,
    pub snapshot: Option<String>,
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn read_index(&self) -> SnapshotIndex {
        std::fs::read_to_string(self.index_path())
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default()
    }

    fn write_index(&self, index: &SnapshotIndex) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let tmp = self.index_path().with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string(index)?)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn store_blob(&self, content: &[u8]) -> anyhow::Result<String> {
        let hash = hex::encode(Sha256::digest(content));
        let path = self.blobs_dir().join(&hash);
        if !path.exists() {
            std::fs::create_dir_all(self.blobs_dir())?;
            std::fs::write(&path, content)
                .with_context(|| format!("writing blob {hash}"))?;
        }
        Ok(hash)
    }

    fn load_blob(&self, hash: &str) -> anyhow::Result<Vec<u8>> {
        std::fs::read(self.blobs_dir().join(hash)).with_context(|| format!("reading blob {hash}"))
    }

    /// Record the current on-disk state of `paths` at `message_index`.
    ///
    /// Missing files are recorded as absent so a later rollback knows they
    /// did not exist at this boundary.
    pub fn record(
        &self,
        session_id: &str,
        message_index: usize,
        paths: &[String],
    ) -> anyhow::Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut index = self.read_index();
        let entries = index.sessions.entry(session_id.to_string()).or_default();
        for path in paths {
            let hash = match std::fs::read(path) {
                Ok(content) => Some(self.store_blob(&content)?),
                Err(_) => None,
            };
            debug!(session = session_id, message_index, path = %path, absent = hash.is_none(), "snapshot");
            entries.push(SnapshotEntry {
                message_index,
                path: path.clone(),
                hash,
            });
        }
        self.write_index(&index)
    }

    /// Roll files back to their state just before message `target_index`.
    ///
    /// For every path ever snapshotted at an index ≥ `target_index`, the
    /// nearest snapshot strictly below the target is restored; a path with
    /// no earlier snapshot is deleted.  Session truncation is the caller's
    /// job — this method only touches files.
    pub fn rollback(
        &self,
        session_id: &str,
        target_index: usize,
    ) -> anyhow::Result<Vec<RolledBackFile>> {
        let index = self.read_index();
        let Some(entries) = index.sessions.get(session_id) else {
            return Ok(Vec::new());
        };

        let touched_after: HashSet<&str> = entries
            .iter()
            .filter(|e| e.message_index >= target_index)
            .map(|e| e.path.as_str())
            .collect();

        let mut rolled_back = Vec::new();
        for path in touched_after {
            let before = entries
                .iter()
                .filter(|e| e.path == path && e.message_index < target_index)
                .max_by_key(|e| e.message_index);

            match before.and_then(|e| e.hash.as_deref()) {
                Some(hash) => {
                    let content = self.load_blob(hash)?;
                    if let Some(parent) = Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                    std::fs::write(path, content)
                        .with_context(|| format!("restoring {path}"))?;
                    rolled_back.push(RolledBackFile {
                        path: path.to_string(),
                        action: "restored".to_string(),
                    });
                }
                None => {
                    // Absent before the target (or never seen below it):
                    // the file was created by messages ≥ target, delete it.
                    if Path::new(path).exists() {
                        std::fs::remove_file(path)
                            .with_context(|| format!("deleting {path}"))?;
                    }
                    rolled_back.push(RolledBackFile {
                        path: path.to_string(),
                        action: "deleted".to_string(),
                    });
                }
            }
        }

        // Drop the now-invalid snapshot entries above the target.
        let mut index = index;
        if let Some(entries) = index.sessions.get_mut(session_id) {
            entries.retain(|e| e.message_index < target_index);
        }
        self.write_index(&index)?;

        Ok(rolled_back)
    }

    /// Current content and snapshot content for `(session, target, path)`,
    /// without mutating anything.
    pub fn preview(
        &self,
        session_id: &str,
        target_index: usize,
        path: &str,
    ) -> anyhow::Result<RollbackPreview> {
        let index = self.read_index();
        let snapshot = index
            .sessions
            .get(session_id)
            .and_then(|entries| {
                entries
                    .iter()
                    .filter(|e| e.path == path && e.message_index < target_index)
                    .max_by_key(|e| e.message_index)
            })
            .and_then(|e| e.hash.as_deref())
            .map(|h| self.load_blob(h))
            .transpose()?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        let current = std::fs::read_to_string(path).ok();
        Ok(RollbackPreview {
            path: path.to_string(),
            current,
            snapshot,
        })
    }

    /// Snapshot boundaries with their file counts, ascending by index.
    pub fn rollback_points(&self, session_id: &str) -> Vec<RollbackPoint> {
        let index = self.read_index();
        let Some(entries) = index.sessions.get(session_id) else {
            return Vec::new();
        };
        let mut by_index: BTreeMap<usize, usize> = BTreeMap::new();
        for e in entries {
            *by_index.entry(e.message_index).or_default() += 1;
        }
        by_index
            .into_iter()
            .map(|(message_index, file_count)| RollbackPoint {
                message_index,
                file_count,
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
