// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-session` — persisted sessions and content-addressed file snapshots.
//!
//! Sessions live at `~/.snow/sessions/<project-id>/<session-id>.json`
//! (atomic writes, header-only listing).  Snapshots live beside them as one
//! blob per content hash plus an index; rolling a session back to message
//! index M restores every file touched at ≥ M to its nearest snapshot < M
//! (or deletes it when none exists).

mod session;
mod snapshot;

pub use session::{Session, SessionHeader, SessionPage, SessionStore};
pub use snapshot::{RollbackPoint, RollbackPreview, RolledBackFile, SnapshotStore};

use sha2::{Digest, Sha256};

/// Stable per-project identifier: first 16 hex chars of the SHA-256 of the
/// canonical project root path.
pub fn project_id(project_root: &std::path::Path) -> String {
    let canonical = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = project_id(dir.path());
        let b = project_id(dir.path());
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn project_id_differs_per_path() {
        let d1 = tempfile::tempdir().unwrap();
        let d2 = tempfile::tempdir().unwrap();
        assert_ne!(project_id(d1.path()), project_id(d2.path()));
    }

    #[test]
    fn project_id_tolerates_missing_path() {
        let id = project_id(std::path::Path::new("/no/such/dir/really"));
        assert_eq!(id.len(), 16);
    }
}
