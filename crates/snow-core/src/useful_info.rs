// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Useful-info service: environment context injected as an early user
//! message.
//!
//! One of the explicit long-lived services held by the process root (next
//! to the tools cache, client pool, tracker, and todo service).  The block
//! is detected once and cached; a snapshot stays stable for the refresh
//! window so every consumer in a turn sees the same text, and `refresh`
//! rebuilds it on demand.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Rebuild the block after this much time, matching the tool-catalog TTL.
const REFRESH_INTERVAL: Duration = Duration::from_secs(300);
/// Directory entries listed before the cap note kicks in.
const MAX_ENTRIES: usize = 20;

pub struct UsefulInfoService {
    project_root: PathBuf,
    cache: Mutex<Option<(Instant, String)>>,
}

impl UsefulInfoService {
    pub fn new(project_root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            project_root,
            cache: Mutex::new(None),
        })
    }

    /// The current context block.  Served from cache within the refresh
    /// window so the main loop and concurrently spawned sub-agents inject
    /// identical text.
    pub fn context(&self) -> String {
        let mut cache = self.cache.lock().expect("useful-info lock");
        if let Some((built_at, block)) = cache.as_ref() {
            if built_at.elapsed() < REFRESH_INTERVAL {
                return block.clone();
            }
        }
        let block = self.build();
        *cache = Some((Instant::now(), block.clone()));
        block
    }

    /// Drop the cached block; the next `context` call rebuilds it.
    pub fn refresh(&self) {
        *self.cache.lock().expect("useful-info lock") = None;
    }

    fn build(&self) -> String {
        let mut lines = vec!["Useful information about the current environment:".to_string()];
        lines.push(format!(
            "- Working directory: {}",
            self.project_root.display()
        ));
        lines.push(format!("- Platform: {}", std::env::consts::OS));
        lines.push(format!(
            "- Date: {}",
            chrono::Utc::now().format("%Y-%m-%d")
        ));
        if let Some(branch) = self.git_branch() {
            lines.push(format!("- Git branch: {branch}"));
        }
        if let Some(entries) = self.top_level_entries() {
            lines.push(format!("- Top-level entries: {entries}"));
        }
        lines.join("\n")
    }

    /// Branch name from `.git/HEAD`, when the project is a git checkout.
    fn git_branch(&self) -> Option<String> {
        let head = std::fs::read_to_string(self.project_root.join(".git/HEAD")).ok()?;
        head.trim()
            .strip_prefix("ref: refs/heads/")
            .map(str::to_string)
    }

    fn top_level_entries(&self) -> Option<String> {
        let mut entries: Vec<String> = std::fs::read_dir(&self.project_root)
            .ok()?
            .flatten()
            .map(|e| {
                let mut name = e.file_name().to_string_lossy().into_owned();
                if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    name.push('/');
                }
                name
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        entries.sort();
        let total = entries.len();
        entries.truncate(MAX_ENTRIES);
        let mut joined = entries.join(", ");
        if total > MAX_ENTRIES {
            joined.push_str(&format!(", … ({} more)", total - MAX_ENTRIES));
        }
        Some(joined)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_names_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        let block = service.context();
        assert!(block.contains("Working directory:"));
        assert!(block.contains(&dir.path().display().to_string()));
        assert!(block.contains(&format!("- Platform: {}", std::env::consts::OS)));
    }

    #[test]
    fn block_lists_top_level_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        let block = service.context();
        assert!(block.contains("Top-level entries: a/, b.txt"));
    }

    #[test]
    fn empty_project_omits_the_entries_line() {
        let dir = tempfile::tempdir().unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        assert!(!service.context().contains("Top-level entries"));
    }

    #[test]
    fn entry_listing_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..25 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "").unwrap();
        }
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        let block = service.context();
        assert!(block.contains("… (5 more)"), "{block}");
    }

    #[test]
    fn git_branch_is_read_from_head() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/feature/x\n").unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        assert!(service.context().contains("- Git branch: feature/x"));
    }

    #[test]
    fn detached_head_omits_the_branch_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "0123abcd\n").unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        assert!(!service.context().contains("Git branch"));
    }

    #[test]
    fn snapshot_is_cached_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let service = UsefulInfoService::new(dir.path().to_path_buf());
        let first = service.context();
        std::fs::write(dir.path().join("late.txt"), "").unwrap();
        assert_eq!(service.context(), first, "within the window the block is stable");

        service.refresh();
        assert!(
            service.context().contains("late.txt"),
            "refresh rebuilds the block"
        );
    }

    #[test]
    fn missing_project_root_still_yields_a_block() {
        let service =
            UsefulInfoService::new(PathBuf::from("/no/such/snow-project-dir"));
        let block = service.context();
        assert!(block.contains("Working directory:"));
        assert!(!block.contains("Top-level entries"));
    }
}
