// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use snow_model::Message;

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Tool names the user approved with "always" for this session.
    #[serde(default)]
    pub always_approved: Vec<String>,
}

impl Session {
    pub fn new(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            project_id: project_id.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            always_approved: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        // The first user message names the session.
        if self.title.is_empty() && msg.role == snow_model::Role::User {
            self.title = msg.content.chars().take(80).collect();
        }
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    /// Character-weighted token estimate over all messages.
    pub fn approx_tokens(&self) -> usize {
        snow_model::approx_tokens(&self.messages)
    }

    /// The most recent user message's text, for listing search.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == snow_model::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Listing view — deserializing this ignores the `messages` body entirely,
/// so paging through many sessions stays cheap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    pub id: String,
    pub title: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of session headers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionHeader>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Store rooted at `~/.snow/sessions/<project-id>/`.
pub struct SessionStore {
    dir: PathBuf,
    project_id: String,
}

impl SessionStore {
    pub fn new(dir: PathBuf, project_id: impl Into<String>) -> Self {
        Self {
            dir,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn create(&self) -> Session {
        Session::new(&self.project_id)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomic persist: write-temp + rename.
    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(&session.id);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string(session)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        debug!(session = %session.id, messages = session.messages.len(), "session persisted");
        Ok(())
    }

    pub fn load(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let session = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(session))
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))?;
        Ok(true)
    }

    /// Paginated listing ordered by `updatedAt` descending.
    ///
    /// Without a query only headers are parsed.  With a query, candidates
    /// are fully parsed so the last user message can be scanned too.
    pub fn list(&self, page: usize, page_size: usize, query: Option<&str>) -> SessionPage {
        let mut headers: Vec<SessionHeader> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let Ok(header) = serde_json::from_str::<SessionHeader>(&text) else {
                    debug!(path = %path.display(), "skipping unreadable session file");
                    continue;
                };
                if let Some(q) = query {
                    let q = q.to_lowercase();
                    let title_hit = header.title.to_lowercase().contains(&q);
                    let body_hit = !title_hit
                        && serde_json::from_str::<Session>(&text)
                            .ok()
                            .and_then(|s| {
                                s.last_user_content()
                                    .map(|c| c.to_lowercase().contains(&q))
                            })
                            .unwrap_or(false);
                    if !title_hit && !body_hit {
                        continue;
                    }
                }
                headers.push(header);
            }
        }

        headers.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = headers.len();
        let page_size = page_size.max(1);
        let start = page.saturating_mul(page_size);
        let sessions = headers
            .into_iter()
            .skip(start)
            .take(page_size)
            .collect();
        SessionPage {
            sessions,
            total,
            page,
            page_size,
        }
    }

    /// Truncate to `[0, upto)` and persist (rollback support).
    pub fn truncate(&self, session: &mut Session, upto: usize) -> anyhow::Result<()> {
        session.messages.truncate(upto);
        session.updated_at = Utc::now();
        self.save(session)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
