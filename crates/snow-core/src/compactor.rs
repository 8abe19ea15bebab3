// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Context compressor: summarize aging history when the token estimate
//! nears the configured ceiling.
//!
//! Strategy: keep the system message and the most recent N messages intact
//! (never splitting a tool-call block), summarize everything older with a
//! single-shot call on the basic-tier model, and splice the summary in as
//! one assistant message.  A compaction-hook veto leaves the session
//! uncompressed and informs the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use snow_model::{
    stream_with_retry, CompletionRequest, Message, ModelProvider, RetryPolicy, Role,
};
use snow_tools::{HookOutcome, HookPoint, HookRunner};

use crate::turn::accumulate_stream;

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarize the conversation history below \
     in a concise, information-dense way. Preserve all technical details, decisions, \
     file names, code snippets, and tool outputs that may matter for future work. \
     The summary will replace the original history to free up context space.";

/// Fraction of the ceiling at which compression triggers.
const TRIGGER_FRACTION: f32 = 0.85;
/// Messages preserved verbatim at the tail.
const KEEP_RECENT: usize = 6;

#[derive(Debug, Clone)]
pub enum CompressionOutcome {
    /// History was replaced with a summary.
    Compressed {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// The compaction hook aborted; the session is unchanged.
    Vetoed,
    /// The estimate was below the trigger.
    NotNeeded,
}

pub struct Compactor {
    /// Basic-tier model when configured, else the main provider.
    provider: Arc<dyn ModelProvider>,
    hooks: HookRunner,
    keep_recent: usize,
}

impl Compactor {
    pub fn new(provider: Arc<dyn ModelProvider>, hooks: HookRunner) -> Self {
        Self {
            provider,
            hooks,
            keep_recent: KEEP_RECENT,
        }
    }

    /// Compress `messages` in place when the estimate exceeds the trigger
    /// (or unconditionally with `force`).  On model failure the original
    /// history is restored and the error propagated; callers proceed
    /// uncompressed.
    pub async fn maybe_compress(
        &self,
        messages: &mut Vec<Message>,
        max_context_tokens: usize,
        force: bool,
        cancel: &CancellationToken,
    ) -> anyhow::Result<CompressionOutcome> {
        let tokens_before = snow_model::approx_tokens(messages);
        if !force {
            let ceiling = (max_context_tokens as f32 * TRIGGER_FRACTION) as usize;
            if max_context_tokens == 0 || tokens_before < ceiling {
                return Ok(CompressionOutcome::NotNeeded);
            }
        }

        // The compaction hook can veto; the turn then proceeds uncompressed.
        let mut env = HashMap::new();
        env.insert("SNOW_TOOL_NAME".to_string(), "context-compress".to_string());
        if let HookOutcome::Abort(report) = self.hooks.run(HookPoint::BeforeToolCall, &env).await {
            warn!(command = %report.command, "compaction vetoed by hook");
            return Ok(CompressionOutcome::Vetoed);
        }

        let system: Option<Message> = messages.iter().find(|m| m.role == Role::System).cloned();
        let non_system: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        // Nothing worth summarizing.
        if non_system.len() <= self.keep_recent + 1 && !force {
            return Ok(CompressionOutcome::NotNeeded);
        }

        let mut split = non_system.len().saturating_sub(self.keep_recent);
        // Never split a tool-call block: back up over tool responses and the
        // assistant head that opened them.
        while split > 0 && split < non_system.len() && non_system[split].role == Role::Tool {
            split -= 1;
        }
        if split == 0 && !force {
            return Ok(CompressionOutcome::NotNeeded);
        }

        let (to_summarize, recent) = non_system.split_at(split);
        let history_text = serialize_history(to_summarize);
        let request = CompletionRequest {
            messages: vec![
                Message::system(SUMMARIZE_PROMPT),
                Message::user(history_text),
            ],
            tools: Vec::new(),
            system_override: None,
            system_dynamic_suffix: None,
            cache_key: None,
        };

        debug!(
            summarized = to_summarize.len(),
            kept = recent.len(),
            "compressing context via {}",
            self.provider.model_name()
        );

        let stream = stream_with_retry(
            Arc::clone(&self.provider),
            request,
            cancel.clone(),
            RetryPolicy::default(),
        );
        let outcome = accumulate_stream(stream, |_| {}).await;
        if let Some(e) = outcome.error {
            anyhow::bail!("compaction model call failed: {e}");
        }
        if outcome.text.trim().is_empty() {
            anyhow::bail!("compaction produced an empty summary");
        }

        let mut rebuilt = Vec::with_capacity(recent.len() + 2);
        if let Some(sys) = system {
            rebuilt.push(sys);
        }
        rebuilt.push(Message::assistant(format!(
            "[Conversation summary — earlier history was compacted]\n\n{}",
            outcome.text.trim()
        )));
        rebuilt.extend_from_slice(recent);
        *messages = rebuilt;

        Ok(CompressionOutcome::Compressed {
            tokens_before,
            tokens_after: snow_model::approx_tokens(messages),
        })
    }
}

fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            let mut line = format!("{role}: {}", m.content);
            for tc in &m.tool_calls {
                line.push_str(&format!("\n  [called {} {}]", tc.name, tc.arguments));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use snow_model::MockProvider;

    fn long_history(turns: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("base prompt")];
        for i in 0..turns {
            msgs.push(Message::user(format!("question {i} {}", "x".repeat(400))));
            msgs.push(Message::assistant(format!("answer {i} {}", "y".repeat(400))));
        }
        msgs
    }

    #[tokio::test]
    async fn below_trigger_is_not_needed() {
        let mock = MockProvider::new(vec![]);
        let compactor = Compactor::new(mock, HookRunner::default());
        let mut msgs = long_history(2);
        let outcome = compactor
            .maybe_compress(&mut msgs, 1_000_000, false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CompressionOutcome::NotNeeded));
        assert_eq!(msgs.len(), 5, "history untouched");
    }

    #[tokio::test]
    async fn over_trigger_splices_summary() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("the summary")]);
        let compactor = Compactor::new(mock, HookRunner::default());
        let mut msgs = long_history(20);
        let before_tokens = snow_model::approx_tokens(&msgs);

        let outcome = compactor
            .maybe_compress(&mut msgs, 2_000, false, &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            CompressionOutcome::Compressed {
                tokens_before,
                tokens_after,
            } => {
                assert_eq!(tokens_before, before_tokens);
                assert!(tokens_after < tokens_before);
            }
            other => panic!("expected Compressed, got {other:?}"),
        }

        // system + summary + 6 recent
        assert_eq!(msgs.len(), 8);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[1].content.contains("the summary"));
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn recent_tail_is_preserved_verbatim() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("s")]);
        let compactor = Compactor::new(mock, HookRunner::default());
        let mut msgs = long_history(20);
        let tail: Vec<String> = msgs[msgs.len() - 6..]
            .iter()
            .map(|m| m.content.clone())
            .collect();
        compactor
            .maybe_compress(&mut msgs, 2_000, false, &CancellationToken::new())
            .await
            .unwrap();
        let new_tail: Vec<String> = msgs[msgs.len() - 6..]
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(tail, new_tail);
    }

    #[tokio::test]
    async fn split_never_lands_inside_a_tool_block() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("s")]);
        let compactor = Compactor::new(mock, HookRunner::default());

        let mut msgs = vec![Message::system("sys")];
        for i in 0..10 {
            msgs.push(Message::user(format!("q{i} {}", "x".repeat(300))));
            msgs.push(Message::assistant(format!("a{i} {}", "y".repeat(300))));
        }
        // A tool-call block placed so the naive split (len − keep_recent)
        // would land on its tool response.
        msgs.push(Message::assistant_with_calls(
            "",
            vec![snow_model::ToolCallRecord {
                id: "c1".into(),
                name: "filesystem-read".into(),
                arguments: "{}".into(),
            }],
        ));
        msgs.push(Message::tool_result("c1", "result"));
        for i in 0..2 {
            msgs.push(Message::user(format!("follow-up {i}")));
            msgs.push(Message::assistant("ok"));
        }
        msgs.push(Message::user("last question"));

        compactor
            .maybe_compress(&mut msgs, 1_500, false, &CancellationToken::new())
            .await
            .unwrap();

        // Wherever the block survived, its head must be directly followed by
        // its tool response.
        for (i, m) in msgs.iter().enumerate() {
            if !m.tool_calls.is_empty() {
                assert_eq!(
                    msgs[i + 1].tool_call_id.as_deref(),
                    Some("c1"),
                    "tool-call block was split by compaction"
                );
            }
        }
    }

    #[tokio::test]
    async fn hook_veto_leaves_history_unchanged() {
        let mut hooks_cfg = snow_config::HooksConfig::default();
        hooks_cfg.before_tool_call = vec![snow_config::HookEntry::Command {
            command: "exit 2".into(),
            timeout: None,
        }];
        let mock = MockProvider::new(vec![MockProvider::text_turn("never used")]);
        let compactor = Compactor::new(mock, HookRunner::new(hooks_cfg));
        let mut msgs = long_history(20);
        let len_before = msgs.len();

        let outcome = compactor
            .maybe_compress(&mut msgs, 2_000, false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CompressionOutcome::Vetoed));
        assert_eq!(msgs.len(), len_before);
    }

    #[tokio::test]
    async fn empty_summary_is_an_error_and_history_survives() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("")]);
        let compactor = Compactor::new(mock, HookRunner::default());
        let mut msgs = long_history(20);
        let len_before = msgs.len();

        let result = compactor
            .maybe_compress(&mut msgs, 2_000, false, &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(msgs.len(), len_before, "history must survive a failed call");
    }

    #[tokio::test]
    async fn force_compresses_below_trigger() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("forced summary")]);
        let compactor = Compactor::new(mock, HookRunner::default());
        let mut msgs = long_history(10);
        let outcome = compactor
            .maybe_compress(&mut msgs, 1_000_000, true, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CompressionOutcome::Compressed { .. }));
    }
}
