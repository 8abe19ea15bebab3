// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Hook pipeline: configured side-channels around tool execution.
//!
//! Four hook points (`toolConfirmation`, `beforeToolCall`, `afterToolCall`,
//! `onSubAgentComplete`), each a sequence of shell commands or declarative
//! prompts.  Execution is sequential within a point; the exit code decides
//! policy:
//!
//! | exit code | effect |
//! |-----------|--------|
//! | 0         | continue |
//! | 1         | warn: appended to the tool result text, continue |
//! | ≥2 / signal | abort the enclosing operation (`hookFailed`) |

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use snow_config::{HookEntry, HooksConfig};

/// Which hook point is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    ToolConfirmation,
    BeforeToolCall,
    AfterToolCall,
    OnSubAgentComplete,
}

/// Attached to `hookFailed` operations so the UI can render the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookReport {
    pub command: String,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
}

/// Result of running one hook point.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    Continue,
    /// Exit code 1: carry on, but append the hook output to the result text.
    Warn(String),
    /// Prompt hook asked to feed a message back to the model as a user turn.
    ContinueWithMessage(String),
    /// Exit code ≥2 (or signal): stop the enclosing operation.
    Abort(HookReport),
}

impl HookOutcome {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes the hook lists registered in configuration.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    config: HooksConfig,
}

impl HookRunner {
    pub fn new(config: HooksConfig) -> Self {
        Self { config }
    }

    fn entries(&self, point: HookPoint) -> &[HookEntry] {
        match point {
            HookPoint::ToolConfirmation => &self.config.tool_confirmation,
            HookPoint::BeforeToolCall => &self.config.before_tool_call,
            HookPoint::AfterToolCall => &self.config.after_tool_call,
            HookPoint::OnSubAgentComplete => &self.config.on_sub_agent_complete,
        }
    }

    pub fn has_hooks(&self, point: HookPoint) -> bool {
        !self.entries(point).is_empty()
    }

    /// Run every hook of `point` in registration order.
    ///
    /// `env` is exported to command hooks (`SNOW_TOOL_NAME`, `SNOW_TOOL_ARGS`,
    /// `SNOW_RESULT`, …).  The first abort wins; warnings accumulate.
    pub async fn run(&self, point: HookPoint, env: &HashMap<String, String>) -> HookOutcome {
        let mut warnings: Vec<String> = Vec::new();
        let mut injected: Option<String> = None;

        for entry in self.entries(point) {
            match entry {
                HookEntry::Command { command, timeout } => {
                    let timeout = timeout
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_HOOK_TIMEOUT);
                    match run_command_hook(command, env, timeout).await {
                        HookOutcome::Continue => {}
                        HookOutcome::Warn(w) => warnings.push(w),
                        abort @ HookOutcome::Abort(_) => return abort,
                        HookOutcome::ContinueWithMessage(m) => injected = Some(m),
                    }
                }
                HookEntry::Prompt { prompt } => {
                    // Declarative prompt hooks: `abort:` stops the
                    // operation, anything else is fed back to the model as a
                    // synthetic user turn.
                    if let Some(reason) = prompt.strip_prefix("abort:") {
                        return HookOutcome::Abort(HookReport {
                            command: String::new(),
                            output: String::new(),
                            error: reason.trim().to_string(),
                            exit_code: 2,
                        });
                    }
                    injected = Some(prompt.clone());
                }
            }
        }

        if let Some(message) = injected {
            return HookOutcome::ContinueWithMessage(message);
        }
        if !warnings.is_empty() {
            return HookOutcome::Warn(warnings.join("\n"));
        }
        HookOutcome::Continue
    }
}

async fn run_command_hook(
    command: &str,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> HookOutcome {
    debug!(command, "running hook");
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (k, v) in env {
        cmd.env(k, v);
    }

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return HookOutcome::Abort(HookReport {
                command: command.to_string(),
                output: String::new(),
                error: format!("failed to spawn hook: {e}"),
                exit_code: -1,
            })
        }
    };

    let result = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            return HookOutcome::Abort(HookReport {
                command: command.to_string(),
                output: String::new(),
                error: format!("hook I/O error: {e}"),
                exit_code: -1,
            })
        }
        Err(_) => {
            return HookOutcome::Abort(HookReport {
                command: command.to_string(),
                output: String::new(),
                error: format!("hook timed out after {}s", timeout.as_secs()),
                exit_code: -1,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&result.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
    // Killed-by-signal has no code; treat as abort like any code ≥2.
    let code = result.status.code().unwrap_or(-1);

    match code {
        0 => HookOutcome::Continue,
        1 => {
            let text = if stderr.is_empty() { stdout } else { stderr };
            HookOutcome::Warn(text)
        }
        _ => {
            warn!(command, code, "hook aborted the operation");
            HookOutcome::Abort(HookReport {
                command: command.to_string(),
                output: stdout,
                error: stderr,
                exit_code: code,
            })
        }
    }
}

/// Standard environment for a tool-scoped hook invocation.
pub fn tool_hook_env(tool_name: &str, args: &serde_json::Value) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("SNOW_TOOL_NAME".to_string(), tool_name.to_string());
    env.insert("SNOW_TOOL_ARGS".to_string(), args.to_string());
    env
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with(entries: Vec<HookEntry>, point: HookPoint) -> HookRunner {
        let mut cfg = HooksConfig::default();
        match point {
            HookPoint::BeforeToolCall => cfg.before_tool_call = entries,
            HookPoint::AfterToolCall => cfg.after_tool_call = entries,
            HookPoint::ToolConfirmation => cfg.tool_confirmation = entries,
            HookPoint::OnSubAgentComplete => cfg.on_sub_agent_complete = entries,
        }
        HookRunner::new(cfg)
    }

    fn cmd(c: &str) -> HookEntry {
        HookEntry::Command {
            command: c.to_string(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn exit_zero_continues() {
        let r = runner_with(vec![cmd("true")], HookPoint::BeforeToolCall);
        let out = r.run(HookPoint::BeforeToolCall, &HashMap::new()).await;
        assert!(matches!(out, HookOutcome::Continue));
    }

    #[tokio::test]
    async fn exit_one_warns_with_output() {
        let r = runner_with(
            vec![cmd("echo suspicious; exit 1")],
            HookPoint::BeforeToolCall,
        );
        let out = r.run(HookPoint::BeforeToolCall, &HashMap::new()).await;
        match out {
            HookOutcome::Warn(w) => assert!(w.contains("suspicious")),
            other => panic!("expected Warn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exit_two_aborts_with_report() {
        let r = runner_with(
            vec![cmd("echo out; echo err >&2; exit 3")],
            HookPoint::AfterToolCall,
        );
        let out = r.run(HookPoint::AfterToolCall, &HashMap::new()).await;
        match out {
            HookOutcome::Abort(report) => {
                assert_eq!(report.exit_code, 3);
                assert_eq!(report.output, "out");
                assert_eq!(report.error, "err");
            }
            other => panic!("expected Abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_abort_stops_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let r = runner_with(
            vec![
                cmd("exit 2"),
                cmd(&format!("touch {}", marker.display())),
            ],
            HookPoint::BeforeToolCall,
        );
        let out = r.run(HookPoint::BeforeToolCall, &HashMap::new()).await;
        assert!(out.is_abort());
        assert!(!marker.exists(), "later hooks must not run after an abort");
    }

    #[tokio::test]
    async fn hook_sees_tool_env() {
        let r = runner_with(
            vec![cmd("test \"$SNOW_TOOL_NAME\" = terminal-execute")],
            HookPoint::BeforeToolCall,
        );
        let env = tool_hook_env("terminal-execute", &serde_json::json!({"command": "ls"}));
        let out = r.run(HookPoint::BeforeToolCall, &env).await;
        assert!(matches!(out, HookOutcome::Continue));
    }

    #[tokio::test]
    async fn prompt_hook_injects_message() {
        let r = runner_with(
            vec![HookEntry::Prompt {
                prompt: "also update the changelog".into(),
            }],
            HookPoint::OnSubAgentComplete,
        );
        let out = r.run(HookPoint::OnSubAgentComplete, &HashMap::new()).await;
        match out {
            HookOutcome::ContinueWithMessage(m) => assert_eq!(m, "also update the changelog"),
            other => panic!("expected injection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prompt_hook_abort_form() {
        let r = runner_with(
            vec![HookEntry::Prompt {
                prompt: "abort: policy violation".into(),
            }],
            HookPoint::ToolConfirmation,
        );
        let out = r.run(HookPoint::ToolConfirmation, &HashMap::new()).await;
        match out {
            HookOutcome::Abort(rep) => assert_eq!(rep.error, "policy violation"),
            other => panic!("expected Abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_aborts() {
        let r = runner_with(
            vec![HookEntry::Command {
                command: "sleep 5".into(),
                timeout: Some(1),
            }],
            HookPoint::BeforeToolCall,
        );
        let start = std::time::Instant::now();
        let out = r.run(HookPoint::BeforeToolCall, &HashMap::new()).await;
        assert!(out.is_abort());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn no_hooks_is_continue() {
        let r = HookRunner::default();
        assert!(!r.has_hooks(HookPoint::BeforeToolCall));
        let out = r.run(HookPoint::BeforeToolCall, &HashMap::new()).await;
        assert!(matches!(out, HookOutcome::Continue));
    }

    #[tokio::test]
    async fn warnings_accumulate_across_hooks() {
        let r = runner_with(
            vec![cmd("echo w1; exit 1"), cmd("echo w2; exit 1")],
            HookPoint::AfterToolCall,
        );
        let out = r.run(HookPoint::AfterToolCall, &HashMap::new()).await;
        match out {
            HookOutcome::Warn(w) => {
                assert!(w.contains("w1"));
                assert!(w.contains("w2"));
            }
            other => panic!("expected Warn, got {other:?}"),
        }
    }
}
