// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;

/// The `terminal` service: one operation, `terminal-execute`.
///
/// The scheduler serializes all terminal executions (shared resource) and
/// threads the turn's cancellation token through; an ESC-triggered cancel
/// kills this child only, not the turn.
pub struct TerminalExecuteTool {
    pub default_timeout_secs: u64,
}

impl Default for TerminalExecuteTool {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
        }
    }
}

#[async_trait]
impl Tool for TerminalExecuteTool {
    fn name(&self) -> &str {
        "terminal-execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its combined output.\n\
         Use for builds, tests, git, and other terminal operations — not for \
         reading or editing files (use the filesystem tools for those).\n\
         Independent commands may be issued as parallel calls; dependent \
         commands should be chained with '&&' in one call.\n\
         Output is capped at 100,000 characters. Non-zero exit codes are \
         returned as errors with the exit code in the message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "workdir": { "type": "string", "description": "Working directory (optional)" },
                "timeoutSecs": { "type": "integer", "description": "Timeout in seconds (optional)" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let command = match call.args.get("command").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required field: command"),
        };
        let workdir = call
            .args
            .get("workdir")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timeout = std::time::Duration::from_secs(
            call.args
                .get("timeoutSecs")
                .and_then(Value::as_u64)
                .unwrap_or(self.default_timeout_secs),
        );

        debug!(command = %command, "terminal-execute");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &workdir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("failed to spawn: {e}")),
        };

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                // kill_on_drop reaps the child when the future is dropped.
                return ToolOutput::err(&call.id, "command cancelled by user");
            }
            r = tokio::time::timeout(timeout, child.wait_with_output()) => match r {
                Ok(Ok(out)) => out,
                Ok(Err(e)) => return ToolOutput::err(&call.id, format!("I/O error: {e}")),
                Err(_) => {
                    return ToolOutput::err(
                        &call.id,
                        format!(
                            "command timed out after {}s; raise timeoutSecs for long builds",
                            timeout.as_secs()
                        ),
                    )
                }
            },
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        if text.len() > OUTPUT_LIMIT {
            let omitted = text.len() - OUTPUT_LIMIT;
            text.truncate(floor_char_boundary(&text, OUTPUT_LIMIT));
            text.push_str(&format!("\n[... {omitted} bytes truncated ...]"));
        }

        match output.status.code() {
            Some(0) => ToolOutput::ok(&call.id, text),
            Some(code) => ToolOutput::err(&call.id, format!("exit code {code}\n{text}")),
            None => ToolOutput::err(&call.id, format!("terminated by signal\n{text}")),
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: "terminal-execute".into(),
            args,
        }
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let out = TerminalExecuteTool::default()
            .execute(&call(json!({"command": "echo hello"})), &token())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let out = TerminalExecuteTool::default()
            .execute(&call(json!({"command": "exit 7"})), &token())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("exit code 7"));
    }

    #[tokio::test]
    async fn stderr_is_labelled() {
        let out = TerminalExecuteTool::default()
            .execute(&call(json!({"command": "echo oops >&2"})), &token())
            .await;
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("oops"));
    }

    #[tokio::test]
    async fn workdir_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let out = TerminalExecuteTool::default()
            .execute(
                &call(json!({"command": "pwd", "workdir": dir.path().to_string_lossy()})),
                &token(),
            )
            .await;
        assert!(out.content.trim().ends_with(
            dir.path()
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
        ));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let start = std::time::Instant::now();
        let out = TerminalExecuteTool::default()
            .execute(
                &call(json!({"command": "sleep 10", "timeoutSecs": 1})),
                &token(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_kills_the_command() {
        let cancel = CancellationToken::new();
        let tool = TerminalExecuteTool::default();
        let c = call(json!({"command": "sleep 10"}));
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel2.cancel();
        });
        let start = std::time::Instant::now();
        let out = tool.execute(&c, &cancel).await;
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_command_is_structured_error() {
        let out = TerminalExecuteTool::default()
            .execute(&call(json!({})), &token())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("command"));
    }
}
