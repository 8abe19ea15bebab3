// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent client pool for external MCP services.
//!
//! One live connection per service name.  `get_or_open` is the atomic
//! primitive: the whole map is held under a mutex, so concurrent callers
//! never race two connections to the same service.  Entries idle for longer
//! than the timeout are closed by [`McpClientPool::sweep_idle`], which the
//! dispatcher runs before every external call; everything is closed on
//! shutdown.
//!
//! Transport negotiation: a `command` descriptor spawns a stdio subprocess;
//! a `url` descriptor tries streamable HTTP first and falls back to the
//! legacy SSE transport when the handshake fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use snow_config::{McpServerConfig, McpTransportKind};

use crate::{
    env::{auth_header, expand_vars, merged_env},
    McpError, McpResult,
};

/// Default per-call timeout (spec: 5 minutes).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);
/// Idle window after which a pooled client is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Probes use a much shorter window and never enter the pool.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

type McpClient = RunningService<RoleClient, ProgressWatch>;

/// Client handler that records progress notifications.
///
/// A long-running tool that streams progress must not be killed by the
/// per-call timeout; the call loop checks this activity timestamp and
/// extends the deadline while notifications keep arriving.
#[derive(Clone)]
pub struct ProgressWatch {
    last_activity: Arc<StdMutex<Instant>>,
}

impl ProgressWatch {
    fn new() -> Self {
        Self {
            last_activity: Arc::new(StdMutex::new(Instant::now())),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("activity lock") = Instant::now();
    }

    fn elapsed(&self) -> Duration {
        self.last_activity.lock().expect("activity lock").elapsed()
    }
}

impl rmcp::ClientHandler for ProgressWatch {
    async fn on_progress(
        &self,
        _params: rmcp::model::ProgressNotificationParam,
        _context: rmcp::service::NotificationContext<RoleClient>,
    ) {
        self.touch();
    }
}

struct PooledEntry {
    client: Arc<McpClient>,
    watch: ProgressWatch,
    last_used: Instant,
}

/// The pool itself.  Cheap to clone behind an `Arc` at the process root.
pub struct McpClientPool {
    entries: Mutex<HashMap<String, PooledEntry>>,
    idle_timeout: Duration,
}

impl McpClientPool {
    pub fn new() -> Self {
        Self::with_idle_timeout(IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Number of live pooled connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Call `operation` on `service`, opening a connection if needed.
    ///
    /// The per-service timeout (descriptor `timeout`, default 300s) is
    /// extended while progress notifications arrive.  A lost connection
    /// fails only this invocation, evicts the stale handle, and reports a
    /// retryable error; sibling calls on other services are unaffected.
    pub async fn call_tool(
        &self,
        service: &str,
        cfg: &McpServerConfig,
        operation: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        cancel: &CancellationToken,
    ) -> McpResult<rmcp::model::CallToolResult> {
        self.sweep_idle().await;

        let (client, watch) = self.get_or_open(service, cfg).await?;
        watch.touch();

        let timeout = Duration::from_secs(cfg.timeout.unwrap_or(DEFAULT_CALL_TIMEOUT.as_secs()));
        let request = CallToolRequestParam {
            name: std::borrow::Cow::Owned(operation.to_string()),
            arguments,
        };

        // Deadline loop: fires only when no progress has been observed for
        // the full timeout window, so streaming tools stay alive.
        let idle_deadline = async {
            loop {
                let remaining = timeout.saturating_sub(watch.elapsed());
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(McpError::Cancelled),
            _ = idle_deadline => {
                return Err(McpError::Timeout {
                    service: service.to_string(),
                    operation: operation.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            r = client.call_tool(request) => r,
        };

        match result {
            Ok(out) => {
                self.touch(service).await;
                Ok(out)
            }
            Err(e) => {
                let reason = e.to_string();
                if is_connection_error(&reason) {
                    warn!(service, %reason, "MCP connection lost mid-call; evicting");
                    self.evict(service).await;
                    Err(McpError::ConnectionLost {
                        service: service.to_string(),
                        reason,
                    })
                } else {
                    Err(McpError::CallFailed {
                        service: service.to_string(),
                        operation: operation.to_string(),
                        reason,
                    })
                }
            }
        }
    }

    /// Probe a service for its tool list.
    ///
    /// Uses a short timeout and always disposes the connection immediately:
    /// probes run on every catalog refresh and must not occupy pool slots or
    /// keep subprocesses alive.
    pub async fn probe(
        &self,
        service: &str,
        cfg: &McpServerConfig,
    ) -> McpResult<Vec<rmcp::model::Tool>> {
        let (client, _watch) = tokio::time::timeout(PROBE_TIMEOUT, connect(service, cfg))
            .await
            .map_err(|_| McpError::Timeout {
                service: service.to_string(),
                operation: "initialize".to_string(),
                seconds: PROBE_TIMEOUT.as_secs(),
            })??;

        let tools = tokio::time::timeout(PROBE_TIMEOUT, client.list_all_tools())
            .await
            .map_err(|_| McpError::Timeout {
                service: service.to_string(),
                operation: "tools/list".to_string(),
                seconds: PROBE_TIMEOUT.as_secs(),
            })?
            .map_err(|e| McpError::CallFailed {
                service: service.to_string(),
                operation: "tools/list".to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = client.cancel().await {
            debug!(service, "probe connection close error: {e}");
        }
        Ok(tools)
    }

    /// Close every client whose `last_used` is older than the idle timeout.
    pub async fn sweep_idle(&self) {
        let mut entries = self.entries.lock().await;
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.last_used.elapsed() > self.idle_timeout)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(entry) = entries.remove(&name) {
                info!(service = %name, "closing idle MCP client");
                close_entry(&name, entry).await;
            }
        }
    }

    /// Close all clients.  Called once on shutdown.
    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for (name, entry) in entries.drain() {
            close_entry(&name, entry).await;
        }
    }

    async fn get_or_open(
        &self,
        service: &str,
        cfg: &McpServerConfig,
    ) -> McpResult<(Arc<McpClient>, ProgressWatch)> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(service) {
            entry.last_used = Instant::now();
            return Ok((Arc::clone(&entry.client), entry.watch.clone()));
        }

        // Connect while holding the lock: get-or-open must be atomic so two
        // concurrent calls never spawn the same stdio server twice.
        let (client, watch) = connect(service, cfg).await?;
        let client = Arc::new(client);
        entries.insert(
            service.to_string(),
            PooledEntry {
                client: Arc::clone(&client),
                watch: watch.clone(),
                last_used: Instant::now(),
            },
        );
        Ok((client, watch))
    }

    async fn touch(&self, service: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(service) {
            entry.last_used = Instant::now();
        }
    }

    async fn evict(&self, service: &str) {
        if let Some(entry) = self.entries.lock().await.remove(service) {
            close_entry(service, entry).await;
        }
    }
}

impl Default for McpClientPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_entry(name: &str, entry: PooledEntry) {
    match Arc::try_unwrap(entry.client) {
        Ok(client) => {
            if let Err(e) = client.cancel().await {
                warn!(service = %name, "error closing MCP client: {e}");
            }
        }
        Err(_) => {
            // A call still holds the Arc; dropping our reference is enough,
            // the connection closes when the call finishes.
            warn!(service = %name, "MCP client still in use at close; deferring");
        }
    }
}

/// Heuristic over rmcp error strings: a dropped channel or transport means
/// the connection is gone and the pooled handle is stale.
fn is_connection_error(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("transport") || lower.contains("closed") || lower.contains("connection")
}

/// Open a connection per the descriptor's transport.
async fn connect(service: &str, cfg: &McpServerConfig) -> McpResult<(McpClient, ProgressWatch)> {
    let transport_kind = cfg.transport().map_err(|e| McpError::Config {
        service: service.to_string(),
        reason: e.to_string(),
    })?;
    let env = merged_env(&cfg.env);
    let watch = ProgressWatch::new();

    match transport_kind {
        McpTransportKind::Stdio => {
            let command = cfg.command.as_deref().expect("stdio implies command");
            info!(service, command, "connecting MCP stdio service");
            let transport = TokioChildProcess::new(
                tokio::process::Command::new(command).configure(|c| {
                    c.args(&cfg.args)
                        .envs(env.iter())
                        .stderr(std::process::Stdio::inherit());
                }),
            )
            .map_err(|e| McpError::ConnectionFailed {
                service: service.to_string(),
                reason: format!("spawn: {e}"),
            })?;

            let client = watch
                .clone()
                .serve(transport)
                .await
                .map_err(|e| McpError::ConnectionFailed {
                    service: service.to_string(),
                    reason: format!("initialize: {e}"),
                })?;
            Ok((client, watch))
        }
        McpTransportKind::Http => {
            let raw_url = cfg.url.as_deref().expect("http implies url");
            let url = expand_vars(raw_url, &env);
            let auth = auth_header(&env).map(|v| expand_vars(&v, &env));

            // Streamable HTTP first; legacy SSE only when the modern
            // handshake is refused.
            info!(service, url = %url, "connecting MCP HTTP service");
            let transport = if let Some(auth) = auth.clone() {
                let mut http_cfg = StreamableHttpClientTransportConfig::with_uri(url.clone());
                http_cfg.auth_header = Some(auth);
                StreamableHttpClientTransport::from_config(http_cfg)
            } else {
                StreamableHttpClientTransport::from_uri(url.clone())
            };

            match watch.clone().serve(transport).await {
                Ok(client) => Ok((client, watch)),
                Err(streamable_err) => {
                    debug!(
                        service,
                        "streamable HTTP failed ({streamable_err}); trying legacy SSE"
                    );
                    let http_client = build_sse_http_client(auth.as_deref()).map_err(|e| {
                        McpError::ConnectionFailed {
                            service: service.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    let sse = SseClientTransport::start_with_client(
                        http_client,
                        SseClientConfig {
                            sse_endpoint: url.clone().into(),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| McpError::ConnectionFailed {
                        service: service.to_string(),
                        reason: format!(
                            "streamable HTTP: {streamable_err}; legacy SSE: {e}"
                        ),
                    })?;

                    let client = watch.clone().serve(sse).await.map_err(|e| {
                        McpError::ConnectionFailed {
                            service: service.to_string(),
                            reason: format!("SSE initialize: {e}"),
                        }
                    })?;
                    Ok((client, watch))
                }
            }
        }
    }
}

fn build_sse_http_client(auth: Option<&str>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    if let Some(value) = auth {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, value.parse()?);
        builder = builder.default_headers(headers);
    }
    Ok(builder.build()?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_starts_empty() {
        let pool = McpClientPool::new();
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn invalid_descriptor_is_a_config_error() {
        let pool = McpClientPool::new();
        let cfg = McpServerConfig::default(); // neither command nor url
        let err = pool
            .call_tool("bad", &cfg, "op", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[tokio::test]
    async fn failed_spawn_is_a_connection_error() {
        let pool = McpClientPool::new();
        let cfg = McpServerConfig {
            command: Some("/nonexistent/snow-test-binary".into()),
            ..Default::default()
        };
        let err = pool
            .call_tool("ghost", &cfg, "op", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed { .. }), "got {err:?}");
        assert_eq!(pool.len().await, 0, "failed connects must not pool");
    }

    #[tokio::test]
    async fn cancelled_call_reports_cancelled() {
        // `cat` speaks no MCP, so initialization would hang; cancellation
        // must win the race without touching the service.
        let pool = McpClientPool::new();
        let cfg = McpServerConfig {
            command: Some("cat".into()),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fut = pool.call_tool("slow", &cfg, "op", None, &cancel);
        let err = match tokio::time::timeout(Duration::from_secs(5), fut).await {
            Ok(r) => r.unwrap_err(),
            Err(_) => panic!("cancellation did not take effect"),
        };
        // Either outcome is acceptable depending on which branch loses the
        // race, but a hang is not.
        assert!(
            matches!(err, McpError::Cancelled | McpError::ConnectionFailed { .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn connection_error_heuristic() {
        assert!(is_connection_error("Transport closed"));
        assert!(is_connection_error("connection reset by peer"));
        assert!(!is_connection_error("invalid params: missing field"));
    }

    #[tokio::test]
    async fn sweep_on_empty_pool_is_a_no_op() {
        let pool = McpClientPool::with_idle_timeout(Duration::from_millis(1));
        pool.sweep_idle().await;
        assert_eq!(pool.len().await, 0);
    }
}
