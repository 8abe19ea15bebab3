// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process entry point: load configuration, build the long-lived services
//! in dependency order (config → model → MCP pool → tools → session store →
//! engine → transport), then serve.

mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use snow_config::{
    load_config, load_mcp_config, CustomHeadersStore, LanguageStore, SensitiveCommandsStore,
    SnowPaths, SystemPromptStore,
};
use snow_core::{
    ApprovalState, Compactor, Engine, EngineParts, RunningAgentTracker, SendMessageTool,
    SubAgentDeps, SubAgentRuntime, SubAgentTool, ToolScheduler, UsefulInfoService,
};
use snow_mcp::McpClientPool;
use snow_model::{ModelProvider, RetryPolicy, UsageLog};
use snow_server::{AppState, ConnectionRegistry, PendingRequests, SseInteraction};
use snow_session::{project_id, SessionStore, SnapshotStore};
use snow_tools::{
    AskQuestionTool, CatalogInputs, EditFileTool, EditSearchTool, HookRunner, ReadFileTool,
    TerminalExecuteTool, TodoReadTool, TodoStore, TodoWriteTool, ToolRegistry, WriteFileTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    // reqwest is built against rustls; install the ring provider once so
    // every client in the process shares it.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = cli::Cli::parse();
    let paths = SnowPaths::discover()?;
    let config = load_config(&paths).context("loading ~/.snow/config.json")?;
    let provider_cfg = config.profile(args.profile.as_deref()).clone();

    let cwd = std::env::current_dir()?;
    let project = project_id(&cwd);

    match args.command {
        cli::Command::Serve { host, port } => {
            serve(paths, config, provider_cfg, project, cwd, host, port).await
        }
        cli::Command::Sessions { page, page_size, q } => {
            let store = SessionStore::new(paths.sessions_dir(&project), &project);
            let listing = store.list(page, page_size, q.as_deref());
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
        cli::Command::Usage => {
            let log = UsageLog::new(paths.usage_file());
            let mut rows: Vec<_> = log.snapshot().into_iter().collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            for (model, usage) in rows {
                println!(
                    "{model}: {} requests, {} prompt / {} completion tokens \
                     ({} cache-read, {} cache-write)",
                    usage.requests,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.cache_read_tokens,
                    usage.cache_creation_tokens,
                );
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    paths: SnowPaths,
    config: snow_config::ConfigFile,
    provider_cfg: snow_config::ProviderConfig,
    project: String,
    cwd: std::path::PathBuf,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    // ── Stores ───────────────────────────────────────────────────────────────
    let system_prompts = SystemPromptStore::load(&paths)?;
    let headers_store = CustomHeadersStore::load(&paths)?;
    let language = LanguageStore::load(&paths)?;
    let sensitive = Arc::new(SensitiveCommandsStore::load(&paths)?);
    let mcp_config = Arc::new(load_mcp_config(&paths)?);
    let usage_log = Arc::new(UsageLog::new(paths.usage_file()));

    // ── Provider ─────────────────────────────────────────────────────────────
    let extra_headers = headers_store.resolve(provider_cfg.custom_headers_scheme_id.as_deref());
    let provider = snow_model::from_config(
        &provider_cfg,
        &provider_cfg.advanced_model,
        extra_headers.clone(),
        Some(Arc::clone(&usage_log)),
    );
    let basic_provider = snow_model::from_config(
        &provider_cfg,
        provider_cfg.basic_or_advanced(),
        extra_headers.clone(),
        Some(Arc::clone(&usage_log)),
    );
    let mut profile_providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
    for (name, cfg) in &config.profiles {
        let headers = headers_store.resolve(cfg.custom_headers_scheme_id.as_deref());
        profile_providers.insert(
            name.clone(),
            snow_model::from_config(cfg, &cfg.advanced_model, headers, Some(Arc::clone(&usage_log))),
        );
    }

    let system_override = system_prompts
        .resolve(provider_cfg.system_prompt_id.as_deref())
        .map(str::to_string);
    let dynamic_suffix = language
        .language
        .as_deref()
        .map(|lang| format!("Always respond in {lang}."));

    // ── Tools ────────────────────────────────────────────────────────────────
    let pool = Arc::new(McpClientPool::new());
    let hooks = HookRunner::new(config.hooks.clone());
    let tracker = Arc::new(RunningAgentTracker::new());
    let useful_info = UsefulInfoService::new(cwd.clone());
    let (todo_tx, todo_rx) = tokio::sync::mpsc::channel(64);
    let todo_store = TodoStore::new(paths.todos_dir(&project), todo_tx);
    let subagent_runtime = SubAgentRuntime::new();

    let mut registry = ToolRegistry::new(
        Arc::clone(&pool),
        hooks.clone(),
        provider_cfg.tool_result_token_limit,
    );
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    registry.register(EditFileTool {
        similarity_threshold: provider_cfg.edit_similarity_threshold,
    });
    registry.register(EditSearchTool);
    registry.register(TerminalExecuteTool::default());
    registry.register(AskQuestionTool);
    registry.register(TodoReadTool {
        store: Arc::clone(&todo_store),
    });
    registry.register(TodoWriteTool {
        store: Arc::clone(&todo_store),
    });
    registry.register(SendMessageTool::new(Arc::clone(&tracker)));
    for agent in &config.agents {
        registry.register(SubAgentTool::new(
            agent.clone(),
            Arc::clone(&subagent_runtime),
        ));
    }
    let registry = Arc::new(registry);

    let catalog_inputs = CatalogInputs {
        mcp_config: (*mcp_config).clone(),
        agent_ids: config.agents.iter().map(|a| a.id.clone()).collect(),
        skills: Vec::new(),
        codebase_enabled: config.codebase_enabled,
    };

    // ── Scheduler + engine ───────────────────────────────────────────────────
    let approvals = Arc::new(ApprovalState::new(config.yolo_tools.clone()));
    let connections = Arc::new(ConnectionRegistry::default());
    let pending = Arc::new(PendingRequests::default());
    let interaction = Arc::new(SseInteraction::new(
        Arc::clone(&connections),
        Arc::clone(&pending),
    ));
    let scheduler = Arc::new(ToolScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&approvals),
        Arc::clone(&sensitive),
        interaction,
    ));

    subagent_runtime.init(SubAgentDeps {
        provider: Arc::clone(&provider),
        profile_providers,
        registry: Arc::clone(&registry),
        scheduler: Arc::clone(&scheduler),
        tracker: Arc::clone(&tracker),
        hooks: hooks.clone(),
        mcp_config: Arc::clone(&mcp_config),
        catalog_inputs: catalog_inputs.clone(),
        useful_info: Arc::clone(&useful_info),
        project_root: cwd.clone(),
        retry_policy: RetryPolicy::default(),
    });

    let engine = Arc::new(Engine::new(EngineParts {
        provider,
        registry,
        scheduler,
        tracker,
        sessions: Arc::new(SessionStore::new(paths.sessions_dir(&project), &project)),
        snapshots: Arc::new(SnapshotStore::new(paths.snapshots_dir(&project))),
        approvals,
        compactor: Compactor::new(basic_provider, hooks),
        useful_info,
        mcp_config,
        catalog_inputs,
        system_override,
        dynamic_suffix,
        enable_auto_compress: provider_cfg.enable_auto_compress,
        max_context_tokens: provider_cfg.max_context_tokens,
        retry_policy: RetryPolicy::default(),
        tool_events: todo_rx,
    }));

    let state = Arc::new(AppState::new(
        engine,
        connections,
        pending,
        todo_store,
        config.agents.clone(),
    ));

    let addr: std::net::SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid host/port")?;
    info!(project = %project, model = %provider_cfg.advanced_model, "starting snow engine");

    tokio::select! {
        result = snow_server::serve(Arc::clone(&state), addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    pool.close_all().await;
    Ok(())
}
