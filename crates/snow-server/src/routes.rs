// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP endpoints.
//!
//! | method path | effect |
//! |---|---|
//! | GET `/events` | SSE stream; emits `connected` with a new connectionId |
//! | POST `/session/create` | create + bind |
//! | POST `/session/load` | load + bind; 404 when missing |
//! | GET `/session/list?page&pageSize&q` | paginated listing |
//! | DELETE `/session/:id` | delete (unbind if bound) |
//! | POST `/message` | chat / abort / rollback / switch_agent / responses / image |
//! | POST `/context/compress` | manual compaction |
//! | GET `/session/rollback-points?sessionId` | per-boundary snapshot summary |
//! | GET `/health` | liveness + connection count |

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::Stream;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use snow_core::EngineEvent;
use snow_model::{ImagePart, Message};
use snow_session::Session;

use crate::{
    state::{AppState, CONNECTION_BUFFER},
    wire::{map_engine_event, WireEvent},
};

type JsonResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": msg.into() })),
    )
}

fn not_found(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": msg.into() })))
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

// ─── GET /events ─────────────────────────────────────────────────────────────

pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<WireEvent>(CONNECTION_BUFFER);
    state.connections.register(&connection_id, tx);
    info!(connection = %connection_id, "SSE connection opened");

    let stream = async_stream::stream! {
        let hello = WireEvent::new("connected", json!({ "connectionId": connection_id }));
        yield Ok(Event::default().data(hello.to_json()));
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().data(event.to_json()));
        }
        // Sender side gone: the registry entry was already dropped.
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─── Session endpoints ───────────────────────────────────────────────────────

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> JsonResult {
    let session = state.engine.sessions().create();
    state.engine.sessions().save(&session).map_err(internal)?;
    if let Some(conn) = body["connectionId"].as_str() {
        state.bind_session(&session.id, conn);
    }
    state.engine.approvals().load_session(Vec::new());
    state.todo_store.bind_session(&session.id).await;
    Ok(Json(serde_json::to_value(&session).map_err(internal)?))
}

pub async fn load_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> JsonResult {
    let Some(session_id) = body["sessionId"].as_str() else {
        return Err(bad_request("sessionId is required"));
    };
    let session = state
        .engine
        .sessions()
        .load(session_id)
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("session {session_id} not found")))?;

    if let Some(conn) = body["connectionId"].as_str() {
        state.bind_session(&session.id, conn);
    }
    state
        .engine
        .approvals()
        .load_session(session.always_approved.clone());
    state.todo_store.bind_session(&session.id).await;

    // Full todo list on load, so clients can render without polling.
    let todos = state.todo_store.items().await;
    state
        .deliver(
            &session.id,
            WireEvent::new("todos", serde_json::to_value(&todos).unwrap_or(Value::Null)),
        )
        .await;

    Ok(Json(serde_json::to_value(&session).map_err(internal)?))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let page = params
        .get("page")
        .and_then(|p| p.parse::<usize>().ok())
        .unwrap_or(0);
    let page_size = params
        .get("pageSize")
        .and_then(|p| p.parse::<usize>().ok())
        .unwrap_or(20);
    let query = params.get("q").map(String::as_str);
    let listing = state.engine.sessions().list(page, page_size, query);
    Json(serde_json::to_value(&listing).unwrap_or(Value::Null))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult {
    let deleted = state.engine.sessions().delete(&id).map_err(internal)?;
    if !deleted {
        return Err(not_found(format!("session {id} not found")));
    }
    state.unbind_session(&id);
    Ok(Json(json!({ "deleted": true })))
}

// ─── POST /message ───────────────────────────────────────────────────────────

pub async fn message(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> JsonResult {
    match body["type"].as_str().unwrap_or("") {
        "chat" => chat(state, body).await,
        "abort" => abort(state, body).await,
        "rollback" => rollback(state, body).await,
        "switch_agent" => switch_agent(state, body).await,
        "tool_confirmation_response" | "user_question_response" => respond(state, body).await,
        "image" => image(state, body).await,
        other => Err(bad_request(format!("unknown message type: {other}"))),
    }
}

async fn chat(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(session_id) = body["sessionId"].as_str().map(str::to_string) else {
        return Err(bad_request("sessionId is required"));
    };
    let Some(content) = body["content"].as_str().map(str::to_string) else {
        return Err(bad_request("content is required"));
    };
    if let Some(conn) = body["connectionId"].as_str() {
        state.bind_session(&session_id, conn);
    }

    let images = state
        .pending_images
        .lock()
        .expect("pending images")
        .remove(&session_id)
        .unwrap_or_default();

    let cancel = CancellationToken::new();
    state
        .running_turns
        .lock()
        .expect("running turns")
        .insert(session_id.clone(), cancel.clone());

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        run_chat_turn(task_state, session_id, content, images, cancel).await;
    });

    Ok(Json(json!({ "accepted": true })))
}

async fn run_chat_turn(
    state: Arc<AppState>,
    session_id: String,
    content: String,
    images: Vec<ImagePart>,
    cancel: CancellationToken,
) {
    // Turns on the same session serialize here.
    let lock = state.turn_lock(&session_id);
    let _guard = lock.lock().await;

    let mut session = match state.engine.sessions().load(&session_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            state
                .deliver(
                    &session_id,
                    WireEvent::new("error", json!({ "message": "session not found" })),
                )
                .await;
            return;
        }
        Err(e) => {
            state
                .deliver(
                    &session_id,
                    WireEvent::new("error", json!({ "message": e.to_string() })),
                )
                .await;
            return;
        }
    };
    state
        .engine
        .approvals()
        .load_session(session.always_approved.clone());
    state.todo_store.bind_session(&session.id).await;

    // A switched agent replaces the system prompt for this session.
    let active = state
        .active_agents
        .lock()
        .expect("active agents")
        .get(&session_id)
        .cloned();
    if let Some(agent_id) = active {
        if let Some(spec) = state.agents.iter().find(|a| a.id == agent_id) {
            match session.messages.first_mut() {
                Some(first) if first.role == snow_model::Role::System => {
                    first.content = spec.role_prompt.clone();
                }
                _ => {
                    session
                        .messages
                        .insert(0, Message::system(&spec.role_prompt));
                }
            }
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<EngineEvent>(CONNECTION_BUFFER);
    let forward_state = Arc::clone(&state);
    let forward_session = session_id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            forward_state
                .deliver(&forward_session, map_engine_event(event))
                .await;
        }
    });

    let user_message = if images.is_empty() {
        Message::user(&content)
    } else {
        Message::user_with_images(&content, images)
    };
    if let Err(e) = state
        .engine
        .run_turn(&mut session, user_message, &tx, cancel)
        .await
    {
        warn!(session = %session_id, "turn failed: {e}");
    }
    drop(tx);
    let _ = forwarder.await;

    state
        .running_turns
        .lock()
        .expect("running turns")
        .remove(&session_id);
}

async fn abort(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(session_id) = body["sessionId"].as_str() else {
        return Err(bad_request("sessionId is required"));
    };
    let token = state
        .running_turns
        .lock()
        .expect("running turns")
        .get(session_id)
        .cloned();
    match token {
        Some(token) => {
            token.cancel();
            Ok(Json(json!({ "aborted": true })))
        }
        None => Ok(Json(json!({ "aborted": false, "reason": "no running turn" }))),
    }
}

async fn rollback(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(session_id) = body["sessionId"].as_str() else {
        return Err(bad_request("sessionId is required"));
    };
    let Some(target) = body["messageIndex"].as_u64().map(|n| n as usize) else {
        return Err(bad_request("messageIndex is required"));
    };

    let mut session = state
        .engine
        .sessions()
        .load(session_id)
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("session {session_id} not found")))?;

    let rolled = state
        .engine
        .snapshots()
        .rollback(session_id, target)
        .map_err(internal)?;
    state
        .engine
        .sessions()
        .truncate(&mut session, target)
        .map_err(internal)?;

    let result = json!({
        "success": true,
        "filesRolledBack": rolled.len(),
        "files": rolled,
        "messageCount": session.messages.len(),
    });
    state
        .deliver(session_id, WireEvent::new("rollback_result", result.clone()))
        .await;
    Ok(Json(result))
}

async fn switch_agent(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(agent_id) = body["agentId"].as_str() else {
        return Err(bad_request("agentId is required"));
    };
    let session_id = body["sessionId"].as_str().unwrap_or_default().to_string();
    if !state.agents.iter().any(|a| a.id == agent_id) {
        return Err(not_found(format!("unknown agent: {agent_id}")));
    }
    state
        .active_agents
        .lock()
        .expect("active agents")
        .insert(session_id.clone(), agent_id.to_string());

    let agents: Vec<Value> = state
        .agents
        .iter()
        .map(|a| json!({ "id": a.id, "name": a.name }))
        .collect();
    state
        .deliver(
            &session_id,
            WireEvent::new("agent_switched", json!({ "agentId": agent_id })),
        )
        .await;
    state
        .deliver(
            &session_id,
            WireEvent::new(
                "agent_list",
                json!({
                    "agents": agents,
                    "running": state.engine.tracker().list(),
                }),
            ),
        )
        .await;
    Ok(Json(json!({ "agentId": agent_id })))
}

async fn respond(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(request_id) = body["requestId"].as_str() else {
        return Err(bad_request("requestId is required"));
    };
    let resolved = state.pending.resolve(request_id, body.clone());
    if !resolved {
        return Err(not_found(format!("no pending request {request_id}")));
    }
    Ok(Json(json!({ "resolved": true })))
}

async fn image(state: Arc<AppState>, body: Value) -> JsonResult {
    let Some(session_id) = body["sessionId"].as_str() else {
        return Err(bad_request("sessionId is required"));
    };
    let Some(data) = body["data"].as_str() else {
        return Err(bad_request("data (base64) is required"));
    };
    let mime = body["mimeType"].as_str().unwrap_or("image/png").to_string();
    let part = if data.starts_with("data:") {
        ImagePart {
            data_url: data.to_string(),
            mime_type: mime,
        }
    } else {
        ImagePart {
            data_url: format!("data:{mime};base64,{data}"),
            mime_type: mime,
        }
    };
    state
        .pending_images
        .lock()
        .expect("pending images")
        .entry(session_id.to_string())
        .or_default()
        .push(part);
    Ok(Json(json!({ "queued": true })))
}

// ─── POST /context/compress ──────────────────────────────────────────────────

pub async fn compress(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> JsonResult {
    let cancel = CancellationToken::new();

    if let Some(session_id) = body["sessionId"].as_str() {
        let lock = state.turn_lock(session_id);
        let _guard = lock.lock().await;
        let mut session = state
            .engine
            .sessions()
            .load(session_id)
            .map_err(internal)?
            .ok_or_else(|| not_found(format!("session {session_id} not found")))?;
        let outcome = state
            .engine
            .compress_session(&mut session, &cancel)
            .await
            .map_err(internal)?;
        return Ok(Json(json!({
            "outcome": format!("{outcome:?}"),
            "messageCount": session.messages.len(),
        })));
    }

    if let Some(messages) = body.get("messages") {
        let messages: Vec<Message> =
            serde_json::from_value(messages.clone()).map_err(|e| bad_request(e.to_string()))?;
        let mut session = Session::new("adhoc");
        session.messages = messages;
        state
            .engine
            .compress_session(&mut session, &cancel)
            .await
            .map_err(internal)?;
        return Ok(Json(json!({
            "messages": serde_json::to_value(&session.messages).map_err(internal)?,
        })));
    }

    Err(bad_request("either sessionId or messages is required"))
}

// ─── GET /session/rollback-points ────────────────────────────────────────────

pub async fn rollback_points(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult {
    let Some(session_id) = params.get("sessionId") else {
        return Err(bad_request("sessionId is required"));
    };
    let points = state.engine.snapshots().rollback_points(session_id);
    Ok(Json(json!({ "points": points })))
}

// ─── GET /health ─────────────────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.connections.count(),
        "runningAgents": state.engine.tracker().count(),
    }))
}
