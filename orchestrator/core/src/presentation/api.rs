// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! JSON over HTTP plus one Server-Sent Events stream for status snapshots.
//! Every error body has the shape {"error": {"kind": ..., "message": ...}}
//! where `kind` is the machine-readable ErrorKind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::trace::TraceLayer;

use crate::application::dispatcher::{DispatchError, TaskRequest};
use crate::application::orchestrator::Orchestrator;
use crate::application::queue::QueueError;
use crate::application::session_store::SessionError;
use crate::domain::errors::ErrorKind;
use crate::domain::mcp::McpError;
use crate::domain::session::SessionId;
use crate::domain::task::TaskId;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = match kind {
            ErrorKind::UnknownAgent | ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorKind::AgentDisabled | ErrorKind::CapacityExceeded => StatusCode::CONFLICT,
            ErrorKind::Backpressure => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ToolDenied => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ServerDegraded | ErrorKind::ServerUnreachable | ErrorKind::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Terminal => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, kind, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Terminal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "kind": self.kind, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Session(e) => e.into(),
            other => Self::from_kind(other.kind(), other.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Archived(_) => Self::new(StatusCode::CONFLICT, e.kind(), e.to_string()),
            other => Self::from_kind(other.kind(), other.to_string()),
        }
    }
}

impl From<McpError> for ApiError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::UnknownServer(_) => Self::new(StatusCode::NOT_FOUND, e.kind(), e.to_string()),
            McpError::Protocol { .. } | McpError::Transport(_) => {
                Self::new(StatusCode::BAD_GATEWAY, e.kind(), e.to_string())
            }
            other => Self::from_kind(other.kind(), other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::TaskNotFound(_) => Self::new(StatusCode::NOT_FOUND, e.kind(), e.to_string()),
            other => Self::from_kind(other.kind(), other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn task_id(raw: &str) -> ApiResult<TaskId> {
    TaskId::parse(raw).map_err(|_| ApiError::bad_request(format!("invalid task id '{}'", raw)))
}

fn session_id(raw: &str) -> ApiResult<SessionId> {
    SessionId::parse(raw).map_err(|_| ApiError::bad_request(format!("invalid session id '{}'", raw)))
}

pub fn app(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/agents", get(list_agents_handler))
        .route("/v1/tasks", post(submit_task_handler))
        .route("/v1/tasks/{id}", get(get_task_handler))
        .route("/v1/tasks/{id}/cancel", post(cancel_task_handler))
        .route("/v1/status", get(status_handler))
        .route("/v1/status/stream", get(status_stream_handler))
        .route("/v1/mcp/{server}/tools/{tool}", post(invoke_tool_handler))
        .route("/v1/mcp/{server}/health", get(mcp_health_handler))
        .route("/v1/sessions", post(create_session_handler))
        .route("/v1/sessions/{id}", get(get_session_handler))
        .route("/v1/sessions/{id}/archive", post(archive_session_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn health_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    Json(json!({
        "status": if orchestrator.queue().is_accepting() { "healthy" } else { "draining" },
        "agents": orchestrator.registry().names().len(),
    }))
}

async fn list_agents_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    Json(json!(orchestrator.registry().records()))
}

async fn submit_task_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let handle = orchestrator.dispatcher().submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": handle.id,
            "agent": handle.agent,
            "status": handle.status(),
        })),
    ))
}

async fn get_task_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = task_id(&id)?;
    let task = orchestrator
        .queue()
        .get(id)
        .await
        .ok_or(QueueError::TaskNotFound(id))?;
    Ok(Json(json!(task)))
}

async fn cancel_task_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = task_id(&id)?;
    let status = orchestrator.queue().cancel(id).await?;
    Ok(Json(json!({ "task_id": id, "status": status })))
}

async fn status_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    let snapshot = orchestrator
        .status()
        .latest()
        .unwrap_or_else(|| orchestrator.status().tick(false));
    Json(json!(*snapshot))
}

async fn status_stream_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(orchestrator.status().subscribe()).map(|snapshot| {
        let event = Event::default()
            .event("status")
            .id(snapshot.sequence.to_string())
            .data(serde_json::to_string(&*snapshot).unwrap_or_default());
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct InvokeToolRequest {
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn invoke_tool_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((server, tool)): Path<(String, String)>,
    Json(request): Json<InvokeToolRequest>,
) -> ApiResult<Json<Value>> {
    let timeout = request.timeout_ms.map(Duration::from_millis);
    let result = orchestrator
        .gateway()
        .invoke(&server, &tool, request.arguments, timeout)
        .await?;
    Ok(Json(json!({ "server": server, "tool": tool, "result": result })))
}

async fn mcp_health_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(server): Path<String>,
) -> ApiResult<Json<Value>> {
    let connection = orchestrator.gateway().health(&server)?;
    Ok(Json(json!(connection)))
}

async fn create_session_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let session = orchestrator.open_session().await?;
    Ok((StatusCode::CREATED, Json(json!(session))))
}

async fn get_session_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let session = orchestrator.load_session(id).await?;
    let tasks = orchestrator.store().session_tasks(id).await?;
    Ok(Json(json!({ "session": session, "tasks": tasks })))
}

async fn archive_session_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = orchestrator.store().archive(session_id(&id)?).await?;
    Ok(Json(json!(session)))
}
