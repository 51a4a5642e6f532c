// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent handler seam: the code that actually performs a task.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::session::SessionId;
use crate::domain::task::{TaskError, TaskId};

/// Everything a handler gets to see about one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub agent: String,
    pub payload: Value,
    /// 1 for the first attempt
    pub attempt: u32,
    pub session_id: Option<SessionId>,
    /// Cancelled when the task is cancelled or the orchestrator shuts down.
    /// Handlers check it at their own safe points.
    pub cancellation: CancellationToken,
}

#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError>;
}

/// Returns the payload unchanged.
pub struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        Ok(ctx.payload)
    }
}

/// Adapts a closure returning a boxed future.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> AgentHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync,
{
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        (self.0)(ctx).await
    }
}
