// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the two durable aggregates. Interfaces live in
//! the domain layer and are implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `SessionRepository` | `Session` | `InMemorySessionRepository`, `SledSessionRepository` |
//! | `TaskRepository` | `Task` | `InMemoryTaskRepository`, `SledTaskRepository` |
//!
//! The backend is chosen at startup from `spec.sessions.storage`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::session::{Session, SessionId};
use crate::domain::task::{Task, TaskId, TaskStatus};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Save session (create or update)
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Session>, RepositoryError>;

    async fn delete(&self, id: SessionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Save task (create or update)
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    async fn find_by_session(&self, session_id: SessionId) -> Result<Vec<Task>, RepositoryError>;

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, RepositoryError>;

    /// Terminal tasks that finished before `cutoff`
    async fn find_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, RepositoryError>;

    async fn delete(&self, id: TaskId) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for RepositoryError {
    fn from(err: sled::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
