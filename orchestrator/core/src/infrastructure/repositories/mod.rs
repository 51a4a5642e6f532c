// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## Sled Repositories
//!
//! Durable, embedded key/value storage (one `sled::Db`, one tree per
//! aggregate):
//! - **SledSessionRepository** - Session persistence across restarts
//! - **SledTaskRepository** - Task records for recovery and audit
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and development:
//! - **InMemorySessionRepository** - HashMap-backed session storage
//! - **InMemoryTaskRepository** - HashMap-backed task storage

pub mod sled_store;

pub use sled_store::{open_sled, SledSessionRepository, SledTaskRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{RepositoryError, SessionRepository, TaskRepository};
use crate::domain::session::{Session, SessionId};
use crate::domain::task::{Task, TaskId, TaskStatus};

#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(self.sessions.read().values().cloned().collect())
    }

    async fn delete(&self, id: SessionId) -> Result<(), RepositoryError> {
        self.sessions.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        self.tasks.write().insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn find_by_session(&self, session_id: SessionId) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.session_id == Some(session_id))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        Ok(tasks.values().filter(|t| t.status == status).cloned().collect())
    }

    async fn find_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        Ok(tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.finished_at.is_some_and(|f| f < cutoff))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: TaskId) -> Result<(), RepositoryError> {
        self.tasks.write().remove(&id);
        Ok(())
    }
}
