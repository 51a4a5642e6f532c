// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sled-backed repositories
//!
//! Records are stored as JSON under their UUID bytes. Tasks keep a secondary
//! index tree (`session_tasks`) keyed by `session_id ++ task_id` so session
//! recovery does not scan every task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::domain::repository::{RepositoryError, SessionRepository, TaskRepository};
use crate::domain::session::{Session, SessionId};
use crate::domain::task::{Task, TaskId, TaskStatus};

const SESSIONS_TREE: &str = "sessions";
const TASKS_TREE: &str = "tasks";
const SESSION_TASKS_TREE: &str = "session_tasks";

/// Open (or create) the embedded database under `dir`.
pub fn open_sled(dir: impl AsRef<Path>) -> Result<sled::Db, RepositoryError> {
    Ok(sled::open(dir)?)
}

#[derive(Clone)]
pub struct SledSessionRepository {
    tree: sled::Tree,
}

impl SledSessionRepository {
    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            tree: db.open_tree(SESSIONS_TREE)?,
        })
    }
}

#[async_trait]
impl SessionRepository for SledSessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(session)?;
        self.tree.insert(session.id.0.as_bytes(), bytes)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        match self.tree.get(id.0.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<Session>, RepositoryError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<Session, RepositoryError> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }

    async fn delete(&self, id: SessionId) -> Result<(), RepositoryError> {
        self.tree.remove(id.0.as_bytes())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SledTaskRepository {
    tasks: sled::Tree,
    by_session: sled::Tree,
}

impl SledTaskRepository {
    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            tasks: db.open_tree(TASKS_TREE)?,
            by_session: db.open_tree(SESSION_TASKS_TREE)?,
        })
    }

    fn index_key(session_id: SessionId, task_id: TaskId) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(session_id.0.as_bytes());
        key.extend_from_slice(task_id.0.as_bytes());
        key
    }

    fn decode_all(&self) -> Result<Vec<Task>, RepositoryError> {
        self.tasks
            .iter()
            .values()
            .map(|value| -> Result<Task, RepositoryError> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }
}

#[async_trait]
impl TaskRepository for SledTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(task)?;
        self.tasks.insert(task.id.0.as_bytes(), bytes)?;
        if let Some(session_id) = task.session_id {
            self.by_session
                .insert(Self::index_key(session_id, task.id), task.id.0.as_bytes())?;
        }
        self.tasks.flush_async().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        match self.tasks.get(id.0.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_session(&self, session_id: SessionId) -> Result<Vec<Task>, RepositoryError> {
        let mut found = Vec::new();
        for entry in self.by_session.scan_prefix(session_id.0.as_bytes()) {
            let (_, task_key) = entry?;
            if let Some(bytes) = self.tasks.get(&task_key)? {
                found.push(serde_json::from_slice::<Task>(&bytes)?);
            }
        }
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, RepositoryError> {
        Ok(self
            .decode_all()?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    async fn find_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, RepositoryError> {
        Ok(self
            .decode_all()?
            .into_iter()
            .filter(|t| t.status.is_terminal() && t.finished_at.is_some_and(|f| f < cutoff))
            .collect())
    }

    async fn delete(&self, id: TaskId) -> Result<(), RepositoryError> {
        if let Some(bytes) = self.tasks.remove(id.0.as_bytes())? {
            let task: Task = serde_json::from_slice(&bytes)?;
            if let Some(session_id) = task.session_id {
                self.by_session.remove(Self::index_key(session_id, id))?;
            }
        }
        Ok(())
    }
}
