// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Store
//!
//! Durable session and task state on top of the repository traits.
//!
//! ## Write serialization
//!
//! Every mutation of a session happens under that session's async mutex, so
//! two writers to the same session never interleave while different
//! sessions proceed concurrently.
//!
//! ## Restart recovery
//!
//! The first time a session is touched in a process, tasks persisted as
//! `running` by a previous process are reclassified `interrupted` and then,
//! per [`RecoveryPolicy`], re-queued once or failed. Re-queued tasks are
//! parked until the orchestrator drains them with
//! [`SessionStore::take_pending_requeues`]; nothing is ever resumed as
//! `running`.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::domain::config::{RecoveryPolicy, SessionConfig};
use crate::domain::errors::{DomainError, ErrorKind};
use crate::domain::events::{EventKind, LifecycleEvent};
use crate::domain::repository::{RepositoryError, SessionRepository, TaskRepository};
use crate::domain::session::{Session, SessionId, SessionStatus};
use crate::domain::task::{Task, TaskFailure, TaskId, TaskStatus};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::repositories::{InMemorySessionRepository, InMemoryTaskRepository};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {0} is archived")]
    Archived(SessionId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::SessionNotFound,
            Self::Archived(_) => ErrorKind::Terminal,
            Self::Repository(_) | Self::Domain(_) => ErrorKind::Internal,
        }
    }
}

/// Result of restart recovery for one session.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

pub struct SessionStore {
    sessions: Arc<dyn SessionRepository>,
    tasks: Arc<dyn TaskRepository>,
    bus: EventBus,
    config: SessionConfig,
    locks: DashMap<SessionId, Arc<tokio::sync::Mutex<()>>>,
    recovered: DashSet<SessionId>,
    pending_requeue: Mutex<Vec<Task>>,
}

impl SessionStore {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        tasks: Arc<dyn TaskRepository>,
        bus: EventBus,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            tasks,
            bus,
            config,
            locks: DashMap::new(),
            recovered: DashSet::new(),
            pending_requeue: Mutex::new(Vec::new()),
        }
    }

    pub fn in_memory(bus: EventBus, config: SessionConfig) -> Self {
        Self::new(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(InMemoryTaskRepository::new()),
            bus,
            config,
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn lock(&self, id: SessionId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn fetch(&self, id: SessionId) -> Result<Session, SessionError> {
        self.sessions
            .find_by_id(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn create(&self) -> Result<Session, SessionError> {
        let session = Session::new();
        self.sessions.save(&session).await?;
        // nothing from a previous process can belong to a fresh session
        self.recovered.insert(session.id);
        info!(session_id = %session.id, "Session created");
        self.bus
            .publish(LifecycleEvent::session(EventKind::SessionStarted, session.id));
        Ok(session)
    }

    /// Load a session, running restart recovery on first access.
    pub async fn load(&self, id: SessionId) -> Result<Session, SessionError> {
        let _guard = self.lock(id).await;
        let session = self.fetch(id).await?;
        self.ensure_recovered(&session).await?;
        Ok(session)
    }

    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let _guard = self.lock(session.id).await;
        let mut session = session.clone();
        session.last_activity = Utc::now();
        self.sessions.save(&session).await?;
        Ok(())
    }

    pub async fn archive(&self, id: SessionId) -> Result<Session, SessionError> {
        let session = {
            let _guard = self.lock(id).await;
            let mut session = self.fetch(id).await?;
            if session.status == SessionStatus::Archived {
                return Err(SessionError::Archived(id));
            }
            session.archive()?;
            self.sessions.save(&session).await?;
            session
        };
        info!(session_id = %id, "Session archived");
        self.bus.publish(LifecycleEvent::session(EventKind::SessionArchived, id));
        Ok(session)
    }

    pub async fn attach_task(&self, id: SessionId, task_id: TaskId) -> Result<(), SessionError> {
        let _guard = self.lock(id).await;
        let mut session = self.fetch(id).await?;
        if session.status == SessionStatus::Archived {
            return Err(SessionError::Archived(id));
        }
        self.ensure_recovered(&session).await?;
        session.attach_task(task_id);
        self.sessions.save(&session).await?;
        Ok(())
    }

    /// Mark activity so the janitor does not archive the session as idle.
    pub async fn touch(&self, id: SessionId) -> Result<Session, SessionError> {
        let _guard = self.lock(id).await;
        let mut session = self.fetch(id).await?;
        if session.status == SessionStatus::Archived {
            return Err(SessionError::Archived(id));
        }
        session.touch();
        self.sessions.save(&session).await?;
        Ok(session)
    }

    pub async fn update_context(
        &self,
        id: SessionId,
        key: &str,
        entry: serde_json::Value,
    ) -> Result<(), SessionError> {
        let _guard = self.lock(id).await;
        let mut session = self.fetch(id).await?;
        session.append_context(key, entry);
        self.sessions.save(&session).await?;
        Ok(())
    }

    /// Persist a task record and bump its session's activity time.
    pub async fn record_task(&self, task: &Task) -> Result<(), SessionError> {
        self.tasks.save(task).await?;
        if let Some(session_id) = task.session_id {
            let _guard = self.lock(session_id).await;
            if let Some(mut session) = self.sessions.find_by_id(session_id).await? {
                session.touch();
                self.sessions.save(&session).await?;
            }
        }
        Ok(())
    }

    pub async fn find_task(&self, id: TaskId) -> Result<Option<Task>, SessionError> {
        Ok(self.tasks.find_by_id(id).await?)
    }

    pub async fn session_tasks(&self, id: SessionId) -> Result<Vec<Task>, SessionError> {
        Ok(self.tasks.find_by_session(id).await?)
    }

    pub async fn interrupted_tasks(&self, id: SessionId) -> Result<Vec<Task>, SessionError> {
        Ok(self
            .tasks
            .find_by_session(id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Interrupted)
            .collect())
    }

    /// Tasks re-queued by recovery since the last call.
    pub fn take_pending_requeues(&self) -> Vec<Task> {
        std::mem::take(&mut *self.pending_requeue.lock())
    }

    async fn ensure_recovered(&self, session: &Session) -> Result<RecoveryReport, SessionError> {
        if !self.recovered.insert(session.id) {
            return Ok(RecoveryReport::default());
        }
        let tasks = self.tasks.find_by_session(session.id).await?;
        let report = self.recover_tasks(tasks).await?;
        if !report.is_empty() {
            info!(
                session_id = %session.id,
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Recovered session after restart"
            );
        }
        Ok(report)
    }

    async fn recover_tasks(&self, tasks: Vec<Task>) -> Result<RecoveryReport, SessionError> {
        let mut report = RecoveryReport::default();
        for mut task in tasks {
            match task.status {
                TaskStatus::Running => task.interrupt()?,
                TaskStatus::Interrupted => {}
                _ => continue,
            }
            // the interrupted state is persisted before it is resolved
            self.tasks.save(&task).await?;

            let requeue = self.config.recovery == RecoveryPolicy::RequeueOnce && !task.recovered;
            if requeue {
                task.recover()?;
                self.tasks.save(&task).await?;
                report.requeued.push(task.id);
                self.pending_requeue.lock().push(task);
            } else {
                warn!(task_id = %task.id, agent = %task.agent, "Interrupted task surfaced as failed");
                task.fail(TaskFailure::new(
                    ErrorKind::Interrupted,
                    "task was running when the process stopped",
                ))?;
                self.tasks.save(&task).await?;
                report.failed.push(task.id);
            }
        }
        Ok(report)
    }

    /// Startup pass: recover every live session plus session-less tasks.
    pub async fn recover_all(&self) -> Result<RecoveryReport, SessionError> {
        let mut total = RecoveryReport::default();
        for session in self.sessions.list_all().await? {
            if session.status == SessionStatus::Archived {
                continue;
            }
            let _guard = self.lock(session.id).await;
            let report = self.ensure_recovered(&session).await?;
            total.requeued.extend(report.requeued);
            total.failed.extend(report.failed);
        }

        let mut orphans = self.tasks.find_by_status(TaskStatus::Running).await?;
        orphans.extend(self.tasks.find_by_status(TaskStatus::Interrupted).await?);
        orphans.retain(|t| t.session_id.is_none());
        let report = self.recover_tasks(orphans).await?;
        total.requeued.extend(report.requeued);
        total.failed.extend(report.failed);
        Ok(total)
    }

    /// Archive sessions idle longer than the inactivity timeout.
    pub async fn archive_inactive(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let timeout = chrono::Duration::from_std(self.config.inactivity_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = now - timeout;
        let mut archived = 0;
        for session in self.sessions.list_all().await? {
            if session.is_idle_since(cutoff) {
                match self.archive(session.id).await {
                    Ok(_) => archived += 1,
                    Err(e) => warn!(session_id = %session.id, error = %e, "Failed to archive idle session"),
                }
            }
        }
        Ok(archived)
    }

    /// Delete finished tasks and archived sessions older than the audit window.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let retention = chrono::Duration::from_std(self.config.audit_retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let cutoff = now - retention;
        let mut purged = 0;

        for task in self.tasks.find_finished_before(cutoff).await? {
            self.tasks.delete(task.id).await?;
            purged += 1;
        }
        for session in self.sessions.list_all().await? {
            if session.status == SessionStatus::Archived && session.last_activity < cutoff {
                self.sessions.delete(session.id).await?;
                self.locks.remove(&session.id);
                self.recovered.remove(&session.id);
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, "Purged expired session records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Priority;
    use serde_json::json;

    fn store(policy: RecoveryPolicy) -> (SessionStore, Arc<InMemoryTaskRepository>, Arc<InMemorySessionRepository>) {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let sessions = Arc::new(InMemorySessionRepository::new());
        let config = SessionConfig {
            recovery: policy,
            ..SessionConfig::default()
        };
        let store = SessionStore::new(sessions.clone(), tasks.clone(), EventBus::new(16), config);
        (store, tasks, sessions)
    }

    async fn seed_running(
        sessions: &InMemorySessionRepository,
        tasks: &InMemoryTaskRepository,
    ) -> (Session, Task) {
        let session = Session::new();
        sessions.save(&session).await.unwrap();
        let mut task = Task::new("backend", json!({}), Priority::Normal).with_session(session.id);
        task.start().unwrap();
        tasks.save(&task).await.unwrap();
        (session, task)
    }

    #[tokio::test]
    async fn test_load_unknown_session() {
        let (store, _, _) = store(RecoveryPolicy::RequeueOnce);
        let err = store.load(SessionId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_running_task_requeued_once_on_first_load() {
        let (store, tasks, sessions) = store(RecoveryPolicy::RequeueOnce);
        let (session, task) = seed_running(&sessions, &tasks).await;

        store.load(session.id).await.unwrap();
        let requeued = store.take_pending_requeues();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].status, TaskStatus::Queued);
        assert!(requeued[0].recovered);

        let persisted = tasks.find_by_id(task.id).await.unwrap().unwrap();
        assert_ne!(persisted.status, TaskStatus::Running);

        // second load is a no-op
        store.load(session.id).await.unwrap();
        assert!(store.take_pending_requeues().is_empty());
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_interrupted_failure() {
        let (store, tasks, sessions) = store(RecoveryPolicy::Fail);
        let (session, task) = seed_running(&sessions, &tasks).await;

        store.load(session.id).await.unwrap();
        assert!(store.take_pending_requeues().is_empty());

        let persisted = tasks.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, TaskStatus::Failed);
        assert_eq!(persisted.last_error.unwrap().kind, ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_archive_and_attach() {
        let (store, _, _) = store(RecoveryPolicy::RequeueOnce);
        let session = store.create().await.unwrap();
        store.attach_task(session.id, TaskId::new()).await.unwrap();
        store.archive(session.id).await.unwrap();

        let err = store.attach_task(session.id, TaskId::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Archived(_)));
        assert!(matches!(store.archive(session.id).await, Err(SessionError::Archived(_))));
        assert!(matches!(store.touch(session.id).await, Err(SessionError::Archived(_))));
        assert_eq!(store.load(session.id).await.unwrap().task_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_touch_moves_last_activity_forward() {
        let (store, _, _) = store(RecoveryPolicy::RequeueOnce);
        let session = store.create().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let touched = store.touch(session.id).await.unwrap();
        assert!(touched.last_activity > session.last_activity);
    }

    #[tokio::test]
    async fn test_archive_inactive_and_purge() {
        let (store, tasks, sessions) = store(RecoveryPolicy::RequeueOnce);
        let session = store.create().await.unwrap();
        let mut done = Task::new("backend", json!({}), Priority::Normal).with_session(session.id);
        done.start().unwrap();
        done.complete(json!(null)).unwrap();
        tasks.save(&done).await.unwrap();

        let far_future = Utc::now() + chrono::Duration::days(30);
        assert_eq!(store.archive_inactive(far_future).await.unwrap(), 1);
        assert_eq!(
            sessions.find_by_id(session.id).await.unwrap().unwrap().status,
            SessionStatus::Archived
        );

        let purged = store.purge_expired(far_future).await.unwrap();
        assert_eq!(purged, 2);
        assert!(sessions.find_by_id(session.id).await.unwrap().is_none());
        assert!(tasks.find_by_id(done.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_context_updates_are_serialized() {
        let (store, _, _) = store(RecoveryPolicy::RequeueOnce);
        let store = Arc::new(store);
        let session = store.create().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update_context(session.id, "notes", json!(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let loaded = store.load(session.id).await.unwrap();
        assert_eq!(loaded.context["notes"].as_array().unwrap().len(), 20);
    }
}
