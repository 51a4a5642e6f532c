// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session aggregate: durable context that groups tasks across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Opaque context blob; hooks append to it, agents may read it.
    #[serde(default)]
    pub context: Value,
    pub status: SessionStatus,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            created_at: now,
            last_activity: now,
            context: Value::Object(Default::default()),
            status: SessionStatus::Active,
            task_ids: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        if self.status == SessionStatus::Paused {
            self.status = SessionStatus::Active;
        }
    }

    pub fn attach_task(&mut self, task_id: TaskId) {
        if !self.task_ids.contains(&task_id) {
            self.task_ids.push(task_id);
        }
        self.touch();
    }

    pub fn pause(&mut self) -> Result<(), DomainError> {
        if self.status != SessionStatus::Active {
            return Err(DomainError::transition(self.status, SessionStatus::Paused));
        }
        self.status = SessionStatus::Paused;
        Ok(())
    }

    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.status == SessionStatus::Archived {
            return Err(DomainError::transition(self.status, SessionStatus::Archived));
        }
        self.status = SessionStatus::Archived;
        Ok(())
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.status != SessionStatus::Archived && self.last_activity < cutoff
    }

    /// Appends `entry` under `key` in the context blob, creating the list on
    /// first use.
    pub fn append_context(&mut self, key: &str, entry: Value) {
        if !self.context.is_object() {
            self.context = Value::Object(Default::default());
        }
        if let Some(map) = self.context.as_object_mut() {
            let slot = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(items) => items.push(entry),
                other => *other = Value::Array(vec![other.take(), entry]),
            }
        }
        self.touch();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
