// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Catalog Types
//!
//! Agents are a closed set of named handlers declared in configuration.
//! [`AgentDescriptor`] is the declarative part loaded from YAML;
//! [`AgentRecord`] adds the runtime counters that only the execution queue
//! writes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const OUTCOME_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Orchestration,
    Architecture,
    Frontend,
    Backend,
    Data,
    Infrastructure,
    Security,
    Quality,
    Documentation,
    Integration,
    Specialist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Economy,
    #[default]
    Standard,
    Premium,
}

/// How the orchestrator executes tasks for an agent when no handler was
/// bound programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Spawn `program` with the task JSON on stdin; stdout JSON is the result.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
    },
    /// Return the payload unchanged.
    Echo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique, stable agent name (e.g. `backend-services`)
    pub name: String,

    pub category: AgentCategory,

    #[serde(default)]
    pub cost_tier: CostTier,

    /// Maximum concurrent executions
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Bound of the agent's pending queue (queued tasks, not running ones)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Slash-command names that resolve to this agent
    #[serde(default)]
    pub commands: Vec<String>,

    /// Per-task execution timeout override
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<Duration>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerSpec>,
}

fn default_max_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, category: AgentCategory, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            category,
            cost_tier: CostTier::Standard,
            max_concurrency,
            queue_capacity: None,
            commands: Vec::new(),
            execution_timeout: None,
            enabled: true,
            description: None,
            handler: None,
        }
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_handler(mut self, handler: HandlerSpec) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// Catalog entry plus runtime load counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub descriptor: AgentDescriptor,
    pub in_flight: usize,
    pub succeeded: u64,
    pub failed: u64,
    /// Mean execution time over all finished attempts
    pub avg_duration_ms: f64,
    #[serde(skip)]
    recent: VecDeque<bool>,
}

impl AgentRecord {
    pub fn new(descriptor: AgentDescriptor) -> Self {
        Self {
            descriptor,
            in_flight: 0,
            succeeded: 0,
            failed: 0,
            avg_duration_ms: 0.0,
            recent: VecDeque::with_capacity(OUTCOME_WINDOW),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.descriptor.max_concurrency
    }

    pub(crate) fn begin(&mut self) {
        self.in_flight += 1;
    }

    pub(crate) fn finish(&mut self, success: bool, duration: Duration) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let total = (self.succeeded + self.failed) as f64;
        let sample = duration.as_secs_f64() * 1000.0;
        self.avg_duration_ms += (sample - self.avg_duration_ms) / total;

        if self.recent.len() == OUTCOME_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(success);
    }

    /// Success ratio over the most recent attempts; 1.0 before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 1.0;
        }
        let ok = self.recent.iter().filter(|s| **s).count();
        ok as f64 / self.recent.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_yaml_defaults() {
        let yaml = r#"
name: backend
category: backend
commands: ["api", "backend"]
execution_timeout: 90s
handler:
  type: command
  program: ./agents/backend.sh
"#;
        let descriptor: AgentDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(descriptor.max_concurrency, 1);
        assert_eq!(descriptor.cost_tier, CostTier::Standard);
        assert!(descriptor.enabled);
        assert_eq!(descriptor.execution_timeout, Some(Duration::from_secs(90)));
        assert!(matches!(descriptor.handler, Some(HandlerSpec::Command { .. })));
    }

    #[test]
    fn test_record_rolling_counters() {
        let mut record = AgentRecord::new(AgentDescriptor::new("qa", AgentCategory::Quality, 2));
        record.begin();
        record.begin();
        assert!(!record.has_capacity());

        record.finish(true, Duration::from_millis(100));
        record.finish(false, Duration::from_millis(300));
        assert_eq!(record.in_flight, 0);
        assert_eq!(record.succeeded, 1);
        assert_eq!(record.failed, 1);
        assert!((record.avg_duration_ms - 200.0).abs() < 1e-6);
        assert!((record.success_rate() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_success_rate_window_forgets_old_outcomes() {
        let mut record = AgentRecord::new(AgentDescriptor::new("qa", AgentCategory::Quality, 1));
        for _ in 0..OUTCOME_WINDOW {
            record.begin();
            record.finish(false, Duration::ZERO);
        }
        for _ in 0..OUTCOME_WINDOW {
            record.begin();
            record.finish(true, Duration::ZERO);
        }
        assert_eq!(record.success_rate(), 1.0);
        assert_eq!(record.failed, OUTCOME_WINDOW as u64);
    }
}
