// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Immutable aggregate status published by the status aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::CostTier;
use crate::domain::mcp::ConnectionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLoad {
    pub name: String,
    pub queued: usize,
    pub running: usize,
    pub max_concurrency: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub cost_tier: CostTier,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookHealth {
    pub name: String,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
}

/// Chain outcomes observed since the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTally {
    pub completed: u64,
    pub partially_failed: u64,
    pub aborted: u64,
}

impl ChainTally {
    pub fn total(&self) -> u64 {
        self.completed + self.partially_failed + self.aborted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpHealth {
    pub name: String,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_ok_ping: Option<DateTime<Utc>>,
    pub tool_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Strictly increasing per aggregator
    pub sequence: u64,
    /// Strictly increasing per aggregator
    pub generated_at: DateTime<Utc>,
    pub agents: Vec<AgentLoad>,
    pub hooks: Vec<HookHealth>,
    pub chains: ChainTally,
    pub mcp: Vec<McpHealth>,
    /// The tick that produced this snapshot ran late
    pub degraded: bool,
}

impl StatusSnapshot {
    pub fn total_queued(&self) -> usize {
        self.agents.iter().map(|a| a.queued).sum()
    }

    pub fn total_running(&self) -> usize {
        self.agents.iter().map(|a| a.running).sum()
    }

    pub fn agent(&self, name: &str) -> Option<&AgentLoad> {
        self.agents.iter().find(|a| a.name == name)
    }
}
