// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registry
//!
//! Catalog of named agents with their concurrency limits, slash-command
//! table and bound handlers. The descriptor set is loaded at startup and may
//! be replaced by a hot reload; agents are never removed, only disabled.
//!
//! Runtime counters on each [`AgentRecord`] are written exclusively by the
//! execution queue through the crate-private `record_*` methods.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::handler::AgentHandler;
use crate::domain::agent::{AgentDescriptor, AgentRecord};

/// How a dispatcher target was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Agent(String),
    Command { command: String, agent: String },
}

impl Resolution {
    pub fn agent(&self) -> &str {
        match self {
            Self::Agent(agent) => agent,
            Self::Command { agent, .. } => agent,
        }
    }
}

#[derive(Default)]
struct Catalog {
    records: HashMap<String, AgentRecord>,
    commands: HashMap<String, String>,
}

pub struct AgentRegistry {
    catalog: RwLock<Catalog>,
    handlers: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl AgentRegistry {
    pub fn new(descriptors: Vec<AgentDescriptor>) -> Self {
        let registry = Self {
            catalog: RwLock::new(Catalog::default()),
            handlers: RwLock::new(HashMap::new()),
        };
        registry.apply(descriptors);
        registry
    }

    /// Merge a descriptor set into the catalog. New agents are added,
    /// existing ones keep their counters and take the new descriptor, agents
    /// missing from `descriptors` are disabled. Returns the names of newly
    /// added agents.
    pub fn apply(&self, descriptors: Vec<AgentDescriptor>) -> Vec<String> {
        let mut catalog = self.catalog.write();
        let mut added = Vec::new();
        let mut seen = Vec::with_capacity(descriptors.len());

        catalog.commands.clear();
        for mut descriptor in descriptors {
            let key = normalize(&descriptor.name);
            descriptor.name = key.clone();
            for command in &descriptor.commands {
                let command = normalize(command.trim_start_matches('/'));
                if let Some(previous) = catalog.commands.insert(command.clone(), key.clone()) {
                    warn!(command = %command, previous = %previous, agent = %key, "Command remapped");
                }
            }
            match catalog.records.get_mut(&key) {
                Some(record) => record.descriptor = descriptor,
                None => {
                    info!(agent = %key, "Registered agent");
                    catalog.records.insert(key.clone(), AgentRecord::new(descriptor));
                    added.push(key.clone());
                }
            }
            seen.push(key);
        }

        for (name, record) in catalog.records.iter_mut() {
            if !seen.contains(name) && record.descriptor.enabled {
                info!(agent = %name, "Agent no longer configured; disabling");
                record.descriptor.enabled = false;
            }
        }
        added
    }

    /// Bind a programmatic handler, overriding any configured handler spec.
    pub fn bind_handler(&self, agent: &str, handler: Arc<dyn AgentHandler>) {
        self.handlers.write().insert(normalize(agent), handler);
    }

    pub fn handler(&self, agent: &str) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.read().get(&normalize(agent)).cloned()
    }

    /// Exact match against agent names, then against the command table.
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        let key = normalize(name);
        let catalog = self.catalog.read();
        if catalog.records.contains_key(&key) {
            return Some(Resolution::Agent(key));
        }
        catalog.commands.get(&key).map(|agent| Resolution::Command {
            command: key.clone(),
            agent: agent.clone(),
        })
    }

    pub fn resolve_command(&self, command: &str) -> Option<String> {
        let key = normalize(command.trim_start_matches('/'));
        self.catalog.read().commands.get(&key).cloned()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.catalog.read().records.contains_key(&normalize(agent))
    }

    pub fn descriptor(&self, agent: &str) -> Option<AgentDescriptor> {
        self.catalog
            .read()
            .records
            .get(&normalize(agent))
            .map(|r| r.descriptor.clone())
    }

    pub fn record(&self, agent: &str) -> Option<AgentRecord> {
        self.catalog.read().records.get(&normalize(agent)).cloned()
    }

    /// Copies of every record, sorted by name.
    pub fn records(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.catalog.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        records
    }

    pub fn names(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.descriptor.name).collect()
    }

    pub fn set_enabled(&self, agent: &str, enabled: bool) -> bool {
        match self.catalog.write().records.get_mut(&normalize(agent)) {
            Some(record) => {
                record.descriptor.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_start(&self, agent: &str) {
        if let Some(record) = self.catalog.write().records.get_mut(agent) {
            record.begin();
        }
    }

    pub(crate) fn record_finish(&self, agent: &str, success: bool, duration: Duration) {
        if let Some(record) = self.catalog.write().records.get_mut(agent) {
            record.finish(success, duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentCategory;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(vec![
            AgentDescriptor::new("Backend", AgentCategory::Backend, 2).with_commands(["/api", "Services"]),
            AgentDescriptor::new("qa", AgentCategory::Quality, 1).with_commands(["test"]),
        ])
    }

    #[test]
    fn test_resolution_is_exact_and_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.resolve("backend"), Some(Resolution::Agent("backend".into())));
        assert_eq!(registry.resolve(" BACKEND "), Some(Resolution::Agent("backend".into())));
        assert_eq!(registry.resolve("api").map(|r| r.agent().to_string()), Some("backend".into()));
        assert_eq!(registry.resolve_command("/services"), Some("backend".into()));
        assert_eq!(registry.resolve("back"), None);
        assert_eq!(registry.resolve("tests"), None);
    }

    #[test]
    fn test_apply_keeps_counters_and_disables_missing() {
        let registry = registry();
        registry.record_start("backend");
        registry.record_finish("backend", true, Duration::from_millis(10));

        let added = registry.apply(vec![
            AgentDescriptor::new("backend", AgentCategory::Backend, 4),
            AgentDescriptor::new("docs", AgentCategory::Documentation, 1),
        ]);
        assert_eq!(added, vec!["docs".to_string()]);

        let backend = registry.record("backend").unwrap();
        assert_eq!(backend.succeeded, 1);
        assert_eq!(backend.descriptor.max_concurrency, 4);
        assert!(!registry.record("qa").unwrap().descriptor.enabled);
        assert_eq!(registry.resolve("api"), None);
    }

    #[test]
    fn test_records_sorted() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["backend".to_string(), "qa".to_string()]);
    }
}
