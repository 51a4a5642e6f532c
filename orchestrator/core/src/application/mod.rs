// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatcher;
pub mod handler;
pub mod hook_engine;
pub mod mcp_gateway;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod session_store;
pub mod status_aggregator;

pub use dispatcher::{TaskDispatcher, TaskRequest};
pub use handler::{AgentHandler, TaskContext};
pub use orchestrator::Orchestrator;
pub use queue::TaskHandle;
