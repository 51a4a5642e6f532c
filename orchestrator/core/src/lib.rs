// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cadence core
//!
//! Agent orchestration runtime: task dispatch onto bounded per-agent queues,
//! lifecycle hook chains, an MCP tool gateway, periodic status snapshots and
//! restart-tolerant sessions.
//!
//! # Architecture
//!
//! - **domain:** entities, state machines, configuration, repository traits
//! - **application:** the runtime components and their wiring
//! - **infrastructure:** event bus, storage, process and HTTP adapters
//! - **presentation:** HTTP API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
