// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Aggregates, value objects and repository contracts. Nothing here spawns
//! tasks or performs I/O beyond configuration file loading.

pub mod agent;
pub mod config;
pub mod errors;
pub mod events;
pub mod hook;
pub mod mcp;
pub mod repository;
pub mod retry;
pub mod session;
pub mod status;
pub mod task;
