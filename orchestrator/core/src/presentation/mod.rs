// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`cadence-core`)
//!
//! HTTP surface that translates external requests into calls on the
//! [`Orchestrator`](crate::application::orchestrator::Orchestrator). No
//! business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Task, session and MCP endpoints plus the status stream |

pub mod api;
