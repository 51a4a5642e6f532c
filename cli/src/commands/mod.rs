// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CLI command implementations

pub mod config;
pub mod serve;
pub mod session;
pub mod status;
pub mod task;

pub use config::ConfigCommand;
pub use session::SessionCommand;
pub use task::TaskCommand;
