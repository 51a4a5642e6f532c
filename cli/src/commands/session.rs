// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session commands
//!
//! Commands: create, show, archive

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use cadence_core::domain::session::Session;

use crate::client::ApiClient;
use crate::commands::task::format_status;

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Open a new session
    Create,

    /// Show a session and its tasks
    Show {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Archive a session; it stops accepting tasks
    Archive {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },
}

pub async fn handle_command(command: SessionCommand, client: ApiClient) -> Result<()> {
    match command {
        SessionCommand::Create => {
            let session = client.create_session().await?;
            println!("{}", format!("✓ Session created: {}", session.id).green());
        }
        SessionCommand::Show { session_id } => {
            let view = client.session(&session_id).await?;
            print_session(&view.session);
            if view.tasks.is_empty() {
                println!("  {}", "No tasks".dimmed());
            }
            for task in view.tasks {
                println!("    {} {} {}", task.id, task.agent.bold(), format_status(task.status));
            }
        }
        SessionCommand::Archive { session_id } => {
            let session = client.archive_session(&session_id).await?;
            println!("{}", format!("✓ Session {} archived", session.id).green());
        }
    }
    Ok(())
}

fn print_session(session: &Session) {
    println!("Session {}", session.id);
    println!("  Status: {:?}", session.status);
    println!("  Created: {}", session.created_at);
    println!("  Last activity: {}", session.last_activity);
    println!("  Tasks: {}", session.task_ids.len());
}
