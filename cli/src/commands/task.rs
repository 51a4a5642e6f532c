// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task commands
//!
//! Commands: submit, status, cancel, wait

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use std::time::Duration;

use cadence_core::application::dispatcher::TaskRequest;
use cadence_core::domain::session::SessionId;
use cadence_core::domain::task::{Priority, Task, TaskId, TaskStatus};

use crate::client::ApiClient;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Submit a task to an agent
    Submit {
        /// Agent name, mention (@agent-backend) or command (/api)
        #[arg(value_name = "TARGET")]
        target: String,

        /// Payload (JSON string or @file.json)
        #[arg(short, long, value_name = "INPUT")]
        input: Option<String>,

        #[arg(short, long, value_enum, default_value = "normal")]
        priority: PriorityArg,

        /// Attach the task to a session
        #[arg(short, long, value_name = "SESSION_ID")]
        session: Option<String>,

        /// Seconds to wait for queue space instead of failing on backpressure
        #[arg(long, value_name = "SECONDS")]
        queue_wait: Option<u64>,

        /// Wait for the task to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Show a task
    Status {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// Cancel a queued or running task
    Cancel {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// Wait for a task to finish
    Wait {
        #[arg(value_name = "TASK_ID")]
        task_id: String,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
}

pub async fn handle_command(command: TaskCommand, client: ApiClient) -> Result<()> {
    match command {
        TaskCommand::Submit {
            target,
            input,
            priority,
            session,
            queue_wait,
            wait,
        } => submit(&client, target, input, priority, session, queue_wait, wait).await,
        TaskCommand::Status { task_id } => status(&client, parse_task_id(&task_id)?).await,
        TaskCommand::Cancel { task_id } => cancel(&client, parse_task_id(&task_id)?).await,
        TaskCommand::Wait { task_id, timeout } => {
            let task = wait_for(&client, parse_task_id(&task_id)?, Duration::from_secs(timeout)).await?;
            print_task(&task);
            Ok(())
        }
    }
}

async fn submit(
    client: &ApiClient,
    target: String,
    input: Option<String>,
    priority: PriorityArg,
    session: Option<String>,
    queue_wait: Option<u64>,
    wait: bool,
) -> Result<()> {
    let mut request = TaskRequest::new(target, parse_input(input)?).with_priority(priority.into());
    if let Some(session) = session {
        let id = SessionId::parse(&session).with_context(|| format!("Invalid session id: {}", session))?;
        request = request.in_session(id);
    }
    if let Some(secs) = queue_wait {
        request = request.blocking(Duration::from_secs(secs));
    }

    let accepted = client.submit(&request).await?;
    println!(
        "{}",
        format!("✓ Task {} queued for {}", accepted.task_id, accepted.agent.bold()).green()
    );

    if wait {
        println!("Waiting for completion...");
        let task = wait_for(client, accepted.task_id, Duration::from_secs(3600)).await?;
        print_task(&task);
        if task.status != TaskStatus::Completed {
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn status(client: &ApiClient, id: TaskId) -> Result<()> {
    let task = client.task(id).await?;
    print_task(&task);
    Ok(())
}

async fn cancel(client: &ApiClient, id: TaskId) -> Result<()> {
    let status = client.cancel(id).await?;
    println!("{} {}", format!("✓ Task {}", id).green(), format_status(status));
    Ok(())
}

async fn wait_for(client: &ApiClient, id: TaskId, timeout: Duration) -> Result<Task> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = client.task(id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Task {} still {:?} after {:?}", id, task.status, timeout);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn print_task(task: &Task) {
    println!("Task {}", task.id);
    println!("  Agent: {}", task.agent);
    println!("  Status: {}", format_status(task.status));
    println!("  Priority: {:?}", task.priority);
    if let Some(session) = task.session_id {
        println!("  Session: {}", session);
    }
    println!("  Created: {}", task.created_at);
    if let Some(started) = task.started_at {
        println!("  Started: {}", started);
    }
    if let Some(finished) = task.finished_at {
        println!("  Finished: {}", finished);
    }
    if task.retry_count > 0 {
        println!("  Retries: {}", task.retry_count);
    }
    if let Some(error) = &task.last_error {
        println!("  Error: {} {}", error.kind.as_str().red(), error.message);
    }
    if let Some(result) = &task.result {
        println!("  Result: {}", result);
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId> {
    TaskId::parse(raw).with_context(|| format!("Invalid task id: {}", raw))
}

fn parse_input(input: Option<String>) -> Result<serde_json::Value> {
    match input {
        None => Ok(serde_json::json!({})),
        Some(s) if s.starts_with('@') => {
            let path = &s[1..];
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path))?;
            serde_json::from_str(&content).context("Failed to parse input JSON")
        }
        Some(s) => serde_json::from_str(&s).context("Failed to parse input JSON"),
    }
}

pub fn format_status(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Queued => "queued".normal(),
        TaskStatus::Running => "running".yellow(),
        TaskStatus::Completed => "completed".green(),
        TaskStatus::Failed => "failed".red(),
        TaskStatus::Cancelled => "cancelled".yellow(),
        TaskStatus::Interrupted => "interrupted".magenta(),
    }
}
