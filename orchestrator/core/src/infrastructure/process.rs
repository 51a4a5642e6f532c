// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External process adapter
//!
//! Agents and hooks configured with a `command` run as child processes. The
//! input document is written to stdin; stdout is parsed as JSON when it can be
//! and returned as a string otherwise. Children are killed when the future
//! driving them is dropped (timeout or cancellation).
//!
//! Exit codes for agent handlers:
//!   0   success
//!   75  temporary failure (EX_TEMPFAIL), retried by the queue
//!   *   terminal failure

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::application::handler::{AgentHandler, TaskContext};
use crate::domain::task::TaskError;

pub const EXIT_TEMPFAIL: i32 = 75;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
}

#[derive(Debug)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout as JSON, falling back to the trimmed text; `None` when empty.
    pub fn value(&self) -> Option<Value> {
        let trimmed = self.stdout.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }

    fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        match self.code {
            Some(code) if stderr.is_empty() => format!("exited with status {}", code),
            Some(code) => format!("exited with status {}: {}", code, stderr),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Spawn `spec`, feed `input` on stdin and collect its output.
pub async fn run_command(spec: &CommandSpec, input: &Value) -> std::io::Result<CommandOutput> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let document = serde_json::to_vec(input).map_err(std::io::Error::other)?;
    let stdin = child.stdin.take();
    let program = spec.program.as_str();
    // stdin is fed while stdout drains so a child echoing its input cannot fill the pipe
    let feed = async move {
        if let Some(mut stdin) = stdin {
            // a child that never reads stdin must not fail the run
            if let Err(e) = stdin.write_all(&document).await {
                debug!(program = %program, error = %e, "Child closed stdin early");
            }
        }
    };
    let ((), output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;
    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Agent handler backed by an external program.
pub struct ProcessAgentHandler {
    spec: CommandSpec,
}

impl ProcessAgentHandler {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl AgentHandler for ProcessAgentHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        let input = json!({
            "task_id": ctx.task_id,
            "agent": ctx.agent,
            "attempt": ctx.attempt,
            "session_id": ctx.session_id,
            "payload": ctx.payload,
        });

        let output = tokio::select! {
            result = run_command(&self.spec, &input) => result,
            _ = ctx.cancellation.cancelled() => return Err(TaskError::Cancelled),
        }
        .map_err(|e| TaskError::Terminal(format!("failed to run '{}': {}", self.spec.program, e)))?;

        match output.code {
            Some(0) => Ok(output.value().unwrap_or(Value::Null)),
            Some(EXIT_TEMPFAIL) => Err(TaskError::Retryable(output.failure_message())),
            _ => Err(TaskError::Terminal(output.failure_message())),
        }
    }
}
