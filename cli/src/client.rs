// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for a running `cadence serve` instance

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use cadence_core::application::dispatcher::TaskRequest;
use cadence_core::domain::session::Session;
use cadence_core::domain::status::StatusSnapshot;
use cadence_core::domain::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct Accepted {
    pub task_id: TaskId,
    pub agent: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct Cancelled {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct SessionView {
    pub session: Session,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        // no global timeout; the status stream is long-lived
        let client = Client::builder().build().context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit(&self, request: &TaskRequest) -> Result<Accepted> {
        let response = self
            .client
            .post(self.url("/v1/tasks"))
            .json(request)
            .send()
            .await
            .context("Failed to submit task")?;
        decode(response, "submit task").await
    }

    pub async fn task(&self, id: TaskId) -> Result<Task> {
        let response = self
            .client
            .get(self.url(&format!("/v1/tasks/{}", id)))
            .send()
            .await
            .context("Failed to get task")?;
        decode(response, "get task").await
    }

    pub async fn cancel(&self, id: TaskId) -> Result<TaskStatus> {
        let response = self
            .client
            .post(self.url(&format!("/v1/tasks/{}/cancel", id)))
            .send()
            .await
            .context("Failed to cancel task")?;
        let cancelled: Cancelled = decode(response, "cancel task").await?;
        Ok(cancelled.status)
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let response = self
            .client
            .get(self.url("/v1/status"))
            .send()
            .await
            .context("Failed to get status")?;
        decode(response, "get status").await
    }

    /// Follow the status stream, calling `on_snapshot` for each snapshot
    /// until the server closes the stream.
    pub async fn watch_status<F>(&self, mut on_snapshot: F) -> Result<()>
    where
        F: FnMut(StatusSnapshot),
    {
        let response = self
            .client
            .get(self.url("/v1/status/stream"))
            .send()
            .await
            .context("Failed to connect to status stream")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to stream status: {}", error_text);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read status stream chunk")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // events end with a blank line; keep any partial event buffered
            while let Some(end) = buffer.find("\n\n") {
                let event: String = buffer.drain(..end + 2).collect();
                if let Some(snapshot) = parse_event(&event) {
                    on_snapshot(snapshot);
                }
            }
        }
        Ok(())
    }

    pub async fn create_session(&self) -> Result<Session> {
        let response = self
            .client
            .post(self.url("/v1/sessions"))
            .send()
            .await
            .context("Failed to create session")?;
        decode(response, "create session").await
    }

    pub async fn session(&self, id: &str) -> Result<SessionView> {
        let response = self
            .client
            .get(self.url(&format!("/v1/sessions/{}", id)))
            .send()
            .await
            .context("Failed to get session")?;
        decode(response, "get session").await
    }

    pub async fn archive_session(&self, id: &str) -> Result<Session> {
        let response = self
            .client
            .post(self.url(&format!("/v1/sessions/{}/archive", id)))
            .send()
            .await
            .context("Failed to archive session")?;
        decode(response, "archive session").await
    }

    pub async fn health(&self) -> Result<Value> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("Server is not reachable")?;
        decode(response, "check health").await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Failed to {}: {} {}", action, status, error_message(&body));
    }
    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", action))
}

/// `kind: message` from an API error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            Some(format!(
                "{}: {}",
                error.get("kind")?.as_str()?,
                error.get("message")?.as_str()?
            ))
        })
        .unwrap_or_else(|| body.to_string())
}

fn parse_event(event: &str) -> Option<StatusSnapshot> {
    let data: String = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() {
        return None;
    }
    serde_json::from_str(&data).ok()
}
