// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! MCP over HTTP
//!
//! JSON-RPC 2.0 requests POSTed to a single endpoint. Handshake is
//! `initialize` followed by `tools/list`; health checks use `ping`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::domain::mcp::{McpError, McpTool, McpTransport};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct ToolsList {
    #[serde(default)]
    tools: Vec<McpTool>,
}

pub struct HttpMcpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    next_id: AtomicU64,
}

impl HttpMcpTransport {
    /// Header values of the form `env:NAME` are read from the environment.
    pub fn new(endpoint: impl Into<String>, headers: &HashMap<String, String>) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| match value.strip_prefix("env:") {
                Some(var) => match std::env::var(var) {
                    Ok(resolved) => Some((name.clone(), resolved)),
                    Err(_) => {
                        warn!(header = %name, var = %var, "Header environment variable not set; skipping");
                        None
                    }
                },
                None => Some((name.clone(), value.clone())),
            })
            .collect();

        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            headers,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl McpTransport for HttpMcpTransport {
    async fn initialize(&self) -> Result<Vec<McpTool>, McpError> {
        let info = self
            .call(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "cadence", "version": env!("CARGO_PKG_VERSION") },
                })),
            )
            .await?;
        debug!(endpoint = %self.endpoint, server = ?info.get("serverInfo"), "MCP handshake complete");

        let listed = self.call("tools/list", None).await?;
        let tools: ToolsList = serde_json::from_value(listed)
            .map_err(|e| McpError::Transport(format!("Invalid tools/list result: {}", e)))?;
        Ok(tools.tools)
    }

    async fn ping(&self) -> Result<(), McpError> {
        self.call("ping", None).await.map(|_| ())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        self.call("tools/call", Some(json!({ "name": tool, "arguments": arguments })))
            .await
    }
}
