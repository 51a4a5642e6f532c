// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `cadence serve`: run the orchestrator and its HTTP API in the foreground
//!
//! SIGINT/SIGTERM drain the queue and stop; SIGHUP re-reads the
//! configuration file and applies agents, hooks and MCP servers in place.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cadence_core::application::orchestrator::Orchestrator;
use cadence_core::domain::config::OrchestratorConfig;
use cadence_core::presentation::api;

pub struct ServeOptions {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub async fn run(config: OrchestratorConfig, options: ServeOptions) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(node = %config.metadata.name, agents = config.spec.agents.len(), "Configuration loaded");

    if let Some(metrics) = config.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        if metrics.enabled {
            let addr: SocketAddr = ([0, 0, 0, 0], metrics.port).into();
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
            info!("Metrics exporter listening on {}", addr);
        }
    }

    let host = options.host.clone().unwrap_or_else(|| config.spec.server.bind_address.clone());
    let port = options.port.unwrap_or(config.spec.server.port);

    let orchestrator = Orchestrator::build(config).context("Failed to build orchestrator")?;
    orchestrator.start().await?;

    let stop_reload = CancellationToken::new();
    let reloader = spawn_reload_listener(orchestrator.clone(), options.config_path, stop_reload.clone());

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("API listening on {}", addr);

    let served = axum::serve(listener, api::app(orchestrator.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    stop_reload.cancel();
    let _ = reloader.await;
    orchestrator.shutdown().await;
    served
}

#[cfg(unix)]
fn spawn_reload_listener(
    orchestrator: Arc<Orchestrator>,
    config_path: Option<PathBuf>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "SIGHUP handler unavailable; hot reload disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    let result = OrchestratorConfig::load_or_default(config_path.clone());
                    match result {
                        Ok(config) => {
                            if let Err(e) = orchestrator.reload(config).await {
                                error!(error = %e, "Configuration reload failed; keeping current configuration");
                            }
                        }
                        Err(e) => error!(error = %e, "Failed to read configuration"),
                    }
                }
                _ = stop.cancelled() => break,
            }
        }
    })
}

#[cfg(not(unix))]
fn spawn_reload_listener(
    _orchestrator: Arc<Orchestrator>,
    _config_path: Option<PathBuf>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { stop.cancelled().await })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining");
}
