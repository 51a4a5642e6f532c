// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Cadence CLI
//!
//! The `cadence` binary runs the orchestrator (`cadence serve`) and talks to
//! a running instance over its HTTP API.
//!
//! ## Commands
//!
//! - `cadence serve` - Run the orchestrator in the foreground
//! - `cadence task submit|status|cancel|wait` - Task operations
//! - `cadence session create|show|archive` - Session operations
//! - `cadence status [--watch]` - Aggregate status, once or live
//! - `cadence config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod client;
mod commands;

use cadence_core::domain::config::OrchestratorConfig;
use client::ApiClient;
use commands::{ConfigCommand, SessionCommand, TaskCommand};

/// Cadence - agent orchestration and automation hooks
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port (default: from configuration, 8700)
    #[arg(long, global = true, env = "CADENCE_PORT")]
    port: Option<u16>,

    /// HTTP API host (default: from configuration, 127.0.0.1)
    #[arg(long, global = true, env = "CADENCE_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CADENCE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator and HTTP API
    #[command(name = "serve")]
    Serve,

    /// Task operations
    #[command(name = "task")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Session operations
    #[command(name = "session")]
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Show aggregate status
    #[command(name = "status")]
    Status {
        /// Follow the live snapshot stream
        #[arg(short, long)]
        watch: bool,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) => {
            let config = OrchestratorConfig::load_or_default(cli.config.clone())
                .context("Failed to load configuration")?;
            let logging = config.spec.observability.as_ref().and_then(|o| o.logging.as_ref());
            let level = cli
                .log_level
                .clone()
                .or_else(|| logging.map(|l| l.level.clone()))
                .unwrap_or_else(|| "info".to_string());
            let json = logging.is_some_and(|l| l.format == "json");
            init_logging(&level, json)?;

            commands::serve::run(
                config,
                commands::serve::ServeOptions {
                    config_path: cli.config,
                    host: cli.host,
                    port: cli.port,
                },
            )
            .await
        }
        Some(Commands::Task { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), false)?;
            commands::task::handle_command(command, api_client(&cli.host, cli.port)?).await
        }
        Some(Commands::Session { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), false)?;
            commands::session::handle_command(command, api_client(&cli.host, cli.port)?).await
        }
        Some(Commands::Status { watch }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), false)?;
            commands::status::handle_command(api_client(&cli.host, cli.port)?, watch).await
        }
        Some(Commands::Config { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), false)?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn api_client(host: &Option<String>, port: Option<u16>) -> Result<ApiClient> {
    ApiClient::new(host.as_deref().unwrap_or("127.0.0.1"), port.unwrap_or(8700))
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
