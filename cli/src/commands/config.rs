// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use cadence_core::domain::config::OrchestratorConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the full manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./cadence-config.yaml")]
        output: PathBuf,

        /// Include every section with comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. CADENCE_CONFIG_PATH: {}",
            std::env::var("CADENCE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./cadence-config.yaml");
        println!("  4. ~/.cadence/config.yaml");
        println!("  5. /etc/cadence/config.yaml");
        println!();
    }

    if yaml {
        print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();
    println!("  Node: {}", config.metadata.name);
    println!("  API: {}:{}", spec.server.bind_address, spec.server.port);
    println!();

    println!("{}", "Agents:".bold());
    for agent in &spec.agents {
        let state = if agent.enabled { "".normal() } else { " (disabled)".dimmed() };
        println!(
            "  {} [{:?}, {:?}] max_concurrency={}{}",
            agent.name.bold(),
            agent.category,
            agent.cost_tier,
            agent.max_concurrency,
            state
        );
        if !agent.commands.is_empty() {
            println!("    Commands: {}", agent.commands.join(", "));
        }
    }
    println!();

    println!("{}", "Hooks:".bold());
    for hook in &spec.hooks {
        let triggers: Vec<String> = hook.triggers.iter().map(|t| t.to_string()).collect();
        println!(
            "  {} order={} on [{}]{}",
            hook.name.bold(),
            hook.order,
            triggers.join(", "),
            if hook.fatal { " fatal" } else { "" }
        );
    }
    println!();

    println!("{}", "MCP servers:".bold());
    for server in &spec.mcp.servers {
        println!("  {} → {}", server.name.bold(), server.endpoint);
    }
    println!();

    println!("{}", "Sessions:".bold());
    println!("  Storage: {:?}", spec.sessions.storage);
    println!("  Data dir: {}", spec.sessions.resolved_data_dir().display());
    println!("  Recovery: {:?}", spec.sessions.recovery);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}
