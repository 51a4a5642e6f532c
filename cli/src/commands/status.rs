// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `cadence status`: one snapshot, or follow the live stream

use anyhow::Result;
use colored::Colorize;

use cadence_core::domain::mcp::ConnectionState;
use cadence_core::domain::status::StatusSnapshot;

use crate::client::ApiClient;

pub async fn handle_command(client: ApiClient, watch: bool) -> Result<()> {
    if watch {
        client.watch_status(|snapshot| print_snapshot(&snapshot)).await
    } else {
        let snapshot = client.status().await?;
        print_snapshot(&snapshot);
        Ok(())
    }
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    let header = format!(
        "#{} {} queued={} running={}",
        snapshot.sequence,
        snapshot.generated_at.format("%H:%M:%S%.3f"),
        snapshot.total_queued(),
        snapshot.total_running(),
    );
    if snapshot.degraded {
        println!("{} {}", header.bold(), "(degraded)".yellow());
    } else {
        println!("{}", header.bold());
    }

    for agent in &snapshot.agents {
        let name = if agent.enabled {
            agent.name.normal()
        } else {
            agent.name.dimmed()
        };
        println!(
            "  {:<20} {}/{} running, {} queued, {:.0}% ok, {:.0}ms avg",
            name,
            agent.running,
            agent.max_concurrency,
            agent.queued,
            agent.success_rate * 100.0,
            agent.avg_duration_ms,
        );
    }

    for server in &snapshot.mcp {
        let state = match server.state {
            ConnectionState::Connected => "connected".green(),
            ConnectionState::Degraded => "degraded".yellow(),
            ConnectionState::Connecting => "connecting".normal(),
            ConnectionState::Disconnected => "disconnected".red(),
        };
        println!("  mcp {:<16} {} ({} tools)", server.name, state, server.tool_count);
    }

    let chains = &snapshot.chains;
    if chains.total() > 0 {
        println!(
            "  hook chains: {} completed, {} partial, {} aborted",
            chains.completed, chains.partially_failed, chains.aborted
        );
    }
}
