// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
#![cfg(unix)]

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use cadence_core::infrastructure::process::{run_command, CommandSpec};

fn sh(script: &str) -> CommandSpec {
    CommandSpec {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        working_dir: None,
    }
}

#[tokio::test]
async fn test_child_echoing_large_input_completes() {
    let blob = "x".repeat(1 << 20);
    let input = json!({ "blob": blob });

    let output = tokio::time::timeout(Duration::from_secs(10), run_command(&sh("cat"), &input))
        .await
        .expect("child finished")
        .unwrap();

    assert!(output.success());
    let value = output.value().unwrap();
    assert_eq!(value["blob"].as_str().unwrap().len(), 1 << 20);
}

#[tokio::test]
async fn test_child_ignoring_stdin_still_reports_output() {
    let input = json!({ "blob": "y".repeat(1 << 20) });

    let output = tokio::time::timeout(Duration::from_secs(10), run_command(&sh("echo done"), &input))
        .await
        .expect("child finished")
        .unwrap();

    assert!(output.success());
    assert_eq!(output.value(), Some(json!("done")));
}
