// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use clipworker::{Clip, Script, WorkerConfig};

/// Execute `script` and list its outputs.
pub fn run(config: WorkerConfig, script: &Path, json: bool) -> Result<()> {
    let (pool, worker, result) = super::run_script(config, script)?;
    let outputs: BTreeMap<String, u32> = worker
        .get_results()
        .join()
        .context("Failed to list outputs")?
        .iter()
        .map(|(name, clip)| (name.clone(), clip.len()))
        .collect();
    pool.disable();

    if json {
        let report = serde_json::json!({
            "result": result,
            "outputs": outputs,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match result {
        Some(value) => println!("Result: {}", value),
        None => println!("Result: (none)"),
    }
    if outputs.is_empty() {
        println!("No outputs defined.");
        return Ok(());
    }
    println!("Outputs ({}):", outputs.len());
    for (name, length) in &outputs {
        println!("  {} ({} frames)", name, length);
    }
    Ok(())
}
