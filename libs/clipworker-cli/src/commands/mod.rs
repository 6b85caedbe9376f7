// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod frame;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clipworker::core::pattern::PatternProvider;
use clipworker::core::script::RegisteredProvider;
use clipworker::{
    clipworker_home, find_provider, Script, ScriptProviderInfo, ScriptSource, Subprocess,
    WorkerConfig, WorkerPool,
};

/// Strict when the directory was given explicitly, lenient for the home
/// directory.
pub fn load_config(dir: Option<&Path>) -> Result<WorkerConfig> {
    match dir {
        Some(dir) => WorkerConfig::load(dir)
            .with_context(|| format!("Failed to load config from {}", dir.display())),
        None => Ok(WorkerConfig::load_or_default(&clipworker_home())),
    }
}

fn provider_info(config: &WorkerConfig) -> Result<ScriptProviderInfo> {
    match &config.provider {
        Some(info) => Ok(info.clone()),
        None => Ok(find_provider(PatternProvider::PROVIDER_CLASS)?.with_config(
            std::iter::empty::<(String, String)>(),
        )),
    }
}

/// Start a pool with one initialized worker and run `script` in it.
pub fn run_script(
    config: WorkerConfig,
    script: &Path,
) -> Result<(Arc<WorkerPool>, Arc<Subprocess>, Option<String>)> {
    let provider = provider_info(&config)?;
    let pool = WorkerPool::new(config, provider).context("Failed to start worker pool")?;
    let worker = pool
        .create("main", true)
        .context("Failed to start worker")?;
    let result = worker
        .execute(ScriptSource::Path(script.to_path_buf()))
        .join()
        .with_context(|| format!("Script {} failed", script.display()))?;
    Ok((pool, worker, result))
}
