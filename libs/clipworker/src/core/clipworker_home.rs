// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;

use crate::core::{Result, WorkerError};

/// Get the CLIPWORKER_HOME directory path.
///
/// Resolution order:
/// 1. `CLIPWORKER_HOME` environment variable (explicit override)
/// 2. `XDG_CONFIG_HOME/clipworker` (XDG compliance)
/// 3. `~/.clipworker` (default)
///
/// ```text
/// ~/.clipworker/
/// └── clipworker.yaml      # WorkerConfig used by the CLI
/// ```
pub fn get_clipworker_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("CLIPWORKER_HOME") {
        return Ok(PathBuf::from(home));
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("clipworker"));
    }

    dirs::home_dir()
        .map(|home| home.join(".clipworker"))
        .ok_or_else(|| WorkerError::Configuration("could not determine home directory".into()))
}

/// Like [`get_clipworker_home`], falling back to the working directory when no
/// home directory can be found.
pub fn clipworker_home() -> PathBuf {
    get_clipworker_home().unwrap_or_else(|e| {
        tracing::warn!("{}; using the current directory", e);
        PathBuf::from(".")
    })
}
