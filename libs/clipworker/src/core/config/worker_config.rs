// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker pool configuration via `clipworker.yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::framebuffer::DEFAULT_FRAME_BUFFER_SIZE;
use crate::core::script::ScriptProviderInfo;
use crate::core::{Result, WorkerError};

/// Environment variable naming the worker executable.
pub const WORKER_BIN_ENV: &str = "CLIPWORKER_WORKER_BIN";

/// File name of the worker executable installed next to its controller.
pub const WORKER_BIN_NAME: &str = "clipworker-worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Explicit worker binary. See [`WorkerConfig::resolve_worker_executable`].
    pub worker_executable: Option<PathBuf>,

    /// Shared frame buffer capacity in bytes, fixed per deployment.
    pub frame_buffer_size: usize,

    /// Raw payloads strictly larger than this travel inline. Defaults to, and
    /// is clamped to, `frame_buffer_size`.
    pub inline_threshold: Option<usize>,

    /// Granularity of every bounded channel read and queue pop.
    pub poll_interval_ms: u64,

    pub handshake_timeout_ms: u64,

    /// How long a disposed worker may take to exit before it is killed.
    pub shutdown_timeout_ms: u64,

    /// Extra environment for worker processes.
    pub env: HashMap<String, String>,

    /// Default provider for front ends that do not pick one.
    pub provider: Option<ScriptProviderInfo>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_executable: None,
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
            inline_threshold: None,
            poll_interval_ms: 250,
            handshake_timeout_ms: 30_000,
            shutdown_timeout_ms: 2_000,
            env: HashMap::new(),
            provider: None,
        }
    }
}

impl WorkerConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "clipworker.yaml";

    /// Load configuration from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            WorkerError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            WorkerError::Configuration(format!(
                "Failed to parse {}: {}",
                config_path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::info!("Loaded worker config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file is
    /// missing or unusable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_buffer_size == 0 {
            return Err(WorkerError::Configuration(
                "frame_buffer_size must be greater than 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(WorkerError::Configuration(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn effective_inline_threshold(&self) -> usize {
        self.inline_threshold
            .unwrap_or(self.frame_buffer_size)
            .min(self.frame_buffer_size)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Resolve the worker binary.
    ///
    /// Resolution order:
    /// 1. `worker_executable` from this config
    /// 2. `CLIPWORKER_WORKER_BIN` environment variable
    /// 3. `clipworker-worker` next to the current executable (or one level up,
    ///    for test binaries under `target/<profile>/deps/`)
    pub fn resolve_worker_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_executable {
            return Ok(path.clone());
        }

        if let Ok(path) = std::env::var(WORKER_BIN_ENV) {
            return Ok(PathBuf::from(path));
        }

        let exe = std::env::current_exe()?;
        let candidates = exe
            .parent()
            .into_iter()
            .flat_map(|dir| [Some(dir), dir.parent()])
            .flatten()
            .map(|dir| dir.join(WORKER_BIN_NAME));
        for candidate in candidates {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(WorkerError::Configuration(format!(
            "could not find {} (set {} or worker_executable)",
            WORKER_BIN_NAME, WORKER_BIN_ENV
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.frame_buffer_size, 7680 * 4320 * 3);
        assert_eq!(config.effective_inline_threshold(), config.frame_buffer_size);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WorkerConfig::FILE_NAME),
            "frame_buffer_size: 4096\ninline_threshold: 100000\nenv:\n  FOO: bar\nprovider:\n  provider_class: clipworker::pattern\n",
        )
        .unwrap();

        let config = WorkerConfig::load(dir.path()).unwrap();
        assert_eq!(config.frame_buffer_size, 4096);
        assert_eq!(config.effective_inline_threshold(), 4096);
        assert_eq!(config.handshake_timeout_ms, 30_000);
        assert_eq!(config.env.get("FOO").map(String::as_str), Some("bar"));
        let provider = config.provider.unwrap();
        assert_eq!(provider.provider_class, "clipworker::pattern");
        assert!(provider.extensions.is_empty());
    }

    #[test]
    fn test_load_or_default_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            WorkerConfig::load_or_default(dir.path()).poll_interval_ms,
            250
        );

        std::fs::write(dir.path().join(WorkerConfig::FILE_NAME), "poll_interval_ms: [").unwrap();
        assert!(WorkerConfig::load(dir.path()).is_err());
        assert_eq!(
            WorkerConfig::load_or_default(dir.path()).poll_interval_ms,
            250
        );
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WorkerConfig::FILE_NAME), "frame_buffer_size: 0\n").unwrap();
        assert_eq!(WorkerConfig::load(dir.path()).unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_explicit_executable_wins() {
        let config = WorkerConfig {
            worker_executable: Some(PathBuf::from("/opt/worker")),
            ..WorkerConfig::default()
        };
        assert_eq!(
            config.resolve_worker_executable().unwrap(),
            PathBuf::from("/opt/worker")
        );
    }
}
