// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Named workers plus one pre-spawned spare.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::subprocess::Subprocess;
use crate::core::{Result, Script, ScriptProviderInfo, WorkerConfig, WorkerError};

#[derive(Default)]
struct PoolState {
    workers: BTreeMap<String, Arc<Subprocess>>,
    next: Option<Arc<Subprocess>>,
    disabled: bool,
}

/// Hands out workers by name and keeps one spare process warm so that
/// `create` never waits for process startup.
///
/// Pool mutation (`create`, `recreate`, `disable`) is meant to come from a
/// single thread. Data access through the returned workers is thread safe.
pub struct WorkerPool {
    self_ref: Weak<WorkerPool>,
    config: WorkerConfig,
    provider: ScriptProviderInfo,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Validate `config` and spawn the first spare.
    pub fn new(config: WorkerConfig, provider: ScriptProviderInfo) -> Result<Arc<Self>> {
        config.validate()?;
        let next = Subprocess::spawn(&config, provider.clone())?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            provider,
            state: Mutex::new(PoolState {
                next: Some(next),
                ..Default::default()
            }),
        }))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Check out the spare as `name` and spawn its replacement. With
    /// `initialize`, the handshake runs before this returns.
    pub fn create(&self, name: &str, initialize: bool) -> Result<Arc<Subprocess>> {
        let worker = {
            let mut state = self.state.lock();
            if state.disabled {
                return Err(WorkerError::AlreadyDisposed(format!(
                    "pool is disabled, cannot create '{}'",
                    name
                )));
            }
            if let Some(existing) = state.workers.get(name) {
                if !existing.is_disposed() {
                    return Err(WorkerError::AlreadyExists(name.to_string()));
                }
            }

            let worker = match state.next.take() {
                Some(next) if !next.is_disposed() => next,
                _ => Subprocess::spawn(&self.config, self.provider.clone())?,
            };
            state.next = match Subprocess::spawn(&self.config, self.provider.clone()) {
                Ok(next) => Some(next),
                Err(e) => {
                    tracing::warn!("Could not pre-spawn the next worker: {}", e);
                    None
                }
            };

            worker.attach(self.self_ref.clone(), name);
            state.workers.insert(name.to_string(), Arc::clone(&worker));
            worker
        };
        tracing::info!("Created worker '{}' (pid {})", name, worker.pid());

        if initialize {
            // On failure the worker disposes itself, which detaches it.
            worker.initialize()?;
        }
        Ok(worker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Subprocess>> {
        self.state.lock().workers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().workers.keys().cloned().collect()
    }

    /// Dispose `name` and create it again. The caller's answer to `dead_core`.
    pub fn recreate(&self, name: &str, initialize: bool) -> Result<Arc<Subprocess>> {
        if let Some(old) = self.get(name) {
            tracing::info!("Recreating worker '{}'", name);
            old.dispose();
        }
        self.create(name, initialize)
    }

    /// True when a spare is spawned and not yet handed out.
    pub fn prewarmed(&self) -> bool {
        self.state
            .lock()
            .next
            .as_ref()
            .is_some_and(|next| next.is_unstarted())
    }

    /// Dispose every named worker. The spare survives.
    pub fn dispose_all(&self) {
        let workers: Vec<_> = std::mem::take(&mut self.state.lock().workers)
            .into_values()
            .collect();
        for worker in workers {
            worker.dispose();
        }
    }

    /// Dispose everything, including the spare, and refuse further creates.
    pub fn disable(&self) {
        let next = {
            let mut state = self.state.lock();
            state.disabled = true;
            state.next.take()
        };
        if let Some(next) = next {
            next.dispose();
        }
        self.dispose_all();
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    /// Remove `name` if it still refers to `worker`.
    pub(super) fn detach(&self, name: &str, worker: &Arc<Subprocess>) {
        let mut state = self.state.lock();
        if state
            .workers
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, worker))
        {
            state.workers.remove(name);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.disable();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkerPool")
            .field("provider", &self.provider.provider_class)
            .field("workers", &state.workers.keys().collect::<Vec<_>>())
            .field("prewarmed", &state.next.is_some())
            .field("disabled", &state.disabled)
            .finish()
    }
}
