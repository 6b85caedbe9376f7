// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::pool::WorkerPool;
use crate::core::{Result, WorkerError};

/// Pools registered under a name, so one controller can host several
/// script engines side by side.
#[derive(Default)]
pub struct ManagerRegistry {
    pools: RwLock<BTreeMap<String, Arc<WorkerPool>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, pool: Arc<WorkerPool>) -> Result<()> {
        let name = name.into();
        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(WorkerError::AlreadyExists(format!("pool '{}'", name)));
        }
        tracing::debug!("Registered pool '{}'", name);
        pools.insert(name, pool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    /// Dispose the workers of every pool. Registrations are kept.
    pub fn deinitialize(&self) {
        let pools: Vec<_> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.dispose_all();
        }
    }
}
