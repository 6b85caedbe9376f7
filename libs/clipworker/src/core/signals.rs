// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shutdown signals for the worker process.
//!
//! SIGTERM and SIGINT only raise a flag. The worker's dispatcher polls it
//! between queue pops and shuts down through its normal drain path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};

static SIGNAL_HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Register SIGTERM and SIGINT to set `flag`.
pub fn install_shutdown_flag(flag: &Arc<AtomicBool>) -> std::io::Result<()> {
    if SIGNAL_HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Signal handlers already installed, skipping");
        return Ok(());
    }

    signal_hook::flag::register(SIGTERM, Arc::clone(flag))?;
    signal_hook::flag::register(SIGINT, Arc::clone(flag))?;

    tracing::debug!("Shutdown signal handlers installed (SIGTERM, SIGINT)");
    Ok(())
}
