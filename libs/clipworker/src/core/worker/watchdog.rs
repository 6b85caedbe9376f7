// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::thread;
use std::time::Duration;

/// Exit the process once its parent is gone.
///
/// An orphaned worker is re-parented, so `getppid` stops matching the pid the
/// controller passed on the command line.
pub fn spawn_parent_watchdog(parent_pid: u32, poll_interval: Duration) -> std::io::Result<()> {
    thread::Builder::new()
        .name("clipworker-watchdog".into())
        .spawn(move || loop {
            // SAFETY: getppid has no preconditions.
            let current = unsafe { libc::getppid() } as u32;
            if current != parent_pid {
                tracing::warn!(
                    "Parent {} died (now {}), shutting down worker",
                    parent_pid,
                    current
                );
                std::process::exit(1);
            }
            thread::sleep(poll_interval);
        })
        .map(|_| ())
}
