// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process lifecycle.

use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus};
use std::time::{Duration, Instant};

use crate::core::{Result, WorkerError};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// A spawned `clipworker-worker` and the pipes it was started with.
///
/// Exit is observed without blocking; the only blocking wait happens after a
/// SIGKILL, when the child is guaranteed to be gone. Dropping the handle
/// reaps the child.
pub struct ProcessHandle {
    child: Child,
    name: String,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn spawn(mut command: Command, name: &str) -> Result<Self> {
        let child = command.spawn().map_err(|e| {
            WorkerError::Spawn(format!("failed to spawn worker '{}': {}", name, e))
        })?;
        tracing::info!("Spawned worker '{}' with PID {}", name, child.id());
        Ok(Self {
            child,
            name: name.to_string(),
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Exit status if the worker has exited. Remembered once seen.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait().map_err(|e| {
                WorkerError::WorkerUnavailable(format!(
                    "cannot query worker '{}': {}",
                    self.name, e
                ))
            })?;
        }
        Ok(self.status)
    }

    /// Give the worker `grace` to leave on its own (it does once its stdin
    /// closes), then SIGKILL and reap it.
    pub fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.try_wait()? {
                tracing::debug!("Worker '{}' exited: {}", self.name, status);
                return Ok(status);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }

        tracing::warn!("Worker '{}' still running after {:?}, killing", self.name, grace);
        self.kill_and_reap()
    }

    fn kill_and_reap(&mut self) -> Result<ExitStatus> {
        // Fails only if the child already exited, which the reap below covers.
        if let Err(e) = self.child.kill() {
            tracing::debug!("SIGKILL to worker '{}' failed: {}", self.name, e);
        }
        let status = self.child.wait().map_err(|e| {
            WorkerError::WorkerUnavailable(format!("cannot reap worker '{}': {}", self.name, e))
        })?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("Worker '{}' outlived its handle, killing", self.name);
            let _ = self.kill_and_reap();
        }
    }
}
