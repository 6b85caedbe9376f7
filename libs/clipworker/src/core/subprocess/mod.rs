// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process isolation for script engines.
//!
//! Each engine runs in its own process so that a crash or hang takes down
//! one worker instead of the controller:
//!
//! - [`ProcessHandle`] owns the OS process
//! - [`Subprocess`] adds the handshake, the requester and the frame buffer
//! - [`WorkerPool`] names workers and keeps one spare spawned ahead of time

mod pool;
mod process_handle;
mod registry;
#[allow(clippy::module_inception)]
mod subprocess;

pub use pool::WorkerPool;
pub use process_handle::ProcessHandle;
pub use registry::ManagerRegistry;
pub use subprocess::Subprocess;
