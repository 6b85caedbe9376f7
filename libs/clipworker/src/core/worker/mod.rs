// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process side: a responder in front of a single-threaded dispatcher
//! that owns the hosted script.

mod commands;
mod dispatcher;
mod environment;
mod watchdog;

pub use commands::{BasicCommands, WorkerService};
pub use dispatcher::{Dispatch, Job, LocalDispatcher, RequestQueueItem};
pub use environment::{run_worker, WorkerOptions};
pub use watchdog::spawn_parent_watchdog;
