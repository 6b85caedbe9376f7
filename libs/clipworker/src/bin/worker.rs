// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process spawned by `WorkerPool`.
//!
//! stdin and stdout carry the protocol, so logs go to stderr.

use std::os::fd::RawFd;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clipworker::core::worker::{run_worker, WorkerOptions};

#[derive(Parser, Debug)]
#[command(name = "clipworker-worker")]
#[command(about = "Hosts one script engine for a clipworker controller", long_about = None)]
struct Args {
    /// Inherited shared memory descriptor for raw frame transfers
    #[arg(long)]
    frame_buffer_fd: RawFd,

    /// Size of the shared frame buffer in bytes
    #[arg(long)]
    frame_buffer_size: usize,

    /// Payloads larger than this are sent inline
    #[arg(long)]
    inline_threshold: usize,

    /// Controller pid; the worker exits when it goes away
    #[arg(long)]
    parent_pid: u32,

    #[arg(long, default_value = "250")]
    poll_interval_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run_worker(WorkerOptions {
        frame_buffer_fd: args.frame_buffer_fd,
        frame_buffer_size: args.frame_buffer_size,
        inline_threshold: args.inline_threshold,
        parent_pid: args.parent_pid,
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
    })
    .with_context(|| format!("Worker {} failed", std::process::id()))
}
