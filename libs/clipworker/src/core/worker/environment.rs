// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Boot sequence of a worker process.

use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::commands::{BasicCommands, WorkerService};
use super::dispatcher::LocalDispatcher;
use super::watchdog::spawn_parent_watchdog;
use crate::core::protocol::{codec, Disconnect, HandshakeReply, Reply, Responder};
use crate::core::script::{enable_extensions, run_preload_hooks, ProviderContext};
use crate::core::signals::install_shutdown_flag;
use crate::core::{
    find_provider, Result, Script, ScriptProvider, ScriptProviderInfo, SharedFrameBuffer,
};

/// Everything the controller passes on the worker's command line.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub frame_buffer_fd: RawFd,
    pub frame_buffer_size: usize,
    pub inline_threshold: usize,
    pub parent_pid: u32,
    pub poll_interval: Duration,
}

struct Booted {
    provider: Box<dyn ScriptProvider>,
    script: Arc<dyn Script>,
}

/// Run a worker until the controller disconnects or a shutdown signal
/// arrives. Returns `Ok` on a clean shutdown.
pub fn run_worker(options: WorkerOptions) -> Result<()> {
    run_preload_hooks();
    spawn_parent_watchdog(options.parent_pid, options.poll_interval)?;

    // SAFETY: the controller cleared close-on-exec on this descriptor for us
    // and passes its number and size on the command line.
    let frame_buffer = unsafe {
        SharedFrameBuffer::from_raw_fd(options.frame_buffer_fd, options.frame_buffer_size)
    }?
    .with_inline_threshold(options.inline_threshold);
    let frame_buffer = Arc::new(frame_buffer);

    let (input, mut output) = take_protocol_channels()?;

    let Some(info) = codec::read_message::<_, ScriptProviderInfo>(&mut &input)? else {
        tracing::info!("Controller closed the channel before the handshake");
        return Ok(());
    };

    let booted = match boot(&info) {
        Ok(booted) => booted,
        Err(e) => {
            tracing::error!("Worker boot failed: {}", e);
            codec::write_frame(&mut output, &HandshakeReply::Failed(e.to_remote()))?;
            return Err(e);
        }
    };

    let dispatcher = Arc::new(LocalDispatcher::<Reply>::new(options.poll_interval));
    let commands = BasicCommands::new(Arc::clone(&booted.script), frame_buffer);
    let service = Arc::new(WorkerService::new(Arc::clone(&dispatcher), commands));

    codec::write_frame(
        &mut output,
        &HandshakeReply::Ready {
            pid: std::process::id(),
        },
    )?;
    tracing::info!("Worker {} ready ({})", std::process::id(), info.provider_class);

    let stop = dispatcher.stop_flag();
    let responder = Responder::start(
        input,
        Box::new(output),
        service,
        options.poll_interval,
        Some(Box::new(move |reason: &Disconnect| {
            tracing::debug!("Controller channel ended: {:?}", reason);
            stop.store(true, Ordering::Release);
        })),
    )?;
    install_shutdown_flag(&dispatcher.stop_flag())?;

    dispatcher.run();

    responder.stop();
    booted.script.dispose();
    booted.provider.deinitialize();
    tracing::info!("Worker {} shut down", std::process::id());
    Ok(())
}

fn boot(info: &ScriptProviderInfo) -> Result<Booted> {
    let mut context = ProviderContext {
        worker_pid: std::process::id(),
        ..Default::default()
    };
    enable_extensions(&info.extensions, &mut context)?;

    let provider = find_provider(&info.provider_class)?.construct(&info.provider_params)?;
    provider.initialize(&context)?;
    let script = provider.get_script()?;
    script.initialize()?;
    Ok(Booted { provider, script })
}

/// Move the protocol onto private descriptors and point fd 1 at stderr, so
/// anything a script prints cannot corrupt the frame stream.
fn take_protocol_channels() -> Result<(File, File)> {
    let input = dup_fd(libc::STDIN_FILENO)?;
    let output = dup_fd(libc::STDOUT_FILENO)?;
    // SAFETY: both are standard descriptors of this process.
    if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok((input, output))
}

fn dup_fd(fd: RawFd) -> Result<File> {
    // SAFETY: duplicating a standard descriptor; the copy is owned by the File.
    let copy = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) };
    if copy < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: `copy` is a fresh descriptor nobody else owns.
    Ok(unsafe { File::from_raw_fd(copy) })
}
