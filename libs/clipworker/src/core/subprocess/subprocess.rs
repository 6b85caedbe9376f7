// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Controller-side handle to one worker process.

use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{ChildStdin, ChildStdout, Command as ProcessCommand, Stdio};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::pool::WorkerPool;
use super::process_handle::ProcessHandle;
use crate::core::protocol::{codec, Command, HandshakeReply, Reply, Requester};
use crate::core::proxy::ProxyClip;
use crate::core::{
    Clip, ClipMap, Deferred, Result, Script, ScriptProviderInfo, ScriptSource,
    SharedFrameBuffer, SharedSegment, WorkerConfig, WorkerError,
};

enum Lifecycle {
    /// Process running, pipes not yet handed to a requester.
    Spawned {
        stdin: ChildStdin,
        stdout: ChildStdout,
    },
    Initializing,
    Ready,
    Disposed,
}

impl Lifecycle {
    fn label(&self) -> &'static str {
        match self {
            Lifecycle::Spawned { .. } => "spawned",
            Lifecycle::Initializing => "initializing",
            Lifecycle::Ready => "ready",
            Lifecycle::Disposed => "disposed",
        }
    }
}

/// A worker process plus everything needed to talk to it.
///
/// `spawned → initializing → ready → disposed`. Data access is only allowed
/// while ready; [`dispose`](Self::dispose) may be called from any state and
/// more than once.
pub struct Subprocess {
    self_ref: Weak<Subprocess>,
    name: Mutex<String>,
    pid: u32,
    provider: ScriptProviderInfo,
    poll_interval: Duration,
    handshake_timeout: Duration,
    shutdown_timeout: Duration,
    process: Mutex<ProcessHandle>,
    lifecycle: Mutex<Lifecycle>,
    requester: OnceLock<Requester>,
    frame_buffer: Mutex<Option<Arc<SharedFrameBuffer>>>,
    /// Owning pool and the name it is filed under there.
    pool: Mutex<Option<(Weak<WorkerPool>, String)>>,
}

impl Subprocess {
    /// Start a worker process. It preloads and then waits for
    /// [`Script::initialize`] to send it `provider`.
    pub fn spawn(config: &WorkerConfig, provider: ScriptProviderInfo) -> Result<Arc<Self>> {
        config.validate()?;
        let executable = config.resolve_worker_executable()?;
        let frame_buffer = SharedFrameBuffer::create(config.frame_buffer_size)?
            .with_inline_threshold(config.effective_inline_threshold());
        let buffer_fd = frame_buffer.raw_fd();

        let mut command = ProcessCommand::new(&executable);
        command
            .arg("--frame-buffer-fd")
            .arg(buffer_fd.to_string())
            .arg("--frame-buffer-size")
            .arg(frame_buffer.capacity().to_string())
            .arg("--inline-threshold")
            .arg(frame_buffer.inline_threshold().to_string())
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .arg("--poll-interval-ms")
            .arg(config.poll_interval_ms.to_string())
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // SAFETY: the hook only calls fcntl, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || SharedSegment::inherit_into_child(buffer_fd));
        }

        let mut process = ProcessHandle::spawn(command, &executable.display().to_string())?;
        let pid = process.pid();
        let name = format!("worker-{}", pid);
        process.set_name(name.clone());

        let (Some(stdin), Some(stdout)) = (process.take_stdin(), process.take_stdout()) else {
            return Err(WorkerError::Spawn(format!(
                "worker {} was started without its pipes",
                pid
            )));
        };

        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            name: Mutex::new(name),
            pid,
            provider,
            poll_interval: config.poll_interval(),
            handshake_timeout: config.handshake_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            process: Mutex::new(process),
            lifecycle: Mutex::new(Lifecycle::Spawned { stdin, stdout }),
            requester: OnceLock::new(),
            frame_buffer: Mutex::new(Some(Arc::new(frame_buffer))),
            pool: Mutex::new(None),
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn provider(&self) -> &ScriptProviderInfo {
        &self.provider
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Disposed)
    }

    /// True while spawned and not yet handed a provider.
    pub fn is_unstarted(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Spawned { .. })
    }

    pub(super) fn attach(&self, pool: Weak<WorkerPool>, name: &str) {
        *self.name.lock() = name.to_string();
        self.process.lock().set_name(name);
        *self.pool.lock() = Some((pool, name.to_string()));
    }

    /// Send a command to the worker. Fails with `WorkerUnavailable` unless
    /// the handshake completed and the worker was not disposed.
    pub fn submit(&self, command: Command) -> Deferred<Reply> {
        let state = self.lifecycle.lock().label();
        match (state, self.requester.get()) {
            ("ready", Some(requester)) => requester.submit(command),
            _ => Deferred::failed(WorkerError::WorkerUnavailable(format!(
                "worker '{}' is {}",
                self.name(),
                state
            ))),
        }
    }

    /// Shared buffer for `results/raw` transfers.
    pub fn frame_buffer(&self) -> Result<Arc<SharedFrameBuffer>> {
        self.frame_buffer.lock().clone().ok_or_else(|| {
            WorkerError::WorkerUnavailable(format!("worker '{}' is disposed", self.name()))
        })
    }

    fn handshake(&self) -> Result<()> {
        let (mut stdin, mut stdout) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Initializing) {
                Lifecycle::Spawned { stdin, stdout } => (stdin, stdout),
                Lifecycle::Disposed => {
                    *lifecycle = Lifecycle::Disposed;
                    return Err(WorkerError::AlreadyDisposed(self.name()));
                }
                other => {
                    let state = other.label();
                    *lifecycle = other;
                    return Err(WorkerError::Handshake(format!(
                        "worker '{}' is already {}",
                        self.name(),
                        state
                    )));
                }
            }
        };

        tracing::debug!(
            "Sending provider '{}' to worker '{}'",
            self.provider.provider_class,
            self.name()
        );
        codec::write_frame(&mut stdin, &self.provider).map_err(|e| {
            WorkerError::Handshake(format!(
                "could not send provider to worker '{}': {}",
                self.name(),
                e
            ))
        })?;

        match self.await_handshake(&mut stdout)? {
            HandshakeReply::Ready { pid } => {
                tracing::info!("Worker '{}' ready (pid {})", self.name(), pid);
            }
            HandshakeReply::Failed(remote) => {
                let err = WorkerError::from_remote(remote);
                return Err(WorkerError::Handshake(format!(
                    "worker '{}' failed to boot: {}",
                    self.name(),
                    err
                )));
            }
        }

        let requester = Requester::start(
            self.pid.to_string(),
            stdout,
            Box::new(stdin),
            self.poll_interval,
        )?;

        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Initializing) {
            // Disposed while the handshake was in flight.
            requester.stop();
            return Err(WorkerError::AlreadyDisposed(self.name()));
        }
        if self.requester.set(requester).is_err() {
            return Err(WorkerError::Handshake(format!(
                "worker '{}' was initialized twice",
                self.name()
            )));
        }
        *lifecycle = Lifecycle::Ready;
        Ok(())
    }

    /// Bounded wait for the handshake reply, watching for an early exit.
    fn await_handshake(&self, stdout: &mut ChildStdout) -> Result<HandshakeReply> {
        let deadline = Instant::now() + self.handshake_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "Worker '{}' did not answer within {:?}",
                    self.name(),
                    self.handshake_timeout
                );
                return Err(WorkerError::HandshakeTimeout(self.name()));
            }

            let wait = self.poll_interval.min(deadline - now);
            match codec::poll_readable(stdout.as_raw_fd(), wait) {
                Ok(true) => {
                    return codec::read_message::<_, HandshakeReply>(stdout)?.ok_or_else(|| {
                        WorkerError::Handshake(format!(
                            "worker '{}' closed its channel during the handshake",
                            self.name()
                        ))
                    });
                }
                Ok(false) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(status) = self.process.lock().try_wait()? {
                return Err(WorkerError::Handshake(format!(
                    "worker '{}' exited during the handshake ({})",
                    self.name(),
                    status
                )));
            }
        }
    }

    /// Release the process, both pipes and the frame buffer. Errors are
    /// logged; a second call does nothing.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Disposed);
        if matches!(previous, Lifecycle::Disposed) {
            return;
        }
        tracing::debug!("Disposing worker '{}' ({})", self.name(), previous.label());
        // Closes the pipes if no requester owns them yet.
        drop(previous);

        if let Some(requester) = self.requester.get() {
            requester.stop();
        }
        if let Err(e) = self.process.lock().shutdown(self.shutdown_timeout) {
            tracing::warn!("Worker '{}' did not shut down cleanly: {}", self.name(), e);
        }
        self.frame_buffer.lock().take();

        let pool = self.pool.lock().take();
        if let Some((pool, name)) = pool {
            if let (Some(pool), Some(me)) = (pool.upgrade(), self.self_ref.upgrade()) {
                pool.detach(&name, &me);
            }
        }
    }
}

impl Script for Subprocess {
    fn alive(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Ready)
            && self.requester.get().is_some_and(|r| !r.is_closed())
            && self.process.lock().is_running()
    }

    /// Run the handshake. On failure the worker is disposed.
    fn initialize(&self) -> Result<()> {
        let result = self.handshake();
        if let Err(e) = &result {
            tracing::error!("Initializing worker '{}' failed: {}", self.name(), e);
            self.dispose();
        }
        result
    }

    fn dispose(&self) {
        Subprocess::dispose(self);
    }

    fn execute(&self, source: ScriptSource) -> Deferred<Option<String>> {
        self.submit(Command::Execute(source.into()))
            .map(Reply::into_executed)
    }

    fn get_results(&self) -> Deferred<ClipMap> {
        let Some(worker) = self.self_ref.upgrade() else {
            return Deferred::failed(WorkerError::WorkerUnavailable(self.name()));
        };
        self.submit(Command::Results).map(move |reply| {
            Ok(reply
                .into_results()?
                .into_iter()
                .map(|(name, length)| {
                    let clip = ProxyClip::new(name.clone(), length, Arc::clone(&worker));
                    (name, Arc::new(clip) as Arc<dyn Clip>)
                })
                .collect())
        })
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subprocess")
            .field("name", &self.name())
            .field("pid", &self.pid)
            .field("state", &self.lifecycle.lock().label())
            .finish()
    }
}
