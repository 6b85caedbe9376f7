// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Duplex message pump shared by both protocol roles.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use super::codec;
use super::messages::Message;
use crate::core::{Result, WorkerError};

/// Readable end of a channel that can be polled.
pub trait ReadChannel: Read + AsRawFd + Send + 'static {}

impl<T: Read + AsRawFd + Send + 'static> ReadChannel for T {}

/// Why the read loop ended.
#[derive(Debug, Clone)]
pub enum Disconnect {
    /// `stop()` was called.
    Stopped,
    /// The peer closed its end.
    Closed,
    /// Reading failed.
    Failed(WorkerError),
}

/// Role-specific reaction to incoming traffic.
pub trait MessageSink: Send + Sync + 'static {
    fn on_message(&self, message: Message);
    fn on_disconnect(&self, reason: Disconnect);
}

/// Owns the write half of a channel and a background reader thread.
pub struct Handler {
    label: String,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    frame_limit: AtomicUsize,
    stopped: AtomicBool,
    reader: Mutex<Option<(ThreadId, JoinHandle<()>)>>,
}

impl Handler {
    pub fn new(label: impl Into<String>, writer: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            writer: Mutex::new(Some(writer)),
            frame_limit: AtomicUsize::new(codec::MAX_FRAME_LEN),
            stopped: AtomicBool::new(false),
            reader: Mutex::new(None),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Largest message body [`send`](Self::send) will write.
    pub fn set_frame_limit(&self, limit: usize) {
        self.frame_limit.store(limit, Ordering::Relaxed);
    }

    /// Spawn the reader thread. It polls `channel` every `poll_interval` so
    /// that `stop()` is observed promptly even when the peer is silent.
    pub fn start<R: ReadChannel>(
        self: &Arc<Self>,
        channel: R,
        poll_interval: Duration,
        sink: Arc<dyn MessageSink>,
    ) -> Result<()> {
        let handler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-reader", self.label))
            .spawn(move || {
                let reason = handler.read_loop(channel, poll_interval, sink.as_ref());
                tracing::debug!("[{}] Reader finished: {:?}", handler.label, reason);
                sink.on_disconnect(reason);
            })?;
        *self.reader.lock() = Some((handle.thread().id(), handle));
        Ok(())
    }

    fn read_loop<R: ReadChannel>(
        &self,
        mut channel: R,
        poll_interval: Duration,
        sink: &dyn MessageSink,
    ) -> Disconnect {
        let fd: RawFd = channel.as_raw_fd();
        loop {
            if self.is_stopped() {
                return Disconnect::Stopped;
            }

            match codec::poll_readable(fd, poll_interval) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Disconnect::Failed(e.into()),
            }

            let body = match codec::read_frame(&mut channel) {
                Ok(Some(body)) => body,
                Ok(None) => return Disconnect::Closed,
                Err(e) => return Disconnect::Failed(e),
            };

            match codec::decode::<Message>(&body) {
                Ok(message) => sink.on_message(message),
                Err(e) => {
                    tracing::warn!("[{}] Dropping malformed message: {}", self.label, e);
                }
            }
        }
    }

    /// Write one message. Concurrent callers are serialized, so frames never
    /// interleave.
    pub fn send(&self, message: &Message) -> Result<()> {
        let frame = codec::encode_limited(message, self.frame_limit.load(Ordering::Relaxed))?;
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(WorkerError::WorkerUnavailable(format!(
                "channel '{}' is closed",
                self.label
            )));
        };
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Close the write half and wait for the reader to notice. Safe to call
    /// more than once and from the reader thread itself.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("[{}] Stopping", self.label);
        drop(self.writer.lock().take());

        let reader = self.reader.lock().take();
        if let Some((id, handle)) = reader {
            if id == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("[{}] Reader thread panicked", self.label);
            }
        }
    }
}
