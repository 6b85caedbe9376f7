// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared memory used to hand raw frames from a worker to the controller.
//!
//! The worker copies a frame into the buffer and answers `results/raw` with
//! the byte count. The controller copies the bytes out before it lets any
//! other raw transfer start. Payloads larger than the inline threshold skip
//! the buffer and travel in the response instead.

mod gate;
mod segment;

pub use gate::{TransferGate, TransferPermit};
pub use segment::SharedSegment;

use std::ops::{Deref, DerefMut};
use std::os::fd::RawFd;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use crate::core::protocol::RawPayload;
use crate::core::{Result, WorkerError};

/// Largest supported frame: 8K, three 8-bit planes.
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 7680 * 4320 * 3;

pub struct SharedFrameBuffer {
    segment: SharedSegment,
    lock: Mutex<()>,
    inline_threshold: usize,
    gate: TransferGate,
}

impl SharedFrameBuffer {
    /// Allocate a fresh segment of `capacity` bytes.
    pub fn create(capacity: usize) -> Result<Self> {
        let name = format!("clipworker-{}", cuid2::create_id());
        Ok(Self::from_segment(SharedSegment::create(&name, capacity)?))
    }

    /// Map a segment inherited from the controller.
    ///
    /// # Safety
    ///
    /// See [`SharedSegment::from_raw_fd`].
    pub unsafe fn from_raw_fd(fd: RawFd, capacity: usize) -> Result<Self> {
        // SAFETY: forwarded to the caller.
        Ok(Self::from_segment(unsafe {
            SharedSegment::from_raw_fd(fd, capacity)
        }?))
    }

    fn from_segment(segment: SharedSegment) -> Self {
        let capacity = segment.len();
        Self {
            segment,
            lock: Mutex::new(()),
            inline_threshold: capacity,
            gate: TransferGate::new(),
        }
    }

    /// Payloads strictly larger than `threshold` are sent inline. Clamped to
    /// the capacity.
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold.min(self.capacity());
        self
    }

    pub fn capacity(&self) -> usize {
        self.segment.len()
    }

    pub fn inline_threshold(&self) -> usize {
        self.inline_threshold
    }

    pub fn raw_fd(&self) -> RawFd {
        self.segment.raw_fd()
    }

    /// Lock the buffer and view all of it. The lock is released when the
    /// guard drops, including during unwinding.
    pub fn with_exclusive_access(&self) -> FrameBufferGuard<'_> {
        FrameBufferGuard {
            _lock: self.lock.lock(),
            segment: &self.segment,
        }
    }

    /// Worker side: place `data` for the controller to pick up.
    pub fn store(&self, data: &[u8]) -> RawPayload {
        if data.len() > self.inline_threshold {
            tracing::debug!(
                "Payload of {} bytes exceeds threshold {}; sending inline",
                data.len(),
                self.inline_threshold
            );
            return RawPayload::Inline(data.to_vec());
        }
        let mut view = self.with_exclusive_access();
        view[..data.len()].copy_from_slice(data);
        RawPayload::Shared(data.len())
    }

    /// Controller side: copy a payload out. The buffer contents are only
    /// valid until the next transfer, so shared payloads are copied.
    pub fn load(&self, payload: RawPayload) -> Result<Bytes> {
        match payload {
            RawPayload::Inline(data) => Ok(Bytes::from(data)),
            RawPayload::Shared(len) if len > self.capacity() => Err(WorkerError::Protocol(
                format!(
                    "worker announced {} bytes in a {} byte frame buffer",
                    len,
                    self.capacity()
                ),
            )),
            RawPayload::Shared(len) => {
                let view = self.with_exclusive_access();
                Ok(Bytes::copy_from_slice(&view[..len]))
            }
        }
    }

    /// Wait for exclusive use of the buffer across a whole raw round trip.
    pub async fn begin_transfer(&self) -> TransferPermit<'_> {
        self.gate.acquire().await
    }
}

impl std::fmt::Debug for SharedFrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFrameBuffer")
            .field("fd", &self.raw_fd())
            .field("capacity", &self.capacity())
            .field("inline_threshold", &self.inline_threshold)
            .finish()
    }
}

pub struct FrameBufferGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    segment: &'a SharedSegment,
}

impl Deref for FrameBufferGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the mapping is `len` bytes and lives as long as `segment`;
        // the lock guarantees no other view exists in this process.
        unsafe { std::slice::from_raw_parts(self.segment.as_ptr(), self.segment.len()) }
    }
}

impl DerefMut for FrameBufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this view unique.
        unsafe { std::slice::from_raw_parts_mut(self.segment.as_ptr(), self.segment.len()) }
    }
}
