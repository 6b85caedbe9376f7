// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::{ProxyFrame, WeakProxyFrame};
use crate::core::{Clip, Deferred, Frame, Result, Subprocess, WorkerError};

/// A clip that lives in a worker. The length is known up front; frames are
/// realized lazily.
///
/// The clip only remembers frames weakly: a frame and its cached payloads
/// are shared while some caller holds it and released once nobody does.
pub struct ProxyClip {
    name: String,
    length: u32,
    worker: Arc<Subprocess>,
    frames: Mutex<HashMap<u32, WeakProxyFrame>>,
}

impl ProxyClip {
    pub fn new(name: String, length: u32, worker: Arc<Subprocess>) -> Self {
        Self {
            name,
            length,
            worker,
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker(&self) -> &Arc<Subprocess> {
        &self.worker
    }

    /// Frame `index`. No round trip. While a previous result for the same
    /// index is still held, its cache is shared.
    pub fn get(&self, index: u32) -> Result<ProxyFrame> {
        if index >= self.length {
            return Err(WorkerError::IndexOutOfRange {
                index,
                length: self.length,
            });
        }
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&index).and_then(WeakProxyFrame::upgrade) {
            return Ok(frame);
        }
        frames.retain(|_, frame| frame.upgrade().is_some());
        let frame = ProxyFrame::new(self.name.clone(), index, Arc::clone(&self.worker));
        frames.insert(index, frame.downgrade());
        Ok(frame)
    }
}

impl Clip for ProxyClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u32 {
        self.length
    }

    fn frame(&self, index: u32) -> Deferred<Arc<dyn Frame>> {
        Deferred::from_result(self.get(index).map(|frame| Arc::new(frame) as Arc<dyn Frame>))
    }
}

impl std::fmt::Debug for ProxyClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClip")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("worker", &self.worker.pid())
            .finish()
    }
}
