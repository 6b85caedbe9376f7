// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Controller-side protocol role: correlates Responses with pending calls.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::handler::{Disconnect, Handler, MessageSink, ReadChannel};
use super::messages::{Command, Message, Reply, Request, Response};
use crate::core::{Deferred, Result, WeakDeferred, WorkerError};

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<u64, WeakDeferred<Reply>>,
    /// Set once the channel is gone; later submissions fail with it.
    closed: Option<WorkerError>,
}

struct RequesterState {
    label: String,
    pending: Mutex<PendingTable>,
}

pub struct Requester {
    handler: Arc<Handler>,
    state: Arc<RequesterState>,
    next_id: AtomicU64,
}

impl Requester {
    pub fn start<R: ReadChannel>(
        label: impl Into<String>,
        reader: R,
        writer: Box<dyn Write + Send>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let label = label.into();
        let handler = Handler::new(format!("requester-{}", label), writer);
        let state = Arc::new(RequesterState {
            label,
            pending: Mutex::new(PendingTable::default()),
        });
        handler.start(reader, poll_interval, Arc::clone(&state) as Arc<dyn MessageSink>)?;
        Ok(Self {
            handler,
            state,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send `command` and return immediately with a running cell for the
    /// reply.
    ///
    /// Only a weak reference is kept here. If every caller drops the returned
    /// cell (and every cell derived from it), the eventual response is
    /// discarded.
    pub fn submit(&self, command: Command) -> Deferred<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deferred = Deferred::new();
        deferred.set_running();

        let request = match Request::new(id, &command) {
            Ok(request) => request,
            Err(e) => {
                deferred.fail(e);
                return deferred;
            }
        };

        {
            let mut pending = self.state.pending.lock();
            if let Some(err) = &pending.closed {
                deferred.fail(err.clone());
                return deferred;
            }
            pending.waiting.insert(id, deferred.downgrade());
        }

        if let Err(e) = self.handler.send(&Message::Request(request)) {
            self.state.pending.lock().waiting.remove(&id);
            deferred.fail(WorkerError::WorkerUnavailable(format!(
                "worker '{}' could not be reached: {}",
                self.state.label, e
            )));
        }
        deferred
    }

    pub fn outstanding(&self) -> usize {
        self.state.pending.lock().waiting.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.pending.lock().closed.is_some()
    }

    /// Stop the reader and fail everything still waiting.
    pub fn stop(&self) {
        self.handler.stop();
        self.state.close(WorkerError::WorkerUnavailable(format!(
            "worker '{}' was disposed",
            self.state.label
        )));
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RequesterState {
    fn handle_response(&self, response: Response) {
        let waiter = self.pending.lock().waiting.remove(&response.id);
        let Some(deferred) = waiter.and_then(|w| w.upgrade()) else {
            tracing::trace!(
                "[{}] Discarding response for abandoned request {}",
                self.label,
                response.id
            );
            return;
        };
        if deferred.is_cancelled() {
            return;
        }
        deferred.settle(response.into_result());
    }

    fn close(&self, error: WorkerError) {
        let waiting = {
            let mut pending = self.pending.lock();
            if pending.closed.is_none() {
                pending.closed = Some(error.clone());
            }
            std::mem::take(&mut pending.waiting)
        };
        if !waiting.is_empty() {
            tracing::debug!(
                "[{}] Failing {} outstanding request(s): {}",
                self.label,
                waiting.len(),
                error
            );
        }
        for deferred in waiting.into_values().filter_map(|w| w.upgrade()) {
            deferred.fail(error.clone());
        }
    }
}

impl MessageSink for RequesterState {
    fn on_message(&self, message: Message) {
        match message {
            Message::Response(response) => self.handle_response(response),
            Message::Request(request) => {
                tracing::warn!(
                    "[{}] Ignoring request {} sent to a requester",
                    self.label,
                    request.id
                );
            }
        }
    }

    fn on_disconnect(&self, reason: Disconnect) {
        let detail = match reason {
            Disconnect::Stopped => "was disposed".to_string(),
            Disconnect::Closed => "closed its channel".to_string(),
            Disconnect::Failed(e) => format!("channel failed: {}", e),
        };
        self.close(WorkerError::WorkerUnavailable(format!(
            "worker '{}' {}",
            self.label, detail
        )));
    }
}
