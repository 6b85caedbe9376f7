// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::{Deferred, WeakDeferred};

#[derive(Default)]
struct GateState {
    busy: bool,
    waiters: VecDeque<WeakDeferred<()>>,
}

/// FIFO, single-holder gate that coroutines await instead of blocking a thread.
///
/// Waiters are held weakly; a waiter whose coroutine is gone is skipped when
/// the gate is handed on.
#[derive(Default)]
pub struct TransferGate {
    state: Mutex<GateState>,
}

impl TransferGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> TransferPermit<'_> {
        let turn = {
            let mut state = self.state.lock();
            if state.busy {
                let turn = Deferred::new();
                state.waiters.push_back(turn.downgrade());
                Some(turn)
            } else {
                state.busy = true;
                None
            }
        };
        if let Some(turn) = turn {
            // Only ever resolved, never failed.
            let _ = turn.await;
        }
        TransferPermit { gate: self }
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    fn release(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.waiters.pop_front() {
                    Some(next) => next,
                    None => {
                        state.busy = false;
                        return;
                    }
                }
            };
            // Ownership passes straight to the next live waiter.
            if next.upgrade().is_some_and(|turn| turn.resolve(())) {
                return;
            }
        }
    }
}

/// Held for the duration of one transfer.
pub struct TransferPermit<'a> {
    gate: &'a TransferGate,
}

impl Drop for TransferPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
