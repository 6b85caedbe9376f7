// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Write-once result cell shared between a producer and any number of observers.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{Result, WorkerError};

type DoneCallback<T> = Box<dyn FnOnce(Result<T>) + Send>;
type Anchor = Box<dyn Any + Send>;

enum State<T> {
    Pending { running: bool },
    Done(Result<T>),
}

struct Slot<T> {
    state: State<T>,
    callbacks: Vec<DoneCallback<T>>,
    wakers: Vec<Waker>,
    /// Upstream cells this one is derived from. Producers such as the
    /// Requester only hold weak references, so a derived cell keeps its
    /// sources alive until it settles.
    anchors: Vec<Anchor>,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// A value or error that becomes available exactly once.
///
/// Cloning a `Deferred` yields another handle to the same cell. Observers can
/// block with [`join`](Self::join), register a callback, or `.await` it from a
/// coroutine driven by [`run_coroutine`](super::run_coroutine).
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot.lock();
        let state = match &slot.state {
            State::Pending { running: false } => "pending",
            State::Pending { running: true } => "running",
            State::Done(Ok(_)) => "resolved",
            State::Done(Err(WorkerError::Cancelled)) => "cancelled",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    state: State::Pending { running: false },
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                    anchors: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn resolved(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    pub fn failed(error: WorkerError) -> Self {
        Self::from_result(Err(error))
    }

    pub fn from_result(result: Result<T>) -> Self {
        let deferred = Self::new();
        deferred.settle(result);
        deferred
    }

    /// Mark the producer as started. Returns false if the cell was already
    /// settled (for instance cancelled before work began).
    pub fn set_running(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        match &mut slot.state {
            State::Pending { running } => {
                *running = true;
                true
            }
            State::Done(_) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.inner.slot.lock().state,
            State::Pending { running: true }
        )
    }

    pub fn is_done(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.slot.lock().state,
            State::Done(Err(WorkerError::Cancelled))
        )
    }

    /// Cancel a cell whose producer has not started yet.
    pub fn cancel(&self) -> bool {
        self.settle_when(Err(WorkerError::Cancelled), |state| {
            matches!(state, State::Pending { running: false })
        })
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, error: WorkerError) -> bool {
        self.settle(Err(error))
    }

    /// Store the outcome. Only the first call has any effect.
    pub fn settle(&self, result: Result<T>) -> bool {
        self.settle_when(result, |state| matches!(state, State::Pending { .. }))
    }

    fn settle_when(&self, result: Result<T>, allowed: impl Fn(&State<T>) -> bool) -> bool {
        let (callbacks, wakers, anchors) = {
            let mut slot = self.inner.slot.lock();
            if !allowed(&slot.state) {
                return false;
            }
            slot.state = State::Done(result.clone());
            (
                std::mem::take(&mut slot.callbacks),
                std::mem::take(&mut slot.wakers),
                std::mem::take(&mut slot.anchors),
            )
        };
        // Released outside the lock; dropping a source may run its Drop.
        drop(anchors);

        self.inner.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(result.clone());
        }
        true
    }

    /// Run `callback` with the outcome. Fires immediately if already settled.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let ready = {
            let mut slot = self.inner.slot.lock();
            match &slot.state {
                State::Done(result) => Some(result.clone()),
                State::Pending { .. } => {
                    slot.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(result) = ready {
            callback(result);
        }
    }

    /// Keep `source` alive until this cell settles.
    pub(crate) fn retain_until_settled<S: Send + 'static>(&self, source: S) {
        let mut slot = self.inner.slot.lock();
        if let State::Pending { .. } = slot.state {
            slot.anchors.push(Box::new(source));
        }
    }

    pub fn try_result(&self) -> Option<Result<T>> {
        match &self.inner.slot.lock().state {
            State::Done(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Block the calling thread until settled.
    ///
    /// Only for thread or process boundaries. Calling this from inside a
    /// coroutine stalls whichever thread is driving it.
    pub fn join(&self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            if let State::Done(result) = &slot.state {
                return result.clone();
            }
            self.inner.done.wait(&mut slot);
        }
    }

    pub fn join_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        loop {
            if let State::Done(result) = &slot.state {
                return result.clone();
            }
            if self.inner.done.wait_until(&mut slot, deadline).timed_out() {
                if let State::Done(result) = &slot.state {
                    return result.clone();
                }
                return Err(WorkerError::Timeout(format!(
                    "no result after {:?}",
                    timeout
                )));
            }
        }
    }

    /// Derive a new cell from this one's value.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let mapped = Deferred::new();
        mapped.set_running();
        mapped.retain_until_settled(self.clone());
        let target = mapped.clone();
        self.add_done_callback(move |result| {
            target.settle(result.and_then(f));
        });
        mapped
    }

    /// Forward this cell's outcome into `target`.
    pub fn chain_into(&self, target: &Deferred<T>) {
        target.retain_until_settled(self.clone());
        let target = target.clone();
        self.add_done_callback(move |result| {
            target.settle(result);
        });
    }

    pub fn downgrade(&self) -> WeakDeferred<T> {
        WeakDeferred {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.inner.slot.lock();
        if let State::Done(result) = &slot.state {
            return Poll::Ready(result.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Non-owning handle, used where an outcome is only worth delivering while
/// somebody still holds the cell.
pub struct WeakDeferred<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakDeferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakDeferred<T> {
    pub fn upgrade(&self) -> Option<Deferred<T>> {
        self.inner.upgrade().map(|inner| Deferred { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_settles_only_once() {
        let d = Deferred::new();
        assert!(d.resolve(1));
        assert!(!d.resolve(2));
        assert!(!d.fail(WorkerError::Cancelled));
        assert_eq!(d.join().ok(), Some(1));
    }

    #[test]
    fn test_late_callback_fires_immediately() {
        let d = Deferred::resolved("done".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        d.add_done_callback(move |r| {
            assert_eq!(r.ok().as_deref(), Some("done"));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_run_on_settle() {
        let d: Deferred<u32> = Deferred::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = hits.clone();
            d.add_done_callback(move |r| {
                assert!(r.is_err());
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        d.fail(WorkerError::SystemStopped);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_only_before_running() {
        let idle: Deferred<u8> = Deferred::new();
        assert!(idle.cancel());
        assert!(idle.is_cancelled());
        assert!(!idle.set_running());

        let busy: Deferred<u8> = Deferred::new();
        assert!(busy.set_running());
        assert!(!busy.cancel());
        assert!(busy.is_running());
    }

    #[test]
    fn test_join_across_threads() {
        let d: Deferred<u64> = Deferred::new();
        let producer = d.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.resolve(42);
        });
        assert_eq!(d.join_timeout(Duration::from_secs(5)).ok(), Some(42));
        t.join().unwrap();
    }

    #[test]
    fn test_join_timeout_expires() {
        let d: Deferred<u64> = Deferred::new();
        let err = d.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_map_and_chain() {
        let source: Deferred<u32> = Deferred::new();
        let doubled = source.map(|v| Ok(v * 2));
        let sink = Deferred::new();
        doubled.chain_into(&sink);
        source.resolve(21);
        assert_eq!(sink.join().ok(), Some(42));
    }

    #[test]
    fn test_mapped_cell_keeps_weakly_held_source_alive() {
        let source: Deferred<u32> = Deferred::new();
        let producer = source.downgrade();
        let mapped = source.map(|v| Ok(v + 1));
        drop(source);

        let upstream = producer.upgrade().unwrap();
        upstream.resolve(1);
        drop(upstream);
        assert_eq!(mapped.join_timeout(Duration::from_secs(1)).ok(), Some(2));
        // Released once settled.
        assert!(producer.upgrade().is_none());
    }

    #[test]
    fn test_chained_target_keeps_source_alive() {
        let source: Deferred<u32> = Deferred::new();
        let producer = source.downgrade();
        let sink = Deferred::new();
        source.chain_into(&sink);
        drop(source);

        producer.upgrade().unwrap().fail(WorkerError::SystemStopped);
        assert_eq!(sink.join().unwrap_err().kind(), "system_stopped");
        assert!(producer.upgrade().is_none());
    }

    #[test]
    fn test_weak_handle_dies_with_last_owner() {
        let d: Deferred<u8> = Deferred::new();
        let weak = d.downgrade();
        assert!(weak.upgrade().is_some());
        drop(d);
        assert!(weak.upgrade().is_none());
    }
}
