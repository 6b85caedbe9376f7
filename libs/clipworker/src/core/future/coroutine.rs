// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Trampoline that drives an `async` block to completion without an executor.
//!
//! The coroutine is polled on whichever thread wakes it: the caller's thread
//! first, then the thread that settles each awaited [`Deferred`]. Wake-ups
//! that arrive while a poll is in progress are folded into the running poll
//! loop instead of recursing, so a long chain of already-settled awaits uses
//! constant stack.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use super::Deferred;
use crate::core::{Result, WorkerError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const NOTIFIED: u8 = 2;
const COMPLETE: u8 = 3;

struct CoroutineTask<T> {
    future: Mutex<Option<BoxFuture<T>>>,
    state: AtomicU8,
    result: Deferred<T>,
}

impl<T: Clone + Send + 'static> CoroutineTask<T> {
    fn schedule(self: &Arc<Self>) {
        loop {
            match self
                .state
                .compare_exchange(IDLE, POLLING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.drive();
                    return;
                }
                Err(POLLING) => {
                    if self
                        .state
                        .compare_exchange(POLLING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already notified or finished.
                Err(_) => return,
            }
        }
    }

    fn drive(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        loop {
            let mut slot = self.future.lock();
            let Some(future) = slot.as_mut() else {
                self.state.store(COMPLETE, Ordering::Release);
                return;
            };

            let outcome = match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Pending) => None,
                Ok(Poll::Ready(result)) => Some(result),
                Err(panic) => Some(Err(WorkerError::Script(format!(
                    "coroutine panicked: {}",
                    panic_message(panic.as_ref())
                )))),
            };

            if let Some(result) = outcome {
                *slot = None;
                drop(slot);
                self.state.store(COMPLETE, Ordering::Release);
                self.result.settle(result);
                return;
            }
            drop(slot);

            match self
                .state
                .compare_exchange(POLLING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(_) => self.state.store(POLLING, Ordering::Release),
            }
        }
    }
}

impl<T: Clone + Send + 'static> Wake for CoroutineTask<T> {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drive `coroutine` and expose its eventual return value as a [`Deferred`].
///
/// The first poll happens before this returns. A coroutine that never awaits
/// anything pending therefore comes back already settled.
pub fn run_coroutine<T, F>(coroutine: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let result = Deferred::new();
    result.set_running();

    let task = Arc::new(CoroutineTask {
        future: Mutex::new(Some(Box::pin(coroutine))),
        state: AtomicU8::new(IDLE),
        result: result.clone(),
    });
    task.schedule();
    result
}

/// Run `f` now and wrap its outcome in an already-settled [`Deferred`].
pub fn inline_resolved<T, F>(f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Deferred::from_result(result),
        Err(panic) => Deferred::failed(WorkerError::Script(panic_message(panic.as_ref()))),
    }
}

/// Adapt a blocking function to the `Deferred` calling convention.
pub fn synchronous_wrap<A, T, F>(f: F) -> impl Fn(A) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: Fn(A) -> Result<T>,
{
    move |arg| inline_resolved(|| f(arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_coroutine_without_suspension_is_settled_on_return() {
        let d = run_coroutine(async { Ok(7u32) });
        assert!(d.is_done());
        assert_eq!(d.try_result().and_then(|r| r.ok()), Some(7));
    }

    #[test]
    fn test_resumes_after_remote_resolution() {
        let step: Deferred<u32> = Deferred::new();
        let awaited = step.clone();
        let d = run_coroutine(async move {
            let v = awaited.await?;
            Ok(v + 1)
        });
        assert!(!d.is_done());

        let producer = step.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.resolve(41);
        });
        assert_eq!(d.join_timeout(Duration::from_secs(5)).ok(), Some(42));
        t.join().unwrap();
    }

    #[test]
    fn test_error_reaches_coroutine_handler() {
        let step: Deferred<u32> = Deferred::failed(WorkerError::FrameNotFound("x".into()));
        let d = run_coroutine(async move {
            match step.await {
                Ok(_) => Ok("value"),
                Err(WorkerError::FrameNotFound(_)) => Ok("handled"),
                Err(e) => Err(e),
            }
        });
        assert_eq!(d.join().ok(), Some("handled"));
    }

    #[test]
    fn test_unhandled_error_fails_result() {
        let d: Deferred<u32> = run_coroutine(async {
            Deferred::<u32>::failed(WorkerError::Script("bad".into())).await
        });
        assert_eq!(d.join().unwrap_err().kind(), "script");
    }

    #[test]
    fn test_long_chain_does_not_grow_stack() {
        let d = run_coroutine(async {
            let mut total = 0u64;
            for i in 0..100_000u64 {
                total += Deferred::resolved(i).await?;
            }
            Ok(total)
        });
        assert_eq!(d.join().ok(), Some((0..100_000u64).sum()));
    }

    #[test]
    fn test_chain_of_cross_thread_wakeups() {
        let d = run_coroutine(async {
            let mut total = 0u32;
            for i in 0..50u32 {
                let step = Deferred::new();
                let producer = step.clone();
                thread::spawn(move || {
                    producer.resolve(i);
                });
                total += step.await?;
            }
            Ok(total)
        });
        assert_eq!(d.join_timeout(Duration::from_secs(10)).ok(), Some((0..50).sum()));
    }

    #[test]
    fn test_panic_becomes_error() {
        let d: Deferred<u8> = run_coroutine(async {
            if true {
                panic!("exploded");
            }
            Ok(0)
        });
        let err = d.join().unwrap_err();
        assert!(err.to_string().contains("exploded"));
    }

    #[test]
    fn test_synchronous_wrap() {
        let halve = synchronous_wrap(|v: u32| {
            if v % 2 == 0 {
                Ok(v / 2)
            } else {
                Err(WorkerError::Script(format!("{} is odd", v)))
            }
        });
        assert_eq!(halve(8).try_result().and_then(|r| r.ok()), Some(4));
        assert!(halve(3).try_result().is_some_and(|r| r.is_err()));
    }
}
