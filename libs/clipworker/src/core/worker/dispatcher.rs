// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Single-threaded run loop that serializes every call into the script.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

use crate::core::future::panic_message;
use crate::core::{Deferred, Result, WorkerError};

/// What a queued job produced.
pub enum Dispatch<T> {
    /// A plain value or error.
    Ready(Result<T>),
    /// Work that finishes later; its outcome is forwarded.
    Pending(Deferred<T>),
}

impl<T> From<Result<T>> for Dispatch<T> {
    fn from(result: Result<T>) -> Self {
        Dispatch::Ready(result)
    }
}

impl<T> From<Deferred<T>> for Dispatch<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Dispatch::Pending(deferred)
    }
}

pub type Job<T> = Box<dyn FnOnce() -> Dispatch<T> + Send>;

/// One unit of queued work and the cell its caller is waiting on.
pub struct RequestQueueItem<T> {
    pub future: Deferred<T>,
    pub job: Job<T>,
}

pub struct LocalDispatcher<T> {
    sender: Sender<RequestQueueItem<T>>,
    receiver: Receiver<RequestQueueItem<T>>,
    /// Cleared under the write lock before the final drain, so nothing can be
    /// queued after it.
    accepting: RwLock<bool>,
    stop_requested: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<T: Clone + Send + 'static> LocalDispatcher<T> {
    pub fn new(poll_interval: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            accepting: RwLock::new(true),
            stop_requested: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    /// Queue `job` and return the cell it will settle. Never blocks.
    pub fn submit<F>(&self, job: F) -> Deferred<T>
    where
        F: FnOnce() -> Dispatch<T> + Send + 'static,
    {
        let future = Deferred::new();
        let accepting = self.accepting.read();
        if !*accepting {
            future.fail(WorkerError::SystemStopped);
            return future;
        }
        let item = RequestQueueItem {
            future: future.clone(),
            job: Box::new(job),
        };
        if self.sender.send(item).is_err() {
            future.fail(WorkerError::SystemStopped);
        }
        future
    }

    /// Flag polled by [`run`](Self::run). Signal handlers set it directly.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Process items until stopped, then fail whatever is still queued.
    pub fn run(&self) {
        tracing::debug!("Dispatcher running");
        while !self.is_stopping() {
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(item) => Self::execute(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        *self.accepting.write() = false;
        let mut drained = 0usize;
        while let Ok(item) = self.receiver.try_recv() {
            item.future.fail(WorkerError::SystemStopped);
            drained += 1;
        }
        tracing::debug!("Dispatcher stopped, {} queued item(s) failed", drained);
    }

    fn execute(item: RequestQueueItem<T>) {
        let RequestQueueItem { future, job } = item;
        if !future.set_running() {
            // Cancelled while queued.
            return;
        }

        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(Dispatch::Ready(result)) => {
                future.settle(result);
            }
            Ok(Dispatch::Pending(inner)) => inner.chain_into(&future),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Dispatched job panicked: {}", message);
                future.fail(WorkerError::Script(format!("job panicked: {}", message)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_dispatcher() -> (Arc<LocalDispatcher<u32>>, thread::JoinHandle<()>) {
        let dispatcher = Arc::new(LocalDispatcher::new(Duration::from_millis(10)));
        let runner = Arc::clone(&dispatcher);
        let handle = thread::spawn(move || runner.run());
        (dispatcher, handle)
    }

    #[test]
    fn test_jobs_run_in_fifo_order_on_one_thread() {
        let (dispatcher, handle) = spawn_dispatcher();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..20u32)
            .map(|i| {
                let seen = Arc::clone(&seen);
                dispatcher.submit(move || {
                    seen.lock().push((i, thread::current().id()));
                    Dispatch::Ready(Ok(i))
                })
            })
            .collect();
        for (i, f) in futures.iter().enumerate() {
            assert_eq!(f.join_timeout(Duration::from_secs(5)).unwrap(), i as u32);
        }

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(seen.windows(2).all(|w| w[0].1 == w[1].1));

        dispatcher.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_pending_results_are_chained() {
        let (dispatcher, handle) = spawn_dispatcher();
        let inner: Deferred<u32> = Deferred::new();
        let produced = inner.clone();
        let outer = dispatcher.submit(move || produced.into());

        thread::sleep(Duration::from_millis(30));
        assert!(outer.is_running());
        inner.resolve(5);
        assert_eq!(outer.join_timeout(Duration::from_secs(5)).unwrap(), 5);

        dispatcher.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_errors_and_panics_fail_the_item() {
        let (dispatcher, handle) = spawn_dispatcher();
        let failed = dispatcher.submit(|| Dispatch::Ready(Err(WorkerError::DeadCore("gone".into()))));
        let panicked = dispatcher.submit(|| panic!("job blew up"));
        let after = dispatcher.submit(|| Dispatch::Ready(Ok(1)));

        assert!(failed.join_timeout(Duration::from_secs(5)).unwrap_err().is_dead_core());
        assert!(panicked
            .join_timeout(Duration::from_secs(5))
            .unwrap_err()
            .to_string()
            .contains("job blew up"));
        assert_eq!(after.join_timeout(Duration::from_secs(5)).unwrap(), 1);

        dispatcher.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_drains_with_system_stopped() {
        let dispatcher: LocalDispatcher<u32> = LocalDispatcher::new(Duration::from_millis(10));
        let queued: Vec<_> = (0..3).map(|i| dispatcher.submit(move || Dispatch::Ready(Ok(i)))).collect();
        dispatcher.stop();
        dispatcher.run();

        for f in &queued {
            assert!(matches!(f.try_result(), Some(Err(WorkerError::SystemStopped))));
        }
        let late = dispatcher.submit(|| Dispatch::Ready(Ok(9)));
        assert!(matches!(late.try_result(), Some(Err(WorkerError::SystemStopped))));
    }

    #[test]
    fn test_cancelled_items_are_skipped() {
        let dispatcher: LocalDispatcher<u32> = LocalDispatcher::new(Duration::from_millis(10));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let item = dispatcher.submit(move || {
            flag.store(true, Ordering::SeqCst);
            Dispatch::Ready(Ok(0))
        });
        assert!(item.cancel());

        let stopper = dispatcher.submit({
            let stop = dispatcher.stop_flag();
            move || {
                stop.store(true, Ordering::SeqCst);
                Dispatch::Ready(Ok(1))
            }
        });
        dispatcher.run();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(item.is_cancelled());
        assert_eq!(stopper.try_result().and_then(|r| r.ok()), Some(1));
    }
}
