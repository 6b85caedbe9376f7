// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use parking_lot::Mutex;

use super::Deferred;
use crate::core::{Result, WorkerError};

struct GatherState<T> {
    slots: Vec<Option<Result<T>>>,
    remaining: usize,
}

/// Combine `futures` into one cell holding their values in input order.
///
/// A single failure is passed through unchanged; two or more become
/// [`WorkerError::Aggregate`] in input order.
pub fn gather<T>(futures: Vec<Deferred<T>>) -> Deferred<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let combined = Deferred::new();
    combined.set_running();

    let count = futures.len();
    if count == 0 {
        combined.resolve(Vec::new());
        return combined;
    }

    let state = Arc::new(Mutex::new(GatherState {
        slots: (0..count).map(|_| None).collect(),
        remaining: count,
    }));

    for (index, future) in futures.into_iter().enumerate() {
        combined.retain_until_settled(future.clone());
        let state = Arc::clone(&state);
        let combined = combined.clone();
        future.add_done_callback(move |result| {
            let finished = {
                let mut state = state.lock();
                state.slots[index] = Some(result);
                state.remaining -= 1;
                if state.remaining == 0 {
                    Some(std::mem::take(&mut state.slots))
                } else {
                    None
                }
            };
            if let Some(slots) = finished {
                combined.settle(collect(slots));
            }
        });
    }

    combined
}

fn collect<T>(slots: Vec<Option<Result<T>>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(slots.len());
    let mut errors = Vec::new();
    for slot in slots.into_iter().flatten() {
        match slot {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }

    match errors.len() {
        0 => Ok(values),
        1 => Err(errors.remove(0)),
        _ => Err(WorkerError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_follows_input_not_completion() {
        let first: Deferred<u32> = Deferred::new();
        let second: Deferred<u32> = Deferred::new();
        let all = gather(vec![first.clone(), second.clone()]);

        second.resolve(2);
        assert!(!all.is_done());
        first.resolve(1);
        assert_eq!(all.join().ok(), Some(vec![1, 2]));
    }

    #[test]
    fn test_single_failure_passes_through() {
        let first: Deferred<u32> = Deferred::new();
        let second = Deferred::resolved(2);
        let all = gather(vec![first.clone(), second]);
        first.fail(WorkerError::FrameNotFound("clip 'a'".into()));

        let err = all.join().unwrap_err();
        assert!(matches!(err, WorkerError::FrameNotFound(ref m) if m == "clip 'a'"));
    }

    #[test]
    fn test_multiple_failures_aggregate() {
        let all = gather(vec![
            Deferred::<u32>::failed(WorkerError::Cancelled),
            Deferred::resolved(1),
            Deferred::failed(WorkerError::SystemStopped),
        ]);
        match all.join() {
            Err(WorkerError::Aggregate(errors)) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].kind(), "cancelled");
                assert_eq!(errors[1].kind(), "system_stopped");
            }
            other => panic!("expected aggregate, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_input_resolves_immediately() {
        let all: Deferred<Vec<u8>> = gather(Vec::new());
        assert_eq!(all.try_result().and_then(|r| r.ok()), Some(Vec::new()));
    }
}
