// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Minimal futures runtime: write-once cells, a coroutine trampoline, and an
//! ordered `gather`.

mod coroutine;
mod deferred;
mod gather;

pub use coroutine::{inline_resolved, run_coroutine, synchronous_wrap, BoxFuture};
pub(crate) use coroutine::panic_message;
pub use deferred::{Deferred, WeakDeferred};
pub use gather::gather;

use crate::core::Result;

/// Block until `future` settles. Use at thread boundaries only.
pub fn join<T: Clone + Send + 'static>(future: &Deferred<T>) -> Result<T> {
    future.join()
}
