// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Controller-side stand-ins for clips and frames that live in a worker.
//!
//! Every data-bearing accessor is a round trip through the worker's
//! [`Requester`](crate::core::Requester). Frame data comes back through the
//! worker's shared frame buffer, or inline when it does not fit.

mod clip;
mod frame;

pub use clip::ProxyClip;
pub use frame::{decode_planar, ProxyFrame, WeakProxyFrame};
