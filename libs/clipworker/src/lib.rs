// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#![allow(clippy::type_complexity)] // Callback slots read clearer spelled out
#![allow(clippy::new_ret_no_self)] // Handles constructed as Arc<Self>

//! Crash-isolated script workers.
//!
//! A controlling process keeps a [`WorkerPool`] of `clipworker-worker`
//! subprocesses. Each worker hosts one [`Script`] instance behind a
//! request/response pipe protocol, and hands large frame payloads back through
//! a shared memory segment. The controller sees remote clips and frames as
//! [`ProxyClip`] / [`ProxyFrame`], whose accessors return [`Deferred`] values.

// Re-exported for provider crates that register with `inventory::submit!`.
pub use inventory;

pub mod core;

pub use core::{
    clipworker_home, find_provider, gather, inline_resolved, join, run_coroutine,
    synchronous_wrap, BoxFuture, Clip, ClipMap, ColorFamily, Command, Deferred, Frame, FrameMeta,
    FrameRef, ManagerRegistry, ProxyClip, ProxyFrame, RawFormat, RawPayload, RemoteError, Reply,
    Requester, Responder, Result, SampleType, Script, ScriptProvider, ScriptProviderInfo,
    ScriptProviderRegistration, ScriptSource, SharedFrameBuffer, Size, Subprocess, WeakDeferred,
    WorkerConfig, WorkerError, WorkerExtensionRegistration, WorkerPool,
};
