// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod clipworker_home;
pub mod config;
pub mod error;
pub mod framebuffer;
pub mod future;
pub mod pattern;
pub mod protocol;
pub mod proxy;
pub mod script;
pub mod signals;
pub mod subprocess;
pub mod worker;

pub use clipworker_home::{clipworker_home, get_clipworker_home};
pub use config::WorkerConfig;
pub use error::{RemoteError, Result, WorkerError};
pub use framebuffer::{FrameBufferGuard, SharedFrameBuffer, SharedSegment, TransferPermit};
pub use future::{
    gather, inline_resolved, join, run_coroutine, synchronous_wrap, BoxFuture, Deferred,
    WeakDeferred,
};
pub use protocol::{
    Command, ExecuteParams, FrameMeta, FrameRef, HandshakeReply, RawPayload, Reply, Requester,
    Responder, Service,
};
pub use proxy::{ProxyClip, ProxyFrame};
pub use script::{
    find_provider, Clip, ClipMap, ColorFamily, Frame, RawFormat, SampleType, Script,
    ScriptProvider, ScriptProviderInfo, ScriptProviderRegistration, ScriptSource, Size,
    WorkerExtensionRegistration,
};
pub use subprocess::{ManagerRegistry, ProcessHandle, Subprocess, WorkerPool};
