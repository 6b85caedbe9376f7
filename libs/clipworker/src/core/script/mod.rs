// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capabilities an embedding engine implements, and that proxies mirror.

mod format;
mod provider;

pub use format::{ColorFamily, RawFormat, SampleType, Size};
pub use provider::{
    enable_extensions, find_extension, find_provider, run_preload_hooks, ProviderContext,
    RegisteredProvider, ScriptProvider, ScriptProviderInfo, ScriptProviderRegistration,
    WorkerExtension, WorkerExtensionRegistration,
};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::core::{Deferred, Result};

/// Code handed to [`Script::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Read and run this file.
    Path(PathBuf),
    /// Run this text.
    Code(String),
}

/// Named outputs of a script, keyed by output name.
pub type ClipMap = BTreeMap<String, Arc<dyn Clip>>;

/// Something that executes code and produces named clip outputs.
pub trait Script: Send + Sync {
    /// False once the underlying engine is unusable.
    fn alive(&self) -> bool;

    /// May be expensive. Called once before any other use.
    fn initialize(&self) -> Result<()>;

    /// Idempotent.
    fn dispose(&self);

    /// Resolves to an opaque textual result, if the engine produces one.
    fn execute(&self, source: ScriptSource) -> Deferred<Option<String>>;

    fn get_results(&self) -> Deferred<ClipMap>;
}

/// A named sequence of frames.
pub trait Clip: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with `IndexOutOfRange` when `index >= len()`.
    fn frame(&self, index: u32) -> Deferred<Arc<dyn Frame>>;
}

pub trait Frame: Send + Sync {
    fn size(&self) -> Deferred<Size>;

    fn format(&self) -> Deferred<RawFormat>;

    /// Planes of the frame, back to back, as described by `format()`.
    fn to_raw(&self) -> Deferred<Bytes>;
}
