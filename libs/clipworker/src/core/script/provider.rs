// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Script provider and worker extension registries.
//!
//! Both are resolved by name inside the worker: a built-in table first, then
//! anything linked in through `inventory::submit!`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Script;
use crate::core::{Result, WorkerError};

/// Boot configuration sent to a worker during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptProviderInfo {
    pub provider_class: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub provider_params: BTreeMap<String, String>,
}

/// What a provider sees of the worker it is running in.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub worker_pid: u32,
    /// `(alias, registered name)` of every enabled extension, in order.
    pub extensions: Vec<(String, String)>,
    /// Integer constants contributed by extensions.
    pub constants: BTreeMap<String, i64>,
}

/// Builds and owns the [`Script`] a worker serves.
pub trait ScriptProvider: Send + Sync {
    /// Called after every extension is enabled.
    fn initialize(&self, context: &ProviderContext) -> Result<()>;

    fn deinitialize(&self) {}

    fn get_script(&self) -> Result<Arc<dyn Script>>;
}

/// A provider that can be named in [`ScriptProviderInfo::provider_class`].
///
/// # Example
///
/// ```ignore
/// impl RegisteredProvider for MyProvider {
///     const PROVIDER_CLASS: &'static str = "my_crate::engine";
///
///     fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
///         Ok(MyProvider::new(params))
///     }
/// }
///
/// clipworker::inventory::submit! {
///     ScriptProviderRegistration::new::<MyProvider>()
/// }
/// ```
pub trait RegisteredProvider: ScriptProvider + Sized + 'static {
    const PROVIDER_CLASS: &'static str;

    fn from_params(params: &BTreeMap<String, String>) -> Result<Self>;

    /// Warm the engine once at worker spawn, before any handshake.
    fn preload() -> Result<()> {
        Ok(())
    }
}

/// Uses function pointers so registrations can live in statics.
pub struct ScriptProviderRegistration {
    pub provider_class: &'static str,
    pub construct_fn: fn(&BTreeMap<String, String>) -> Result<Box<dyn ScriptProvider>>,
    pub preload_fn: fn() -> Result<()>,
}

impl ScriptProviderRegistration {
    pub const fn new<P: RegisteredProvider>() -> Self {
        Self {
            provider_class: P::PROVIDER_CLASS,
            construct_fn: |params| {
                P::from_params(params).map(|p| Box::new(p) as Box<dyn ScriptProvider>)
            },
            preload_fn: P::preload,
        }
    }

    pub fn construct(&self, params: &BTreeMap<String, String>) -> Result<Box<dyn ScriptProvider>> {
        (self.construct_fn)(params)
    }

    /// Boot configuration for this provider with no extensions.
    pub fn with_config<I, K, V>(&self, params: I) -> ScriptProviderInfo
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ScriptProviderInfo {
            provider_class: self.provider_class.to_string(),
            extensions: Vec::new(),
            provider_params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

inventory::collect!(ScriptProviderRegistration);

static BUILTIN_PROVIDERS: &[ScriptProviderRegistration] =
    &[ScriptProviderRegistration::new::<crate::core::pattern::PatternProvider>()];

fn all_providers() -> impl Iterator<Item = &'static ScriptProviderRegistration> {
    BUILTIN_PROVIDERS
        .iter()
        .chain(inventory::iter::<ScriptProviderRegistration>())
}

pub fn find_provider(provider_class: &str) -> Result<&'static ScriptProviderRegistration> {
    all_providers()
        .find(|r| r.provider_class == provider_class)
        .ok_or_else(|| {
            WorkerError::Configuration(format!("unknown script provider '{}'", provider_class))
        })
}

/// Run every provider's preload hook. Failures are logged, not fatal: the
/// real initialization reports them again if they matter.
pub fn run_preload_hooks() {
    for registration in all_providers() {
        tracing::debug!("Preloading provider '{}'", registration.provider_class);
        if let Err(e) = (registration.preload_fn)() {
            tracing::warn!(
                "Preload of provider '{}' failed: {}",
                registration.provider_class,
                e
            );
        }
    }
}

/// Something a worker can switch on before its provider starts.
pub trait WorkerExtension: 'static {
    const NAME: &'static str;

    fn enable(alias: &str, context: &mut ProviderContext) -> Result<()>;
}

pub struct WorkerExtensionRegistration {
    pub name: &'static str,
    pub enable_fn: fn(&str, &mut ProviderContext) -> Result<()>,
}

impl WorkerExtensionRegistration {
    pub const fn new<E: WorkerExtension>() -> Self {
        Self {
            name: E::NAME,
            enable_fn: E::enable,
        }
    }
}

inventory::collect!(WorkerExtensionRegistration);

static BUILTIN_EXTENSIONS: &[WorkerExtensionRegistration] =
    &[WorkerExtensionRegistration::new::<StandardConstants>()];

pub fn find_extension(name: &str) -> Result<&'static WorkerExtensionRegistration> {
    BUILTIN_EXTENSIONS
        .iter()
        .chain(inventory::iter::<WorkerExtensionRegistration>())
        .find(|r| r.name == name)
        .ok_or_else(|| WorkerError::Configuration(format!("unknown worker extension '{}'", name)))
}

/// Enable `entries` in order. Each entry is `name` or `alias=name`.
pub fn enable_extensions(entries: &[String], context: &mut ProviderContext) -> Result<()> {
    for entry in entries {
        let (alias, name) = match entry.split_once('=') {
            Some((alias, name)) => (alias.trim(), name.trim()),
            None => (entry.trim(), entry.trim()),
        };
        let registration = find_extension(name)?;
        (registration.enable_fn)(alias, context)?;
        tracing::info!("Enabled worker extension '{}' as '{}'", name, alias);
        context
            .extensions
            .push((alias.to_string(), registration.name.to_string()));
    }
    Ok(())
}

/// Publishes common frame dimensions as `<alias>_width_hd` and friends.
struct StandardConstants;

impl WorkerExtension for StandardConstants {
    const NAME: &'static str = "clipworker::constants";

    fn enable(alias: &str, context: &mut ProviderContext) -> Result<()> {
        let prefix = if alias == Self::NAME { "std" } else { alias };
        let constants = [
            ("width_sd", 720),
            ("height_sd", 480),
            ("width_hd", 1920),
            ("height_hd", 1080),
            ("width_uhd", 3840),
            ("height_uhd", 2160),
            ("width_8k", 7680),
            ("height_8k", 4320),
        ];
        for (name, value) in constants {
            context.constants.insert(format!("{}_{}", prefix, name), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pattern_provider_is_found() {
        let registration = find_provider("clipworker::pattern").unwrap();
        assert_eq!(registration.provider_class, "clipworker::pattern");
        assert!(registration.construct(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let err = find_provider("nope::engine").err().unwrap();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_with_config_builds_info() {
        let info = find_provider("clipworker::pattern")
            .unwrap()
            .with_config([("seed", "3")]);
        assert_eq!(info.provider_class, "clipworker::pattern");
        assert!(info.extensions.is_empty());
        assert_eq!(info.provider_params.get("seed").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_extension_aliases() {
        let mut context = ProviderContext::default();
        enable_extensions(
            &[
                "clipworker::constants".to_string(),
                "dims=clipworker::constants".to_string(),
            ],
            &mut context,
        )
        .unwrap();
        assert_eq!(context.constants.get("std_width_hd"), Some(&1920));
        assert_eq!(context.constants.get("dims_height_8k"), Some(&4320));
        assert_eq!(context.extensions[1].0, "dims");

        let err = enable_extensions(&["x=missing".to_string()], &mut context).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
