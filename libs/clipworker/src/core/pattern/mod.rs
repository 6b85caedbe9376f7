// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Built-in `clipworker::pattern` script engine.
//!
//! A small line-oriented language that defines outputs of deterministic test
//! frames. It stands in for a real video engine wherever one is not needed:
//!
//! ```text
//! # comments and blank lines are ignored
//! n = 2 * (3 + 1)
//! output 0 length=n width=std_width_sd height=480 format=gray8
//! sleep 100
//! ```

mod parser;
mod script;

pub use parser::{parse, BinOp, Expr, OutputSpec, Statement};
pub use script::{OutputDefaults, PatternClip, PatternFrame, PatternScript};

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::core::script::{ProviderContext, RegisteredProvider, ScriptProvider};
use crate::core::{RawFormat, Result, Script, Size, WorkerError};

/// Provider for [`PatternScript`].
///
/// Parameters: `width`, `height` and `format` set the geometry of outputs
/// that do not specify their own.
pub struct PatternProvider {
    defaults: OutputDefaults,
    script: OnceLock<Arc<PatternScript>>,
}

impl RegisteredProvider for PatternProvider {
    const PROVIDER_CLASS: &'static str = "clipworker::pattern";

    fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut defaults = OutputDefaults::default();
        for (key, value) in params {
            let dimension = || {
                value.parse::<u32>().map_err(|e| {
                    WorkerError::Configuration(format!("invalid {} '{}': {}", key, value, e))
                })
            };
            match key.as_str() {
                "width" => defaults.size = Size::new(dimension()?, defaults.size.height),
                "height" => defaults.size = Size::new(defaults.size.width, dimension()?),
                "format" => defaults.format = value.parse::<RawFormat>()?,
                other => {
                    return Err(WorkerError::Configuration(format!(
                        "unknown parameter '{}' for {}",
                        other,
                        Self::PROVIDER_CLASS
                    )))
                }
            }
        }
        Ok(Self {
            defaults,
            script: OnceLock::new(),
        })
    }
}

impl ScriptProvider for PatternProvider {
    fn initialize(&self, context: &ProviderContext) -> Result<()> {
        let script = Arc::new(PatternScript::with_defaults(context.clone(), self.defaults));
        self.script.set(script).map_err(|_| {
            WorkerError::Configuration(format!("{} initialized twice", Self::PROVIDER_CLASS))
        })
    }

    fn deinitialize(&self) {
        if let Some(script) = self.script.get() {
            script.dispose();
        }
    }

    fn get_script(&self) -> Result<Arc<dyn Script>> {
        self.script
            .get()
            .map(|script| Arc::clone(script) as Arc<dyn Script>)
            .ok_or_else(|| {
                WorkerError::Configuration(format!("{} is not initialized", Self::PROVIDER_CLASS))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_set_defaults() {
        let params = BTreeMap::from([
            ("width".to_string(), "8".to_string()),
            ("format".to_string(), "gray8".to_string()),
        ]);
        let provider = PatternProvider::from_params(&params).unwrap();
        assert_eq!(provider.defaults.size, Size::new(8, 48));
        assert_eq!(provider.defaults.format, RawFormat::GRAY8);

        let bad = BTreeMap::from([("height".to_string(), "tall".to_string())]);
        assert_eq!(PatternProvider::from_params(&bad).err().unwrap().kind(), "configuration");
        let unknown = BTreeMap::from([("seed".to_string(), "1".to_string())]);
        assert!(PatternProvider::from_params(&unknown).is_err());
    }

    #[test]
    fn test_script_requires_initialize() {
        let provider = PatternProvider::from_params(&BTreeMap::new()).unwrap();
        assert!(provider.get_script().is_err());
        provider.initialize(&ProviderContext::default()).unwrap();
        let script = provider.get_script().unwrap();
        script.initialize().unwrap();
        assert!(script.alive());
        provider.deinitialize();
        assert!(!script.alive());
    }
}
