// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::parser::{parse, OutputSpec, Statement};
use crate::core::script::ProviderContext;
use crate::core::{
    inline_resolved, Clip, ClipMap, Deferred, Frame, RawFormat, Result, Script, ScriptSource,
    Size, WorkerError,
};

/// Geometry used when an `output` statement leaves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDefaults {
    pub size: Size,
    pub format: RawFormat,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            size: Size::new(64, 48),
            format: RawFormat::RGB24,
        }
    }
}

#[derive(Default)]
struct PatternState {
    vars: BTreeMap<String, i64>,
    outputs: BTreeMap<String, Arc<PatternClip>>,
}

/// Interprets the pattern language and serves deterministic frames.
pub struct PatternScript {
    context: ProviderContext,
    defaults: OutputDefaults,
    state: Mutex<PatternState>,
    alive: AtomicBool,
}

impl PatternScript {
    pub fn new(context: ProviderContext) -> Self {
        Self::with_defaults(context, OutputDefaults::default())
    }

    pub fn with_defaults(context: ProviderContext, defaults: OutputDefaults) -> Self {
        Self {
            context,
            defaults,
            state: Mutex::new(PatternState::default()),
            alive: AtomicBool::new(false),
        }
    }

    fn run(&self, source: ScriptSource) -> Result<Option<String>> {
        let code = match source {
            ScriptSource::Code(code) => code,
            ScriptSource::Path(path) => std::fs::read_to_string(&path).map_err(|e| {
                WorkerError::Script(format!("cannot read {}: {}", path.display(), e))
            })?,
        };
        let statements = parse(&code)?;

        let mut last = None;
        for statement in statements {
            match statement {
                Statement::Assign { name, value } => {
                    let mut state = self.state.lock();
                    let value = value.eval(&state.vars)?;
                    state.vars.insert(name, value);
                    last = Some(value.to_string());
                }
                Statement::Output(spec) => self.define_output(spec)?,
                Statement::Clear => self.state.lock().outputs.clear(),
                Statement::Fail(message) => return Err(WorkerError::Script(message)),
                Statement::Sleep(ms) => {
                    let ms = ms.eval(&self.state.lock().vars)?;
                    std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
                }
                Statement::Kill => {
                    tracing::warn!("Pattern core killed by script");
                    self.alive.store(false, Ordering::Release);
                }
            }
        }
        Ok(last)
    }

    fn define_output(&self, spec: OutputSpec) -> Result<()> {
        let mut state = self.state.lock();
        let eval_u32 = |expr: &super::parser::Expr, what: &str| -> Result<u32> {
            let value = expr.eval(&state.vars)?;
            u32::try_from(value).map_err(|_| {
                WorkerError::Script(format!("{} of output '{}' out of range: {}", what, spec.key, value))
            })
        };

        let length = eval_u32(&spec.length, "length")?;
        let width = match &spec.width {
            Some(expr) => eval_u32(expr, "width")?,
            None => self.defaults.size.width,
        };
        let height = match &spec.height {
            Some(expr) => eval_u32(expr, "height")?,
            None => self.defaults.size.height,
        };
        let clip = PatternClip {
            name: spec.key.clone(),
            length,
            size: Size::new(width, height),
            format: spec.format.unwrap_or(self.defaults.format),
        };
        tracing::debug!(
            "Output '{}': {} frames of {} {}",
            clip.name,
            clip.length,
            clip.size,
            clip.format
        );
        state.outputs.insert(spec.key, Arc::new(clip));
        Ok(())
    }
}

impl Script for PatternScript {
    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.vars = self.context.constants.clone();
        self.alive.store(true, Ordering::Release);
        Ok(())
    }

    fn dispose(&self) {
        self.alive.store(false, Ordering::Release);
        self.state.lock().outputs.clear();
    }

    fn execute(&self, source: ScriptSource) -> Deferred<Option<String>> {
        inline_resolved(|| self.run(source))
    }

    fn get_results(&self) -> Deferred<ClipMap> {
        let outputs = self
            .state
            .lock()
            .outputs
            .iter()
            .map(|(name, clip)| (name.clone(), Arc::clone(clip) as Arc<dyn Clip>))
            .collect();
        Deferred::resolved(outputs)
    }
}

/// Clip whose frames are computed on demand.
#[derive(Debug, Clone)]
pub struct PatternClip {
    name: String,
    length: u32,
    size: Size,
    format: RawFormat,
}

impl Clip for PatternClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u32 {
        self.length
    }

    fn frame(&self, index: u32) -> Deferred<Arc<dyn Frame>> {
        if index >= self.length {
            return Deferred::failed(WorkerError::IndexOutOfRange {
                index,
                length: self.length,
            });
        }
        Deferred::resolved(Arc::new(PatternFrame {
            index,
            size: self.size,
            format: self.format,
        }) as Arc<dyn Frame>)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PatternFrame {
    index: u32,
    size: Size,
    format: RawFormat,
}

impl PatternFrame {
    /// Byte `i` of plane `p` of frame `f` is `(f * 31 + p * 7 + i) % 251`.
    pub fn render(index: u32, size: Size, format: RawFormat) -> Vec<u8> {
        let mut raw = Vec::with_capacity(format.frame_size(size));
        for plane in 0..format.num_planes {
            let base = index as u64 * 31 + plane as u64 * 7;
            let len = format.plane_size(size, plane) as u64;
            raw.extend((0..len).map(|i| ((base + i) % 251) as u8));
        }
        raw
    }
}

impl Frame for PatternFrame {
    fn size(&self) -> Deferred<Size> {
        Deferred::resolved(self.size)
    }

    fn format(&self) -> Deferred<RawFormat> {
        Deferred::resolved(self.format)
    }

    fn to_raw(&self) -> Deferred<Bytes> {
        Deferred::resolved(Bytes::from(Self::render(
            self.index,
            self.size,
            self.format,
        )))
    }
}
