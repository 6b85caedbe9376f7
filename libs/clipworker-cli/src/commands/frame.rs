// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clipworker::{Clip, Frame, FrameMeta, Script, Subprocess, WorkerConfig};

/// Execute `script`, then print or save one frame of `clip`.
pub fn frame(
    config: WorkerConfig,
    script: &Path,
    clip: &str,
    index: u32,
    meta: bool,
    out: Option<&Path>,
) -> Result<()> {
    let (pool, worker, _) = super::run_script(config, script)?;
    let result = fetch(&worker, clip, index, meta, out);
    pool.disable();
    result
}

fn fetch(
    worker: &Subprocess,
    clip: &str,
    index: u32,
    meta: bool,
    out: Option<&Path>,
) -> Result<()> {
    let results = worker.get_results().join()?;
    let known = results.keys().cloned().collect::<Vec<_>>().join(", ");
    let proxy = results
        .get(clip)
        .ok_or_else(|| anyhow!("No output '{}' (have: {})", clip, known))?;
    let frame = proxy.frame(index).join()?;

    if meta {
        let size = frame.size().join()?;
        let format = frame.format().join()?;
        println!("{}[{}]: {} {}", clip, index, size, format);
        return Ok(());
    }

    let Some(out) = out else {
        return Err(anyhow!("--out is required without --meta"));
    };
    let raw = frame.to_raw().join()?;
    if out.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")) {
        let meta = FrameMeta {
            size: frame.size().join()?,
            format: frame.format().join()?,
        };
        let image = clipworker::core::proxy::decode_planar(meta, &raw)?;
        image
            .save(out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
    } else {
        std::fs::write(out, &raw).with_context(|| format!("Failed to write {}", out.display()))?;
    }
    println!("Wrote {}[{}] ({} bytes) to {}", clip, index, raw.len(), out.display());
    Ok(())
}
