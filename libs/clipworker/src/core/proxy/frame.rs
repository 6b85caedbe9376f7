// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use crate::core::protocol::{Command, FrameMeta, FrameRef};
use crate::core::{
    run_coroutine, ColorFamily, Deferred, Frame, RawFormat, Result, SampleType, Size,
    Subprocess, WorkerError,
};

struct FrameState {
    clip: String,
    index: u32,
    worker: Arc<Subprocess>,
    meta: OnceLock<FrameMeta>,
    raw: OnceLock<Bytes>,
    image: OnceLock<Arc<DynamicImage>>,
}

/// One frame of a [`ProxyClip`](super::ProxyClip).
///
/// Each accessor costs one round trip the first time and is served from the
/// cache afterwards. Clones share the cache.
#[derive(Clone)]
pub struct ProxyFrame {
    inner: Arc<FrameState>,
}

impl ProxyFrame {
    pub(super) fn new(clip: String, index: u32, worker: Arc<Subprocess>) -> Self {
        Self {
            inner: Arc::new(FrameState {
                clip,
                index,
                worker,
                meta: OnceLock::new(),
                raw: OnceLock::new(),
                image: OnceLock::new(),
            }),
        }
    }

    pub fn clip(&self) -> &str {
        &self.inner.clip
    }

    /// Handle that does not keep the frame's caches alive.
    pub fn downgrade(&self) -> WeakProxyFrame {
        WeakProxyFrame {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True if both handles share one cache.
    pub fn same_frame(&self, other: &ProxyFrame) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn index(&self) -> u32 {
        self.inner.index
    }

    /// Size and format, from `results/meta`.
    pub fn meta(&self) -> Deferred<FrameMeta> {
        if let Some(meta) = self.inner.meta.get() {
            return Deferred::resolved(*meta);
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .worker
            .submit(Command::ResultsMeta(self.inner.frame_ref()))
            .map(move |reply| {
                let meta = reply.into_meta()?.ok_or_else(|| inner.not_found())?;
                Ok(*inner.meta.get_or_init(|| meta))
            })
    }

    /// Raw planes, from `results/raw`.
    ///
    /// Holds the worker's transfer gate for the whole round trip: the shared
    /// buffer carries one frame at a time, so concurrent calls queue here.
    pub fn to_raw(&self) -> Deferred<Bytes> {
        if let Some(raw) = self.inner.raw.get() {
            return Deferred::resolved(raw.clone());
        }
        let inner = Arc::clone(&self.inner);
        run_coroutine(async move {
            let buffer = inner.worker.frame_buffer()?;
            let _permit = buffer.begin_transfer().await;
            // Another caller may have fetched it while we queued.
            if let Some(raw) = inner.raw.get() {
                return Ok(raw.clone());
            }

            let payload = inner
                .worker
                .submit(Command::ResultsRaw(inner.frame_ref()))
                .await?
                .into_raw()?
                .ok_or_else(|| inner.not_found())?;
            let raw = buffer.load(payload)?;
            Ok(inner.raw.get_or_init(|| raw).clone())
        })
    }

    /// Decode to an RGB or RGBA image on the controller.
    pub fn to_image(&self) -> Deferred<Arc<DynamicImage>> {
        if let Some(image) = self.inner.image.get() {
            return Deferred::resolved(Arc::clone(image));
        }
        let frame = self.clone();
        run_coroutine(async move {
            let meta = frame.meta().await?;
            let raw = frame.to_raw().await?;
            let image = Arc::new(decode_planar(meta, &raw)?);
            Ok(Arc::clone(frame.inner.image.get_or_init(|| image)))
        })
    }
}

/// Non-owning [`ProxyFrame`] handle.
#[derive(Clone)]
pub struct WeakProxyFrame {
    inner: Weak<FrameState>,
}

impl WeakProxyFrame {
    pub fn upgrade(&self) -> Option<ProxyFrame> {
        self.inner.upgrade().map(|inner| ProxyFrame { inner })
    }
}

impl FrameState {
    fn frame_ref(&self) -> FrameRef {
        FrameRef {
            id: self.clip.clone(),
            frame: self.index,
        }
    }

    fn not_found(&self) -> WorkerError {
        WorkerError::FrameNotFound(format!(
            "clip '{}' has no frame {} in worker '{}'",
            self.clip,
            self.index,
            self.worker.name()
        ))
    }
}

impl Frame for ProxyFrame {
    fn size(&self) -> Deferred<Size> {
        self.meta().map(|meta| Ok(meta.size))
    }

    fn format(&self) -> Deferred<RawFormat> {
        self.meta().map(|meta| Ok(meta.format))
    }

    fn to_raw(&self) -> Deferred<Bytes> {
        ProxyFrame::to_raw(self)
    }
}

impl std::fmt::Debug for ProxyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyFrame")
            .field("clip", &self.inner.clip)
            .field("index", &self.inner.index)
            .field("meta", &self.inner.meta.get())
            .finish()
    }
}

/// Interleave 8-bit planar Gray, RGB or RGBA. Gray is expanded to RGB.
pub fn decode_planar(meta: FrameMeta, raw: &[u8]) -> Result<DynamicImage> {
    let FrameMeta { size, format } = meta;
    let unsupported = || WorkerError::NotSupported(format!("cannot decode {} frames", format));

    if format.sample_type != SampleType::Integer || format.bits_per_sample != 8 {
        return Err(unsupported());
    }
    let plane_len = format.plane_size(size, 0);
    if plane_len == 0 {
        return Err(WorkerError::NotSupported(format!(
            "cannot decode an empty {} frame",
            size
        )));
    }
    let expected = format.frame_size(size);
    if raw.len() < expected {
        return Err(WorkerError::Protocol(format!(
            "{} {} frame needs {} bytes, got {}",
            size,
            format,
            expected,
            raw.len()
        )));
    }

    let planes: Vec<&[u8]> = raw[..expected].chunks_exact(plane_len).collect();
    let Size { width, height } = size;
    let at = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;

    let image = match (format.family, planes.as_slice()) {
        (ColorFamily::Gray, [gray]) => DynamicImage::ImageRgb8(RgbImage::from_fn(
            width,
            height,
            |x, y| {
                let v = gray[at(x, y)];
                Rgb([v, v, v])
            },
        )),
        (ColorFamily::Rgb, [r, g, b]) => DynamicImage::ImageRgb8(RgbImage::from_fn(
            width,
            height,
            |x, y| {
                let i = at(x, y);
                Rgb([r[i], g[i], b[i]])
            },
        )),
        (ColorFamily::Rgb, [r, g, b, a]) => DynamicImage::ImageRgba8(RgbaImage::from_fn(
            width,
            height,
            |x, y| {
                let i = at(x, y);
                Rgba([r[i], g[i], b[i], a[i]])
            },
        )),
        _ => return Err(unsupported()),
    };
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32, format: RawFormat) -> FrameMeta {
        FrameMeta {
            size: Size::new(width, height),
            format,
        }
    }

    #[test]
    fn test_planar_rgb_is_interleaved() {
        // 2x1: red plane, green plane, blue plane.
        let raw = [10, 11, 20, 21, 30, 31];
        let image = decode_planar(meta(2, 1, RawFormat::RGB24), &raw).unwrap();
        let rgb = image.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([11, 21, 31]));
    }

    #[test]
    fn test_gray_expands_and_rgba_keeps_alpha() {
        let gray = decode_planar(meta(1, 2, RawFormat::GRAY8), &[5, 6]).unwrap();
        assert_eq!(gray.as_rgb8().unwrap().get_pixel(0, 1), &Rgb([6, 6, 6]));

        let rgba = decode_planar(meta(1, 1, RawFormat::RGBA32), &[1, 2, 3, 4]).unwrap();
        assert_eq!(rgba.as_rgba8().unwrap().get_pixel(0, 0), &Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn test_unsupported_and_short_input() {
        let yuv = RawFormat {
            family: ColorFamily::Yuv,
            subsampling_w: 1,
            subsampling_h: 1,
            ..RawFormat::RGB24
        };
        let err = decode_planar(meta(2, 2, yuv), &[0; 6]).unwrap_err();
        assert_eq!(err.kind(), "not_supported");

        let err = decode_planar(meta(2, 2, RawFormat::RGB24), &[0; 5]).unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }
}
