// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFamily {
    Gray,
    Rgb,
    Yuv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Integer,
    Float,
}

/// Planar pixel layout of a frame's raw bytes.
///
/// Planes are stored back to back. Chroma planes of a YUV format are
/// subsampled by `1 << subsampling_w` horizontally and `1 << subsampling_h`
/// vertically; every other plane has the full frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFormat {
    pub sample_type: SampleType,
    pub family: ColorFamily,
    pub bits_per_sample: u8,
    pub num_planes: u8,
    pub subsampling_w: u8,
    pub subsampling_h: u8,
}

impl RawFormat {
    pub const GRAY8: RawFormat = RawFormat::planar(ColorFamily::Gray, 1);
    pub const RGB24: RawFormat = RawFormat::planar(ColorFamily::Rgb, 3);
    pub const RGBA32: RawFormat = RawFormat::planar(ColorFamily::Rgb, 4);

    const fn planar(family: ColorFamily, num_planes: u8) -> Self {
        Self {
            sample_type: SampleType::Integer,
            family,
            bits_per_sample: 8,
            num_planes,
            subsampling_w: 0,
            subsampling_h: 0,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    pub fn plane_size(&self, size: Size, plane: u8) -> usize {
        let (mut width, mut height) = (size.width as usize, size.height as usize);
        if self.family == ColorFamily::Yuv && (plane == 1 || plane == 2) {
            width >>= self.subsampling_w;
            height >>= self.subsampling_h;
        }
        width * height * self.bytes_per_sample()
    }

    pub fn frame_size(&self, size: Size) -> usize {
        (0..self.num_planes).map(|p| self.plane_size(size, p)).sum()
    }

    /// Canonical short name, if this is one of the named formats.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            RawFormat::GRAY8 => Some("gray8"),
            RawFormat::RGB24 => Some("rgb24"),
            RawFormat::RGBA32 => Some("rgba32"),
            _ => None,
        }
    }
}

impl fmt::Display for RawFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(
                f,
                "{:?}/{:?} {}bit x{} planes (ss {}:{})",
                self.family,
                self.sample_type,
                self.bits_per_sample,
                self.num_planes,
                self.subsampling_w,
                self.subsampling_h
            ),
        }
    }
}

impl FromStr for RawFormat {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gray8" | "gray" => Ok(RawFormat::GRAY8),
            "rgb24" | "rgb" => Ok(RawFormat::RGB24),
            "rgba32" | "rgba" => Ok(RawFormat::RGBA32),
            other => Err(WorkerError::Configuration(format!(
                "unknown pixel format '{}'",
                other
            ))),
        }
    }
}
