//! Core types for the frame path

use bytes::Bytes;
use ndarray::ArrayD;
use std::time::Duration;

use crate::error::{Error, Result};

/// Unit a presentation timestamp is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// One millisecond, the unit every outgoing track stamps frames with
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// Convert a duration into a count of this unit, rounding down
    pub fn ticks(&self, duration: Duration) -> i64 {
        let nanos = duration.as_nanos() * self.den as u128 / (self.num as u128 * 1_000_000_000);
        nanos.min(i64::MAX as u128) as i64
    }

    /// Convert a count of this unit back into a duration
    pub fn to_duration(&self, ticks: i64) -> Duration {
        let ticks = ticks.max(0) as u128;
        let nanos = ticks * self.num as u128 * 1_000_000_000 / self.den as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Pixel array handed over by the hosting pipeline
///
/// Accepted shapes are `HxW` (grayscale) and `HxWxC` with `C` in 1, 3 or 4.
/// `u16` samples are scaled down to 8 bits, `f32` samples are expected in
/// `0.0..=1.0` and clamped.
#[derive(Debug, Clone)]
pub enum PixelArray {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    F32(ArrayD<f32>),
}

impl PixelArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            PixelArray::U8(a) => a.shape(),
            PixelArray::U16(a) => a.shape(),
            PixelArray::F32(a) => a.shape(),
        }
    }

    fn dtype(&self) -> &'static str {
        match self {
            PixelArray::U8(_) => "u8",
            PixelArray::U16(_) => "u16",
            PixelArray::F32(_) => "f32",
        }
    }

    /// Samples in logical (row-major) order, narrowed to 8 bits
    fn samples(&self) -> Vec<u8> {
        match self {
            PixelArray::U8(a) => match a.as_slice() {
                Some(slice) => slice.to_vec(),
                None => a.iter().copied().collect(),
            },
            PixelArray::U16(a) => a.iter().map(|v| (v >> 8) as u8).collect(),
            PixelArray::F32(a) => a
                .iter()
                .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        }
    }

    /// Convert into packed RGB24, returning `(width, height, data)`
    pub fn to_rgb24(&self) -> Result<(u32, u32, Bytes)> {
        let (height, width, channels) = match *self.shape() {
            [h, w] => (h, w, 1),
            [h, w, c] if matches!(c, 1 | 3 | 4) => (h, w, c),
            _ => {
                return Err(Error::UnsupportedInputType(format!(
                    "{} array of shape {:?}",
                    self.dtype(),
                    self.shape()
                )));
            }
        };

        if width == 0 || height == 0 {
            return Err(Error::UnsupportedInputType(format!(
                "empty {}x{} image",
                width, height
            )));
        }
        let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
            return Err(Error::UnsupportedInputType(format!(
                "image of {}x{} exceeds frame limits",
                width, height
            )));
        };

        let samples = self.samples();
        if channels == 3 {
            return Ok((w, h, Bytes::from(samples)));
        }

        let mut rgb = Vec::with_capacity(width * height * 3);
        for pixel in samples.chunks_exact(channels) {
            match channels {
                1 => rgb.extend_from_slice(&[pixel[0], pixel[0], pixel[0]]),
                // alpha is dropped
                _ => rgb.extend_from_slice(&pixel[..3]),
            }
        }
        Ok((w, h, Bytes::from(rgb)))
    }
}

impl From<ArrayD<u8>> for PixelArray {
    fn from(array: ArrayD<u8>) -> Self {
        PixelArray::U8(array)
    }
}

impl From<ArrayD<u16>> for PixelArray {
    fn from(array: ArrayD<u16>) -> Self {
        PixelArray::U16(array)
    }
}

impl From<ArrayD<f32>> for PixelArray {
    fn from(array: ArrayD<f32>) -> Self {
        PixelArray::F32(array)
    }
}

/// What a pipeline `compute` step delivers per invocation
#[derive(Debug, Clone)]
pub enum FrameInput {
    /// A raw pixel array
    Array(PixelArray),
    /// Named tensors, the first of which holds the image
    Mapping(Vec<(String, PixelArray)>),
}

impl FrameInput {
    fn pixels(&self) -> Result<&PixelArray> {
        match self {
            FrameInput::Array(array) => Ok(array),
            FrameInput::Mapping(entries) => entries
                .first()
                .map(|(_, array)| array)
                .ok_or_else(|| Error::UnsupportedInputType("empty tensor mapping".to_string())),
        }
    }
}

impl From<PixelArray> for FrameInput {
    fn from(array: PixelArray) -> Self {
        FrameInput::Array(array)
    }
}

/// A single RGB24 video frame
///
/// The presentation timestamp stays unset until an outgoing track pulls the
/// frame and stamps it.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB24 pixels, row-major
    pub data: Bytes,

    pub width: u32,

    pub height: u32,

    /// Presentation timestamp in `time_base` units
    pub pts: Option<i64>,

    pub time_base: TimeBase,
}

impl Frame {
    /// Wrap an already packed RGB24 buffer
    pub fn rgb24(width: u32, height: u32, data: Bytes) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::UnsupportedInputType(format!(
                "rgb24 buffer of {} bytes for {}x{} (expected {})",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            pts: None,
            time_base: TimeBase::MILLIS,
        })
    }

    /// Convert pipeline input into the canonical layout
    pub fn from_input(input: &FrameInput) -> Result<Self> {
        let (width, height, data) = input.pixels()?.to_rgb24()?;
        Self::rgb24(width, height, data)
    }

    /// Return this frame stamped with a presentation timestamp
    pub fn stamped(mut self, pts: i64, time_base: TimeBase) -> Self {
        self.pts = Some(pts);
        self.time_base = time_base;
        self
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("time_base", &self.time_base)
            .field("size", &self.size())
            .finish()
    }
}
