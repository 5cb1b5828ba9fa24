// This is free and unencumbered software released into the public domain.

use crate::shared::RecorderError;
use bytes::Bytes;
use core::{any::Any, cmp::Ordering, fmt};
use derive_more::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PixelFormat {
    #[display("bgra")]
    Bgra8,
    #[display("rgba")]
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
        }
    }
}

/// A rational timestamp, `value / timescale` seconds.
#[derive(Clone, Copy, Debug, Display)]
#[display("{value}/{timescale}")]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const NANOS: i32 = 1_000_000_000;

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    pub const fn from_nanos(ns: i64) -> Self {
        Self::new(ns, Self::NANOS)
    }

    pub fn as_nanos(&self) -> i64 {
        if self.timescale <= 0 {
            return 0;
        }
        ((self.value as i128 * Self::NANOS as i128) / self.timescale as i128) as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale <= 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.as_nanos().cmp(&other.as_nanos()))
    }
}

/// Platform pixel storage. The base address is only valid between `lock` and `unlock`.
pub trait PixelBuffer: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn bytes_per_row(&self) -> usize;
    fn pixel_format(&self) -> PixelFormat;
    fn lock(&self) -> Result<(), RecorderError>;
    fn unlock(&self);
    fn base_address(&self) -> &[u8];
}

/// One captured frame as handed over by a capture backend.
pub trait Sample: Send {
    fn presentation_time(&self) -> MediaTime;
    fn pixel_buffer(&self) -> Option<&dyn PixelBuffer>;
    fn as_any(&self) -> &dyn Any;
}

/// Owned handle on a platform sample. Dropping it releases the sample back
/// to the platform; a capture pipeline stalls while samples are held.
pub struct SampleBuffer {
    inner: Box<dyn Sample>,
}

impl SampleBuffer {
    pub fn new(sample: impl Sample + 'static) -> Self {
        Self {
            inner: Box::new(sample),
        }
    }

    pub fn presentation_time(&self) -> MediaTime {
        self.inner.presentation_time()
    }

    pub fn pixel_buffer(&self) -> Option<&dyn PixelBuffer> {
        self.inner.pixel_buffer()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    #[inline]
    pub fn release(self) {
        drop(self)
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("pts", &self.presentation_time())
            .finish()
    }
}

/// Pixels copied into process memory.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Bytes,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub timestamp: MediaTime,
}

impl Frame {
    pub fn new_bgra(data: impl Into<Bytes>, width: usize, height: usize, stride: usize) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride,
            pixel_format: PixelFormat::Bgra8,
            timestamp: MediaTime::from_nanos(0),
        }
    }

    pub fn with_timestamp(mut self, timestamp: MediaTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl PixelBuffer for Frame {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bytes_per_row(&self) -> usize {
        self.stride
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn lock(&self) -> Result<(), RecorderError> {
        Ok(())
    }

    fn unlock(&self) {}

    fn base_address(&self) -> &[u8] {
        &self.data
    }
}

impl Sample for Frame {
    fn presentation_time(&self) -> MediaTime {
        self.timestamp
    }

    fn pixel_buffer(&self) -> Option<&dyn PixelBuffer> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
