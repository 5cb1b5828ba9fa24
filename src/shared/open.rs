// This is free and unencumbered software released into the public domain.

use super::{CaptureConfig, MediaPlatform, RecorderError};
use std::sync::Arc;

/// Picks the media backend for this build and target.
///
/// The native AVFoundation backend wins on Apple targets when compiled in;
/// the ffmpeg backend covers the desktop otherwise.
#[cfg_attr(
    not(any(
        all(feature = "avf", any(target_os = "ios", target_os = "macos")),
        all(feature = "ffmpeg", any(target_os = "macos", target_os = "linux", target_os = "windows"))
    )),
    allow(unused_variables)
)]
pub fn open_platform(config: &CaptureConfig) -> Result<Arc<dyn MediaPlatform>, RecorderError> {
    cfg_if::cfg_if! {
        if #[cfg(all(feature = "avf", any(target_os = "ios", target_os = "macos")))] {
            Ok(Arc::new(super::drivers::avf::AvfPlatform::new(config)))
        } else if #[cfg(all(feature = "ffmpeg", any(target_os = "macos", target_os = "linux", target_os = "windows")))] {
            Ok(Arc::new(super::drivers::ffmpeg::FfmpegPlatform::new(config)))
        } else {
            Err(RecorderError::NoDriver)
        }
    }
}
