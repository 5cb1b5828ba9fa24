// This is free and unencumbered software released into the public domain.

use crate::shared::PixelFormat;
use derive_more::Display;
use std::{env, path::PathBuf};

pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;
pub const CAPTURE_FPS: f64 = 30.0;
pub const SCRATCH_FILE_NAME: &str = "temp.mov";

pub const DOCUMENTS_ENV: &str = "ASIMOV_RECORDER_DOCUMENTS";
pub const LIBRARY_ENV: &str = "ASIMOV_RECORDER_LIBRARY";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum VideoCodec {
    #[display("h264")]
    H264,
    #[display("hevc")]
    Hevc,
    #[display("jpeg")]
    Jpeg,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ContainerFormat {
    #[display("mov")]
    QuickTimeMovie,
    #[display("mp4")]
    Mpeg4,
}

impl ContainerFormat {
    pub fn supports(self, codec: VideoCodec) -> bool {
        match self {
            Self::QuickTimeMovie => true,
            Self::Mpeg4 => matches!(codec, VideoCodec::H264 | VideoCodec::Hevc),
        }
    }
}

/// Encoder-facing description of the single video track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub source_format: PixelFormat,
}

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub preview_format: PixelFormat,
    pub codec: VideoCodec,
    pub container: ContainerFormat,
    pub document_dir: PathBuf,
    pub library_dir: PathBuf,
    pub queue_frames: usize,
    pub diagnostics: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
            fps: CAPTURE_FPS,
            preview_format: PixelFormat::Bgra8,
            codec: VideoCodec::H264,
            container: ContainerFormat::QuickTimeMovie,
            document_dir: default_document_dir(),
            library_dir: default_library_dir(),
            queue_frames: 2,
            diagnostics: false,
        }
    }
}

impl CaptureConfig {
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_document_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.document_dir = dir.into();
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = dir.into();
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// The single-slot scratch file every recording is written to.
    pub fn output_path(&self) -> PathBuf {
        self.document_dir.join(SCRATCH_FILE_NAME)
    }

    pub fn track_settings(&self) -> TrackSettings {
        TrackSettings {
            codec: self.codec,
            width: self.width,
            height: self.height,
            fps: self.fps,
            source_format: self.preview_format,
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn default_document_dir() -> PathBuf {
    if let Some(dir) = env::var_os(DOCUMENTS_ENV) {
        return dir.into();
    }
    home_dir()
        .map(|h| h.join("Documents"))
        .filter(|p| p.is_dir())
        .unwrap_or_else(env::temp_dir)
}

fn default_library_dir() -> PathBuf {
    if let Some(dir) = env::var_os(LIBRARY_ENV) {
        return dir.into();
    }
    home_dir()
        .map(|h| h.join("Videos"))
        .unwrap_or_else(|| env::temp_dir().join("asimov-videos"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fixed_constants() {
        let config = CaptureConfig::default();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.codec, VideoCodec::H264);
        assert_eq!(config.preview_format, PixelFormat::Bgra8);
        assert_eq!(config.container, ContainerFormat::QuickTimeMovie);
    }

    #[test]
    fn output_path_is_the_scratch_slot() {
        let config = CaptureConfig::default().with_document_dir("/tmp/docs");
        assert_eq!(config.output_path(), PathBuf::from("/tmp/docs/temp.mov"));
    }

    #[test]
    fn track_settings_follow_config() {
        let settings = CaptureConfig::default().track_settings();
        assert_eq!(settings.codec, VideoCodec::H264);
        assert_eq!((settings.width, settings.height), (640, 480));
    }

    #[test]
    fn container_codec_compatibility() {
        assert!(ContainerFormat::QuickTimeMovie.supports(VideoCodec::Jpeg));
        assert!(ContainerFormat::Mpeg4.supports(VideoCodec::H264));
        assert!(!ContainerFormat::Mpeg4.supports(VideoCodec::Jpeg));
    }
}
