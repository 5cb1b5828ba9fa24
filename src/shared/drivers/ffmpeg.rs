// This is free and unencumbered software released into the public domain.

//! Desktop backend: camera capture and H.264 encoding through ffmpeg
//! subprocesses, a folder standing in for the media library.

mod capture;
pub use capture::*;

mod writer;
pub use writer::*;

use crate::shared::{
    AssetWriter, CaptureConfig, CaptureDevice, CaptureSession, ContainerFormat, DeviceInput,
    FolderLibrary, MediaBackend, MediaLibrary, MediaPlatform, RecorderError, TrackInput,
    TrackSettings,
};
use alloc::borrow::Cow;
use std::{
    any::Any,
    env,
    path::Path,
    process::{Command, Stdio},
    sync::Arc,
};

pub const FFMPEG_STDERR_ENV: &str = "ASIMOV_RECORDER_FFMPEG_STDERR";

#[derive(Debug)]
pub struct FfmpegPlatform {
    config: CaptureConfig,
    library: Arc<FolderLibrary>,
}

impl FfmpegPlatform {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            config: config.clone(),
            library: Arc::new(FolderLibrary::new(config.library_dir.clone())),
        }
    }
}

impl dogma::Named for FfmpegPlatform {
    fn name(&self) -> Cow<'_, str> {
        "ffmpeg".into()
    }
}

impl MediaPlatform for FfmpegPlatform {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Ffmpeg
    }

    fn default_video_device(&self) -> Option<CaptureDevice> {
        let requested = self.config.device.as_deref().map(str::trim).unwrap_or("");
        let id = if requested.is_empty() {
            default_device_id()?
        } else {
            requested.to_string()
        };
        Some(CaptureDevice {
            name: get_input_device(&id),
            id,
        })
    }

    fn device_input(&self, device: &CaptureDevice) -> Result<Box<dyn DeviceInput>, RecorderError> {
        probe_ffmpeg()?;
        check_device_access(&get_input_device(&device.id))?;
        Ok(Box::new(FfmpegDeviceInput {
            device: device.clone(),
        }))
    }

    fn capture_session(&self) -> Box<dyn CaptureSession> {
        Box::new(FfmpegCaptureSession::new(self.config.clone()))
    }

    fn asset_writer(
        &self,
        path: &Path,
        container: ContainerFormat,
    ) -> Result<Box<dyn AssetWriter>, String> {
        FfmpegAssetWriter::create(path, container, show_diagnostics(&self.config))
            .map(|w| Box::new(w) as Box<dyn AssetWriter>)
    }

    fn track_input(&self, settings: &TrackSettings) -> Result<Box<dyn TrackInput>, String> {
        FfmpegTrackInput::new(settings.clone()).map(|i| Box::new(i) as Box<dyn TrackInput>)
    }

    fn media_library(&self) -> Arc<dyn MediaLibrary> {
        self.library.clone()
    }
}

#[derive(Clone, Debug)]
pub struct FfmpegDeviceInput {
    device: CaptureDevice,
}

impl DeviceInput for FfmpegDeviceInput {
    fn device(&self) -> &CaptureDevice {
        &self.device
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn show_diagnostics(config: &CaptureConfig) -> bool {
    config.diagnostics || env::var_os(FFMPEG_STDERR_ENV).is_some()
}

fn stderr_for(config: &CaptureConfig) -> Stdio {
    if show_diagnostics(config) {
        Stdio::inherit()
    } else {
        Stdio::null()
    }
}

fn probe_ffmpeg() -> Result<(), RecorderError> {
    let status = Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| RecorderError::input_unavailable(format!("ffmpeg is not available: {e}")))?;
    if !status.success() {
        return Err(RecorderError::input_unavailable(format!(
            "ffmpeg -version exited with {status}"
        )));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn check_device_access(device: &str) -> Result<(), RecorderError> {
    std::fs::File::open(device)
        .map(drop)
        .map_err(|e| RecorderError::input_unavailable(format!("{device}: {e}")))
}

#[cfg(not(target_os = "linux"))]
fn check_device_access(_device: &str) -> Result<(), RecorderError> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn default_device_id() -> Option<String> {
    let mut nodes: Vec<u32> = std::fs::read_dir("/sys/class/video4linux")
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str()?.strip_prefix("video")?.parse().ok())
        .collect();
    nodes.sort_unstable();
    nodes
        .into_iter()
        .map(|idx| format!("/dev/video{idx}"))
        .find(|node| Path::new(node).exists())
        .map(|node| format!("file:{node}"))
}

#[cfg(target_os = "macos")]
fn default_device_id() -> Option<String> {
    Some("avf:0".to_string())
}

#[cfg(target_os = "windows")]
fn default_device_id() -> Option<String> {
    Some("dshow:video=default".to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn default_device_id() -> Option<String> {
    None
}

#[cfg(target_os = "macos")]
fn ffmpeg_format() -> &'static str {
    "avfoundation"
}

#[cfg(target_os = "linux")]
fn ffmpeg_format() -> &'static str {
    "v4l2"
}

#[cfg(target_os = "windows")]
fn ffmpeg_format() -> &'static str {
    "dshow"
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn ffmpeg_format() -> &'static str {
    "lavfi"
}

#[cfg(target_os = "macos")]
fn get_input_device(device: &str) -> String {
    device.strip_prefix("avf:").unwrap_or(device).to_string()
}

#[cfg(target_os = "windows")]
fn get_input_device(device: &str) -> String {
    device.strip_prefix("dshow:").unwrap_or(device).to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn get_input_device(device: &str) -> String {
    let d = device.strip_prefix("file:").unwrap_or(device);
    if d.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{d}")
    } else {
        d.to_string()
    }
}
