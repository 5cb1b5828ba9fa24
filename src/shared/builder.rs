// This is free and unencumbered software released into the public domain.

//! Resource builders for one recording.
//!
//! Each builder either returns fully wired resources or releases everything
//! it acquired before returning the error.

use crate::shared::{
    AssetWriter, CaptureConfig, CaptureSession, MediaPlatform, RecorderError, SampleHandler,
    SampleOutput, TrackInput,
};
use scopeguard::ScopeGuard;
use std::{fs, io, path::Path};

pub const SAMPLE_QUEUE_LABEL: &str = "asimov-recorder-frames";

/// Acquires the default camera and wires it into a not-yet-started session
/// whose frames are delivered to `handler` on a background queue.
pub fn build_capture_session(
    platform: &dyn MediaPlatform,
    config: &CaptureConfig,
    handler: SampleHandler,
) -> Result<Box<dyn CaptureSession>, RecorderError> {
    let device = platform
        .default_video_device()
        .ok_or(RecorderError::DeviceUnavailable)?;

    let input = platform.device_input(&device).map_err(|e| match e {
        e @ RecorderError::InputUnavailable(_) => e,
        other => RecorderError::input_unavailable(other.to_string()),
    })?;

    let mut session = scopeguard::guard(platform.capture_session(), |mut s| {
        let _ = s.stop_running();
    });

    if !session.can_add_input(input.as_ref()) {
        return Err(RecorderError::input_unavailable(format!(
            "session rejected camera {}",
            device.name
        )));
    }
    session.add_input(input)?;

    let output = SampleOutput {
        pixel_format: config.preview_format,
        queue_label: SAMPLE_QUEUE_LABEL.to_string(),
        handler,
    };
    if !session.can_add_output(&output) {
        return Err(RecorderError::input_unavailable(
            "session rejected the frame output",
        ));
    }
    session.add_output(output)?;

    #[cfg(feature = "tracing")]
    asimov_module::tracing::debug!(
        target: "asimov_camera_recorder",
        backend = %session.backend(),
        device = %device.id,
        "capture session wired"
    );

    Ok(ScopeGuard::into_inner(session))
}

/// A container writer with its video track input attached.
pub struct FileWriter {
    pub writer: Box<dyn AssetWriter>,
    pub input: Box<dyn TrackInput>,
}

impl FileWriter {
    pub fn cancel(mut self) {
        self.writer.cancel();
    }
}

impl core::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &self.writer.output_path())
            .field("settings", self.input.settings())
            .finish()
    }
}

/// Creates the writer for the scratch file, replacing whatever a previous
/// run left there, plus its video track input.
pub fn build_file_writer(
    platform: &dyn MediaPlatform,
    config: &CaptureConfig,
) -> Result<FileWriter, RecorderError> {
    let path = config.output_path();
    clear_scratch_file(&path)?;

    let writer = platform
        .asset_writer(&path, config.container)
        .map_err(RecorderError::writer_init)?;
    let writer = scopeguard::guard(writer, |mut w| w.cancel());

    let mut input = platform
        .track_input(&config.track_settings())
        .map_err(RecorderError::input_writer_init)?;

    if !writer.can_add_input(input.as_ref()) {
        return Err(RecorderError::IncompatibleInput);
    }

    let mut writer = writer;
    writer.add_input(input.as_mut())?;

    Ok(FileWriter {
        writer: ScopeGuard::into_inner(writer),
        input,
    })
}

fn clear_scratch_file(path: &Path) -> Result<(), RecorderError> {
    match fs::remove_file(path) {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            asimov_module::tracing::debug!(target: "asimov_camera_recorder", path = %path.display(), "removed previous scratch file");
            Ok(())
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecorderError::writer_init(format!(
            "cannot replace {}: {e}",
            path.display()
        ))),
    }
}
