// This is free and unencumbered software released into the public domain.

use std::error::Error as StdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("no suitable media backend available")]
    NoDriver,

    #[error("no camera device available")]
    DeviceUnavailable,

    #[error("camera input unavailable: {0}")]
    InputUnavailable(String),

    #[error("could not create the video writer: {0}")]
    WriterInitError(String),

    #[error("could not create the video track input: {0}")]
    InputWriterInitError(String),

    #[error("the video writer does not accept the track input")]
    IncompatibleInput,

    #[error("failed to append frame: {0}")]
    AppendFailure(String),

    #[error("Writer not ready")]
    WriterNotReady,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("the previous recording is still being finalized")]
    FinalizePending,

    #[error("unusable pixel buffer: {0}")]
    InvalidPixelBuffer(String),

    #[error("video writer failed: {0}")]
    WriterFailed(String),

    #[error("could not save the video to the media library: {0}")]
    SaveFailed(String),

    #[error("internal error: {0}")]
    Panicked(String),

    #[error("driver error while {context}")]
    DriverError {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    #[inline]
    pub fn driver(context: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::DriverError {
            context,
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn input_unavailable(msg: impl Into<String>) -> Self {
        Self::InputUnavailable(msg.into())
    }

    #[inline]
    pub fn writer_init(msg: impl Into<String>) -> Self {
        Self::WriterInitError(msg.into())
    }

    #[inline]
    pub fn input_writer_init(msg: impl Into<String>) -> Self {
        Self::InputWriterInitError(msg.into())
    }

    #[inline]
    pub fn append_failure(msg: impl Into<String>) -> Self {
        Self::AppendFailure(msg.into())
    }

    #[inline]
    pub fn writer_failed(msg: impl Into<String>) -> Self {
        Self::WriterFailed(msg.into())
    }

    #[inline]
    pub fn save_failed(msg: impl Into<String>) -> Self {
        Self::SaveFailed(msg.into())
    }

    /// Builds the fallback error for a panic payload caught at a callback boundary.
    pub fn from_panic(payload: &(dyn core::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panicked(msg)
    }

    /// Per-frame conditions that only degrade to status text.
    pub fn is_frame_level(&self) -> bool {
        matches!(self, Self::AppendFailure(_) | Self::WriterNotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_not_ready_renders_status_text() {
        assert_eq!(RecorderError::WriterNotReady.to_string(), "Writer not ready");
    }

    #[test]
    fn frame_level_errors() {
        assert!(RecorderError::append_failure("disk full").is_frame_level());
        assert!(RecorderError::WriterNotReady.is_frame_level());
        assert!(!RecorderError::DeviceUnavailable.is_frame_level());
        assert!(!RecorderError::IncompatibleInput.is_frame_level());
    }

    #[test]
    fn panic_payloads_are_captured() {
        let err = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        match RecorderError::from_panic(&*err) {
            RecorderError::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn driver_error_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg");
        let err = RecorderError::driver("spawning ffmpeg", io);
        assert_eq!(err.to_string(), "driver error while spawning ffmpeg");
        assert!(err.source().is_some());
    }
}
