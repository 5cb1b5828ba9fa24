// This is free and unencumbered software released into the public domain.

//! CLI helpers (error reporting, verbosity handling, event rendering).
//!
//! This module must compile even when the crate feature `cli` is disabled,
//! because the library is built in non-CLI configurations (e.g. the iOS
//! static library).

#[cfg(feature = "cli")]
use crate::shared::{RecorderError, RecorderEvent};

#[cfg(feature = "cli")]
use asimov_module::SysexitsError::{self, *};

#[cfg(feature = "cli")]
use clientele::StandardOptions;

#[cfg(feature = "cli")]
use std::io::{self, Write};

#[cfg(feature = "cli")]
pub fn handle_error(err: &RecorderError, flags: &StandardOptions) -> SysexitsError {
    #[cfg(feature = "tracing")]
    {
        use asimov_module::tracing::{debug, error};

        error!(target: "asimov_camera_recorder", %err, "recorder command failed");

        if flags.debug || flags.verbose >= 2 {
            debug!(target: "asimov_camera_recorder", ?err, "detailed error");
        }
    }

    report_error(err, flags);
    map_error_to_sysexit(err)
}

#[cfg(feature = "cli")]
pub fn info_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("INFO: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::info!(target: "asimov_camera_recorder", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "asimov_camera_recorder", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user_with_error(flags: &StandardOptions, msg: &str, error: &dyn std::error::Error) {
    if flags.debug || flags.verbose >= 2 {
        eprintln!("WARN: {msg}: {error}");
    } else if flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "asimov_camera_recorder", error = %error, "{msg}");
}

#[cfg(feature = "cli")]
fn report_error(err: &RecorderError, flags: &StandardOptions) {
    use std::error::Error as _;

    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "ERROR: {err}");

    if flags.debug || flags.verbose >= 2 {
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(stderr, "  Caused by: {}", cause);
            source = cause.source();
        }
    }
}

#[cfg(feature = "cli")]
pub fn map_error_to_sysexit(err: &RecorderError) -> SysexitsError {
    match err {
        RecorderError::NoDriver => EX_UNAVAILABLE,
        RecorderError::DeviceUnavailable => EX_UNAVAILABLE,
        RecorderError::InputUnavailable(_) => EX_NOPERM,
        RecorderError::WriterInitError(_) => EX_CANTCREAT,
        RecorderError::InputWriterInitError(_) => EX_CANTCREAT,
        RecorderError::IncompatibleInput => EX_CONFIG,
        RecorderError::AlreadyRecording | RecorderError::FinalizePending => EX_TEMPFAIL,
        RecorderError::WriterFailed(_) | RecorderError::SaveFailed(_) => EX_IOERR,
        RecorderError::Io(_) => EX_IOERR,
        RecorderError::AppendFailure(_)
        | RecorderError::WriterNotReady
        | RecorderError::InvalidPixelBuffer(_)
        | RecorderError::Panicked(_)
        | RecorderError::DriverError { .. } => EX_SOFTWARE,
    }
}

/// How status events are written to stdout.
#[cfg(feature = "cli")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Jsonl,
}

/// Writes one display event: status lines to `out`, alerts to `err`.
///
/// `PreviewReady` is not rendered here; the caller owns the preview slot.
#[cfg(feature = "cli")]
pub fn write_event(
    format: OutputFormat,
    event: &RecorderEvent,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    match (format, event) {
        (_, RecorderEvent::PreviewReady) => Ok(()),
        (OutputFormat::Text, RecorderEvent::Phase(phase)) => {
            writeln!(out, "[{}] {phase}", phase.toggle_label())
        },
        (OutputFormat::Text, RecorderEvent::Status(text)) => writeln!(out, "{text}"),
        (OutputFormat::Text, RecorderEvent::Saved(path)) => {
            writeln!(out, "saved: {}", path.display())
        },
        (OutputFormat::Text, RecorderEvent::Alert(alert)) => {
            writeln!(err, "{}: {}", alert.title, alert.message)
        },
        (OutputFormat::Jsonl, event) => {
            let json = event_to_json(event);
            match event {
                RecorderEvent::Alert(_) => writeln!(err, "{json}"),
                _ => writeln!(out, "{json}"),
            }
        },
    }
}

#[cfg(feature = "cli")]
fn event_to_json(event: &RecorderEvent) -> serde_json::Value {
    use serde_json::json;
    match event {
        RecorderEvent::Phase(phase) => json!({
            "event": "phase",
            "phase": phase.to_string(),
            "toggle": phase.toggle_label(),
        }),
        RecorderEvent::Status(text) => json!({ "event": "status", "text": text }),
        RecorderEvent::PreviewReady => json!({ "event": "preview" }),
        RecorderEvent::Alert(alert) => json!({
            "event": "alert",
            "title": alert.title,
            "message": alert.message,
        }),
        RecorderEvent::Saved(path) => json!({
            "event": "saved",
            "path": path.display().to_string(),
        }),
    }
}

// When `cli` is disabled, keep the module linkable without exposing CLI-only types.
#[cfg(not(feature = "cli"))]
#[inline]
pub fn info_user(_msg: &str) {}

#[cfg(not(feature = "cli"))]
#[inline]
pub fn warn_user(_msg: &str) {}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use crate::shared::{Alert, RecorderPhase};
    use std::path::PathBuf;

    fn render(format: OutputFormat, event: RecorderEvent) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        write_event(format, &event, &mut out, &mut err).unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn text_status_goes_to_stdout() {
        let (out, err) = render(
            OutputFormat::Text,
            RecorderEvent::Status("3 frames captured".into()),
        );
        assert_eq!(out, "3 frames captured\n");
        assert!(err.is_empty());
    }

    #[test]
    fn text_phase_shows_toggle_label() {
        let (out, _) = render(
            OutputFormat::Text,
            RecorderEvent::Phase(RecorderPhase::Recording),
        );
        assert_eq!(out, "[Stop] recording\n");
    }

    #[test]
    fn alerts_go_to_stderr() {
        let (out, err) = render(
            OutputFormat::Text,
            RecorderEvent::Alert(Alert::new("no camera device available")),
        );
        assert!(out.is_empty());
        assert_eq!(err, "Recording error: no camera device available\n");
    }

    #[test]
    fn jsonl_lines_parse() {
        let (out, _) = render(
            OutputFormat::Jsonl,
            RecorderEvent::Saved(PathBuf::from("/tmp/recording.mov")),
        );
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["event"], "saved");
        assert_eq!(value["path"], "/tmp/recording.mov");
    }

    #[test]
    fn preview_events_are_silent() {
        let (out, err) = render(OutputFormat::Jsonl, RecorderEvent::PreviewReady);
        assert!(out.is_empty() && err.is_empty());
    }

    #[test]
    fn sysexit_mapping() {
        assert!(matches!(
            map_error_to_sysexit(&RecorderError::DeviceUnavailable),
            EX_UNAVAILABLE
        ));
        assert!(matches!(
            map_error_to_sysexit(&RecorderError::input_unavailable("denied")),
            EX_NOPERM
        ));
        assert!(matches!(
            map_error_to_sysexit(&RecorderError::writer_init("read-only")),
            EX_CANTCREAT
        ));
    }
}
