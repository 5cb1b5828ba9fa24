// This is free and unencumbered software released into the public domain.

mod common;

use asimov_camera_recorder::shared::{
    ContainerFormat, RecorderError, RecorderEvent, RecorderPhase, SampleBuffer, SampleHandler,
    VideoCodec, build_capture_session, build_file_writer,
};
use common::{Harness, Probe, Script};
use std::{fs, sync::Arc};

fn noop_handler() -> SampleHandler {
    Arc::new(|sample: SampleBuffer| sample.release())
}

/// Starts with one knob set and checks that nothing was left behind.
fn failed_start(knob: impl FnOnce(&mut Script)) -> (RecorderError, Harness) {
    let mut h = Harness::new();
    h.probe.script(knob);

    let err = h.recorder.start().unwrap_err();
    assert_eq!(h.recorder.phase(), RecorderPhase::Idle);
    assert_eq!(h.probe.live_sessions(), 0, "capture session leaked");
    assert_eq!(Probe::count(&h.probe.sessions_running), 0);
    assert!(h.probe.handler.lock().is_none());
    assert_eq!(
        Probe::count(&h.probe.writers_created),
        Probe::count(&h.probe.writers_cancelled),
        "writer leaked"
    );
    assert!(!h.config.output_path().exists());
    assert_eq!(
        h.events(),
        vec![
            RecorderEvent::Phase(RecorderPhase::Starting),
            RecorderEvent::Phase(RecorderPhase::Idle),
        ]
    );
    (err, h)
}

#[test]
fn missing_camera_fails_with_device_unavailable() {
    let (err, h) = failed_start(|s| s.no_device = true);
    assert!(matches!(err, RecorderError::DeviceUnavailable));
    assert_eq!(Probe::count(&h.probe.sessions_created), 0);
}

#[test]
fn denied_camera_fails_with_input_unavailable() {
    let (err, _) = failed_start(|s| s.input_fails = true);
    match err {
        RecorderError::InputUnavailable(msg) => assert!(msg.contains("access denied")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn rejected_input_tears_the_session_down() {
    let (err, h) = failed_start(|s| s.session_rejects_input = true);
    assert!(matches!(err, RecorderError::InputUnavailable(_)));
    assert_eq!(Probe::count(&h.probe.sessions_created), 1);
    assert_eq!(Probe::count(&h.probe.sessions_dropped), 1);
}

#[test]
fn writer_failure_releases_the_camera() {
    let (err, h) = failed_start(|s| s.writer_fails = true);
    match err {
        RecorderError::WriterInitError(msg) => assert!(msg.contains("read-only")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(Probe::count(&h.probe.sessions_created), 1);
    assert_eq!(Probe::count(&h.probe.writers_created), 0);
}

#[test]
fn track_failure_cancels_the_writer() {
    let (err, h) = failed_start(|s| s.track_fails = true);
    assert!(matches!(err, RecorderError::InputWriterInitError(_)));
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
}

#[test]
fn incompatible_track_cancels_the_writer() {
    let (err, h) = failed_start(|s| s.incompatible = true);
    assert!(matches!(err, RecorderError::IncompatibleInput));
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
}

#[test]
fn writer_start_failure_rolls_back() {
    let (err, h) = failed_start(|s| s.start_writing_fails = true);
    assert!(matches!(err, RecorderError::WriterFailed(_)));
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
}

#[test]
fn camera_start_failure_rolls_back() {
    let (err, h) = failed_start(|s| s.start_running_fails = true);
    assert!(matches!(err, RecorderError::InputUnavailable(_)));
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
    assert_eq!(Probe::count(&h.probe.sessions_dropped), 1);
}

#[test]
fn recorder_recovers_after_a_failed_start() {
    let (_, mut h) = failed_start(|s| s.writer_fails = true);
    h.probe.script(|s| s.writer_fails = false);
    h.recorder.start().unwrap();
    assert_eq!(h.recorder.phase(), RecorderPhase::Recording);
    assert_eq!(h.probe.live_sessions(), 1);
}

#[test]
fn capture_session_is_wired_but_not_started() {
    let h = Harness::new();
    let session = build_capture_session(&*h.platform, &h.config, noop_handler()).unwrap();
    assert!(!session.is_running());
    assert!(h.probe.handler.lock().is_some());

    drop(session);
    assert!(h.probe.handler.lock().is_none());
    assert_eq!(h.probe.live_sessions(), 0);
}

#[test]
fn file_writer_replaces_a_stale_scratch_file() {
    let h = Harness::new();
    let path = h.config.output_path();
    fs::write(&path, b"stale").unwrap();

    let file = build_file_writer(&*h.platform, &h.config).unwrap();
    assert_eq!(file.writer.output_path(), path);
    assert_eq!(file.input.settings().codec, VideoCodec::H264);
    assert_eq!(file.input.settings().width, 640);
    assert_eq!(file.input.settings().height, 480);
    assert!(!path.exists());

    file.cancel();
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
}

#[test]
fn mp4_rejects_jpeg_tracks() {
    let h = Harness::new();
    let mut config = h.config.clone();
    config.container = ContainerFormat::Mpeg4;
    config.codec = VideoCodec::Jpeg;

    let err = build_file_writer(&*h.platform, &config).unwrap_err();
    assert!(matches!(err, RecorderError::IncompatibleInput));
    assert_eq!(Probe::count(&h.probe.writers_cancelled), 1);
}

#[test]
fn unremovable_scratch_path_is_a_writer_init_error() {
    let h = Harness::new();
    // A directory where the scratch file should be cannot be removed as a file.
    fs::create_dir(h.config.output_path()).unwrap();

    let err = build_file_writer(&*h.platform, &h.config).unwrap_err();
    assert!(matches!(err, RecorderError::WriterInitError(_)));
    assert_eq!(Probe::count(&h.probe.writers_created), 0);
}
