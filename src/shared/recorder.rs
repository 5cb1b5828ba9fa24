// This is free and unencumbered software released into the public domain.

//! The start/record/stop protocol.
//!
//! A [`Recorder`] is owned by the display thread. While recording, the
//! capture session delivers samples through a [`FrameRoute`] to the
//! recording's [`FrameProcessor`] on its own serial queue. The processor owns
//! the writer for its whole life; `stop` closes the route and hands the
//! processor to a finalizer thread.

use crate::shared::{
    Alert, CaptureConfig, CaptureSession, Completion, Display, FileWriter, MediaLibrary,
    MediaPlatform, MediaTime, RecorderError, SampleBuffer, SampleHandler, build_capture_session,
    build_file_writer, to_preview_image,
};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use derive_more::Display as DisplayDerive;
use futures::{FutureExt, channel::oneshot, executor::block_on};
use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

pub const SAVED_STATUS: &str = "Video saved";

#[derive(Clone, Copy, Debug, DisplayDerive, PartialEq, Eq)]
pub enum RecorderPhase {
    #[display("idle")]
    Idle,
    #[display("starting")]
    Starting,
    #[display("recording")]
    Recording,
    #[display("stopping")]
    Stopping,
}

impl RecorderPhase {
    /// Label for the single Record/Stop toggle.
    pub fn toggle_label(self) -> &'static str {
        match self {
            Self::Recording => "Stop",
            Self::Idle | Self::Starting | Self::Stopping => "Record",
        }
    }
}

/// What one frame callback did with its sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameOutcome {
    /// The route was closed; the sample was released untouched.
    Ignored,
    /// First frame: the writer timeline now starts at this timestamp.
    TimelineStarted(MediaTime),
    /// Appended; carries the running frame count.
    Appended(u64),
    AppendFailed,
    NotReady,
    /// Reported through an alert.
    Failed,
}

struct TrackState {
    file: FileWriter,
    timeline_start: Option<MediaTime>,
}

/// Where the capture queue sends samples.
///
/// A session is wired before its writer exists and keeps delivering for a
/// moment after `stop`, so the route starts and ends closed.
#[derive(Default)]
pub struct FrameRoute {
    target: Mutex<Option<Arc<FrameProcessor>>>,
}

impl FrameRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capture handler feeding this route.
    pub fn handler(self: &Arc<Self>) -> SampleHandler {
        let route = Arc::clone(self);
        Arc::new(move |sample: SampleBuffer| {
            route.dispatch(sample);
        })
    }

    /// Hands the sample to the open processor, or releases it.
    pub fn dispatch(&self, sample: SampleBuffer) -> FrameOutcome {
        // Held across `handle` so `close` waits out a frame in flight.
        let target = self.target.lock();
        match target.as_ref() {
            Some(processor) => processor.handle(sample),
            None => {
                sample.release();
                FrameOutcome::Ignored
            },
        }
    }

    pub fn open(&self, processor: Arc<FrameProcessor>) {
        *self.target.lock() = Some(processor);
    }

    /// After this returns no sample reaches the processor again.
    pub fn close(&self) {
        self.target.lock().take();
    }
}

/// Frame callback target for one recording; owns that recording's writer.
pub struct FrameProcessor {
    track: Mutex<TrackState>,
    frames: AtomicU64,
    display: Display,
}

impl FrameProcessor {
    pub fn new(file: FileWriter, display: Display) -> Self {
        Self {
            track: Mutex::new(TrackState {
                file,
                timeline_start: None,
            }),
            frames: AtomicU64::new(0),
            display,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Abandons the file when the recording never got going.
    fn cancel(&self) {
        self.track.lock().file.writer.cancel();
    }

    /// Marks the track finished and finalizes the container.
    fn finish(&self) -> Completion<PathBuf> {
        let mut track = self.track.lock();
        track.file.input.mark_as_finished();
        track.file.writer.finish()
    }

    /// Handles one captured sample. The sample is released exactly once
    /// whichever way this returns, including after a caught panic.
    pub fn handle(&self, sample: SampleBuffer) -> FrameOutcome {
        let sample = scopeguard::guard(sample, SampleBuffer::release);

        match catch_unwind(AssertUnwindSafe(|| self.process(&sample))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                self.display.alert(Alert::from(&err));
                FrameOutcome::Failed
            },
            Err(payload) => {
                let err = RecorderError::from_panic(&*payload);
                #[cfg(feature = "tracing")]
                asimov_module::tracing::error!(target: "asimov_camera_recorder", %err, "frame callback panicked");
                self.display.alert(Alert::from(&err));
                FrameOutcome::Failed
            },
        }
    }

    fn process(&self, sample: &SampleBuffer) -> Result<FrameOutcome, RecorderError> {
        let mut track = self.track.lock();

        let pts = sample.presentation_time();
        if track.timeline_start.is_none() {
            track.file.writer.start_session(pts);
            track.timeline_start = Some(pts);
            return Ok(FrameOutcome::TimelineStarted(pts));
        }

        if let Some(pixels) = sample.pixel_buffer() {
            self.display.preview(to_preview_image(pixels)?);
        }

        if !track.file.input.is_ready_for_more_media_data() {
            self.display.status(RecorderError::WriterNotReady.to_string());
            return Ok(FrameOutcome::NotReady);
        }

        match track.file.input.append(sample) {
            Ok(()) => {
                let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
                self.display.status(format!("{n} frames captured"));
                Ok(FrameOutcome::Appended(n))
            },
            Err(err) => {
                let err = if err.is_frame_level() {
                    err
                } else {
                    RecorderError::append_failure(err.to_string())
                };
                self.display.status(err.to_string());
                Ok(FrameOutcome::AppendFailed)
            },
        }
    }
}

/// A finished recording, stored in the media library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedRecording {
    pub file: PathBuf,
    pub location: PathBuf,
    pub frames: u64,
}

/// Resolves once the writer has finalized and the media library has the file.
#[must_use = "dropping a Finalization does not cancel it, but its result is lost"]
pub struct Finalization {
    rx: oneshot::Receiver<Result<SavedRecording, RecorderError>>,
}

impl Finalization {
    /// Blocks the calling thread until finalization completes.
    pub fn wait(self) -> Result<SavedRecording, RecorderError> {
        block_on(self)
    }
}

impl Future for Finalization {
    type Output = Result<SavedRecording, RecorderError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|r| {
            r.unwrap_or_else(|_| {
                Err(RecorderError::Panicked(
                    "finalizer exited without a result".into(),
                ))
            })
        })
    }
}

struct RecordingSession {
    capture: Box<dyn CaptureSession>,
    route: Arc<FrameRoute>,
    processor: Arc<FrameProcessor>,
}

struct PendingFinalize {
    done: Arc<AtomicBool>,
    processor: Arc<FrameProcessor>,
}

enum RecorderState {
    Idle,
    Recording(RecordingSession),
    Stopping(PendingFinalize),
}

pub struct Recorder {
    platform: Arc<dyn MediaPlatform>,
    config: CaptureConfig,
    display: Display,
    state: RecorderState,
    last_frames: u64,
}

impl Recorder {
    pub fn new(platform: Arc<dyn MediaPlatform>, config: CaptureConfig, display: Display) -> Self {
        Self {
            platform,
            config,
            display,
            state: RecorderState::Idle,
            last_frames: 0,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn phase(&self) -> RecorderPhase {
        match &self.state {
            RecorderState::Idle => RecorderPhase::Idle,
            RecorderState::Recording(_) => RecorderPhase::Recording,
            RecorderState::Stopping(p) if p.done.load(Ordering::Acquire) => RecorderPhase::Idle,
            RecorderState::Stopping(_) => RecorderPhase::Stopping,
        }
    }

    /// Appended frames of the current recording, or of the last one when idle.
    pub fn frames_captured(&self) -> u64 {
        match &self.state {
            RecorderState::Idle => self.last_frames,
            RecorderState::Recording(s) => s.processor.frames_captured(),
            RecorderState::Stopping(p) => p.processor.frames_captured(),
        }
    }

    /// The Record/Stop control: starts when idle, stops when recording.
    pub fn toggle(&mut self) -> Result<RecorderPhase, RecorderError> {
        self.reap_finalized();
        match self.state {
            RecorderState::Idle => self.start().map(|()| RecorderPhase::Recording),
            RecorderState::Recording(_) => {
                // The caller may ignore file completion; it is reported on the display.
                let _ = self.stop();
                Ok(self.phase())
            },
            RecorderState::Stopping(_) => Err(RecorderError::FinalizePending),
        }
    }

    pub fn start(&mut self) -> Result<(), RecorderError> {
        self.reap_finalized();
        match &self.state {
            RecorderState::Recording(_) => return Err(RecorderError::AlreadyRecording),
            RecorderState::Stopping(_) => return Err(RecorderError::FinalizePending),
            RecorderState::Idle => {},
        }

        self.display.phase(RecorderPhase::Starting);
        match self.open_session() {
            Ok(session) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::info!(
                    target: "asimov_camera_recorder",
                    backend = %self.platform.backend(),
                    path = %self.config.output_path().display(),
                    "recording started"
                );
                self.state = RecorderState::Recording(session);
                self.display.phase(RecorderPhase::Recording);
                Ok(())
            },
            Err(err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(target: "asimov_camera_recorder", %err, "recording failed to start");
                self.display.phase(RecorderPhase::Idle);
                Err(err)
            },
        }
    }

    /// Builds and starts everything for one recording. On failure every
    /// resource acquired so far is released before returning.
    fn open_session(&self) -> Result<RecordingSession, RecorderError> {
        let route = Arc::new(FrameRoute::new());

        let capture = build_capture_session(&*self.platform, &self.config, route.handler())?;
        let mut capture = scopeguard::guard(capture, |mut c| {
            let _ = c.stop_running();
        });

        let file = build_file_writer(&*self.platform, &self.config)?;
        let mut file = scopeguard::guard(file, FileWriter::cancel);
        file.writer.start_writing()?;

        let processor = Arc::new(FrameProcessor::new(
            ScopeGuard::into_inner(file),
            self.display.clone(),
        ));
        route.open(Arc::clone(&processor));
        if let Err(err) = capture.start_running() {
            route.close();
            processor.cancel();
            return Err(err);
        }

        Ok(RecordingSession {
            capture: ScopeGuard::into_inner(capture),
            route,
            processor,
        })
    }

    /// Stops the camera right away and finalizes the file in the background.
    ///
    /// Returns `None` when nothing was recording.
    pub fn stop(&mut self) -> Option<Finalization> {
        self.reap_finalized();
        if !matches!(self.state, RecorderState::Recording(_)) {
            return None;
        }
        let RecorderState::Recording(session) =
            core::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return None;
        };

        let RecordingSession {
            mut capture,
            route,
            processor,
        } = session;
        if let Err(_err) = capture.stop_running() {
            #[cfg(feature = "tracing")]
            asimov_module::tracing::warn!(target: "asimov_camera_recorder", err = %_err, "camera did not stop cleanly");
        }
        route.close();
        drop(capture);

        let (tx, rx) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));
        let frames = processor.frames_captured();

        let job = FinalizeJob {
            processor: Arc::clone(&processor),
            library: self.platform.media_library(),
            display: self.display.clone(),
            done: Arc::clone(&done),
            frames,
        };

        // Posted before the finalizer can report, so the display never
        // sees Stopping after Idle.
        self.display.phase(RecorderPhase::Stopping);
        let spawned = std::thread::Builder::new()
            .name("asimov-recorder-finalize".into())
            .spawn(move || {
                let result = job.run();
                let _ = tx.send(result);
            });

        if let Err(_err) = spawned {
            // The job (and its sender) went down with the failed spawn.
            #[cfg(feature = "tracing")]
            asimov_module::tracing::error!(target: "asimov_camera_recorder", err = %_err, "could not start finalizer");
            self.display.alert(Alert::new("could not finalize the recording"));
            self.last_frames = frames;
            self.display.phase(RecorderPhase::Idle);
            return Some(Finalization { rx });
        }

        #[cfg(feature = "tracing")]
        asimov_module::tracing::info!(target: "asimov_camera_recorder", frames, "recording stopped");

        self.state = RecorderState::Stopping(PendingFinalize { done, processor });
        Some(Finalization { rx })
    }

    fn reap_finalized(&mut self) {
        if let RecorderState::Stopping(p) = &self.state {
            if p.done.load(Ordering::Acquire) {
                self.last_frames = p.processor.frames_captured();
                self.state = RecorderState::Idle;
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct FinalizeJob {
    processor: Arc<FrameProcessor>,
    library: Arc<dyn MediaLibrary>,
    display: Display,
    done: Arc<AtomicBool>,
    frames: u64,
}

impl FinalizeJob {
    fn run(self) -> Result<SavedRecording, RecorderError> {
        let FinalizeJob {
            processor,
            library,
            display,
            done,
            frames,
        } = self;

        let _idle = scopeguard::guard((display.clone(), done), |(display, done)| {
            done.store(true, Ordering::Release);
            display.phase(RecorderPhase::Idle);
        });

        let result = catch_unwind(AssertUnwindSafe(|| finalize(&processor, &*library, frames)))
            .unwrap_or_else(|payload| Err(RecorderError::from_panic(&*payload)));

        match &result {
            Ok(saved) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::info!(
                    target: "asimov_camera_recorder",
                    location = %saved.location.display(),
                    frames = saved.frames,
                    "recording saved"
                );
                display.status(SAVED_STATUS);
                display.saved(saved.location.clone());
            },
            Err(err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::error!(target: "asimov_camera_recorder", %err, "recording could not be saved");
                display.alert(Alert::from(err));
            },
        }
        result
    }
}

fn finalize(
    processor: &FrameProcessor,
    library: &dyn MediaLibrary,
    frames: u64,
) -> Result<SavedRecording, RecorderError> {
    let file = block_on(processor.finish())?;
    let location = block_on(library.save_video(&file))?;

    Ok(SavedRecording {
        file,
        location,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_labels() {
        assert_eq!(RecorderPhase::Idle.toggle_label(), "Record");
        assert_eq!(RecorderPhase::Recording.toggle_label(), "Stop");
        assert_eq!(RecorderPhase::Stopping.toggle_label(), "Record");
    }

    #[test]
    fn closed_route_ignores_samples() {
        let route = FrameRoute::new();
        let frame = crate::shared::Frame::new_bgra(vec![0u8; 4], 1, 1, 4);

        assert_eq!(route.dispatch(SampleBuffer::new(frame)), FrameOutcome::Ignored);
    }
}
