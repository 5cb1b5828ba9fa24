// This is free and unencumbered software released into the public domain.

//! A scripted in-memory media platform.
//!
//! Frames are delivered synchronously from the test thread through the
//! handler the recorder registered, so every assertion sees a settled state.

#![allow(dead_code)]

use asimov_camera_recorder::shared::{
    AssetWriter, CaptureConfig, CaptureDevice, CaptureSession, Completion, ContainerFormat,
    DeviceInput, Display, DisplayQueue, Frame, FolderLibrary, MediaBackend, MediaLibrary,
    MediaPlatform, MediaTime, PixelBuffer, Recorder, RecorderError, RecorderEvent, Sample,
    SampleBuffer, SampleHandler, SampleOutput, TrackInput, TrackSettings, display_channel,
};
use futures::{FutureExt, channel::oneshot};
use parking_lot::Mutex;
use std::{
    any::Any,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

pub const FRAME_WIDTH: usize = 4;
pub const FRAME_HEIGHT: usize = 2;

/// Failure knobs, read at the moment each platform call happens.
#[derive(Clone, Debug, Default)]
pub struct Script {
    pub no_device: bool,
    pub input_fails: bool,
    pub session_rejects_input: bool,
    pub writer_fails: bool,
    pub track_fails: bool,
    pub incompatible: bool,
    pub start_writing_fails: bool,
    pub start_running_fails: bool,
    pub append_fails: bool,
    pub append_panics: bool,
    pub finish_fails: bool,
    pub save_fails: bool,
    /// `finish` stays pending until [`Probe::release_finish`].
    pub gate_finish: bool,
}

/// Everything the platform observed.
#[derive(Default)]
pub struct Probe {
    pub script: Mutex<Script>,
    pub not_ready: AtomicBool,

    pub sessions_created: AtomicUsize,
    pub sessions_dropped: AtomicUsize,
    pub sessions_running: AtomicUsize,
    pub writers_created: AtomicUsize,
    pub writers_cancelled: AtomicUsize,
    pub writers_finished: AtomicUsize,
    pub inputs_finished: AtomicUsize,
    pub samples_created: AtomicUsize,
    pub samples_released: AtomicUsize,

    pub timeline_starts: Mutex<Vec<MediaTime>>,
    pub appended: Mutex<Vec<MediaTime>>,
    pub handler: Mutex<Option<SampleHandler>>,
    finish_gate: Mutex<Option<oneshot::Sender<()>>>,
}

impl Probe {
    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock());
    }

    fn knobs(&self) -> Script {
        self.script.lock().clone()
    }

    pub fn set_not_ready(&self, not_ready: bool) {
        self.not_ready.store(not_ready, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn release_finish(&self) {
        if let Some(tx) = self.finish_gate.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn appended_count(&self) -> usize {
        self.appended.lock().len()
    }

    /// Sessions still holding the camera.
    pub fn live_sessions(&self) -> usize {
        Self::count(&self.sessions_created) - Self::count(&self.sessions_dropped)
    }
}

pub struct MemoryPlatform {
    probe: Arc<Probe>,
    library: FolderLibrary,
}

impl MediaPlatform for MemoryPlatform {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Memory
    }

    fn default_video_device(&self) -> Option<CaptureDevice> {
        if self.probe.knobs().no_device {
            return None;
        }
        Some(CaptureDevice {
            id: "memory:0".into(),
            name: "Memory Camera".into(),
        })
    }

    fn device_input(&self, device: &CaptureDevice) -> Result<Box<dyn DeviceInput>, RecorderError> {
        if self.probe.knobs().input_fails {
            return Err(RecorderError::input_unavailable("camera access denied"));
        }
        Ok(Box::new(MemoryInput {
            device: device.clone(),
        }))
    }

    fn capture_session(&self) -> Box<dyn CaptureSession> {
        self.probe.sessions_created.fetch_add(1, Ordering::SeqCst);
        Box::new(MemorySession {
            probe: Arc::clone(&self.probe),
            has_input: false,
            running: false,
        })
    }

    fn asset_writer(
        &self,
        path: &Path,
        container: ContainerFormat,
    ) -> Result<Box<dyn AssetWriter>, String> {
        if self.probe.knobs().writer_fails {
            return Err("disk is read-only".into());
        }
        if path.exists() {
            return Err(format!("{} already exists", path.display()));
        }
        self.probe.writers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            probe: Arc::clone(&self.probe),
            path: path.to_path_buf(),
            container,
            first_append: 0,
        }))
    }

    fn track_input(&self, settings: &TrackSettings) -> Result<Box<dyn TrackInput>, String> {
        if self.probe.knobs().track_fails {
            return Err("unsupported output settings".into());
        }
        Ok(Box::new(MemoryTrack {
            probe: Arc::clone(&self.probe),
            settings: settings.clone(),
        }))
    }

    fn media_library(&self) -> Arc<dyn MediaLibrary> {
        Arc::new(MemoryLibrary {
            probe: Arc::clone(&self.probe),
            folder: self.library.clone(),
        })
    }
}

struct MemoryInput {
    device: CaptureDevice,
}

impl DeviceInput for MemoryInput {
    fn device(&self) -> &CaptureDevice {
        &self.device
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MemorySession {
    probe: Arc<Probe>,
    has_input: bool,
    running: bool,
}

impl CaptureSession for MemorySession {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Memory
    }

    fn can_add_input(&self, input: &dyn DeviceInput) -> bool {
        input.as_any().is::<MemoryInput>() && !self.probe.knobs().session_rejects_input
    }

    fn add_input(&mut self, _input: Box<dyn DeviceInput>) -> Result<(), RecorderError> {
        self.has_input = true;
        Ok(())
    }

    fn can_add_output(&self, _output: &SampleOutput) -> bool {
        self.probe.handler.lock().is_none()
    }

    fn add_output(&mut self, output: SampleOutput) -> Result<(), RecorderError> {
        *self.probe.handler.lock() = Some(output.handler);
        Ok(())
    }

    fn start_running(&mut self) -> Result<(), RecorderError> {
        if self.probe.knobs().start_running_fails {
            return Err(RecorderError::input_unavailable("camera in use"));
        }
        if !self.running {
            self.running = true;
            self.probe.sessions_running.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop_running(&mut self) -> Result<(), RecorderError> {
        if self.running {
            self.running = false;
            self.probe.sessions_running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let _ = self.stop_running();
        self.probe.handler.lock().take();
        self.probe.sessions_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryWriter {
    probe: Arc<Probe>,
    path: PathBuf,
    container: ContainerFormat,
    /// Index into `Probe::appended` where this writer's frames begin.
    first_append: usize,
}

impl AssetWriter for MemoryWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn can_add_input(&self, input: &dyn TrackInput) -> bool {
        !self.probe.knobs().incompatible && self.container.supports(input.settings().codec)
    }

    fn add_input(&mut self, _input: &mut dyn TrackInput) -> Result<(), RecorderError> {
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), RecorderError> {
        if self.probe.knobs().start_writing_fails {
            return Err(RecorderError::writer_failed("cannot start writing"));
        }
        self.first_append = self.probe.appended_count();
        fs::write(&self.path, b"").map_err(RecorderError::from)
    }

    fn start_session(&mut self, at: MediaTime) {
        self.probe.timeline_starts.lock().push(at);
    }

    fn finish(&mut self) -> Completion<PathBuf> {
        let probe = Arc::clone(&self.probe);
        let path = self.path.clone();
        let first_append = self.first_append;
        let complete = move || {
            if probe.knobs().finish_fails {
                return Err(RecorderError::writer_failed("encoder crashed"));
            }
            let body = format!("{} frames", probe.appended_count() - first_append);
            fs::write(&path, body)?;
            probe.writers_finished.fetch_add(1, Ordering::SeqCst);
            Ok(path)
        };

        if self.probe.knobs().gate_finish {
            let (tx, rx) = oneshot::channel();
            *self.probe.finish_gate.lock() = Some(tx);
            rx.map(move |_| complete()).boxed()
        } else {
            futures::future::ready(complete()).boxed()
        }
    }

    fn cancel(&mut self) {
        let _ = fs::remove_file(&self.path);
        self.probe.writers_cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryTrack {
    probe: Arc<Probe>,
    settings: TrackSettings,
}

impl TrackInput for MemoryTrack {
    fn settings(&self) -> &TrackSettings {
        &self.settings
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        !self.probe.not_ready.load(Ordering::SeqCst)
    }

    fn append(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError> {
        let knobs = self.probe.knobs();
        if knobs.append_panics {
            panic!("encoder exploded");
        }
        if knobs.append_fails {
            return Err(RecorderError::append_failure("encoder rejected the frame"));
        }
        self.probe.appended.lock().push(sample.presentation_time());
        Ok(())
    }

    fn mark_as_finished(&mut self) {
        self.probe.inputs_finished.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct MemoryLibrary {
    probe: Arc<Probe>,
    folder: FolderLibrary,
}

impl MediaLibrary for MemoryLibrary {
    fn save_video(&self, path: &Path) -> Completion<PathBuf> {
        if self.probe.knobs().save_fails {
            return futures::future::ready(Err(RecorderError::save_failed("permission denied")))
                .boxed();
        }
        self.folder.save_video(path)
    }
}

/// A camera sample that reports its release to the probe.
pub struct MemorySample {
    frame: Frame,
    probe: Arc<Probe>,
}

impl Sample for MemorySample {
    fn presentation_time(&self) -> MediaTime {
        self.frame.timestamp
    }

    fn pixel_buffer(&self) -> Option<&dyn PixelBuffer> {
        Some(&self.frame)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for MemorySample {
    fn drop(&mut self) {
        self.probe.samples_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A recorder over the memory platform with scratch and library folders.
pub struct Harness {
    pub probe: Arc<Probe>,
    pub recorder: Recorder,
    pub queue: DisplayQueue,
    pub display: Display,
    pub config: CaptureConfig,
    pub platform: Arc<MemoryPlatform>,
    pub documents: TempDir,
    pub library: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let documents = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let platform = Arc::new(MemoryPlatform {
            probe: Arc::clone(&probe),
            library: FolderLibrary::new(library.path()),
        });
        let config = CaptureConfig::default()
            .with_document_dir(documents.path())
            .with_library_dir(library.path());
        let (display, queue) = display_channel();
        let recorder = Recorder::new(
            Arc::clone(&platform) as Arc<dyn MediaPlatform>,
            config.clone(),
            display.clone(),
        );
        Self {
            probe,
            recorder,
            queue,
            display,
            config,
            platform,
            documents,
            library,
        }
    }

    /// Runs one frame through the registered handler, as the camera queue
    /// would. Returns false when no session is delivering frames.
    pub fn deliver(&self, millis: i64) -> bool {
        let handler = self.probe.handler.lock().clone();
        let Some(handler) = handler else {
            return false;
        };
        self.deliver_to(&handler, millis);
        true
    }

    /// Delivers through a handler the test kept hold of, as a capture queue
    /// still draining after its session stopped would.
    pub fn deliver_to(&self, handler: &SampleHandler, millis: i64) {
        self.probe.samples_created.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new_bgra(
            vec![0x80u8; FRAME_WIDTH * FRAME_HEIGHT * 4],
            FRAME_WIDTH,
            FRAME_HEIGHT,
            FRAME_WIDTH * 4,
        )
        .with_timestamp(MediaTime::new(millis, 1000));
        handler(SampleBuffer::new(MemorySample {
            frame,
            probe: Arc::clone(&self.probe),
        }));
    }

    pub fn events(&self) -> Vec<RecorderEvent> {
        self.queue.drain()
    }

    pub fn statuses(events: &[RecorderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(events: &[RecorderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Alert(a) => Some(a.message.clone()),
                _ => None,
            })
            .collect()
    }
}
