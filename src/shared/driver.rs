// This is free and unencumbered software released into the public domain.

use crate::shared::{ContainerFormat, PixelFormat, RecorderError, SampleBuffer, TrackSettings};
use derive_more::Display;
use futures::future::BoxFuture;
use std::{
    any::Any,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel},
    },
    thread::JoinHandle,
    time::Duration,
};

/// Invoked once per captured frame, serially, on the session's sample queue.
pub type SampleHandler = Arc<dyn Fn(SampleBuffer) + Send + Sync + 'static>;

/// Asynchronous completion of a platform operation.
pub type Completion<T> = BoxFuture<'static, Result<T, RecorderError>>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum MediaBackend {
    #[display("avf")]
    Avf,
    #[display("ffmpeg")]
    Ffmpeg,
    #[display("memory")]
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
}

/// A camera device wrapped for use as a session input.
pub trait DeviceInput: Send {
    fn device(&self) -> &CaptureDevice;
    fn as_any(&self) -> &dyn Any;
}

/// Frame-sampling output attached to a capture session.
pub struct SampleOutput {
    pub pixel_format: PixelFormat,
    pub queue_label: String,
    pub handler: SampleHandler,
}

impl core::fmt::Debug for SampleOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SampleOutput")
            .field("pixel_format", &self.pixel_format)
            .field("queue_label", &self.queue_label)
            .finish()
    }
}

pub trait CaptureSession: Send {
    fn backend(&self) -> MediaBackend;
    fn can_add_input(&self, input: &dyn DeviceInput) -> bool;
    fn add_input(&mut self, input: Box<dyn DeviceInput>) -> Result<(), RecorderError>;
    fn can_add_output(&self, output: &SampleOutput) -> bool;
    fn add_output(&mut self, output: SampleOutput) -> Result<(), RecorderError>;
    /// Starts frame delivery. Frames arrive asynchronously on the sample queue.
    fn start_running(&mut self) -> Result<(), RecorderError>;
    /// Stops frame delivery; returns once the camera has stopped.
    fn stop_running(&mut self) -> Result<(), RecorderError>;
    fn is_running(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Encoder-facing handle accepting the samples of one video track.
pub trait TrackInput: Send {
    fn settings(&self) -> &TrackSettings;
    fn is_ready_for_more_media_data(&self) -> bool;
    fn append(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError>;
    fn mark_as_finished(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Container writer lifecycle: add input, start writing, start the
/// timeline, finish with a completion.
pub trait AssetWriter: Send {
    fn output_path(&self) -> &Path;
    fn can_add_input(&self, input: &dyn TrackInput) -> bool;
    fn add_input(&mut self, input: &mut dyn TrackInput) -> Result<(), RecorderError>;
    fn start_writing(&mut self) -> Result<(), RecorderError>;
    fn start_session(&mut self, at: crate::shared::MediaTime);
    /// Finalizes the container. Resolves with the written file's path.
    /// The writer accepts nothing further afterwards.
    fn finish(&mut self) -> Completion<PathBuf>;
    /// Abandons the file; used when a recording never got going.
    fn cancel(&mut self);
}

pub trait MediaLibrary: Send + Sync {
    /// Submits a finished video for permanent storage. Resolves with the
    /// library's location for it.
    fn save_video(&self, path: &Path) -> Completion<PathBuf>;
}

/// The platform multimedia services the recorder is built on.
pub trait MediaPlatform: Send + Sync {
    fn backend(&self) -> MediaBackend;
    fn default_video_device(&self) -> Option<CaptureDevice>;
    fn device_input(&self, device: &CaptureDevice) -> Result<Box<dyn DeviceInput>, RecorderError>;
    fn capture_session(&self) -> Box<dyn CaptureSession>;
    /// Errors carry the platform's diagnostic text.
    fn asset_writer(
        &self,
        path: &Path,
        container: ContainerFormat,
    ) -> Result<Box<dyn AssetWriter>, String>;
    fn track_input(&self, settings: &TrackSettings) -> Result<Box<dyn TrackInput>, String>;
    fn media_library(&self) -> Arc<dyn MediaLibrary>;
}

pub enum SampleMsg {
    Sample(SampleBuffer),
    Stop,
}

/// A serial background queue delivering samples to one handler.
///
/// Producers enqueue with [`SampleQueue::offer`]; when the queue is full the
/// sample is released immediately and counted as dropped.
pub struct SampleQueue {
    tx: SyncSender<SampleMsg>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl SampleQueue {
    pub fn new(label: &str, capacity: usize, handler: SampleHandler) -> Result<Self, RecorderError> {
        let (tx, rx) = sync_channel::<SampleMsg>(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);

        let join = std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || run_queue(rx, stop2, handler))
            .map_err(|e| RecorderError::driver("spawning sample queue", e))?;

        Ok(Self {
            tx,
            stop,
            dropped: Arc::new(AtomicU64::new(0)),
            join: Some(join),
        })
    }

    pub fn producer(&self) -> SampleProducer {
        SampleProducer {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Samples discarded because the handler fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.tx.try_send(SampleMsg::Stop);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for SampleQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_queue(rx: Receiver<SampleMsg>, stop: Arc<AtomicBool>, handler: SampleHandler) {
    while !stop.load(Ordering::Relaxed) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(SampleMsg::Sample(sample)) => (handler)(sample),
            Ok(SampleMsg::Stop) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[derive(Clone)]
pub struct SampleProducer {
    tx: SyncSender<SampleMsg>,
    dropped: Arc<AtomicU64>,
}

impl SampleProducer {
    /// Returns `false` once the queue is gone.
    pub fn offer(&self, sample: SampleBuffer) -> bool {
        match self.tx.try_send(SampleMsg::Sample(sample)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                #[cfg(feature = "tracing")]
                asimov_module::tracing::debug!(target: "asimov_camera_recorder", dropped = n, "late frame discarded");
                #[cfg(not(feature = "tracing"))]
                let _ = n;
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
