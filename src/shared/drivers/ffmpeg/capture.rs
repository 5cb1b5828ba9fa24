// This is free and unencumbered software released into the public domain.

use super::{ffmpeg_format, get_input_device, stderr_for};
use crate::shared::{
    CaptureConfig, CaptureSession, DeviceInput, Frame, MediaBackend, MediaTime, PixelFormat,
    RecorderError, SampleBuffer, SampleOutput, SampleProducer, SampleQueue,
};
use std::{
    any::Any,
    io::Read,
    process::{Child, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// A capture session reading raw BGRA frames from an ffmpeg child process.
pub struct FfmpegCaptureSession {
    config: CaptureConfig,
    input: Option<Box<dyn DeviceInput>>,
    output: Option<SampleOutput>,
    queue: Option<SampleQueue>,
    child: Option<Child>,
    stop: Arc<AtomicBool>,
    reader_join: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for FfmpegCaptureSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FfmpegCaptureSession")
            .field("config", &self.config)
            .field("device", &self.input.as_ref().map(|i| i.device().id.clone()))
            .field("output", &self.output)
            .field("child", &self.child.as_ref().map(|_| "<child>"))
            .finish()
    }
}

impl FfmpegCaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            input: None,
            output: None,
            queue: None,
            child: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader_join: None,
        }
    }

    fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            {
                unsafe {
                    let _ = libc::kill(child.id() as i32, libc::SIGTERM);
                }
                let start = Instant::now();
                while start.elapsed() < Duration::from_millis(900) {
                    if let Ok(Some(_)) = child.try_wait() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl CaptureSession for FfmpegCaptureSession {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Ffmpeg
    }

    fn can_add_input(&self, input: &dyn DeviceInput) -> bool {
        self.input.is_none() && input.as_any().is::<super::FfmpegDeviceInput>()
    }

    fn add_input(&mut self, input: Box<dyn DeviceInput>) -> Result<(), RecorderError> {
        if !self.can_add_input(input.as_ref()) {
            return Err(RecorderError::input_unavailable("session already has an input"));
        }
        self.input = Some(input);
        Ok(())
    }

    fn can_add_output(&self, output: &SampleOutput) -> bool {
        self.output.is_none() && output.pixel_format == PixelFormat::Bgra8
    }

    fn add_output(&mut self, output: SampleOutput) -> Result<(), RecorderError> {
        if !self.can_add_output(&output) {
            return Err(RecorderError::input_unavailable(format!(
                "unsupported frame output ({})",
                output.pixel_format
            )));
        }
        self.output = Some(output);
        Ok(())
    }

    fn start_running(&mut self) -> Result<(), RecorderError> {
        if self.child.is_some() {
            return Ok(());
        }
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Err(RecorderError::input_unavailable("session is not wired"));
        };

        self.stop.store(false, Ordering::Relaxed);

        let queue = SampleQueue::new(
            &output.queue_label,
            self.config.queue_frames,
            Arc::clone(&output.handler),
        )?;
        let producer = queue.producer();

        let mut child = spawn_reader(&self.config, &input.device().id)?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RecorderError::input_unavailable("ffmpeg stdout not piped"));
        };

        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let stop = Arc::clone(&self.stop);

        let join = std::thread::spawn(move || read_frames(stdout, width, height, stop, producer));

        self.queue = Some(queue);
        self.reader_join = Some(join);
        self.child = Some(child);
        Ok(())
    }

    fn stop_running(&mut self) -> Result<(), RecorderError> {
        self.stop.store(true, Ordering::Relaxed);
        self.stop_child();
        if let Some(j) = self.reader_join.take() {
            let _ = j.join();
        }
        if let Some(mut queue) = self.queue.take() {
            queue.stop();
            let dropped = queue.dropped();
            #[cfg(feature = "tracing")]
            if dropped > 0 {
                asimov_module::tracing::info!(
                    target: "asimov_camera_recorder",
                    dropped,
                    "late frames were discarded while capturing"
                );
            }
            #[cfg(not(feature = "tracing"))]
            let _ = dropped;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for FfmpegCaptureSession {
    fn drop(&mut self) {
        let _ = self.stop_running();
    }
}

fn read_frames(
    stdout: impl Read,
    width: usize,
    height: usize,
    stop: Arc<AtomicBool>,
    producer: SampleProducer,
) {
    let stride = width * PixelFormat::Bgra8.bytes_per_pixel();
    let frame_size = stride * height;
    let mut reader = std::io::BufReader::new(stdout);
    let epoch = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let mut buf = vec![0u8; frame_size];
        match reader.read_exact(&mut buf) {
            Ok(()) => {
                let pts = MediaTime::from_nanos(epoch.elapsed().as_nanos() as i64);
                let frame = Frame::new_bgra(buf, width, height, stride).with_timestamp(pts);
                if !producer.offer(SampleBuffer::new(frame)) {
                    break;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(target: "asimov_camera_recorder", error = %_e, "ffmpeg capture read failed");
                break;
            },
        }
    }
}

pub(crate) fn capture_args(config: &CaptureConfig, device: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        ffmpeg_format().into(),
        "-video_size".into(),
        format!("{}x{}", config.width, config.height),
        "-framerate".into(),
        format!("{}", config.fps),
    ];

    #[cfg(target_os = "macos")]
    {
        args.push("-pixel_format".into());
        args.push("0rgb".into());
    }

    args.extend([
        "-i".into(),
        get_input_device(device),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-pix_fmt".into(),
        "bgra".into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);
    args
}

fn spawn_reader(config: &CaptureConfig, device: &str) -> Result<Child, RecorderError> {
    Command::new("ffmpeg")
        .args(capture_args(config, device))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(stderr_for(config))
        .spawn()
        .map_err(|e| RecorderError::driver("spawning ffmpeg capture", e))
}
