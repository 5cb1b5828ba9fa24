// This is free and unencumbered software released into the public domain.

use crate::shared::{
    AssetWriter, Completion, ContainerFormat, MediaTime, PixelFormat, RecorderError,
    SampleBuffer, TrackInput, TrackSettings, VideoCodec,
};
use futures::{FutureExt, channel::oneshot};
use parking_lot::Mutex;
use std::{
    any::Any,
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    sync::Arc,
};

/// Encoder state shared by the writer and its track.
///
/// The encoder runs at a constant rate, so `written` counts output slots
/// already filled since `timeline_start`.
#[derive(Debug, Default)]
struct EncoderPipe {
    stdin: Option<ChildStdin>,
    failed: Option<String>,
    timeline_start: Option<MediaTime>,
    written: u64,
}

/// Encodes raw BGRA frames into a container file through an ffmpeg child.
#[derive(Debug)]
pub struct FfmpegAssetWriter {
    path: PathBuf,
    container: ContainerFormat,
    diagnostics: bool,
    pipe: Arc<Mutex<EncoderPipe>>,
    settings: Option<TrackSettings>,
    child: Option<Child>,
}

impl FfmpegAssetWriter {
    pub fn create(path: &Path, container: ContainerFormat, diagnostics: bool) -> Result<Self, String> {
        if path.file_name().is_none() || path.is_dir() {
            return Err(format!("{} is not a file path", path.display()));
        }
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            if !parent.is_dir() {
                return Err(format!("directory {} does not exist", parent.display()));
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            container,
            diagnostics,
            pipe: Arc::new(Mutex::new(EncoderPipe::default())),
            settings: None,
            child: None,
        })
    }

    fn kill_child(&mut self) {
        self.pipe.lock().stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl AssetWriter for FfmpegAssetWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn can_add_input(&self, input: &dyn TrackInput) -> bool {
        self.settings.is_none()
            && input.as_any().is::<FfmpegTrackInput>()
            && self.container.supports(input.settings().codec)
    }

    fn add_input(&mut self, input: &mut dyn TrackInput) -> Result<(), RecorderError> {
        if !self.can_add_input(input) {
            return Err(RecorderError::IncompatibleInput);
        }
        let Some(track) = input.as_any_mut().downcast_mut::<FfmpegTrackInput>() else {
            return Err(RecorderError::IncompatibleInput);
        };
        track.pipe = Some(Arc::clone(&self.pipe));
        self.settings = Some(track.settings.clone());
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), RecorderError> {
        let Some(settings) = &self.settings else {
            return Err(RecorderError::writer_failed("no track input attached"));
        };
        if self.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new("ffmpeg")
            .args(encoder_args(settings, self.container, &self.path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(if self.diagnostics {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .spawn()
            .map_err(|e| RecorderError::driver("spawning ffmpeg encoder", e))?;

        let stdin = child.stdin.take();
        if stdin.is_none() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RecorderError::writer_failed("ffmpeg stdin not piped"));
        }
        *self.pipe.lock() = EncoderPipe {
            stdin,
            ..EncoderPipe::default()
        };
        self.child = Some(child);
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        let mut pipe = self.pipe.lock();
        pipe.timeline_start = Some(at);
        pipe.written = 0;
    }

    fn finish(&mut self) -> Completion<PathBuf> {
        // Closing stdin is ffmpeg's end-of-stream.
        let failed = {
            let mut pipe = self.pipe.lock();
            pipe.stdin.take();
            pipe.failed.take()
        };
        let Some(mut child) = self.child.take() else {
            return futures::future::ready(Err(RecorderError::writer_failed(
                "writing never started",
            )))
            .boxed();
        };
        let path = self.path.clone();

        let (tx, rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("ffmpeg-encoder-wait".into())
            .spawn(move || {
                let result = match child.wait() {
                    Ok(status) if status.success() => Ok(path),
                    Ok(status) => Err(RecorderError::writer_failed(match failed {
                        Some(reason) => format!("ffmpeg exited with {status} after: {reason}"),
                        None => format!("ffmpeg exited with {status}"),
                    })),
                    Err(e) => Err(RecorderError::driver("waiting for ffmpeg encoder", e)),
                };
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return futures::future::ready(Err(RecorderError::driver("spawning encoder waiter", e)))
                .boxed();
        }

        rx.map(|r| {
            r.unwrap_or_else(|_| Err(RecorderError::writer_failed("encoder waiter vanished")))
        })
        .boxed()
    }

    fn cancel(&mut self) {
        self.kill_child();
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for FfmpegAssetWriter {
    fn drop(&mut self) {
        self.kill_child();
    }
}

/// The video track feeding an [`FfmpegAssetWriter`].
#[derive(Debug)]
pub struct FfmpegTrackInput {
    settings: TrackSettings,
    pipe: Option<Arc<Mutex<EncoderPipe>>>,
    finished: bool,
}

impl FfmpegTrackInput {
    pub fn new(settings: TrackSettings) -> Result<Self, String> {
        if encoder_name(settings.codec).is_none() {
            return Err(format!("codec {} has no ffmpeg encoder", settings.codec));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(format!(
                "invalid dimensions {}x{}",
                settings.width, settings.height
            ));
        }
        if settings.width % 2 != 0 || settings.height % 2 != 0 {
            return Err(format!(
                "{} needs even dimensions, got {}x{}",
                settings.codec, settings.width, settings.height
            ));
        }
        if settings.source_format != PixelFormat::Bgra8 {
            return Err(format!("unsupported source format {}", settings.source_format));
        }
        Ok(Self {
            settings,
            pipe: None,
            finished: false,
        })
    }
}

impl TrackInput for FfmpegTrackInput {
    fn settings(&self) -> &TrackSettings {
        &self.settings
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        if self.finished {
            return false;
        }
        match &self.pipe {
            Some(pipe) => {
                let pipe = pipe.lock();
                pipe.stdin.is_some() && pipe.failed.is_none()
            },
            None => false,
        }
    }

    fn append(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError> {
        let Some(pipe) = &self.pipe else {
            return Err(RecorderError::append_failure("track is not attached to a writer"));
        };
        let Some(pixels) = sample.pixel_buffer() else {
            return Err(RecorderError::append_failure("sample carries no pixels"));
        };
        let (width, height) = (self.settings.width as usize, self.settings.height as usize);
        if pixels.width() != width || pixels.height() != height {
            return Err(RecorderError::append_failure(format!(
                "frame is {}x{}, track expects {width}x{height}",
                pixels.width(),
                pixels.height()
            )));
        }

        pixels.lock()?;
        let pixels = scopeguard::guard(pixels, |p| p.unlock());
        let stride = pixels.bytes_per_row();
        let row_len = width * PixelFormat::Bgra8.bytes_per_pixel();
        let data = pixels.base_address();
        if stride < row_len || data.len() < stride * (height - 1) + row_len {
            return Err(RecorderError::append_failure("pixel buffer too small"));
        }

        let mut pipe = pipe.lock();
        let pts = sample.presentation_time();
        let start = *pipe.timeline_start.get_or_insert(pts);
        let repeats = frame_repeats(pts, start, self.settings.fps, pipe.written);
        if repeats == 0 {
            // Its slot is already filled by an earlier frame.
            return Ok(());
        }

        let EncoderPipe { stdin, failed, written, .. } = &mut *pipe;
        let Some(out) = stdin.as_mut() else {
            return Err(RecorderError::append_failure("encoder input closed"));
        };
        let sent = (0..repeats).try_for_each(|_| {
            data.chunks(stride)
                .take(height)
                .try_for_each(|row| out.write_all(&row[..row_len]))?;
            *written += 1;
            std::io::Result::Ok(())
        });
        if let Err(e) = sent {
            *stdin = None;
            *failed = Some(e.to_string());
            return Err(RecorderError::append_failure(e.to_string()));
        }
        Ok(())
    }

    fn mark_as_finished(&mut self) {
        self.finished = true;
        if let Some(pipe) = &self.pipe {
            pipe.lock().stdin.take();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// How many times a frame stamped `pts` goes out so that it lands on slot
/// `round((pts - start) * fps)` of the constant-rate output, with `written`
/// slots already filled. Gaps left by dropped frames are filled by repeating
/// the next frame; a frame whose slot is taken is skipped.
pub(crate) fn frame_repeats(pts: MediaTime, start: MediaTime, fps: f64, written: u64) -> u64 {
    let elapsed = (pts.as_secs_f64() - start.as_secs_f64()).max(0.0);
    let slot = (elapsed * fps).round() as u64;
    (slot + 1).saturating_sub(written)
}

fn encoder_name(codec: VideoCodec) -> Option<&'static str> {
    match codec {
        VideoCodec::H264 => Some("libx264"),
        VideoCodec::Hevc => Some("libx265"),
        VideoCodec::Jpeg => Some("mjpeg"),
    }
}

pub(crate) fn encoder_args(
    settings: &TrackSettings,
    container: ContainerFormat,
    path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgra".into(),
        "-video_size".into(),
        format!("{}x{}", settings.width, settings.height),
        "-framerate".into(),
        format!("{}", settings.fps),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
        "-c:v".into(),
        encoder_name(settings.codec).unwrap_or("libx264").into(),
    ];
    if settings.codec != VideoCodec::Jpeg {
        args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    }
    args.extend([
        "-f".into(),
        container.to_string(),
        path.to_string_lossy().into_owned(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{CaptureConfig, Frame};

    fn settings() -> TrackSettings {
        CaptureConfig::default().track_settings()
    }

    #[test]
    fn writer_rejects_missing_directory() {
        let err = FfmpegAssetWriter::create(
            Path::new("/nonexistent/dir/temp.mov"),
            ContainerFormat::QuickTimeMovie,
            false,
        )
        .unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn track_input_validates_settings() {
        assert!(FfmpegTrackInput::new(settings()).is_ok());

        let odd = TrackSettings {
            width: 641,
            ..settings()
        };
        assert!(FfmpegTrackInput::new(odd).unwrap_err().contains("even"));
    }

    #[test]
    fn writer_wires_compatible_input_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FfmpegAssetWriter::create(
            &dir.path().join("temp.mov"),
            ContainerFormat::QuickTimeMovie,
            false,
        )
        .unwrap();
        let mut input = FfmpegTrackInput::new(settings()).unwrap();

        assert!(writer.can_add_input(&input));
        writer.add_input(&mut input).unwrap();
        assert!(!writer.can_add_input(&input));
        // Not started: nothing to write into yet.
        assert!(!input.is_ready_for_more_media_data());
    }

    #[test]
    fn mp4_rejects_jpeg_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            FfmpegAssetWriter::create(&dir.path().join("temp.mp4"), ContainerFormat::Mpeg4, false)
                .unwrap();
        let input = FfmpegTrackInput::new(TrackSettings {
            codec: VideoCodec::Jpeg,
            ..settings()
        })
        .unwrap();
        assert!(!writer.can_add_input(&input));
    }

    #[test]
    fn unattached_input_cannot_append() {
        let mut input = FfmpegTrackInput::new(settings()).unwrap();
        let frame = Frame::new_bgra(vec![0u8; 640 * 480 * 4], 640, 480, 640 * 4);
        let err = input.append(&SampleBuffer::new(frame)).unwrap_err();
        assert!(matches!(err, RecorderError::AppendFailure(_)));
    }

    #[test]
    fn encoder_args_target_the_container() {
        let args = encoder_args(&settings(), ContainerFormat::QuickTimeMovie, Path::new("/tmp/temp.mov"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-video_size 640x480"));
        assert!(joined.ends_with("-f mov /tmp/temp.mov"));
    }

    #[test]
    fn finish_without_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FfmpegAssetWriter::create(
            &dir.path().join("temp.mov"),
            ContainerFormat::QuickTimeMovie,
            false,
        )
        .unwrap();
        let mut writer = writer;
        let err = futures::executor::block_on(writer.finish()).unwrap_err();
        assert!(matches!(err, RecorderError::WriterFailed(_)));
    }

    fn at(secs: f64) -> MediaTime {
        MediaTime::from_nanos((secs * 1e9) as i64)
    }

    #[test]
    fn frames_land_on_their_timestamp_slot() {
        let start = at(0.0);
        // Back-to-back frames at the track rate go out once each.
        assert_eq!(frame_repeats(at(1.0 / 30.0), start, 30.0, 0), 2);
        assert_eq!(frame_repeats(at(2.0 / 30.0), start, 30.0, 2), 1);
        assert_eq!(frame_repeats(at(3.0 / 30.0), start, 30.0, 3), 1);
    }

    #[test]
    fn dropped_frames_leave_no_hole_in_the_timeline() {
        // Frames at 0.033s, 0.5s and 1.0s span a full second of output.
        let start = at(0.0);
        let mut written = 0;
        for pts in [1.0 / 30.0, 0.5, 1.0] {
            written += frame_repeats(at(pts), start, 30.0, written);
        }
        assert_eq!(written, 31);
    }

    #[test]
    fn early_and_duplicate_frames_are_skipped() {
        let start = at(10.0);
        assert_eq!(frame_repeats(at(9.0), start, 30.0, 1), 0);
        assert_eq!(frame_repeats(at(10.0 + 1.0 / 30.0), start, 30.0, 2), 0);
        assert_eq!(frame_repeats(at(10.0), start, 30.0, 0), 1);
    }
}
