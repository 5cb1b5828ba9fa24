// This is free and unencumbered software released into the public domain.

use super::AvfSample;
use crate::shared::{
    AssetWriter, Completion, ContainerFormat, MediaTime, RecorderError, SampleBuffer, TrackInput,
    TrackSettings, VideoCodec,
};
use block2::RcBlock;
use futures::{FutureExt, channel::oneshot};
use objc2::{exception, rc::Retained, runtime::AnyObject};
use objc2_av_foundation::{
    AVAssetWriter, AVAssetWriterInput, AVAssetWriterStatus, AVFileTypeMPEG4,
    AVFileTypeQuickTimeMovie, AVMediaTypeVideo, AVVideoCodecKey, AVVideoCodecTypeH264,
    AVVideoCodecTypeHEVC, AVVideoCodecTypeJPEG, AVVideoHeightKey, AVVideoWidthKey,
};
use objc2_core_media::CMTime;
use objc2_foundation::{NSDictionary, NSNumber, NSString, NSURL};
use parking_lot::Mutex;
use std::{
    any::Any,
    fs,
    path::{Path, PathBuf},
};

pub struct AvfAssetWriter {
    path: PathBuf,
    writer: Retained<AVAssetWriter>,
}

// AVAssetWriter is driven from one thread at a time: the display thread
// while starting and finishing, the capture queue in between.
unsafe impl Send for AvfAssetWriter {}

impl AvfAssetWriter {
    pub fn create(path: &Path, container: ContainerFormat) -> Result<Self, String> {
        let url = NSURL::from_file_path(path)
            .ok_or_else(|| format!("{} is not a file URL", path.display()))?;
        let file_type = unsafe {
            match container {
                ContainerFormat::QuickTimeMovie => AVFileTypeQuickTimeMovie,
                ContainerFormat::Mpeg4 => AVFileTypeMPEG4,
            }
        }
        .ok_or("file type unavailable")?;

        let writer = unsafe { AVAssetWriter::assetWriterWithURL_fileType_error(&url, file_type) }
            .map_err(|e| e.localizedDescription().to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    fn failure(&self) -> String {
        unsafe { self.writer.error() }
            .map(|e| e.localizedDescription().to_string())
            .unwrap_or_else(|| format!("writer status {:?}", unsafe { self.writer.status() }))
    }
}

impl AssetWriter for AvfAssetWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn can_add_input(&self, input: &dyn TrackInput) -> bool {
        match input.as_any().downcast_ref::<AvfTrackInput>() {
            Some(track) => unsafe { self.writer.canAddInput(&track.input) },
            None => false,
        }
    }

    fn add_input(&mut self, input: &mut dyn TrackInput) -> Result<(), RecorderError> {
        let Some(track) = input.as_any().downcast_ref::<AvfTrackInput>() else {
            return Err(RecorderError::IncompatibleInput);
        };
        unsafe { self.writer.addInput(&track.input) };
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), RecorderError> {
        if unsafe { self.writer.startWriting() } {
            Ok(())
        } else {
            Err(RecorderError::writer_failed(self.failure()))
        }
    }

    fn start_session(&mut self, at: MediaTime) {
        let time = unsafe { CMTime::new(at.value, at.timescale) };
        unsafe { self.writer.startSessionAtSourceTime(time) };
    }

    fn finish(&mut self) -> Completion<PathBuf> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let writer = self.writer.clone();
        let path = self.path.clone();

        let done = RcBlock::new(move || {
            let result = if unsafe { writer.status() } == AVAssetWriterStatus::Completed {
                Ok(path.clone())
            } else {
                let reason = unsafe { writer.error() }
                    .map(|e| e.localizedDescription().to_string())
                    .unwrap_or_else(|| "writer did not complete".into());
                Err(RecorderError::writer_failed(reason))
            };
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result);
            }
        });
        unsafe { self.writer.finishWritingWithCompletionHandler(&done) };

        rx.map(|r| {
            r.unwrap_or_else(|_| Err(RecorderError::writer_failed("completion handler dropped")))
        })
        .boxed()
    }

    fn cancel(&mut self) {
        unsafe {
            if self.writer.status() == AVAssetWriterStatus::Writing {
                self.writer.cancelWriting();
            }
        }
        let _ = fs::remove_file(&self.path);
    }
}

pub struct AvfTrackInput {
    settings: TrackSettings,
    input: Retained<AVAssetWriterInput>,
}

unsafe impl Send for AvfTrackInput {}

impl AvfTrackInput {
    /// AVFoundation raises an exception for output settings it cannot
    /// honor; it is caught here and returned as the diagnostic text.
    pub fn new(settings: TrackSettings) -> Result<Self, String> {
        let codec = unsafe {
            match settings.codec {
                VideoCodec::H264 => AVVideoCodecTypeH264,
                VideoCodec::Hevc => AVVideoCodecTypeHEVC,
                VideoCodec::Jpeg => AVVideoCodecTypeJPEG,
            }
        }
        .ok_or("codec unavailable")?;
        let (Some(codec_key), Some(width_key), Some(height_key), Some(media_type)) =
            unsafe { (AVVideoCodecKey, AVVideoWidthKey, AVVideoHeightKey, AVMediaTypeVideo) }
        else {
            return Err("AVFoundation video keys unavailable".into());
        };

        let width = NSNumber::new_u32(settings.width);
        let height = NSNumber::new_u32(settings.height);
        let keys: [&NSString; 3] = [codec_key, width_key, height_key];
        let values: [&AnyObject; 3] = [codec.as_ref(), width.as_ref(), height.as_ref()];
        let output_settings = NSDictionary::from_slices(&keys, &values);

        let input = exception::catch(|| unsafe {
            AVAssetWriterInput::assetWriterInputWithMediaType_outputSettings(
                media_type,
                Some(&output_settings),
            )
        })
        .map_err(|e| match e {
            Some(e) => format!("{e:?}"),
            None => "unknown exception".to_string(),
        })?;
        unsafe { input.setExpectsMediaDataInRealTime(true) };

        Ok(Self { settings, input })
    }
}

impl TrackInput for AvfTrackInput {
    fn settings(&self) -> &TrackSettings {
        &self.settings
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        unsafe { self.input.isReadyForMoreMediaData() }
    }

    fn append(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError> {
        let Some(avf) = sample.downcast_ref::<AvfSample>() else {
            return Err(RecorderError::append_failure("not an AVFoundation sample"));
        };
        if unsafe { self.input.appendSampleBuffer(avf.cm_sample_buffer()) } {
            Ok(())
        } else {
            Err(RecorderError::append_failure("appendSampleBuffer returned NO"))
        }
    }

    fn mark_as_finished(&mut self) {
        unsafe { self.input.markAsFinished() };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
