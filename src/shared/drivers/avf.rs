// This is free and unencumbered software released into the public domain.

//! Native Apple backend: AVCaptureSession for frames, AVAssetWriter for the
//! file, the Photos library for the finished video.

mod capture;
pub use capture::*;

mod photos;
pub use photos::*;

mod writer;
pub use writer::*;

use crate::shared::{
    AssetWriter, CaptureConfig, CaptureDevice, CaptureSession, ContainerFormat, DeviceInput,
    MediaBackend, MediaLibrary, MediaPlatform, RecorderError, TrackInput, TrackSettings,
};
use alloc::borrow::Cow;
use objc2::{Message, rc::Retained};
use objc2_av_foundation::{
    AVCaptureDevice, AVCaptureDeviceDiscoverySession, AVCaptureDeviceInput,
    AVCaptureDevicePosition, AVCaptureDeviceTypeBuiltInWideAngleCamera,
    AVCaptureDeviceTypeExternal, AVMediaTypeVideo,
};
use objc2_foundation::NSArray;
use std::{any::Any, path::Path, sync::Arc};

#[derive(Debug)]
pub struct AvfPlatform {
    config: CaptureConfig,
    library: Arc<PhotosLibrary>,
}

impl AvfPlatform {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            config: config.clone(),
            library: Arc::new(PhotosLibrary),
        }
    }
}

impl dogma::Named for AvfPlatform {
    fn name(&self) -> Cow<'_, str> {
        "avf".into()
    }
}

impl MediaPlatform for AvfPlatform {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Avf
    }

    fn default_video_device(&self) -> Option<CaptureDevice> {
        let device = unsafe { find_device(self.config.device.as_deref().unwrap_or("")) }?;
        Some(CaptureDevice {
            id: unsafe { device.uniqueID() }.to_string(),
            name: unsafe { device.localizedName() }.to_string(),
        })
    }

    fn device_input(&self, device: &CaptureDevice) -> Result<Box<dyn DeviceInput>, RecorderError> {
        let Some(av_device) = (unsafe { find_device(&device.id) }) else {
            return Err(RecorderError::DeviceUnavailable);
        };
        let input = unsafe { AVCaptureDeviceInput::deviceInputWithDevice_error(&av_device) }
            .map_err(|e| RecorderError::input_unavailable(e.localizedDescription().to_string()))?;
        Ok(Box::new(AvfDeviceInput {
            device: device.clone(),
            input,
        }))
    }

    fn capture_session(&self) -> Box<dyn CaptureSession> {
        Box::new(AvfCaptureSession::new())
    }

    fn asset_writer(
        &self,
        path: &Path,
        container: ContainerFormat,
    ) -> Result<Box<dyn AssetWriter>, String> {
        AvfAssetWriter::create(path, container).map(|w| Box::new(w) as Box<dyn AssetWriter>)
    }

    fn track_input(&self, settings: &TrackSettings) -> Result<Box<dyn TrackInput>, String> {
        AvfTrackInput::new(settings.clone()).map(|i| Box::new(i) as Box<dyn TrackInput>)
    }

    fn media_library(&self) -> Arc<dyn MediaLibrary> {
        self.library.clone()
    }
}

pub struct AvfDeviceInput {
    device: CaptureDevice,
    input: Retained<AVCaptureDeviceInput>,
}

// AVCaptureDeviceInput is only handed to the session during configuration.
unsafe impl Send for AvfDeviceInput {}

impl AvfDeviceInput {
    pub(crate) fn input(&self) -> &AVCaptureDeviceInput {
        &self.input
    }
}

impl DeviceInput for AvfDeviceInput {
    fn device(&self) -> &CaptureDevice {
        &self.device
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Finds a device by unique ID or localized name; empty means the default camera.
unsafe fn find_device(device_id: &str) -> Option<Retained<AVCaptureDevice>> {
    unsafe {
        if device_id.is_empty() {
            return AVCaptureDevice::defaultDeviceWithMediaType(AVMediaTypeVideo?.as_ref());
        }

        let device_types = NSArray::from_slice(&[
            AVCaptureDeviceTypeBuiltInWideAngleCamera.as_ref(),
            AVCaptureDeviceTypeExternal.as_ref(),
        ]);
        let discovery =
            AVCaptureDeviceDiscoverySession::discoverySessionWithDeviceTypes_mediaType_position(
                &device_types,
                AVMediaTypeVideo,
                AVCaptureDevicePosition::Unspecified,
            );
        let devices = discovery.devices();

        for device in devices.iter() {
            if device.uniqueID().to_string() == device_id {
                return Some(device.retain());
            }
        }
        for device in devices.iter() {
            if device.localizedName().to_string() == device_id {
                return Some(device.retain());
            }
        }
        None
    }
}
