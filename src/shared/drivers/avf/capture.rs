// This is free and unencumbered software released into the public domain.

use super::AvfDeviceInput;
use crate::shared::{
    CaptureSession, DeviceInput, MediaBackend, MediaTime, PixelBuffer, PixelFormat,
    RecorderError, Sample, SampleBuffer, SampleHandler, SampleOutput,
};
use dispatch2::DispatchQueue;
use objc2::{
    AllocAnyThread, DefinedClass, define_class, msg_send, rc::Retained, runtime::ProtocolObject,
};
use objc2_av_foundation::{
    AVCaptureConnection, AVCaptureOutput, AVCaptureSession, AVCaptureVideoDataOutput,
    AVCaptureVideoDataOutputSampleBufferDelegate,
};
use objc2_core_foundation::{CFRetained, Type};
use objc2_core_media::CMSampleBuffer;
use objc2_core_video::{
    CVPixelBuffer, CVPixelBufferGetBaseAddress, CVPixelBufferGetBytesPerRow,
    CVPixelBufferGetDataSize, CVPixelBufferGetHeight, CVPixelBufferGetWidth,
    CVPixelBufferLockBaseAddress, CVPixelBufferLockFlags, CVPixelBufferUnlockBaseAddress,
};
use objc2_foundation::{NSDictionary, NSNumber, NSObject, NSObjectProtocol, NSString, ns_string};
use std::any::Any;

const K_CV_PIXEL_FORMAT_TYPE_32BGRA: i32 = 0x42475241;

pub struct AvfCaptureSession {
    session: Retained<AVCaptureSession>,
    has_input: bool,
    output: Option<Retained<AVCaptureVideoDataOutput>>,
    delegate: Option<Retained<AvfSampleDelegate>>,
    queue: Option<dispatch2::DispatchRetained<DispatchQueue>>,
}

// The session is configured and started from the display thread only; the
// platform delivers frames on `queue`.
unsafe impl Send for AvfCaptureSession {}

impl AvfCaptureSession {
    pub fn new() -> Self {
        Self {
            session: unsafe { AVCaptureSession::new() },
            has_input: false,
            output: None,
            delegate: None,
            queue: None,
        }
    }
}

impl CaptureSession for AvfCaptureSession {
    fn backend(&self) -> MediaBackend {
        MediaBackend::Avf
    }

    fn can_add_input(&self, input: &dyn DeviceInput) -> bool {
        match input.as_any().downcast_ref::<AvfDeviceInput>() {
            Some(input) => unsafe { self.session.canAddInput(input.input()) },
            None => false,
        }
    }

    fn add_input(&mut self, input: Box<dyn DeviceInput>) -> Result<(), RecorderError> {
        let Some(input) = input.as_any().downcast_ref::<AvfDeviceInput>() else {
            return Err(RecorderError::input_unavailable("not an AVFoundation input"));
        };
        unsafe {
            if !self.session.canAddInput(input.input()) {
                return Err(RecorderError::input_unavailable("session rejected the camera"));
            }
            self.session.addInput(input.input());
        }
        self.has_input = true;
        Ok(())
    }

    fn can_add_output(&self, output: &SampleOutput) -> bool {
        self.output.is_none() && output.pixel_format == PixelFormat::Bgra8
    }

    fn add_output(&mut self, output: SampleOutput) -> Result<(), RecorderError> {
        if !self.can_add_output(&output) {
            return Err(RecorderError::input_unavailable("unsupported frame output"));
        }
        unsafe {
            let data_output = AVCaptureVideoDataOutput::new();

            let key = ns_string!("PixelFormatType");
            let value = NSNumber::new_i32(K_CV_PIXEL_FORMAT_TYPE_32BGRA);
            let settings = NSDictionary::<NSString>::from_slices(&[key], &[&value]);
            data_output.setVideoSettings(Some(&*settings));
            data_output.setAlwaysDiscardsLateVideoFrames(true);

            let queue = DispatchQueue::new(&output.queue_label, None);
            let delegate = AvfSampleDelegate::new(output.handler);
            let protocol_obj = ProtocolObject::from_ref(&*delegate);
            data_output.setSampleBufferDelegate_queue(Some(protocol_obj), Some(&queue));

            if !self.session.canAddOutput(&data_output) {
                return Err(RecorderError::input_unavailable("session rejected the frame output"));
            }
            self.session.addOutput(&data_output);

            self.output = Some(data_output);
            self.delegate = Some(delegate);
            self.queue = Some(queue);
        }
        Ok(())
    }

    fn start_running(&mut self) -> Result<(), RecorderError> {
        if !self.has_input || self.output.is_none() {
            return Err(RecorderError::input_unavailable("session is not wired"));
        }
        unsafe { self.session.startRunning() };
        Ok(())
    }

    fn stop_running(&mut self) -> Result<(), RecorderError> {
        unsafe {
            if self.session.isRunning() {
                self.session.stopRunning();
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        unsafe { self.session.isRunning() }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for AvfCaptureSession {
    fn drop(&mut self) {
        let _ = self.stop_running();
        if let Some(output) = &self.output {
            unsafe { output.setSampleBufferDelegate_queue(None, None) };
        }
    }
}

/// A retained `CMSampleBuffer`; dropping it hands the buffer back to the camera.
pub struct AvfSample {
    sample: CFRetained<CMSampleBuffer>,
    pixels: Option<AvfPixelBuffer>,
}

// Samples move from the capture queue into the writer under the frame
// processor's lock; CoreMedia retain/release is thread-safe.
unsafe impl Send for AvfSample {}

impl AvfSample {
    pub fn cm_sample_buffer(&self) -> &CMSampleBuffer {
        &self.sample
    }
}

impl Sample for AvfSample {
    fn presentation_time(&self) -> MediaTime {
        let t = unsafe { self.sample.presentation_time_stamp() };
        MediaTime::new(t.value, t.timescale)
    }

    fn pixel_buffer(&self) -> Option<&dyn PixelBuffer> {
        self.pixels.as_ref().map(|p| p as &dyn PixelBuffer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct AvfPixelBuffer {
    buffer: CFRetained<CVPixelBuffer>,
}

unsafe impl Send for AvfPixelBuffer {}

impl PixelBuffer for AvfPixelBuffer {
    fn width(&self) -> usize {
        unsafe { CVPixelBufferGetWidth(&self.buffer) }
    }

    fn height(&self) -> usize {
        unsafe { CVPixelBufferGetHeight(&self.buffer) }
    }

    fn bytes_per_row(&self) -> usize {
        unsafe { CVPixelBufferGetBytesPerRow(&self.buffer) }
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgra8
    }

    fn lock(&self) -> Result<(), RecorderError> {
        let status =
            unsafe { CVPixelBufferLockBaseAddress(&self.buffer, CVPixelBufferLockFlags::ReadOnly) };
        if status != 0 {
            return Err(RecorderError::InvalidPixelBuffer(format!(
                "CVPixelBufferLockBaseAddress returned {status}"
            )));
        }
        Ok(())
    }

    fn unlock(&self) {
        unsafe {
            CVPixelBufferUnlockBaseAddress(&self.buffer, CVPixelBufferLockFlags::ReadOnly);
        }
    }

    fn base_address(&self) -> &[u8] {
        unsafe {
            let base = CVPixelBufferGetBaseAddress(&self.buffer);
            if base.is_null() {
                return &[];
            }
            let size = CVPixelBufferGetDataSize(&self.buffer);
            core::slice::from_raw_parts(base as *const u8, size)
        }
    }
}

pub struct AvfSampleDelegateVars {
    handler: SampleHandler,
}

impl core::fmt::Debug for AvfSampleDelegateVars {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AvfSampleDelegateVars {{ handler: ... }}")
    }
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "AsimovRecorderSampleDelegate"]
    #[ivars = AvfSampleDelegateVars]
    #[derive(Debug)]
    pub struct AvfSampleDelegate;

    unsafe impl NSObjectProtocol for AvfSampleDelegate {}

    unsafe impl AVCaptureVideoDataOutputSampleBufferDelegate for AvfSampleDelegate {
        #[unsafe(method(captureOutput:didOutputSampleBuffer:fromConnection:))]
        unsafe fn capture_output_did_output_sample_buffer_from_connection(
            &self,
            _capture_output: &AVCaptureOutput,
            sample_buffer: &CMSampleBuffer,
            _connection: &AVCaptureConnection,
        ) {
            let pixels = unsafe { CMSampleBuffer::image_buffer(sample_buffer) }
                .map(|buffer| AvfPixelBuffer { buffer });
            let sample = AvfSample {
                sample: sample_buffer.retain(),
                pixels,
            };
            (self.ivars().handler)(SampleBuffer::new(sample));
        }
    }
);

impl AvfSampleDelegate {
    fn new(handler: SampleHandler) -> Retained<Self> {
        let this = Self::alloc().set_ivars(AvfSampleDelegateVars { handler });
        unsafe { msg_send![super(this), init] }
    }
}
