// This is free and unencumbered software released into the public domain.

// iOS-only FFI for the AVFoundation-backed recorder.
// Exposed as a C ABI for use from Swift/Objective-C.

use crate::shared::{
    Alert, CaptureConfig, Display, DisplayQueue, Recorder, RecorderError, RecorderEvent,
    RecorderPhase, display_channel, drivers::avf::AvfPlatform,
};
use core::ffi::{c_char, c_void};
use parking_lot::Mutex;
use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

/// C-style event callback that Swift will implement.
///
/// IMPORTANT:
/// - `text` is a NUL-terminated UTF-8 string, or NULL for events without text.
/// - The pointer is only valid for the duration of the callback.
pub type AsimovRecorderEventCallback =
    extern "C" fn(kind: AsimovRecorderEventKind, text: *const c_char, user_data: *mut c_void);

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsimovRecorderEventKind {
    /// `text` is the new toggle label ("Record" or "Stop").
    Phase = 0,
    /// `text` is the status label text.
    Status = 1,
    /// A preview bitmap is ready; fetch it with [`asimov_recorder_take_preview`].
    Preview = 2,
    /// `text` is the alert message.
    Alert = 3,
    /// `text` is the saved file's location.
    Saved = 4,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsimovRecorderPhase {
    Idle = 0,
    Starting = 1,
    Recording = 2,
    Stopping = 3,
}

impl From<RecorderPhase> for AsimovRecorderPhase {
    fn from(phase: RecorderPhase) -> Self {
        match phase {
            RecorderPhase::Idle => Self::Idle,
            RecorderPhase::Starting => Self::Starting,
            RecorderPhase::Recording => Self::Recording,
            RecorderPhase::Stopping => Self::Stopping,
        }
    }
}

/// Error codes returned by the FFI API.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsimovRecorderErrorCode {
    Ok = 0,
    DeviceUnavailable = 1,
    InputUnavailable = 2,
    WriterInit = 3,
    Busy = 4,
    InvalidArgument = 5,
    Other = 6,
}

impl From<&RecorderError> for AsimovRecorderErrorCode {
    fn from(err: &RecorderError) -> Self {
        match err {
            RecorderError::NoDriver | RecorderError::DeviceUnavailable => Self::DeviceUnavailable,
            RecorderError::InputUnavailable(_) => Self::InputUnavailable,
            RecorderError::WriterInitError(_)
            | RecorderError::InputWriterInitError(_)
            | RecorderError::IncompatibleInput => Self::WriterInit,
            RecorderError::AlreadyRecording | RecorderError::FinalizePending => Self::Busy,
            _ => Self::Other,
        }
    }
}

/// Internal handle we keep on the Rust side.
///
/// Swift only sees this as an opaque `void*`. Only shared borrows of it are
/// ever handed out, so the callback may call back into the handle (e.g.
/// toggle from inside a pump).
pub struct AsimovRecorderHandle {
    recorder: Mutex<Recorder>,
    display: Display,
    queue: DisplayQueue,
    callback: AsimovRecorderEventCallback,
    user_data: *mut c_void,
}

impl AsimovRecorderHandle {
    fn emit(&self, kind: AsimovRecorderEventKind, text: Option<&str>) {
        // Interior NULs cannot cross the C boundary; deliver them as spaces.
        let text = text.map(|t| CString::new(t.replace('\0', " ")).unwrap_or_default());
        let ptr = text.as_ref().map_or(core::ptr::null(), |t| t.as_ptr());
        (self.callback)(kind, ptr, self.user_data);
    }

    fn deliver(&self, event: &RecorderEvent) {
        match event {
            RecorderEvent::Phase(phase) => {
                self.emit(AsimovRecorderEventKind::Phase, Some(phase.toggle_label()))
            },
            RecorderEvent::Status(text) => self.emit(AsimovRecorderEventKind::Status, Some(text)),
            RecorderEvent::PreviewReady => self.emit(AsimovRecorderEventKind::Preview, None),
            RecorderEvent::Alert(alert) => {
                self.emit(AsimovRecorderEventKind::Alert, Some(&alert.message))
            },
            RecorderEvent::Saved(path) => self.emit(
                AsimovRecorderEventKind::Saved,
                Some(&path.display().to_string()),
            ),
        }
    }
}

/// Borrows the handle behind an opaque pointer.
///
/// # Safety
/// `handle` must be NULL or a pointer returned by [`asimov_recorder_new`]
/// that has not been freed.
unsafe fn handle_ref<'a>(handle: *mut c_void) -> Option<&'a AsimovRecorderHandle> {
    unsafe { (handle as *const AsimovRecorderHandle).as_ref() }
}

/// Create a recorder.
///
/// Parameters:
/// - `documents_dir`: directory for the scratch `temp.mov`; NULL = default.
/// - `callback`: receives display events from [`asimov_recorder_pump`].
/// - `user_data`: opaque pointer passed back into `callback`.
/// - `out_handle`: [out] pointer to receive an opaque recorder handle.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_new(
    documents_dir: *const c_char,
    callback: AsimovRecorderEventCallback,
    user_data: *mut c_void,
    out_handle: *mut *mut c_void,
) -> AsimovRecorderErrorCode {
    if out_handle.is_null() {
        return AsimovRecorderErrorCode::InvalidArgument;
    }

    let mut config = CaptureConfig::default();
    if !documents_dir.is_null() {
        match unsafe { CStr::from_ptr(documents_dir) }.to_str() {
            Ok("") => {},
            Ok(dir) => config = config.with_document_dir(dir),
            Err(_) => return AsimovRecorderErrorCode::InvalidArgument,
        }
    }

    let platform = Arc::new(AvfPlatform::new(&config));
    let (display, queue) = display_channel();
    let handle = Box::new(AsimovRecorderHandle {
        recorder: Mutex::new(Recorder::new(platform, config, display.clone())),
        display,
        queue,
        callback,
        user_data,
    });

    unsafe {
        *out_handle = Box::into_raw(handle) as *mut c_void;
    }
    AsimovRecorderErrorCode::Ok
}

/// The Record/Stop button: starts when idle, stops when recording.
///
/// A failure is also queued as an alert, after the phase events it caused.
///
/// Threading:
/// - Call from the main thread, the same one that drives the pump.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_toggle(handle: *mut c_void) -> AsimovRecorderErrorCode {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return AsimovRecorderErrorCode::InvalidArgument;
    };
    let result = handle.recorder.lock().toggle();
    match result {
        Ok(_) => AsimovRecorderErrorCode::Ok,
        Err(err) => {
            handle.display.alert(Alert::from(&err));
            (&err).into()
        },
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_phase(handle: *mut c_void) -> AsimovRecorderPhase {
    match unsafe { handle_ref(handle) } {
        Some(handle) => handle.recorder.lock().phase().into(),
        None => AsimovRecorderPhase::Idle,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_frames(handle: *mut c_void) -> u64 {
    match unsafe { handle_ref(handle) } {
        Some(handle) => handle.recorder.lock().frames_captured(),
        None => 0,
    }
}

/// Deliver every queued display event to the callback, in order.
///
/// Swift should call this from the main thread, e.g. from a display link.
/// Returns the number of events delivered. The callback may toggle the
/// recorder; events that causes are delivered by the next pump. It must not
/// free the handle.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_pump(handle: *mut c_void) -> usize {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return 0;
    };
    let events = handle.queue.drain();
    for event in &events {
        handle.deliver(event);
    }
    events.len()
}

/// Copy the latest preview bitmap (premultiplied RGBA, tightly packed).
///
/// Returns the number of bytes written, or 0 if there is no new preview or
/// `capacity` is too small. Width and height are always written when a
/// preview exists so the caller can size its buffer and retry.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_take_preview(
    handle: *mut c_void,
    out: *mut u8,
    capacity: usize,
    out_width: *mut u32,
    out_height: *mut u32,
) -> usize {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return 0;
    };
    let Some(image) = handle.queue.take_preview() else {
        return 0;
    };
    unsafe {
        if let Some(w) = out_width.as_mut() {
            *w = image.width();
        }
        if let Some(h) = out_height.as_mut() {
            *h = image.height();
        }
    }
    let bytes = image.as_raw();
    if out.is_null() || capacity < bytes.len() {
        return 0;
    }
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len()) };
    bytes.len()
}

/// Free the recorder handle. A running recording is stopped and saved in
/// the background.
///
/// After this call, the `handle` must not be used again.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_recorder_free(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }

    unsafe {
        drop(Box::from_raw(handle as *mut AsimovRecorderHandle));
    }
}
