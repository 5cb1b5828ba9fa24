// This is free and unencumbered software released into the public domain.

//! Display-thread event queue.
//!
//! Core code never touches on-screen state. It posts [`RecorderEvent`]s
//! through a [`Display`] handle and the thread owning the screen drains them
//! from the matching [`DisplayQueue`]. Preview bitmaps go through a
//! latest-wins slot so a slow display never holds more than one frame.

use crate::shared::{PreviewImage, RecorderError, RecorderPhase};
use parking_lot::Mutex;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel},
    },
    time::Duration,
};

pub const ALERT_TITLE: &str = "Recording error";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: ALERT_TITLE.to_string(),
            message: message.into(),
        }
    }
}

impl From<&RecorderError> for Alert {
    fn from(err: &RecorderError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderEvent {
    /// The toggle control should now show this phase's label.
    Phase(RecorderPhase),
    Status(String),
    /// A new bitmap is waiting in the preview slot.
    PreviewReady,
    Alert(Alert),
    Saved(PathBuf),
}

pub fn display_channel() -> (Display, DisplayQueue) {
    let (tx, rx) = channel();
    let preview = Arc::new(Mutex::new(None));
    (
        Display {
            tx,
            preview: Arc::clone(&preview),
        },
        DisplayQueue { rx, preview },
    )
}

/// Sending half; cheap to clone into background queues.
#[derive(Clone)]
pub struct Display {
    tx: Sender<RecorderEvent>,
    preview: Arc<Mutex<Option<PreviewImage>>>,
}

impl Display {
    fn post(&self, event: RecorderEvent) {
        // A closed display means the UI is gone; nothing left to update.
        let _ = self.tx.send(event);
    }

    pub fn phase(&self, phase: RecorderPhase) {
        self.post(RecorderEvent::Phase(phase));
    }

    pub fn status(&self, text: impl Into<String>) {
        self.post(RecorderEvent::Status(text.into()));
    }

    pub fn alert(&self, alert: Alert) {
        self.post(RecorderEvent::Alert(alert));
    }

    pub fn saved(&self, path: PathBuf) {
        self.post(RecorderEvent::Saved(path));
    }

    pub fn preview(&self, image: PreviewImage) {
        let was_empty = self.preview.lock().replace(image).is_none();
        if was_empty {
            self.post(RecorderEvent::PreviewReady);
        }
    }
}

/// Receiving half, owned by the display thread.
pub struct DisplayQueue {
    rx: Receiver<RecorderEvent>,
    preview: Arc<Mutex<Option<PreviewImage>>>,
}

impl DisplayQueue {
    pub fn try_next(&self) -> Option<RecorderEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<RecorderEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything currently queued, in order.
    pub fn drain(&self) -> Vec<RecorderEvent> {
        core::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn take_preview(&self) -> Option<PreviewImage> {
        self.preview.lock().take()
    }
}
