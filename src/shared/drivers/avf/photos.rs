// This is free and unencumbered software released into the public domain.

use crate::shared::{Completion, MediaLibrary, RecorderError};
use block2::RcBlock;
use futures::{FutureExt, channel::oneshot};
use objc2::runtime::Bool;
use objc2_foundation::{NSError, NSURL};
use objc2_photos::{PHAssetChangeRequest, PHPhotoLibrary};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// The system photo library.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhotosLibrary;

impl MediaLibrary for PhotosLibrary {
    fn save_video(&self, path: &Path) -> Completion<PathBuf> {
        let Some(url) = NSURL::from_file_path(path) else {
            return futures::future::ready(Err(RecorderError::save_failed(format!(
                "{} is not a file URL",
                path.display()
            ))))
            .boxed();
        };

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let saved = path.to_path_buf();

        let changes = RcBlock::new(move || unsafe {
            PHAssetChangeRequest::creationRequestForAssetFromVideoAtFileURL(&url);
        });
        let completion = RcBlock::new(move |success: Bool, error: *mut NSError| {
            let result = if success.as_bool() {
                Ok(saved.clone())
            } else {
                let reason = unsafe { error.as_ref() }
                    .map(|e| e.localizedDescription().to_string())
                    .unwrap_or_else(|| "photo library refused the video".into());
                Err(RecorderError::save_failed(reason))
            };
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result);
            }
        });

        unsafe {
            PHPhotoLibrary::sharedPhotoLibrary()
                .performChanges_completionHandler(&changes, Some(&completion));
        }

        rx.map(|r| r.unwrap_or_else(|_| Err(RecorderError::save_failed("photo library went away"))))
            .boxed()
    }
}
