// This is free and unencumbered software released into the public domain.

use crate::shared::{Completion, MediaLibrary, RecorderError};
use futures::FutureExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Desktop media library: a folder that finished videos are copied into.
#[derive(Clone, Debug)]
pub struct FolderLibrary {
    root: PathBuf,
}

impl FolderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_for(&self, source: &Path) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mov");

        let mut n = 0u32;
        loop {
            let name = match n {
                0 => format!("recording-{stamp}.{ext}"),
                _ => format!("recording-{stamp}-{n}.{ext}"),
            };
            let candidate = self.root.join(name);
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn store(&self, source: &Path) -> Result<PathBuf, RecorderError> {
        if !source.is_file() {
            return Err(RecorderError::save_failed(format!(
                "{} does not exist",
                source.display()
            )));
        }
        fs::create_dir_all(&self.root).map_err(|e| {
            RecorderError::save_failed(format!("cannot create {}: {e}", self.root.display()))
        })?;

        let target = self.target_for(source);
        fs::copy(source, &target).map_err(|e| {
            RecorderError::save_failed(format!("cannot copy into {}: {e}", target.display()))
        })?;
        Ok(target)
    }
}

impl MediaLibrary for FolderLibrary {
    fn save_video(&self, path: &Path) -> Completion<PathBuf> {
        futures::future::ready(self.store(path)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn copies_into_library_folder() {
        let docs = tempfile::tempdir().unwrap();
        let lib_root = tempfile::tempdir().unwrap();
        let source = docs.path().join("temp.mov");
        fs::write(&source, b"movie").unwrap();

        let library = FolderLibrary::new(lib_root.path().join("Videos"));
        let first = block_on(library.save_video(&source)).unwrap();
        let second = block_on(library.save_video(&source)).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"movie");
        assert!(first.starts_with(library.root()));
        assert_eq!(first.extension().unwrap(), "mov");
    }

    #[test]
    fn missing_source_is_a_save_failure() {
        let lib_root = tempfile::tempdir().unwrap();
        let library = FolderLibrary::new(lib_root.path());
        let err = block_on(library.save_video(Path::new("/nonexistent/temp.mov"))).unwrap_err();
        assert!(matches!(err, RecorderError::SaveFailed(_)));
    }
}
