// File state store
// Local disk is the only record of pending work: a move commits a transition.

pub mod archive;
pub mod enumerate;
pub mod sidecar;

pub use archive::{extract_archive, ExtractionReport, MANIFEST_ENTRIES};
pub use enumerate::{
    enumerate, enumerate_status_files, matches_wildcard, subfolders, wildcard_regex,
    FileEnumeration, FileQuery,
};
pub use sidecar::{read_status, sidecar_path, write_atomic, DEFAULT_STATUS_EXTENSION, UNKNOWN_ERROR};

use crate::errors::FileStoreError;
use crate::models::{DataMessage, MessageStatus, StatusLog};
use crate::retry::{retry_io, FixedDelay};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Move `source` to `target`, replacing an existing target.
/// Falls back to copy + delete when a rename crosses volumes.
pub fn move_file(source: &Path, target: &Path) -> Result<(), FileStoreError> {
    if !source.exists() {
        return Err(FileStoreError::SourceMissing(source.to_path_buf()));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| FileStoreError::io(parent, e))?;
    }
    if target.exists() {
        fs::remove_file(target).map_err(|e| FileStoreError::io(target, e))?;
    }

    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(FileStoreError::SourceMissing(source.to_path_buf()))
        }
        Err(_) => {
            fs::copy(source, target).map_err(|e| FileStoreError::io(source, e))?;
            fs::remove_file(source).map_err(|e| FileStoreError::io(source, e))
        }
    }
}

/// Move a data file and its sidecar together, or drop the sidecar.
/// A missing sidecar is not an error.
pub fn move_with_sidecar(
    source: &Path,
    target: &Path,
    delete_sidecar: bool,
    extension: &str,
) -> Result<(), FileStoreError> {
    move_file(source, target)?;

    let source_sidecar = sidecar_path(source, extension);
    if !source_sidecar.exists() {
        return Ok(());
    }
    if delete_sidecar {
        delete_if_exists(&source_sidecar)
    } else {
        move_file(&source_sidecar, &sidecar_path(target, extension))
    }
}

pub fn delete_if_exists(path: &Path) -> Result<(), FileStoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FileStoreError::io(path, e)),
    }
}

/// Read a whole file while holding it exclusively where the platform allows.
///
/// Missing or locked files yield None: the file stays where it is for the
/// next run.
///
/// Only Windows opens with a share mode of none. Unix has no mandatory
/// locks, so there a file still being written by another process is read as
/// is and only open errors (permissions, vanished file) skip it.
pub fn read_exclusive(path: &Path) -> Option<Vec<u8>> {
    let mut options = fs::OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.share_mode(0);
    }

    let result = options.open(path).and_then(|mut file| {
        let mut buffer = Vec::new();
        io::Read::read_to_end(&mut file, &mut buffer).map(|_| buffer)
    });

    match result {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "File disappeared before it could be read");
            None
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Unable to open file. The file may be locked by another process"
            );
            None
        }
    }
}

/// Async file lifecycle operations for one job run.
///
/// Blocking work runs on the blocking pool; I/O failures are retried under
/// the run's fixed-delay policy.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    io_retry: FixedDelay,
    cancel: CancellationToken,
}

impl FileStateStore {
    pub fn new(io_retry: FixedDelay, cancel: CancellationToken) -> Self {
        Self { io_retry, cancel }
    }

    async fn blocking<T, F>(&self, operation: &str, f: F) -> Result<T, FileStoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, FileStoreError> + Clone + Send + 'static,
    {
        retry_io(&self.io_retry, &self.cancel, operation, || {
            let f = f.clone();
            async move {
                tokio::task::spawn_blocking(f)
                    .await
                    .map_err(|e| FileStoreError::Join(e.to_string()))?
            }
        })
        .await
    }

    pub async fn enumerate(
        &self,
        query: &FileQuery,
        status: MessageStatus,
    ) -> Result<FileEnumeration, FileStoreError> {
        let query = query.clone();
        self.blocking("enumerate", move || enumerate(&query, status))
            .await
    }

    pub async fn enumerate_status_files(
        &self,
        query: &FileQuery,
    ) -> Result<Vec<DataMessage>, FileStoreError> {
        let query = query.clone();
        self.blocking("enumerate_status_files", move || enumerate_status_files(&query))
            .await
    }

    pub async fn subfolders(&self, path: &Path) -> Result<Vec<PathBuf>, FileStoreError> {
        let path = path.to_path_buf();
        self.blocking("subfolders", move || subfolders(&path)).await
    }

    pub async fn move_file(&self, source: &Path, target: &Path) -> Result<(), FileStoreError> {
        let (source, target) = (source.to_path_buf(), target.to_path_buf());
        debug!(source = %source.display(), target = %target.display(), "Moving file");
        self.blocking("move", move || move_file(&source, &target))
            .await
    }

    pub async fn move_with_sidecar(
        &self,
        source: &Path,
        target: &Path,
        delete_sidecar: bool,
        extension: &str,
    ) -> Result<(), FileStoreError> {
        let (source, target) = (source.to_path_buf(), target.to_path_buf());
        let extension = extension.to_string();
        self.blocking("move_with_sidecar", move || {
            move_with_sidecar(&source, &target, delete_sidecar, &extension)
        })
        .await
    }

    /// Move `message` to `target` and return the relocated copy
    pub async fn transition(
        &self,
        message: &DataMessage,
        target: &Path,
        status: MessageStatus,
    ) -> Result<DataMessage, FileStoreError> {
        self.move_file(&message.path(), target).await?;
        Ok(message.relocated(target, status))
    }

    pub async fn delete(&self, path: &Path) -> Result<(), FileStoreError> {
        let path = path.to_path_buf();
        self.blocking("delete", move || delete_if_exists(&path)).await
    }

    /// None when the file is missing or locked
    pub async fn read_exclusive(&self, path: &Path) -> Result<Option<Vec<u8>>, FileStoreError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_exclusive(&path))
            .await
            .map_err(|e| FileStoreError::Join(e.to_string()))
    }

    pub async fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<(), FileStoreError> {
        let path = path.to_path_buf();
        self.blocking("write", move || write_atomic(&path, &bytes))
            .await
    }

    pub async fn write_status(
        &self,
        message: &DataMessage,
        extension: &str,
    ) -> Result<PathBuf, FileStoreError> {
        let (message, extension) = (message.clone(), extension.to_string());
        self.blocking("write_status", move || {
            sidecar::write_status(&message, &extension)
        })
        .await
    }

    pub async fn write_status_log(
        &self,
        message: &DataMessage,
        log: StatusLog,
        extension: &str,
    ) -> Result<PathBuf, FileStoreError> {
        let (message, extension) = (message.clone(), extension.to_string());
        self.blocking("write_status_log", move || {
            sidecar::write_status_log(&message, &log, &extension)
        })
        .await
    }

    pub async fn extract_archive(
        &self,
        archive_path: &Path,
        delete_archive: bool,
        add_timestamp: bool,
    ) -> Result<ExtractionReport, FileStoreError> {
        let archive_path = archive_path.to_path_buf();
        self.blocking("extract_archive", move || {
            extract_archive(&archive_path, delete_archive, add_timestamp)
        })
        .await
    }
}
