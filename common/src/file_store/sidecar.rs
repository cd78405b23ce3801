// Status sidecar files and atomic writes

use crate::errors::FileStoreError;
use crate::models::{DataJobStatusDetail, DataMessage, StatusLog};
use crate::transport::ApiResponse;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_STATUS_EXTENSION: &str = ".Status";
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Sidecar of `data_path`: same directory, same stem, status extension
pub fn sidecar_path(data_path: &Path, extension: &str) -> PathBuf {
    let stem = data_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = extension.trim();
    let file_name = if extension.is_empty() {
        format!("{}{}", stem, DEFAULT_STATUS_EXTENSION)
    } else if extension.starts_with('.') {
        format!("{}{}", stem, extension)
    } else {
        format!("{}.{}", stem, extension)
    };
    match data_path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

impl StatusLog {
    /// Job-status detail when present, else the HTTP response, else a fixed text
    pub fn from_parts(detail: Option<&DataJobStatusDetail>, response: Option<&ApiResponse>) -> Self {
        match (detail, response) {
            (Some(detail), _) => StatusLog::JobStatus(detail.clone()),
            (None, Some(response)) => StatusLog::Response(response.to_log()),
            (None, None) => StatusLog::Text(UNKNOWN_ERROR.to_string()),
        }
    }

    fn render(&self) -> Result<Vec<u8>, FileStoreError> {
        match self {
            StatusLog::Text(text) => Ok(text.clone().into_bytes()),
            other => serde_json::to_vec_pretty(other)
                .map_err(|e| FileStoreError::Serialization(e.to_string())),
        }
    }
}

/// Write `bytes` to `target` through a temporary file in the same directory.
/// Parent directories are created; an existing target is replaced.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), FileStoreError> {
    let parent = target
        .parent()
        .ok_or_else(|| FileStoreError::NoParent(target.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|e| FileStoreError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&temp).map_err(|e| FileStoreError::io(&temp, e))?;
        file.write_all(bytes).map_err(|e| FileStoreError::io(&temp, e))?;
        file.sync_all().map_err(|e| FileStoreError::io(&temp, e))?;
        drop(file);
        fs::rename(&temp, target).map_err(|e| FileStoreError::io(target, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Persist `message` as the sidecar of its current location
pub fn write_status(message: &DataMessage, extension: &str) -> Result<PathBuf, FileStoreError> {
    let path = sidecar_path(&message.path(), extension);
    let bytes = serde_json::to_vec_pretty(message)
        .map_err(|e| FileStoreError::Serialization(e.to_string()))?;
    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Persist the last response or job-status detail next to `message`
pub fn write_status_log(
    message: &DataMessage,
    log: &StatusLog,
    extension: &str,
) -> Result<PathBuf, FileStoreError> {
    let path = sidecar_path(&message.path(), extension);
    write_atomic(&path, &log.render()?)?;
    Ok(path)
}

pub fn read_status(path: &Path) -> Result<DataMessage, FileStoreError> {
    let contents = fs::read_to_string(path).map_err(|e| FileStoreError::io(path, e))?;
    serde_json::from_str(&contents).map_err(|e| FileStoreError::Serialization(e.to_string()))
}
