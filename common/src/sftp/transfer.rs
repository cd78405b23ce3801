// ssh2-backed SftpTransfer
// Sessions are blocking; every call runs on the blocking pool.

use super::{
    combine_remote_path, resolve_unique_local_path, SftpConfiguration, SftpConnection,
    SftpTransfer,
};
use crate::errors::SftpError;
use crate::file_store::matches_wildcard;
use async_trait::async_trait;
use ssh2::Sftp;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct Ssh2SftpTransfer {
    timeout: Duration,
}

impl Ssh2SftpTransfer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for Ssh2SftpTransfer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, SftpError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SftpError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SftpError::Join(e.to_string()))?
}

#[async_trait]
impl SftpTransfer for Ssh2SftpTransfer {
    #[instrument(skip_all, fields(host = %config.host, remote_folder = %config.remote_folder))]
    async fn download_files(
        &self,
        config: &SftpConfiguration,
        local_folder: &Path,
    ) -> Result<Vec<PathBuf>, SftpError> {
        let (config, local_folder, timeout) =
            (config.clone(), local_folder.to_path_buf(), self.timeout);
        run_blocking(move || {
            fs::create_dir_all(&local_folder).map_err(|e| SftpError::LocalIo {
                path: local_folder.clone(),
                source: e,
            })?;
            let connection = SftpConnection::connect(&config, timeout)?;
            let downloaded = download_all(connection.sftp(), &config, &local_folder);
            connection.disconnect();
            downloaded
        })
        .await
    }

    #[instrument(skip_all, fields(host = %config.host, local_path = %local_path.display()))]
    async fn upload_file(
        &self,
        config: &SftpConfiguration,
        local_path: &Path,
    ) -> Result<(), SftpError> {
        let (config, local_path, timeout) =
            (config.clone(), local_path.to_path_buf(), self.timeout);
        run_blocking(move || {
            let connection = SftpConnection::connect(&config, timeout)?;
            let uploaded = upload_one(connection.sftp(), &config, &local_path);
            connection.disconnect();
            uploaded
        })
        .await
    }

    #[instrument(skip_all, fields(host = %config.host))]
    async fn validate_connection(&self, config: &SftpConfiguration) -> Result<(), SftpError> {
        let (config, timeout) = (config.clone(), self.timeout);
        run_blocking(move || {
            let connection = SftpConnection::connect(&config, timeout)?;
            let listed = connection
                .sftp()
                .readdir(Path::new("/"))
                .map(|entries| entries.len())
                .map_err(|e| SftpError::OperationFailed(format!("Failed to list '/': {}", e)));
            connection.disconnect();
            let entries = listed?;
            info!(entries = entries, "SFTP connection validated");
            Ok(())
        })
        .await
    }
}

fn download_all(
    sftp: &Sftp,
    config: &SftpConfiguration,
    local_folder: &Path,
) -> Result<Vec<PathBuf>, SftpError> {
    let entries = sftp
        .readdir(Path::new(&config.remote_folder))
        .map_err(|e| {
            SftpError::OperationFailed(format!(
                "Failed to list directory {}: {}",
                config.remote_folder, e
            ))
        })?;
    debug!(entries_count = entries.len(), "Remote directory listed");

    let mut downloaded = Vec::new();
    for (remote_path, stat) in entries {
        if stat.is_dir() || stat.file_type().is_symlink() {
            continue;
        }
        let Some(name) = remote_path.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        if !matches_wildcard(&name, &config.file_mask) {
            continue;
        }

        let local_path = resolve_unique_local_path(local_folder, &name);
        let mut remote_file = sftp.open(&remote_path).map_err(|e| {
            SftpError::FileNotFound(format!("{}: {}", remote_path.display(), e))
        })?;
        let mut local_file = fs::File::create(&local_path).map_err(|e| SftpError::LocalIo {
            path: local_path.clone(),
            source: e,
        })?;
        io::copy(&mut remote_file, &mut local_file).map_err(|e| SftpError::LocalIo {
            path: local_path.clone(),
            source: e,
        })?;

        sftp.unlink(&remote_path).map_err(|e| {
            SftpError::OperationFailed(format!(
                "Failed to delete remote file {}: {}",
                remote_path.display(),
                e
            ))
        })?;
        info!(
            remote_path = %remote_path.display(),
            local_path = %local_path.display(),
            "SFTP download completed"
        );
        downloaded.push(local_path);
    }
    Ok(downloaded)
}

fn upload_one(
    sftp: &Sftp,
    config: &SftpConfiguration,
    local_path: &Path,
) -> Result<(), SftpError> {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SftpError::LocalIo {
            path: local_path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;

    let mut local_file = fs::File::open(local_path).map_err(|e| SftpError::LocalIo {
        path: local_path.to_path_buf(),
        source: e,
    })?;

    ensure_remote_folder(sftp, &config.remote_folder)?;
    let remote_path = combine_remote_path(&config.remote_folder, &file_name);

    // create() truncates an existing file
    let mut remote_file = sftp.create(Path::new(&remote_path)).map_err(|e| {
        SftpError::OperationFailed(format!("Failed to create remote file {}: {}", remote_path, e))
    })?;
    io::copy(&mut local_file, &mut remote_file).map_err(|e| {
        SftpError::OperationFailed(format!("Failed to write remote file {}: {}", remote_path, e))
    })?;

    info!(remote_path = %remote_path, "SFTP upload completed");
    Ok(())
}

/// Create `remote_folder` and any missing parents
fn ensure_remote_folder(sftp: &Sftp, remote_folder: &str) -> Result<(), SftpError> {
    if sftp.stat(Path::new(remote_folder)).is_ok() {
        return Ok(());
    }

    let mut path = if remote_folder.starts_with('/') {
        "/".to_string()
    } else {
        String::new()
    };
    for segment in remote_folder.split('/').filter(|s| !s.is_empty()) {
        path = combine_remote_path(&path, segment);
        if sftp.stat(Path::new(&path)).is_ok() {
            continue;
        }
        debug!(dir_path = %path, "Creating remote directory");
        if let Err(e) = sftp.mkdir(Path::new(&path), 0o755) {
            // Created concurrently by someone else
            if sftp.stat(Path::new(&path)).is_err() {
                return Err(SftpError::OperationFailed(format!(
                    "Failed to create remote directory {}: {}",
                    path, e
                )));
            }
        }
    }
    Ok(())
}
