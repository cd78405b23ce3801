// SFTP relay
// Pull remote files into a job's input folder, push results to a remote folder

pub mod connection;
pub mod transfer;

pub use connection::SftpConnection;
pub use transfer::Ssh2SftpTransfer;

use crate::errors::SftpError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_SFTP_PORT: u16 = 22;
pub const DEFAULT_REMOTE_FOLDER: &str = "/";
pub const DEFAULT_FILE_MASK: &str = "*.*";

/// Resolved SFTP endpoint. Secrets are plaintext here and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SftpConfiguration {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub use_private_key: bool,
    pub private_key_path: Option<PathBuf>,
    pub private_key_passphrase: Option<String>,
    pub remote_folder: String,
    pub file_mask: String,
}

impl SftpConfiguration {
    /// Applies defaults: port 0 becomes 22, a blank remote folder "/", a blank mask "*.*"
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: Option<String>,
        use_private_key: bool,
        private_key_path: Option<PathBuf>,
        private_key_passphrase: Option<String>,
        remote_folder: &str,
        file_mask: &str,
    ) -> Self {
        let remote_folder = remote_folder.trim();
        Self {
            host: host.into(),
            port: if port == 0 { DEFAULT_SFTP_PORT } else { port },
            username: username.into(),
            password,
            use_private_key,
            private_key_path,
            private_key_passphrase,
            remote_folder: if remote_folder.is_empty() {
                DEFAULT_REMOTE_FOLDER.to_string()
            } else {
                remote_folder.to_string()
            },
            file_mask: if file_mask.trim().is_empty() {
                DEFAULT_FILE_MASK.to_string()
            } else {
                file_mask.to_string()
            },
        }
    }

    /// Host present and a complete credential for the selected auth mode
    pub fn is_configured(&self) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        if self.host.trim().is_empty() || self.username.trim().is_empty() {
            return false;
        }
        if self.use_private_key {
            self.private_key_path
                .as_ref()
                .is_some_and(|p| !p.as_os_str().is_empty())
        } else {
            present(&self.password)
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SftpConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfiguration")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_private_key", &self.use_private_key)
            .field("private_key_path", &self.private_key_path)
            .field("remote_folder", &self.remote_folder)
            .field("file_mask", &self.file_mask)
            .finish()
    }
}

/// SFTP operations used by the job runners
#[async_trait]
pub trait SftpTransfer: Send + Sync {
    /// Download every matching regular file into `local_folder`, deleting each
    /// remote file once its local copy is written. Returns the local paths.
    async fn download_files(
        &self,
        config: &SftpConfiguration,
        local_folder: &Path,
    ) -> Result<Vec<PathBuf>, SftpError>;

    /// Upload `local_path` into the remote folder, overwriting a file of the same name
    async fn upload_file(&self, config: &SftpConfiguration, local_path: &Path)
        -> Result<(), SftpError>;

    /// Connect, list the remote root and disconnect
    async fn validate_connection(&self, config: &SftpConfiguration) -> Result<(), SftpError>;
}

/// First free name for `file_name` in `folder`: `data.txt`, then `data_1.txt`, `data_2.txt`, ...
pub fn resolve_unique_local_path(folder: &Path, file_name: &str) -> PathBuf {
    let candidate = folder.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut index: u32 = 1;
    loop {
        let candidate = folder.join(format!("{}_{}{}", stem, index, extension));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Join remote path segments with exactly one '/'
pub fn combine_remote_path(folder: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if folder.is_empty() {
        format!("/{}", name)
    } else if folder.ends_with('/') {
        format!("{}{}", folder, name)
    } else {
        format!("{}/{}", folder, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(password: Option<&str>, use_key: bool, key: Option<&str>) -> SftpConfiguration {
        SftpConfiguration::new(
            "sftp.example.com",
            0,
            "svc",
            password.map(str::to_string),
            use_key,
            key.map(PathBuf::from),
            None,
            "  ",
            "",
        )
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = config(Some("pw"), false, None);
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.remote_folder, "/");
        assert_eq!(cfg.file_mask, "*.*");
    }

    #[test]
    fn test_is_configured() {
        assert!(config(Some("pw"), false, None).is_configured());
        assert!(!config(None, false, None).is_configured());
        assert!(!config(Some(" "), false, None).is_configured());
        assert!(config(None, true, Some("/keys/id_rsa")).is_configured());
        assert!(!config(Some("pw"), true, None).is_configured());

        let mut no_host = config(Some("pw"), false, None);
        no_host.host = String::new();
        assert!(!no_host.is_configured());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", config(Some("hunter2"), false, None));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_resolve_unique_local_path() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_unique_local_path(dir.path(), "data.txt"),
            dir.path().join("data.txt")
        );

        std::fs::write(dir.path().join("data.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("data_1.txt"), b"x").unwrap();
        assert_eq!(
            resolve_unique_local_path(dir.path(), "data.txt"),
            dir.path().join("data_2.txt")
        );
    }

    #[test]
    fn test_resolve_unique_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            resolve_unique_local_path(dir.path(), "README"),
            dir.path().join("README_1")
        );
    }

    #[test]
    fn test_combine_remote_path() {
        assert_eq!(combine_remote_path("/", "a.zip"), "/a.zip");
        assert_eq!(combine_remote_path("/out", "a.zip"), "/out/a.zip");
        assert_eq!(combine_remote_path("/out/", "/a.zip"), "/out/a.zip");
        assert_eq!(combine_remote_path("", "a.zip"), "/a.zip");
    }
}
