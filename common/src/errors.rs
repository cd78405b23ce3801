// Error handling framework
// One enum per concern; JobError composes them for a single job run.

use std::path::PathBuf;
use thiserror::Error;

/// Outbound HTTP errors raised by the retrying transport and the API client
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed after {attempts} attempt(s): {source}")]
    Request {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request cancelled")]
    Cancelled,

    #[error("HTTP request body cannot be replayed for retries")]
    NonReplayableRequest,

    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Local file lifecycle errors
#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Insufficient disk space to extract archive. Required: {required} bytes, available: {available} bytes"
    )]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("Invalid archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("Failed to serialize status file: {0}")]
    Serialization(String),

    #[error("Path has no parent directory: {}", .0.display())]
    NoParent(PathBuf),

    #[error("Blocking file task failed: {0}")]
    Join(String),

    #[error("File operation cancelled")]
    Cancelled,
}

impl FileStoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileStoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the I/O retry policy should try the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, FileStoreError::Io { .. })
    }
}

/// Remote operation polling errors
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Checking for status reached {attempts} attempts. Status is '{last_status}'. Exiting.")]
    Exhausted { attempts: u32, last_status: String },

    #[error("Remote operation ended with status '{status}' after {attempts} attempt(s)")]
    Failed { status: String, attempts: u32 },

    #[error("Status check failed: {0}")]
    Fetch(#[source] Box<JobError>),

    #[error("Polling cancelled")]
    Cancelled,
}

/// SFTP relay errors
#[derive(Error, Debug)]
pub enum SftpError {
    #[error("SFTP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SFTP authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("SFTP operation failed: {0}")]
    OperationFailed(String),

    #[error("SFTP file not found: {0}")]
    FileNotFound(String),

    #[error("SFTP configuration is incomplete for host '{0}'")]
    NotConfigured(String),

    #[error("Local file error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SFTP task failed: {0}")]
    Join(String),
}

/// Secret resolution errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret '{0}' is unavailable or empty")]
    Unavailable(String),

    #[error("Failed to read secret file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Directory for {field} does not exist or cannot be accessed ({}): {source}", path.display())]
    DirectoryInaccessible {
        field: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate job key: {0}")]
    DuplicateJobKey(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Errors raised while a job processes its unit(s) of work
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    FileStore(#[from] FileStoreError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Sftp(#[from] SftpError),

    #[error("{operation} request failed. Status: {status_code}. Reason: {reason}")]
    RequestFailed {
        operation: String,
        status_code: u16,
        reason: String,
    },

    #[error("Unexpected response from {operation}: {reason}")]
    UnexpectedResponse { operation: String, reason: String },

    #[error("Remote execution failed. Status: {status}")]
    ExecutionFailed { status: String },

    #[error("Job run cancelled")]
    Cancelled,
}

impl JobError {
    pub fn unexpected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::UnexpectedResponse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure came from caller-driven cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            JobError::Cancelled
            | JobError::FileStore(FileStoreError::Cancelled)
            | JobError::Transport(TransportError::Cancelled)
            | JobError::Poll(PollError::Cancelled) => true,
            JobError::Poll(PollError::Fetch(inner)) => inner.is_cancelled(),
            _ => false,
        }
    }
}

/// Run-level failure surfaced to the trigger that invoked the job
#[derive(Error, Debug)]
#[error("Job {job_key} failed: {source}")]
pub struct JobExecutionError {
    pub job_key: String,
    #[source]
    pub source: JobError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_poll_error_names_status_and_attempts() {
        let err = PollError::Exhausted {
            attempts: 100,
            last_status: "Executing".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("100"));
        assert!(message.contains("Executing"));
    }

    #[test]
    fn test_cancellation_is_detected_through_poll_fetch() {
        let err = JobError::Poll(PollError::Fetch(Box::new(JobError::Transport(
            TransportError::Cancelled,
        ))));
        assert!(err.is_cancelled());

        let err = JobError::ExecutionFailed {
            status: "Failed".to_string(),
        };
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_only_io_errors_are_retryable() {
        let io = FileStoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "locked"),
        );
        assert!(io.is_retryable());

        let space = FileStoreError::InsufficientDiskSpace {
            required: 10,
            available: 1,
        };
        assert!(!space.is_retryable());
    }

    #[test]
    fn test_job_execution_error_display() {
        let err = JobExecutionError {
            job_key: "upload-customers".to_string(),
            source: JobError::Cancelled,
        };
        assert!(err.to_string().contains("upload-customers"));
    }
}
