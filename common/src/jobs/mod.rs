// Job runners
// One module per job type; JobRunner owns the skeleton they share:
// validation, indefinite pause, per-run client, failure routing to the trigger.

/// Per-file progress logs: info when the job logs verbosely, debug otherwise
macro_rules! verbose {
    ($run:expr, $($arg:tt)+) => {
        if $run.log_verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod download;
pub mod execution_monitor;
pub mod export;
pub mod import;
pub mod processing_monitor;
pub mod protocol;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

use crate::client::{ApiClientFactory, DataManagementApi};
use crate::config::{ensure_directory, JobCommonSettings, JobDefinition, JobKind};
use crate::errors::{JobError, JobExecutionError, ValidationError};
use crate::file_store::{FileQuery, FileStateStore, DEFAULT_STATUS_EXTENSION};
use crate::models::{DataMessage, MessageStatus, OrderBy};
use crate::secrets::SecretProvider;
use crate::sftp::{SftpConfiguration, SftpTransfer};
use crate::telemetry;
use crate::transport::ApiResponse;
use crate::trigger::JobTrigger;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Subfolder receiving local copies already pushed to outbound SFTP
pub const UPLOADED_FOLDER: &str = "Uploaded";

/// How a job run ended when it did not fail loudly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Indefinite pause requested; nothing was processed
    Paused,
    /// Failure logged under the private scheduler
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Paused => "paused",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Collaborators injected into every job run
#[derive(Clone)]
pub struct JobServices {
    pub api_factory: Arc<dyn ApiClientFactory>,
    pub sftp: Arc<dyn SftpTransfer>,
    pub secrets: Arc<dyn SecretProvider>,
}

/// Everything one job run needs, scoped to that run
pub struct JobRun {
    pub job_key: String,
    pub api: Arc<dyn DataManagementApi>,
    pub sftp: Arc<dyn SftpTransfer>,
    /// Resolved endpoint when the job has SFTP relay enabled
    pub sftp_config: Option<SftpConfiguration>,
    pub files: FileStateStore,
    pub cancel: CancellationToken,
    pub delay_between_files: Duration,
    pub log_verbose: bool,
}

impl JobRun {
    /// Sleep between files; never before the first one
    pub async fn delay_between_files(&self, index: usize) -> Result<(), JobError> {
        if index == 0 || self.delay_between_files.is_zero() {
            return Ok(());
        }
        self.sleep(self.delay_between_files).await
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), JobError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(JobError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Download inbound SFTP files into `input_dir`. Failure aborts the run.
    pub async fn pull_inbound(&self, input_dir: &Path) -> Result<usize, JobError> {
        let Some(config) = &self.sftp_config else {
            return Ok(0);
        };
        let downloaded = self
            .sftp
            .download_files(config, input_dir)
            .await
            .map_err(|e| {
                error!(job_key = %self.job_key, error = %e, "Failed to download files from SFTP");
                e
            })?;
        if !downloaded.is_empty() {
            info!(
                job_key = %self.job_key,
                files = downloaded.len(),
                "Downloaded file(s) from SFTP to input folder"
            );
        }
        Ok(downloaded.len())
    }

    /// Upload `path` to outbound SFTP; false when the relay is off or the file is gone
    pub async fn push_outbound(&self, path: &Path) -> Result<bool, JobError> {
        let Some(config) = &self.sftp_config else {
            return Ok(false);
        };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(
                job_key = %self.job_key,
                path = %path.display(),
                "Local file was not found for SFTP upload"
            );
            return Ok(false);
        }
        self.sftp.upload_file(config, path).await.map_err(|e| {
            error!(
                job_key = %self.job_key,
                path = %path.display(),
                error = %e,
                "SFTP upload failed"
            );
            e
        })?;
        Ok(true)
    }

    /// Push a downloaded package outbound, optionally extract it, then park the
    /// pushed copy under `success_dir/Uploaded`
    pub async fn deliver_package(
        &self,
        package: &Path,
        success_dir: &Path,
        unzip: bool,
        delete_package: bool,
        add_timestamp: bool,
    ) -> Result<(), JobError> {
        let pushed = self.push_outbound(package).await?;

        if unzip {
            let report = self
                .files
                .extract_archive(package, delete_package, add_timestamp)
                .await?;
            verbose!(
                self,
                job_key = %self.job_key,
                path = %package.display(),
                extracted = report.extracted.len(),
                skipped = report.skipped.len(),
                "Package extracted"
            );
        }

        if pushed && tokio::fs::try_exists(package).await.unwrap_or(false) {
            let target = uploaded_path(success_dir, package);
            self.files.move_file(package, &target).await?;
        }
        Ok(())
    }
}

fn uploaded_path(success_dir: &Path, package: &Path) -> PathBuf {
    let name = package.file_name().unwrap_or(package.as_os_str());
    success_dir.join(UPLOADED_FOLDER).join(name)
}

/// Data files awaiting a remote outcome, read back from their status sidecars.
/// `full_path` is re-rooted at `folder` so a relocated folder still resolves.
pub(crate) async fn pending_messages(
    run: &JobRun,
    folder: &Path,
    extension: &str,
    order_by: OrderBy,
    reverse: bool,
) -> Result<Vec<DataMessage>, JobError> {
    let query = FileQuery::new(folder, status_file_pattern(extension))
        .recursive(false)
        .order(order_by, reverse);
    let messages = run.files.enumerate_status_files(&query).await?;

    let mut pending = Vec::with_capacity(messages.len());
    for message in messages {
        let data_path = folder.join(&message.name);
        if message.name.is_empty() || !tokio::fs::try_exists(&data_path).await.unwrap_or(false) {
            warn!(
                job_key = %run.job_key,
                name = %message.name,
                "Status file has no matching data file"
            );
            continue;
        }
        if message.message_id.as_deref().map_or(true, str::is_empty) {
            warn!(
                job_key = %run.job_key,
                path = %data_path.display(),
                "Status file has no message id"
            );
            continue;
        }
        pending.push(message.relocated(&data_path, MessageStatus::InProcess));
    }
    Ok(pending)
}

/// Wildcard matching every sidecar with `extension`
pub fn status_file_pattern(extension: &str) -> String {
    let extension = extension.trim();
    if extension.is_empty() {
        format!("*{}", DEFAULT_STATUS_EXTENSION)
    } else if extension.starts_with('.') {
        format!("*{}", extension)
    } else {
        format!("*.{}", extension)
    }
}

/// Non-success answer to a call whose failure aborts the run
pub(crate) fn ensure_success(operation: &str, response: &ApiResponse) -> Result<(), JobError> {
    if response.is_success() {
        return Ok(());
    }
    Err(JobError::RequestFailed {
        operation: operation.to_string(),
        status_code: response.status_code,
        reason: response.reason(),
    })
}

/// Runs job definitions on behalf of a trigger
#[derive(Clone)]
pub struct JobRunner {
    services: JobServices,
}

impl JobRunner {
    pub fn new(services: JobServices) -> Self {
        Self { services }
    }

    /// Execute one run of `definition`.
    ///
    /// Failures pause the job when `pause_job_on_exception` is set. Under the
    /// private scheduler they are logged and reported as [`JobOutcome::Failed`];
    /// otherwise they are returned to the trigger.
    #[instrument(skip_all, fields(job_key = %definition.key, job_type = definition.kind.name()))]
    pub async fn execute(
        &self,
        definition: &JobDefinition,
        trigger: &dyn JobTrigger,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, JobExecutionError> {
        let started = Instant::now();
        let settings = &definition.settings;
        let result = self.run(definition, trigger, cancel).await;

        let outcome = match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => {
                info!(job_key = %definition.key, "Job run cancelled");
                Ok(JobOutcome::Cancelled)
            }
            Err(e) => {
                if settings.pause_job_on_exception {
                    trigger.pause_job(&definition.key).await;
                    warn!(job_key = %definition.key, "Job was paused because of error");
                }
                if settings.log_verbose {
                    error!(job_key = %definition.key, error = ?e, "Job run failed");
                }
                if trigger.is_private() {
                    error!(job_key = %definition.key, error = %e, "Job thrown an error");
                    Ok(JobOutcome::Failed)
                } else {
                    Err(JobExecutionError {
                        job_key: definition.key.clone(),
                        source: e,
                    })
                }
            }
        };

        let label = match &outcome {
            Ok(outcome) => outcome.as_str(),
            Err(_) => JobOutcome::Failed.as_str(),
        };
        telemetry::record_job_run(&definition.key, label, started.elapsed().as_secs_f64());
        outcome
    }

    async fn run(
        &self,
        definition: &JobDefinition,
        trigger: &dyn JobTrigger,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let settings = &definition.settings;
        settings.validate()?;
        let sftp_config = prepare(&definition.kind, self.services.secrets.as_ref())?;
        let api_config = settings.api_client_config(self.services.secrets.as_ref())?;

        if settings.indefinite_pause {
            trigger.pause_job(&definition.key).await;
            info!(job_key = %definition.key, "Job was paused indefinitely");
            return Ok(JobOutcome::Paused);
        }

        let api = self
            .services
            .api_factory
            .create(&api_config, &definition.key, cancel.clone())?;
        let run = JobRun {
            job_key: definition.key.clone(),
            api,
            sftp: Arc::clone(&self.services.sftp),
            sftp_config,
            files: FileStateStore::new(settings.io_retry(), cancel.clone()),
            cancel,
            delay_between_files: settings.delay_between_files(),
            log_verbose: settings.log_verbose,
        };

        verbose!(run, job_key = %run.job_key, "Job starting");
        dispatch(&run, &definition.kind, settings).await?;
        verbose!(run, job_key = %run.job_key, "Job ended");
        Ok(JobOutcome::Completed)
    }
}

async fn dispatch(run: &JobRun, kind: &JobKind, settings: &JobCommonSettings) -> Result<(), JobError> {
    match kind {
        JobKind::Upload(s) => upload::process(run, s).await,
        JobKind::Import(s) => import::process(run, s).await,
        JobKind::Export(s) => export::process(run, s, settings).await,
        JobKind::Download(s) => download::process(run, s).await,
        JobKind::ProcessingMonitor(s) => processing_monitor::process(run, s).await,
        JobKind::ExecutionMonitor(s) => execution_monitor::process(run, s).await,
    }
}

/// Per-run validation: required fields, directories, SFTP endpoint and its secrets
pub fn prepare(
    kind: &JobKind,
    secrets: &dyn SecretProvider,
) -> Result<Option<SftpConfiguration>, ValidationError> {
    let directories: Vec<(&'static str, &Path)> = match kind {
        JobKind::Upload(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
        JobKind::Import(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
        JobKind::Export(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
        JobKind::Download(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
        JobKind::ProcessingMonitor(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
        JobKind::ExecutionMonitor(s) => {
            s.validate()?;
            s.directories().to_vec()
        }
    };
    for (field, path) in directories {
        ensure_directory(field, path)?;
    }

    kind.sftp_endpoints()
        .into_iter()
        .next()
        .map(|endpoint| endpoint.resolve("sftp", secrets))
        .transpose()
}
