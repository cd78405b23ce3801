// Export job: export a data project to a package, wait for it, download it

use super::protocol::{drive, RemoteOperation};
use super::{ensure_success, JobRun};
use crate::config::{ExportJobSettings, JobCommonSettings};
use crate::errors::JobError;
use crate::models::{DataMessage, MessageStatus};
use crate::poller::{
    PollConfig, PollDecision, PollOutcome, RemoteOperationPoller, DEFAULT_MAX_POLL_ATTEMPTS,
    EXECUTION_STATUS_TABLE,
};
use crate::telemetry;
use async_trait::async_trait;
use chrono::Local;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[instrument(skip_all, fields(job_key = %run.job_key, data_project = %settings.data_project))]
pub async fn process(
    run: &JobRun,
    settings: &ExportJobSettings,
    common: &JobCommonSettings,
) -> Result<(), JobError> {
    let operation = ExportOperation {
        run,
        settings,
        package_url_poll: PollConfig::new(common.delay_between_files(), DEFAULT_MAX_POLL_ATTEMPTS),
    };
    let poller = RemoteOperationPoller::new(
        PollConfig::new(
            Duration::from_secs(settings.delay_between_status_check_secs),
            settings.max_status_checks,
        ),
        run.job_key.clone(),
        run.cancel.clone(),
    );
    drive(&operation, &poller).await
}

/// `{data_project}-{yyyy-MM-dd_HH-mm-ss}-{uuid}`
pub fn new_execution_id(data_project: &str) -> String {
    format!(
        "{}-{}-{}",
        data_project,
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        Uuid::new_v4()
    )
}

/// `{yyyy-MM-dd_HH-mm-ss-ffff}.zip`
pub fn package_file_name() -> String {
    let now = Local::now();
    let ten_thousandths = (now.timestamp_subsec_micros() / 100).min(9999);
    format!("{}-{:04}.zip", now.format("%Y-%m-%d_%H-%M-%S"), ten_thousandths)
}

struct ExportOperation<'a> {
    run: &'a JobRun,
    settings: &'a ExportJobSettings,
    package_url_poll: PollConfig,
}

impl ExportOperation<'_> {
    async fn exported_package_url(&self, execution_id: &str) -> Result<String, JobError> {
        let poller = RemoteOperationPoller::new(
            self.package_url_poll,
            self.run.job_key.clone(),
            self.run.cancel.clone(),
        );
        let outcome = poller
            .poll(
                execution_id,
                |attempt| async move {
                    verbose!(
                        self.run,
                        job_key = %self.run.job_key,
                        attempt = attempt + 1,
                        "Trying to get exported package URL"
                    );
                    let response = self.run.api.get_exported_package_url(execution_id).await?;
                    ensure_success("GetExportedPackageUrl", &response)?;
                    Ok::<_, JobError>(response.value_string())
                },
                |url: &String| {
                    if url.is_empty() {
                        PollDecision::Continue
                    } else {
                        PollDecision::Success
                    }
                },
            )
            .await?;
        match outcome {
            PollOutcome::Completed { status, .. } | PollOutcome::Unrecognized { status, .. } => {
                Ok(status)
            }
        }
    }

    async fn download_package(&self, package_url: &str) -> Result<(), JobError> {
        let response = self.run.api.get(package_url, false).await?;
        if !response.is_success() {
            return Err(JobError::RequestFailed {
                operation: "Download exported package".to_string(),
                status_code: response.status_code,
                reason: response.text(),
            });
        }

        let file_name = package_file_name();
        let target = self.settings.download_success_dir.join(&file_name);
        let message = DataMessage::from_path(&target, MessageStatus::Succeeded);
        self.run.files.write_bytes(&message.path(), response.body).await?;
        info!(
            job_key = %self.run.job_key,
            path = %message.full_path,
            "Exported package downloaded"
        );
        telemetry::record_file_processed(&self.run.job_key, "downloaded");

        self.run
            .deliver_package(
                &message.path(),
                &self.settings.download_success_dir,
                self.settings.unzip_package,
                self.settings.delete_package,
                self.settings.add_timestamp,
            )
            .await
    }
}

#[async_trait]
impl RemoteOperation for ExportOperation<'_> {
    type Status = String;

    async fn submit(&self) -> Result<String, JobError> {
        let execution_id = new_execution_id(&self.settings.data_project);
        let response = self
            .run
            .api
            .export_to_package(
                &self.settings.data_project,
                &execution_id,
                &execution_id,
                &self.settings.company,
                false,
            )
            .await?;
        ensure_success("ExportToPackage", &response)?;
        verbose!(
            self.run,
            job_key = %self.run.job_key,
            execution_id = %execution_id,
            "Export submitted"
        );
        Ok(execution_id)
    }

    async fn poll_status(&self, execution_id: &str) -> Result<String, JobError> {
        let response = self
            .run
            .api
            .get_execution_summary_status(execution_id)
            .await?;
        ensure_success("GetExecutionSummaryStatus", &response)?;
        Ok(response.value_string())
    }

    fn classify(&self, status: &String) -> PollDecision {
        EXECUTION_STATUS_TABLE.classify(status)
    }

    async fn on_terminal(
        &self,
        execution_id: &str,
        outcome: PollOutcome<String>,
    ) -> Result<(), JobError> {
        match outcome {
            PollOutcome::Completed { .. } => {
                let package_url = self.exported_package_url(execution_id).await?;
                self.download_package(&package_url).await
            }
            PollOutcome::Unrecognized { status, .. } => {
                error!(
                    job_key = %self.run.job_key,
                    execution_id = %execution_id,
                    status = %status,
                    "Unexpected execution status"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_starts_with_project() {
        let id = new_execution_id("Customers");
        assert!(id.starts_with("Customers-"));
        let uuid = &id[id.len() - 36..];
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_package_file_name_shape() {
        let name = package_file_name();
        assert!(name.ends_with(".zip"));
        // yyyy-MM-dd_HH-mm-ss-ffff.zip
        assert_eq!(name.len(), "2024-01-31_23-59-59-1234.zip".len());
    }
}
