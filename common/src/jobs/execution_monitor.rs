// Execution monitor: follow package imports through their execution summary

use super::{ensure_success, pending_messages, JobRun};
use crate::config::ExecutionMonitorSettings;
use crate::errors::JobError;
use crate::models::{DataMessage, MessageStatus, StatusLog};
use crate::poller::{PollDecision, EXECUTION_STATUS_TABLE};
use crate::telemetry;
use std::path::Path;
use tracing::{info, instrument, warn};

#[instrument(skip_all, fields(job_key = %run.job_key))]
pub async fn process(run: &JobRun, settings: &ExecutionMonitorSettings) -> Result<(), JobError> {
    let pending = pending_messages(
        run,
        &settings.upload_success_dir,
        &settings.status_file_extension,
        settings.order_by,
        settings.reverse_order,
    )
    .await?;
    if pending.is_empty() {
        return Ok(());
    }
    info!(job_key = %run.job_key, files = pending.len(), "Checking execution status of file(s)");

    for (index, message) in pending.iter().enumerate() {
        run.delay_between_files(index).await?;
        check_message(run, settings, message).await?;
    }
    Ok(())
}

/// Contents of a Windows internet shortcut pointing at `url`
pub fn internet_shortcut(url: &str) -> String {
    format!("[InternetShortcut]\r\nURL={}\r\n", url)
}

async fn check_message(
    run: &JobRun,
    settings: &ExecutionMonitorSettings,
    message: &DataMessage,
) -> Result<(), JobError> {
    let execution_id = message.message_id.as_deref().unwrap_or_default();
    let response = run.api.get_execution_summary_status(execution_id).await?;
    if !response.is_success() {
        warn!(
            job_key = %run.job_key,
            execution_id = execution_id,
            status_code = response.status_code,
            reason = %response.reason(),
            "Execution status request failed"
        );
        return Ok(());
    }
    let status = response.value_string();
    let extension = &settings.status_file_extension;

    match EXECUTION_STATUS_TABLE.classify(&status) {
        PollDecision::Success => {
            let target = settings.processing_success_dir.join(&message.name);
            run.files
                .move_with_sidecar(&message.path(), &target, true, extension)
                .await?;
            write_summary_link(run, execution_id, &target).await?;
            verbose!(
                run,
                job_key = %run.job_key,
                path = %message.full_path,
                status = %status,
                "Execution completed"
            );
            telemetry::record_file_processed(&run.job_key, "processed");
        }
        PollDecision::Failure => {
            let target = settings.processing_errors_dir.join(&message.name);
            run.files
                .move_with_sidecar(&message.path(), &target, true, extension)
                .await?;
            let failed = message.relocated(&target, MessageStatus::Failed);
            if settings.get_execution_errors {
                let errors = run.api.get_execution_errors(execution_id).await?;
                run.files
                    .write_status_log(&failed, StatusLog::from_parts(None, Some(&errors)), extension)
                    .await?;
            } else {
                run.files.write_status(&failed, extension).await?;
            }
            warn!(
                job_key = %run.job_key,
                path = %message.full_path,
                status = %status,
                "Execution failed"
            );
            telemetry::record_file_processed(&run.job_key, "failed");
        }
        PollDecision::Continue => {
            verbose!(
                run,
                job_key = %run.job_key,
                path = %message.full_path,
                status = %status,
                "Execution still in progress"
            );
        }
        PollDecision::Unrecognized => {
            warn!(
                job_key = %run.job_key,
                execution_id = execution_id,
                status = %status,
                "Unexpected execution status"
            );
        }
    }
    Ok(())
}

/// `.url` shortcut next to the processed file, pointing at the execution summary page
async fn write_summary_link(run: &JobRun, execution_id: &str, target: &Path) -> Result<(), JobError> {
    let response = run.api.get_execution_summary_page_url(execution_id).await?;
    ensure_success("GetExecutionSummaryPageUrl", &response)?;
    let url = response.value_string();
    if url.is_empty() {
        return Ok(());
    }
    run.files
        .write_bytes(&target.with_extension("url"), internet_shortcut(&url).into_bytes())
        .await?;
    Ok(())
}
