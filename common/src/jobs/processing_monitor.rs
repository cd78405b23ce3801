// Processing monitor: follow enqueued files through the recurring job status endpoint

use super::{pending_messages, JobRun};
use crate::config::ProcessingMonitorSettings;
use crate::errors::JobError;
use crate::models::{DataJobStatusDetail, DataMessage, MessageStatus, StatusLog};
use crate::telemetry;
use tracing::{info, instrument, warn};

#[instrument(skip_all, fields(job_key = %run.job_key))]
pub async fn process(run: &JobRun, settings: &ProcessingMonitorSettings) -> Result<(), JobError> {
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
    info!(job_key = %run.job_key, files = pending.len(), "Checking processing status of file(s)");

    for (index, message) in pending.iter().enumerate() {
        run.delay_between_files(index).await?;
        check_message(run, settings, message).await?;
    }
    Ok(())
}

async fn check_message(
    run: &JobRun,
    settings: &ProcessingMonitorSettings,
    message: &DataMessage,
) -> Result<(), JobError> {
    let message_id = message.message_id.as_deref().unwrap_or_default();
    let uri = run.api.job_status_uri(&settings.activity_id, message_id)?;
    let response = run.api.get(&uri, true).await?;
    if !response.is_success() {
        warn!(
            job_key = %run.job_key,
            message_id = message_id,
            status_code = response.status_code,
            reason = %response.reason(),
            "Job status request failed"
        );
        return Ok(());
    }

    let detail: DataJobStatusDetail = match serde_json::from_slice(&response.body) {
        Ok(detail) => detail,
        Err(e) => {
            warn!(
                job_key = %run.job_key,
                message_id = message_id,
                error = %e,
                "Unreadable job status"
            );
            return Ok(());
        }
    };

    let Some(state) = detail.state() else {
        verbose!(run, job_key = %run.job_key, message_id = message_id, "Job status not available yet");
        return Ok(());
    };
    let extension = &settings.status_file_extension;

    if state.is_success() {
        let target = settings.processing_success_dir.join(&message.name);
        run.files
            .move_with_sidecar(&message.path(), &target, true, extension)
            .await?;
        verbose!(
            run,
            job_key = %run.job_key,
            path = %message.full_path,
            state = ?state,
            "File processed"
        );
        telemetry::record_file_processed(&run.job_key, "processed");
    } else if state.is_failure() {
        let target = settings.processing_errors_dir.join(&message.name);
        run.files
            .move_with_sidecar(&message.path(), &target, true, extension)
            .await?;
        let failed = message.relocated(&target, MessageStatus::Failed);
        run.files
            .write_status_log(&failed, StatusLog::from_parts(Some(&detail), None), extension)
            .await?;
        warn!(
            job_key = %run.job_key,
            path = %message.full_path,
            state = ?state,
            "File processed with errors"
        );
        telemetry::record_file_processed(&run.job_key, "failed");
    } else {
        verbose!(
            run,
            job_key = %run.job_key,
            path = %message.full_path,
            state = ?state,
            "File still in process"
        );
    }
    Ok(())
}
