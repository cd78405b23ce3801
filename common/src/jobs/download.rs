// Download job: dequeue messages, fetch their payloads, acknowledge them

use super::{ensure_success, JobRun};
use crate::config::DownloadJobSettings;
use crate::errors::JobError;
use crate::models::{DataMessage, MessageStatus, StatusLog};
use crate::sftp::resolve_unique_local_path;
use crate::telemetry;
use crate::transport::ApiResponse;
use std::path::Path;
use tracing::{error, info, instrument, warn};

#[instrument(skip_all, fields(job_key = %run.job_key))]
pub async fn process(run: &JobRun, settings: &DownloadJobSettings) -> Result<(), JobError> {
    let dequeue_uri = run.api.dequeue_uri(&settings.activity_id)?;
    let ack_uri = run.api.ack_uri(&settings.activity_id)?;

    let mut index = 0;
    while let Some((message, raw)) = dequeue(run, &dequeue_uri).await? {
        run.delay_between_files(index).await?;
        index += 1;
        download_message(run, settings, &ack_uri, &message, raw)
            .await
            .map_err(|e| {
                error!(
                    job_key = %run.job_key,
                    message_id = message.message_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "Failure processing dequeued message"
                );
                e
            })?;
    }

    if index > 0 {
        info!(job_key = %run.job_key, messages = index, "Dequeued message(s) processed");
    }
    Ok(())
}

/// Next message, or None once the queue answers 204 or an empty body
async fn dequeue(run: &JobRun, dequeue_uri: &str) -> Result<Option<(DataMessage, String)>, JobError> {
    run.check_cancelled()?;
    let response = run.api.get(dequeue_uri, true).await?;
    ensure_success("Dequeue", &response)?;

    let raw = response.text();
    if response.status_code == 204 || raw.trim().is_empty() {
        return Ok(None);
    }
    let message: DataMessage = serde_json::from_str(&raw)
        .map_err(|e| JobError::unexpected("Dequeue", format!("invalid message: {}", e)))?;
    Ok(Some((message, raw)))
}

/// Local file name for a dequeued message. Only the final component of `Name`
/// is kept so the payload cannot land outside the target folder.
fn file_name_of(message: &DataMessage) -> String {
    let name = message.name.trim().replace('\\', "/");
    if let Some(base) = Path::new(&name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
    {
        if base != name {
            warn!(
                name = %message.name,
                file_name = %base,
                "Dequeued file name reduced to its final component"
            );
        }
        return base;
    }
    match message.message_id.as_deref() {
        Some(id) if !id.is_empty() => format!("{}.zip", id),
        _ => "package.zip".to_string(),
    }
}

async fn download_message(
    run: &JobRun,
    settings: &DownloadJobSettings,
    ack_uri: &str,
    message: &DataMessage,
    raw: String,
) -> Result<(), JobError> {
    let location = message
        .download_location
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| JobError::unexpected("Dequeue", "message has no download location"))?;
    let file_name = file_name_of(message);

    verbose!(
        run,
        job_key = %run.job_key,
        file_name = %file_name,
        location = %location,
        "Downloading dequeued file"
    );
    let response = run.api.get(location, false).await?;

    if !response.is_success() {
        error!(
            job_key = %run.job_key,
            file_name = %file_name,
            status_code = response.status_code,
            reason = %response.reason(),
            "Download failure"
        );
        record_failure(run, settings, message, &file_name, &response).await?;
        telemetry::record_file_processed(&run.job_key, "failed");
        return Ok(());
    }

    let folder = settings.download_success_dir.clone();
    let target = tokio::task::spawn_blocking(move || resolve_unique_local_path(&folder, &file_name))
        .await
        .map_err(|e| JobError::unexpected("Download", e.to_string()))?;
    run.files.write_bytes(&target, response.body).await?;
    let downloaded = message.relocated(&target, MessageStatus::Succeeded);
    verbose!(
        run,
        job_key = %run.job_key,
        path = %downloaded.full_path,
        "File downloaded successfully"
    );

    let ack = run.api.post_string(ack_uri, raw).await?;
    if ack.is_success() {
        verbose!(
            run,
            job_key = %run.job_key,
            message_id = message.message_id.as_deref().unwrap_or_default(),
            "Download acknowledged"
        );
    } else {
        error!(
            job_key = %run.job_key,
            message_id = message.message_id.as_deref().unwrap_or_default(),
            status_code = ack.status_code,
            reason = %ack.reason(),
            "Acknowledgement failed"
        );
    }
    telemetry::record_file_processed(&run.job_key, "downloaded");

    run.deliver_package(
        &downloaded.path(),
        &settings.download_success_dir,
        settings.unzip_package,
        settings.delete_package,
        settings.add_timestamp,
    )
    .await
}

/// Failure sidecar in the errors folder; the message stays unacknowledged
async fn record_failure(
    run: &JobRun,
    settings: &DownloadJobSettings,
    message: &DataMessage,
    file_name: &str,
    response: &ApiResponse,
) -> Result<(), JobError> {
    let failed = message.relocated(
        &settings.download_errors_dir.join(file_name),
        MessageStatus::Failed,
    );
    run.files
        .write_status_log(
            &failed,
            StatusLog::from_parts(None, Some(response)),
            &settings.status_file_extension,
        )
        .await?;
    Ok(())
}
