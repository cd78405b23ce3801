// Upload job: enqueue every input file through the connector API

use super::JobRun;
use crate::config::UploadJobSettings;
use crate::errors::JobError;
use crate::file_store::FileQuery;
use crate::models::{DataMessage, MessageStatus, StatusLog};
use crate::telemetry;
use tracing::{error, info, instrument};

#[instrument(skip_all, fields(job_key = %run.job_key))]
pub async fn process(run: &JobRun, settings: &UploadJobSettings) -> Result<(), JobError> {
    run.pull_inbound(&settings.input_dir).await?;

    let query = FileQuery::new(&settings.input_dir, &settings.search_pattern)
        .recursive(settings.recursive)
        .order(settings.order_by, settings.reverse_order);
    let queue: Vec<DataMessage> = run.files.enumerate(&query, MessageStatus::Input).await?.collect();
    if queue.is_empty() {
        return Ok(());
    }
    for message in &queue {
        verbose!(run, job_key = %run.job_key, path = %message.full_path, "File found in input location");
    }
    info!(job_key = %run.job_key, files = queue.len(), "Found file(s) in input folder");

    let enqueue_uri = run.api.enqueue_uri(
        &settings.activity_id,
        settings.entity_name.as_deref(),
        settings.company.as_deref(),
    )?;

    for (index, message) in queue.iter().enumerate() {
        run.delay_between_files(index).await?;
        upload_file(run, settings, &enqueue_uri, message)
            .await
            .map_err(|e| {
                error!(
                    job_key = %run.job_key,
                    path = %message.full_path,
                    error = %e,
                    "Failure processing file"
                );
                e
            })?;
    }
    Ok(())
}

async fn upload_file(
    run: &JobRun,
    settings: &UploadJobSettings,
    enqueue_uri: &str,
    message: &DataMessage,
) -> Result<(), JobError> {
    let Some(contents) = run.files.read_exclusive(&message.path()).await? else {
        return Ok(());
    };
    verbose!(
        run,
        job_key = %run.job_key,
        path = %message.full_path,
        size = contents.len(),
        "Uploading file"
    );

    let response = run
        .api
        .post_stream(enqueue_uri, contents, Some(&message.name))
        .await?;

    if response.is_success() {
        let message_id = response.text();
        let target = settings.upload_success_dir.join(&message.name);
        let enqueued = run
            .files
            .transition(message, &target, MessageStatus::Enqueued)
            .await?
            .with_message_id(message_id);
        if settings.processing_job_present {
            run.files
                .write_status(&enqueued, &settings.status_file_extension)
                .await?;
        }
        verbose!(
            run,
            job_key = %run.job_key,
            path = %message.full_path,
            message_id = enqueued.message_id.as_deref().unwrap_or_default(),
            "File uploaded successfully"
        );
        telemetry::record_file_processed(&run.job_key, "enqueued");
    } else {
        error!(
            job_key = %run.job_key,
            path = %message.full_path,
            status_code = response.status_code,
            reason = %response.reason(),
            "Enqueuing failed for file"
        );
        let target = settings.upload_errors_dir.join(&message.name);
        let failed = run
            .files
            .transition(message, &target, MessageStatus::Failed)
            .await?;
        run.files
            .write_status_log(
                &failed,
                StatusLog::from_parts(None, Some(&response)),
                &settings.status_file_extension,
            )
            .await?;
        telemetry::record_file_processed(&run.job_key, "failed");
    }
    Ok(())
}
