// Import job: push packages to blob storage and import them into a data project

use super::export::new_execution_id;
use super::{ensure_success, JobRun};
use crate::config::ImportJobSettings;
use crate::errors::JobError;
use crate::file_store::FileQuery;
use crate::models::{DataMessage, MessageStatus, StatusLog};
use crate::telemetry;
use crate::transport::ApiResponse;
use std::path::Path;
use tracing::{error, info, instrument};

/// One input package and the legal entity it is imported into
#[derive(Debug, Clone)]
struct ImportItem {
    message: DataMessage,
    legal_entity: String,
}

#[instrument(skip_all, fields(job_key = %run.job_key, data_project = %settings.data_project))]
pub async fn process(run: &JobRun, settings: &ImportJobSettings) -> Result<(), JobError> {
    run.pull_inbound(&settings.input_dir).await?;

    let queue = collect_input(run, settings).await?;
    if queue.is_empty() {
        return Ok(());
    }
    info!(job_key = %run.job_key, files = queue.len(), "Found file(s) in input folder");

    for (index, item) in queue.iter().enumerate() {
        run.delay_between_files(index).await?;
        import_file(run, settings, item).await.map_err(|e| {
            error!(
                job_key = %run.job_key,
                path = %item.message.full_path,
                error = %e,
                "Failure processing file"
            );
            e
        })?;
    }
    Ok(())
}

async fn collect_input(run: &JobRun, settings: &ImportJobSettings) -> Result<Vec<ImportItem>, JobError> {
    let mut queue = Vec::new();

    if settings.legal_entity_from_subfolder {
        for folder in run.files.subfolders(&settings.input_dir).await? {
            let legal_entity = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for message in run.files.enumerate(&query(settings, &folder), MessageStatus::Input).await? {
                queue.push(ImportItem {
                    message,
                    legal_entity: legal_entity.clone(),
                });
            }
        }
    } else {
        for message in run
            .files
            .enumerate(&query(settings, &settings.input_dir), MessageStatus::Input)
            .await?
        {
            let legal_entity = legal_entity_for(settings, &message.name);
            queue.push(ImportItem {
                message,
                legal_entity,
            });
        }
    }

    for item in &queue {
        verbose!(
            run,
            job_key = %run.job_key,
            path = %item.message.full_path,
            legal_entity = %item.legal_entity,
            "File found in input location"
        );
    }
    Ok(queue)
}

fn query(settings: &ImportJobSettings, folder: &Path) -> FileQuery {
    FileQuery::new(folder, &settings.search_pattern)
        .recursive(false)
        .order(settings.order_by, settings.reverse_order)
}

fn legal_entity_for(settings: &ImportJobSettings, file_name: &str) -> String {
    if settings.legal_entity_from_filename {
        if let Some(entity) = legal_entity_from_filename(
            file_name,
            &settings.filename_separator,
            settings.legal_entity_token_position,
        ) {
            return entity;
        }
    }
    settings.company.clone()
}

/// Token `position` (1-based) of the file stem split on `separator`
pub fn legal_entity_from_filename(file_name: &str, separator: &str, position: usize) -> Option<String> {
    if separator.is_empty() || position == 0 {
        return None;
    }
    let stem = Path::new(file_name).file_stem()?.to_string_lossy().into_owned();
    stem.split(separator)
        .nth(position - 1)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// `BlobUrl` of the GetAzureWriteUrl answer, itself a JSON document
pub fn parse_blob_url(value: &str) -> Result<String, JobError> {
    let document: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| JobError::unexpected("GetAzureWriteUrl", e.to_string()))?;
    document
        .get("BlobUrl")
        .and_then(|v| v.as_str())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| JobError::unexpected("GetAzureWriteUrl", "response has no BlobUrl"))
}

async fn import_file(run: &JobRun, settings: &ImportJobSettings, item: &ImportItem) -> Result<(), JobError> {
    let message = &item.message;
    let Some(contents) = run.files.read_exclusive(&message.path()).await? else {
        return Ok(());
    };

    let write_url = run.api.get_azure_write_url().await?;
    ensure_success("GetAzureWriteUrl", &write_url)?;
    let blob_url = parse_blob_url(&write_url.value_string())?;

    verbose!(
        run,
        job_key = %run.job_key,
        path = %message.full_path,
        size = contents.len(),
        "Uploading package to blob storage"
    );
    let upload = run.api.upload_contents_to_blob(&blob_url, contents).await?;
    if !upload.is_success() {
        return fail_file(run, settings, message, "UploadContentsToBlob", &upload).await;
    }

    let execution_id = new_execution_id(&settings.data_project);
    let response = run
        .api
        .import_from_package(
            &blob_url,
            &settings.data_project,
            &execution_id,
            settings.execute_import,
            settings.overwrite_data_project,
            &item.legal_entity,
        )
        .await?;
    if !response.is_success() {
        return fail_file(run, settings, message, "ImportFromPackage", &response).await;
    }

    let returned_id = response.value_string();
    let execution_id = if returned_id.is_empty() { execution_id } else { returned_id };
    let target = settings.upload_success_dir.join(&message.name);
    let enqueued = run
        .files
        .transition(message, &target, MessageStatus::Enqueued)
        .await?
        .with_message_id(execution_id);
    run.files
        .write_status(&enqueued, &settings.status_file_extension)
        .await?;
    verbose!(
        run,
        job_key = %run.job_key,
        path = %message.full_path,
        execution_id = enqueued.message_id.as_deref().unwrap_or_default(),
        "Package import started"
    );
    telemetry::record_file_processed(&run.job_key, "enqueued");
    Ok(())
}

async fn fail_file(
    run: &JobRun,
    settings: &ImportJobSettings,
    message: &DataMessage,
    operation: &str,
    response: &ApiResponse,
) -> Result<(), JobError> {
    error!(
        job_key = %run.job_key,
        path = %message.full_path,
        operation = operation,
        status_code = response.status_code,
        reason = %response.reason(),
        "Import failed for file"
    );
    let target = settings.upload_errors_dir.join(&message.name);
    let failed = run
        .files
        .transition(message, &target, MessageStatus::Failed)
        .await?;
    run.files
        .write_status_log(
            &failed,
            StatusLog::from_parts(None, Some(response)),
            &settings.status_file_extension,
        )
        .await?;
    telemetry::record_file_processed(&run.job_key, "failed");
    Ok(())
}
