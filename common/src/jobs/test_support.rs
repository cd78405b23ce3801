// Inert collaborators for unit tests of the job skeleton

use crate::client::{ApiClientConfig, ApiClientFactory, DataManagementApi};
use crate::errors::{SftpError, TransportError};
use crate::sftp::{SftpConfiguration, SftpTransfer};
use crate::transport::ApiResponse;
use crate::trigger::JobTrigger;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct NoopApi;

fn not_found() -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(404, ""))
}

#[async_trait]
impl DataManagementApi for NoopApi {
    fn enqueue_uri(
        &self,
        activity_id: &str,
        _entity_name: Option<&str>,
        _company: Option<&str>,
    ) -> Result<String, TransportError> {
        Ok(format!("http://localhost/enqueue/{}", activity_id))
    }
    fn dequeue_uri(&self, activity_id: &str) -> Result<String, TransportError> {
        Ok(format!("http://localhost/dequeue/{}", activity_id))
    }
    fn ack_uri(&self, activity_id: &str) -> Result<String, TransportError> {
        Ok(format!("http://localhost/ack/{}", activity_id))
    }
    fn job_status_uri(&self, activity_id: &str, job_id: &str) -> Result<String, TransportError> {
        Ok(format!("http://localhost/jobstatus/{}?jobId={}", activity_id, job_id))
    }

    async fn post_stream(
        &self,
        _uri: &str,
        _body: Vec<u8>,
        _external_id: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn post_string(&self, _uri: &str, _body: String) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get(&self, _uri: &str, _add_authorization: bool) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_azure_write_url(&self) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_execution_summary_status(&self, _id: &str) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_exported_package_url(&self, _id: &str) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_execution_summary_page_url(
        &self,
        _id: &str,
    ) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn upload_contents_to_blob(
        &self,
        _blob_url: &str,
        _body: Vec<u8>,
    ) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn import_from_package(
        &self,
        _package_url: &str,
        _definition_group_id: &str,
        _execution_id: &str,
        _execute: bool,
        _overwrite: bool,
        _legal_entity_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn export_to_package(
        &self,
        _definition_group_id: &str,
        _package_name: &str,
        _execution_id: &str,
        _legal_entity_id: &str,
        _re_execute: bool,
    ) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_message_status(&self, _message_id: &str) -> Result<ApiResponse, TransportError> {
        not_found()
    }
    async fn get_execution_errors(&self, _id: &str) -> Result<ApiResponse, TransportError> {
        not_found()
    }
}

pub struct NoopFactory;

impl ApiClientFactory for NoopFactory {
    fn create(
        &self,
        _config: &ApiClientConfig,
        _job_key: &str,
        _cancel: CancellationToken,
    ) -> Result<Arc<dyn DataManagementApi>, TransportError> {
        Ok(Arc::new(NoopApi))
    }
}

pub struct NoopSftp;

#[async_trait]
impl SftpTransfer for NoopSftp {
    async fn download_files(
        &self,
        _config: &SftpConfiguration,
        _local_folder: &Path,
    ) -> Result<Vec<PathBuf>, SftpError> {
        Ok(Vec::new())
    }
    async fn upload_file(
        &self,
        _config: &SftpConfiguration,
        _local_path: &Path,
    ) -> Result<(), SftpError> {
        Ok(())
    }
    async fn validate_connection(&self, _config: &SftpConfiguration) -> Result<(), SftpError> {
        Ok(())
    }
}

/// Records pause requests
pub struct RecordingTrigger {
    pub name: String,
    pub paused: Mutex<Vec<String>>,
}

impl RecordingTrigger {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            paused: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobTrigger for RecordingTrigger {
    fn scheduler_name(&self) -> &str {
        &self.name
    }

    async fn pause_job(&self, job_key: &str) {
        self.paused.lock().unwrap().push(job_key.to_string());
    }
}
