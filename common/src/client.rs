// Data management REST API client
// Recurring-integration connector endpoints plus the package OData actions

use crate::errors::TransportError;
use crate::retry::RetryPolicy;
use crate::transport::{ApiResponse, RetryingTransport};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

const CONNECTOR_PATH: &str = "api/connector";
const PACKAGE_ACTIONS_PATH: &str =
    "data/DataManagementDefinitionGroups/Microsoft.Dynamics.DataEntities.";
const EXTERNAL_IDENTIFIER_HEADER: &str = "x-ms-dyn-externalidentifier";

/// Remote API surface used by the job runners
///
/// URI builders return absolute URLs; every request method goes through the
/// run's retrying transport.
#[async_trait]
pub trait DataManagementApi: Send + Sync {
    fn enqueue_uri(
        &self,
        activity_id: &str,
        entity_name: Option<&str>,
        company: Option<&str>,
    ) -> Result<String, TransportError>;
    fn dequeue_uri(&self, activity_id: &str) -> Result<String, TransportError>;
    fn ack_uri(&self, activity_id: &str) -> Result<String, TransportError>;
    fn job_status_uri(&self, activity_id: &str, job_id: &str) -> Result<String, TransportError>;

    async fn post_stream(
        &self,
        uri: &str,
        body: Vec<u8>,
        external_id: Option<&str>,
    ) -> Result<ApiResponse, TransportError>;
    async fn post_string(&self, uri: &str, body: String) -> Result<ApiResponse, TransportError>;
    async fn get(&self, uri: &str, add_authorization: bool)
        -> Result<ApiResponse, TransportError>;

    async fn get_azure_write_url(&self) -> Result<ApiResponse, TransportError>;
    async fn get_execution_summary_status(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError>;
    async fn get_exported_package_url(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError>;
    async fn get_execution_summary_page_url(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError>;
    async fn upload_contents_to_blob(
        &self,
        blob_url: &str,
        body: Vec<u8>,
    ) -> Result<ApiResponse, TransportError>;
    async fn import_from_package(
        &self,
        package_url: &str,
        definition_group_id: &str,
        execution_id: &str,
        execute: bool,
        overwrite: bool,
        legal_entity_id: &str,
    ) -> Result<ApiResponse, TransportError>;
    async fn export_to_package(
        &self,
        definition_group_id: &str,
        package_name: &str,
        execution_id: &str,
        legal_entity_id: &str,
        re_execute: bool,
    ) -> Result<ApiResponse, TransportError>;
    async fn get_message_status(&self, message_id: &str) -> Result<ApiResponse, TransportError>;
    async fn get_execution_errors(&self, execution_id: &str)
        -> Result<ApiResponse, TransportError>;
}

/// OAuth2 client-credentials grant, with the secret already resolved
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
}

/// Everything needed to build a client for one job run
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub aos_uri: String,
    pub credentials: Option<ApiCredentials>,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

/// Builds the API client for each job run
pub trait ApiClientFactory: Send + Sync {
    fn create(
        &self,
        config: &ApiClientConfig,
        job_key: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn DataManagementApi>, TransportError>;
}

#[derive(Debug, Default, Clone)]
pub struct HttpApiClientFactory;

impl ApiClientFactory for HttpApiClientFactory {
    fn create(
        &self,
        config: &ApiClientConfig,
        job_key: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn DataManagementApi>, TransportError> {
        let transport = RetryingTransport::with_timeout(
            config.request_timeout,
            config.retry_policy.clone(),
            job_key,
            cancel,
        )?;
        let client = HttpDataManagementClient::new(transport, &config.aos_uri, config.credentials.clone())?;
        Ok(Arc::new(client))
    }
}

/// reqwest implementation of [`DataManagementApi`]
pub struct HttpDataManagementClient {
    transport: RetryingTransport,
    base_url: Url,
    credentials: Option<ApiCredentials>,
    token: OnceCell<String>,
}

impl HttpDataManagementClient {
    pub fn new(
        transport: RetryingTransport,
        aos_uri: &str,
        credentials: Option<ApiCredentials>,
    ) -> Result<Self, TransportError> {
        let mut base = aos_uri.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", aos_uri, e)))?;

        Ok(Self {
            transport,
            base_url,
            credentials,
            token: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn connector_url(&self, operation: &str, activity_id: &str) -> Result<Url, TransportError> {
        self.url(&format!("{}/{}/{}", CONNECTOR_PATH, operation, activity_id))
    }

    /// Attach the bearer token, acquiring it on first use within this run
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, TransportError> {
        let Some(credentials) = &self.credentials else {
            return Ok(request);
        };
        let token = self
            .token
            .get_or_try_init(|| self.acquire_oauth2_token(credentials))
            .await?;
        Ok(request.bearer_auth(token))
    }

    #[tracing::instrument(skip_all, fields(token_url = %credentials.token_url))]
    async fn acquire_oauth2_token(
        &self,
        credentials: &ApiCredentials,
    ) -> Result<String, TransportError> {
        let resource = self.base_url.as_str().trim_end_matches('/').to_string();
        let scope = credentials
            .scope
            .clone()
            .unwrap_or_else(|| format!("{}/.default", resource));
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let request = self
            .transport
            .client()
            .post(&credentials.token_url)
            .form(&params);
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(TransportError::Authentication(format!(
                "OAuth2 token request failed with status {}: {}",
                response.status_code,
                response.text()
            )));
        }

        let token_response: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| {
                TransportError::Authentication(format!(
                    "Failed to parse OAuth2 token response: {}",
                    e
                ))
            })?;

        token_response
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                TransportError::Authentication(
                    "OAuth2 response missing access_token field".to_string(),
                )
            })
    }

    async fn post_action(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url(&format!("{}{}", PACKAGE_ACTIONS_PATH, action))?;
        let request = self.transport.client().post(url).json(&body);
        let request = self.authorize(request).await?;
        self.transport.send(request).await
    }
}

#[async_trait]
impl DataManagementApi for HttpDataManagementClient {
    fn enqueue_uri(
        &self,
        activity_id: &str,
        entity_name: Option<&str>,
        company: Option<&str>,
    ) -> Result<String, TransportError> {
        let mut url = self.connector_url("enqueue", activity_id)?;
        let pairs: Vec<(&str, &str)> = [("entity", entity_name), ("company", company)]
            .into_iter()
            .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
            .collect();
        // query_pairs_mut leaves a dangling '?' when nothing is appended
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }

    fn dequeue_uri(&self, activity_id: &str) -> Result<String, TransportError> {
        Ok(self.connector_url("dequeue", activity_id)?.to_string())
    }

    fn ack_uri(&self, activity_id: &str) -> Result<String, TransportError> {
        Ok(self.connector_url("ack", activity_id)?.to_string())
    }

    fn job_status_uri(&self, activity_id: &str, job_id: &str) -> Result<String, TransportError> {
        let mut url = self.connector_url("jobstatus", activity_id)?;
        url.query_pairs_mut().append_pair("jobId", job_id);
        Ok(url.to_string())
    }

    async fn post_stream(
        &self,
        uri: &str,
        body: Vec<u8>,
        external_id: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let mut request = self
            .transport
            .client()
            .post(uri)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(external_id) = external_id {
            request = request.header(EXTERNAL_IDENTIFIER_HEADER, external_id);
        }
        let request = self.authorize(request).await?;
        self.transport.send(request).await
    }

    async fn post_string(&self, uri: &str, body: String) -> Result<ApiResponse, TransportError> {
        let request = self
            .transport
            .client()
            .post(uri)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let request = self.authorize(request).await?;
        self.transport.send(request).await
    }

    async fn get(
        &self,
        uri: &str,
        add_authorization: bool,
    ) -> Result<ApiResponse, TransportError> {
        let mut request = self.transport.client().get(uri);
        if add_authorization {
            request = self.authorize(request).await?;
        }
        self.transport.send(request).await
    }

    async fn get_azure_write_url(&self) -> Result<ApiResponse, TransportError> {
        let unique_file_name = uuid::Uuid::new_v4().to_string();
        self.post_action("GetAzureWriteUrl", json!({ "uniqueFileName": unique_file_name }))
            .await
    }

    async fn get_execution_summary_status(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action(
            "GetExecutionSummaryStatus",
            json!({ "executionId": execution_id }),
        )
        .await
    }

    async fn get_exported_package_url(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action("GetExportedPackageUrl", json!({ "executionId": execution_id }))
            .await
    }

    async fn get_execution_summary_page_url(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action(
            "GetExecutionSummaryPageUrl",
            json!({ "executionId": execution_id }),
        )
        .await
    }

    async fn upload_contents_to_blob(
        &self,
        blob_url: &str,
        body: Vec<u8>,
    ) -> Result<ApiResponse, TransportError> {
        // The blob URL carries its own SAS token
        let request = self
            .transport
            .client()
            .put(blob_url)
            .header("x-ms-blob-type", "BlockBlob")
            .body(body);
        self.transport.send(request).await
    }

    async fn import_from_package(
        &self,
        package_url: &str,
        definition_group_id: &str,
        execution_id: &str,
        execute: bool,
        overwrite: bool,
        legal_entity_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action(
            "ImportFromPackage",
            json!({
                "packageUrl": package_url,
                "definitionGroupId": definition_group_id,
                "executionId": execution_id,
                "execute": execute,
                "overwrite": overwrite,
                "legalEntityId": legal_entity_id,
            }),
        )
        .await
    }

    async fn export_to_package(
        &self,
        definition_group_id: &str,
        package_name: &str,
        execution_id: &str,
        legal_entity_id: &str,
        re_execute: bool,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action(
            "ExportToPackage",
            json!({
                "definitionGroupId": definition_group_id,
                "packageName": package_name,
                "executionId": execution_id,
                "reExecute": re_execute,
                "legalEntityId": legal_entity_id,
            }),
        )
        .await
    }

    async fn get_message_status(&self, message_id: &str) -> Result<ApiResponse, TransportError> {
        self.post_action("GetMessageStatus", json!({ "messageId": message_id }))
            .await
    }

    async fn get_execution_errors(
        &self,
        execution_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.post_action("GetExecutionErrors", json!({ "executionId": execution_id }))
            .await
    }
}
