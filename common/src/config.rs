// Configuration management with layered configuration (file, env)
// One typed settings struct per job type, parsed and validated in a single pass.

use crate::client::{ApiClientConfig, ApiCredentials};
use crate::errors::ValidationError;
use crate::models::OrderBy;
use crate::retry::{FixedDelay, RetryPolicy};
use crate::secrets::{SecretProvider, SecretRef};
use crate::sftp::SftpConfiguration;
use crate::trigger::SERVICE_SCHEDULER_NAME;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// "Private" logs job failures instead of surfacing them
    #[serde(default = "default_scheduler_name")]
    pub name: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_scheduler_name(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter is started only when set
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

/// One scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub key: String,
    /// Six-field cron expression (seconds first)
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: JobCommonSettings,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Upload(UploadJobSettings),
    Import(ImportJobSettings),
    Export(ExportJobSettings),
    Download(DownloadJobSettings),
    ProcessingMonitor(ProcessingMonitorSettings),
    ExecutionMonitor(ExecutionMonitorSettings),
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Upload(_) => "upload",
            JobKind::Import(_) => "import",
            JobKind::Export(_) => "export",
            JobKind::Download(_) => "download",
            JobKind::ProcessingMonitor(_) => "processing_monitor",
            JobKind::ExecutionMonitor(_) => "execution_monitor",
        }
    }

    /// Every SFTP endpoint the job is configured to use
    pub fn sftp_endpoints(&self) -> Vec<&SftpSettings> {
        let (enabled, settings) = match self {
            JobKind::Upload(s) => (s.use_sftp_inbound, s.sftp_inbound.as_ref()),
            JobKind::Import(s) => (s.use_sftp_inbound, s.sftp_inbound.as_ref()),
            JobKind::Export(s) => (s.use_sftp_outbound, s.sftp_outbound.as_ref()),
            JobKind::Download(s) => (s.use_sftp_outbound, s.sftp_outbound.as_ref()),
            JobKind::ProcessingMonitor(_) | JobKind::ExecutionMonitor(_) => (false, None),
        };
        settings.filter(|_| enabled).into_iter().collect()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobKind::Upload(s) => s.validate(),
            JobKind::Import(s) => s.validate(),
            JobKind::Export(s) => s.validate(),
            JobKind::Download(s) => s.validate(),
            JobKind::ProcessingMonitor(s) => s.validate(),
            JobKind::ExecutionMonitor(s) => s.validate(),
        }
    }
}

/// Settings shared by every job type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobCommonSettings {
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub delay_between_files_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub pause_job_on_exception: bool,
    #[serde(default)]
    pub indefinite_pause: bool,
    #[serde(default)]
    pub log_verbose: bool,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl Default for JobCommonSettings {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_delay_secs: default_retry_delay(),
            delay_between_files_secs: 0,
            request_timeout_secs: default_request_timeout(),
            pause_job_on_exception: false,
            indefinite_pause: false,
            log_verbose: false,
            connection: ConnectionSettings::default(),
        }
    }
}

impl JobCommonSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_delay_secs)
    }

    /// Fixed-delay policy for local file operations
    pub fn io_retry(&self) -> FixedDelay {
        FixedDelay::new(Duration::from_secs(self.retry_delay_secs), self.retry_count)
    }

    pub fn delay_between_files(&self) -> Duration {
        Duration::from_secs(self.delay_between_files_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("settings.connection.aos_uri", &self.connection.aos_uri)?;
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "settings.request_timeout_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(auth) = &self.connection.auth {
            require("settings.connection.auth.token_url", &auth.token_url)?;
            require("settings.connection.auth.client_id", &auth.client_id)?;
        }
        Ok(())
    }

    /// Resolve credentials and build the per-run client configuration
    pub fn api_client_config(
        &self,
        secrets: &dyn SecretProvider,
    ) -> Result<ApiClientConfig, ValidationError> {
        let credentials = match &self.connection.auth {
            Some(auth) => Some(ApiCredentials {
                token_url: auth.token_url.clone(),
                client_id: auth.client_id.clone(),
                client_secret: secrets.resolve(&auth.client_secret)?,
                scope: auth.scope.clone(),
            }),
            None => None,
        };
        Ok(ApiClientConfig {
            aos_uri: self.connection.aos_uri.clone(),
            credentials,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry_policy: self.retry_policy(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    #[serde(default)]
    pub aos_uri: String,
    #[serde(default)]
    pub auth: Option<OAuth2Settings>,
}

/// OAuth2 client-credentials grant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuth2Settings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretRef,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SftpSettings {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretRef>,
    #[serde(default)]
    pub use_private_key: bool,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub private_key_passphrase: Option<SecretRef>,
    #[serde(default)]
    pub remote_folder: String,
    #[serde(default)]
    pub file_mask: String,
}

impl SftpSettings {
    /// Resolve secrets into a usable endpoint; incomplete endpoints are rejected
    pub fn resolve(
        &self,
        field: &str,
        secrets: &dyn SecretProvider,
    ) -> Result<SftpConfiguration, ValidationError> {
        let password = match (&self.password, self.use_private_key) {
            (Some(secret), false) => Some(secrets.resolve(secret)?),
            _ => None,
        };
        let passphrase = match (&self.private_key_passphrase, self.use_private_key) {
            (Some(secret), true) => Some(secrets.resolve(secret)?),
            _ => None,
        };
        let config = SftpConfiguration::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            password,
            self.use_private_key,
            self.private_key_path.clone(),
            passphrase,
            &self.remote_folder,
            &self.file_mask,
        );
        if !config.is_configured() {
            return Err(ValidationError::InvalidFieldValue {
                field: field.to_string(),
                reason: "SFTP configuration is incomplete".to_string(),
            });
        }
        Ok(config)
    }

    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        require(&format!("{}.host", field), &self.host)?;
        require(&format!("{}.username", field), &self.username)?;
        let has_credential = if self.use_private_key {
            self.private_key_path.is_some()
        } else {
            self.password.is_some()
        };
        if !has_credential {
            return Err(ValidationError::InvalidFieldValue {
                field: field.to_string(),
                reason: "SFTP configuration is incomplete".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadJobSettings {
    pub input_dir: PathBuf,
    pub upload_success_dir: PathBuf,
    pub upload_errors_dir: PathBuf,
    pub activity_id: String,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default = "default_search_pattern")]
    pub search_pattern: String,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub reverse_order: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_status_extension")]
    pub status_file_extension: String,
    /// A Processing Monitor consumes this job's status files
    #[serde(default)]
    pub processing_job_present: bool,
    #[serde(default)]
    pub use_sftp_inbound: bool,
    #[serde(default)]
    pub sftp_inbound: Option<SftpSettings>,
}

impl UploadJobSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_path("input_dir", &self.input_dir)?;
        require_path("upload_success_dir", &self.upload_success_dir)?;
        require_path("upload_errors_dir", &self.upload_errors_dir)?;
        require("activity_id", &self.activity_id)?;
        validate_sftp(self.use_sftp_inbound, self.sftp_inbound.as_ref(), "sftp_inbound")
    }

    pub fn directories(&self) -> [(&'static str, &Path); 3] {
        [
            ("input_dir", self.input_dir.as_path()),
            ("upload_success_dir", self.upload_success_dir.as_path()),
            ("upload_errors_dir", self.upload_errors_dir.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportJobSettings {
    pub input_dir: PathBuf,
    pub upload_success_dir: PathBuf,
    pub upload_errors_dir: PathBuf,
    pub data_project: String,
    /// Legal entity used when it is not derived from the subfolder or file name
    #[serde(default)]
    pub company: String,
    #[serde(default = "default_search_pattern")]
    pub search_pattern: String,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub reverse_order: bool,
    #[serde(default = "default_status_extension")]
    pub status_file_extension: String,
    #[serde(default = "default_true")]
    pub execute_import: bool,
    #[serde(default = "default_true")]
    pub overwrite_data_project: bool,
    /// Input files sit in one subfolder per legal entity
    #[serde(default)]
    pub legal_entity_from_subfolder: bool,
    #[serde(default)]
    pub legal_entity_from_filename: bool,
    #[serde(default = "default_filename_separator")]
    pub filename_separator: String,
    /// 1-based token of the file name holding the legal entity
    #[serde(default = "default_token_position")]
    pub legal_entity_token_position: usize,
    #[serde(default)]
    pub use_sftp_inbound: bool,
    #[serde(default)]
    pub sftp_inbound: Option<SftpSettings>,
}

impl ImportJobSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_path("input_dir", &self.input_dir)?;
        require_path("upload_success_dir", &self.upload_success_dir)?;
        require_path("upload_errors_dir", &self.upload_errors_dir)?;
        require("data_project", &self.data_project)?;
        if !self.legal_entity_from_subfolder && !self.legal_entity_from_filename {
            require("company", &self.company)?;
        }
        if self.legal_entity_from_filename {
            require("filename_separator", &self.filename_separator)?;
            if self.legal_entity_token_position == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: "legal_entity_token_position".to_string(),
                    reason: "positions start at 1".to_string(),
                });
            }
        }
        validate_sftp(self.use_sftp_inbound, self.sftp_inbound.as_ref(), "sftp_inbound")
    }

    pub fn directories(&self) -> [(&'static str, &Path); 3] {
        [
            ("input_dir", self.input_dir.as_path()),
            ("upload_success_dir", self.upload_success_dir.as_path()),
            ("upload_errors_dir", self.upload_errors_dir.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportJobSettings {
    pub download_success_dir: PathBuf,
    pub download_errors_dir: PathBuf,
    pub data_project: String,
    pub company: String,
    #[serde(default)]
    pub delay_between_status_check_secs: u64,
    #[serde(default = "default_max_status_checks")]
    pub max_status_checks: u32,
    #[serde(default)]
    pub unzip_package: bool,
    #[serde(default)]
    pub add_timestamp: bool,
    #[serde(default)]
    pub delete_package: bool,
    #[serde(default)]
    pub use_sftp_outbound: bool,
    #[serde(default)]
    pub sftp_outbound: Option<SftpSettings>,
}

impl ExportJobSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_path("download_success_dir", &self.download_success_dir)?;
        require_path("download_errors_dir", &self.download_errors_dir)?;
        require("data_project", &self.data_project)?;
        require("company", &self.company)?;
        if self.max_status_checks == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "max_status_checks".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        validate_sftp(self.use_sftp_outbound, self.sftp_outbound.as_ref(), "sftp_outbound")
    }

    pub fn directories(&self) -> [(&'static str, &Path); 2] {
        [
            ("download_success_dir", self.download_success_dir.as_path()),
            ("download_errors_dir", self.download_errors_dir.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadJobSettings {
    pub activity_id: String,
    pub download_success_dir: PathBuf,
    pub download_errors_dir: PathBuf,
    #[serde(default)]
    pub unzip_package: bool,
    #[serde(default)]
    pub add_timestamp: bool,
    #[serde(default)]
    pub delete_package: bool,
    #[serde(default = "default_status_extension")]
    pub status_file_extension: String,
    #[serde(default)]
    pub use_sftp_outbound: bool,
    #[serde(default)]
    pub sftp_outbound: Option<SftpSettings>,
}

impl DownloadJobSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("activity_id", &self.activity_id)?;
        require_path("download_success_dir", &self.download_success_dir)?;
        require_path("download_errors_dir", &self.download_errors_dir)?;
        validate_sftp(self.use_sftp_outbound, self.sftp_outbound.as_ref(), "sftp_outbound")
    }

    pub fn directories(&self) -> [(&'static str, &Path); 2] {
        [
            ("download_success_dir", self.download_success_dir.as_path()),
            ("download_errors_dir", self.download_errors_dir.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingMonitorSettings {
    pub activity_id: String,
    pub upload_success_dir: PathBuf,
    pub processing_success_dir: PathBuf,
    pub processing_errors_dir: PathBuf,
    #[serde(default = "default_status_extension")]
    pub status_file_extension: String,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub reverse_order: bool,
}

impl ProcessingMonitorSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("activity_id", &self.activity_id)?;
        require_path("upload_success_dir", &self.upload_success_dir)?;
        require_path("processing_success_dir", &self.processing_success_dir)?;
        require_path("processing_errors_dir", &self.processing_errors_dir)
    }

    pub fn directories(&self) -> [(&'static str, &Path); 3] {
        [
            ("upload_success_dir", self.upload_success_dir.as_path()),
            ("processing_success_dir", self.processing_success_dir.as_path()),
            ("processing_errors_dir", self.processing_errors_dir.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionMonitorSettings {
    pub upload_success_dir: PathBuf,
    pub processing_success_dir: PathBuf,
    pub processing_errors_dir: PathBuf,
    #[serde(default = "default_status_extension")]
    pub status_file_extension: String,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub reverse_order: bool,
    /// Append the execution errors to the failure status file
    #[serde(default)]
    pub get_execution_errors: bool,
}

impl ExecutionMonitorSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_path("upload_success_dir", &self.upload_success_dir)?;
        require_path("processing_success_dir", &self.processing_success_dir)?;
        require_path("processing_errors_dir", &self.processing_errors_dir)
    }

    pub fn directories(&self) -> [(&'static str, &Path); 3] {
        [
            ("upload_success_dir", self.upload_success_dir.as_path()),
            ("processing_success_dir", self.processing_success_dir.as_path()),
            ("processing_errors_dir", self.processing_errors_dir.as_path()),
        ]
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → local → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("INTEGRATION")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Static validation of every job: required fields, cron syntax, unique keys.
    /// Directory access and secret resolution happen when a job run starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("scheduler.name", &self.scheduler.name)?;
        require("observability.log_level", &self.observability.log_level)?;

        let mut keys = HashSet::new();
        for job in &self.jobs {
            require("jobs.key", &job.key)?;
            if !keys.insert(job.key.as_str()) {
                return Err(ValidationError::DuplicateJobKey(job.key.clone()));
            }
            validate_cron(&job.cron)?;
            job.settings.validate()?;
            job.kind.validate()?;
        }
        Ok(())
    }

    pub fn job(&self, key: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.key == key)
    }
}

pub fn validate_cron(expression: &str) -> Result<cron::Schedule, ValidationError> {
    cron::Schedule::from_str(expression).map_err(|e| ValidationError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Create `path` if needed and confirm it is a readable directory
pub fn ensure_directory(field: &str, path: &Path) -> Result<(), ValidationError> {
    let inaccessible = |source: std::io::Error| ValidationError::DirectoryInaccessible {
        field: field.to_string(),
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(path).map_err(inaccessible)?;
    std::fs::read_dir(path).map_err(inaccessible)?;
    Ok(())
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    Ok(())
}

fn require_path(field: &str, value: &Path) -> Result<(), ValidationError> {
    if value.as_os_str().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    Ok(())
}

fn validate_sftp(
    enabled: bool,
    settings: Option<&SftpSettings>,
    field: &str,
) -> Result<(), ValidationError> {
    if !enabled {
        return Ok(());
    }
    match settings {
        Some(settings) => settings.validate(field),
        None => Err(ValidationError::MissingField(field.to_string())),
    }
}

fn default_scheduler_name() -> String {
    SERVICE_SCHEDULER_NAME.to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_search_pattern() -> String {
    "*.*".to_string()
}

fn default_status_extension() -> String {
    ".Status".to_string()
}

fn default_filename_separator() -> String {
    "-".to_string()
}

fn default_token_position() -> usize {
    1
}

fn default_max_status_checks() -> u32 {
    crate::poller::DEFAULT_MAX_POLL_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [scheduler]
        name = "Private"

        [[jobs]]
        key = "upload-customers"
        cron = "0 */5 * * * *"

        [jobs.settings]
        retry_count = 5
        [jobs.settings.connection]
        aos_uri = "https://contoso.example.com"

        [jobs.kind.upload]
        input_dir = "/data/in"
        upload_success_dir = "/data/ok"
        upload_errors_dir = "/data/err"
        activity_id = "6D31E09F-0249-459F-94F0-AAD9C2C2B441"
        processing_job_present = true
    "#;

    fn parse(toml: &str) -> Result<Settings, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_sample_settings_parse_and_validate() {
        let settings = parse(SAMPLE).unwrap();
        assert_eq!(settings.scheduler.name, "Private");
        assert_eq!(settings.jobs.len(), 1);

        let job = &settings.jobs[0];
        assert!(job.enabled);
        assert_eq!(job.settings.retry_count, 5);
        assert_eq!(job.settings.retry_delay_secs, 10);
        assert_eq!(job.settings.request_timeout_secs, 300);
        match &job.kind {
            JobKind::Upload(upload) => {
                assert!(upload.processing_job_present);
                assert_eq!(upload.search_pattern, "*.*");
                assert_eq!(upload.status_file_extension, ".Status");
            }
            other => panic!("unexpected job kind {}", other.name()),
        }
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let toml = SAMPLE.replace("processing_job_present = true", "procesing_job_present = true");
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_duplicate_job_keys_rejected() {
        let mut settings = parse(SAMPLE).unwrap();
        let duplicate = settings.jobs[0].clone();
        settings.jobs.push(duplicate);
        assert!(matches!(
            settings.validate(),
            Err(ValidationError::DuplicateJobKey(_))
        ));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut settings = parse(SAMPLE).unwrap();
        settings.jobs[0].cron = "every five minutes".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ValidationError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_enabled_sftp_requires_settings() {
        let mut settings = parse(SAMPLE).unwrap();
        if let JobKind::Upload(upload) = &mut settings.jobs[0].kind {
            upload.use_sftp_inbound = true;
        }
        assert!(matches!(
            settings.validate(),
            Err(ValidationError::MissingField(field)) if field == "sftp_inbound"
        ));
    }

    #[test]
    fn test_missing_aos_uri_rejected() {
        let mut settings = parse(SAMPLE).unwrap();
        settings.jobs[0].settings.connection.aos_uri = String::new();
        assert!(matches!(
            settings.validate(),
            Err(ValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_ensure_directory_creates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b");
        ensure_directory("input_dir", &path).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_ensure_directory_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            ensure_directory("input_dir", &path),
            Err(ValidationError::DirectoryInaccessible { .. })
        ));
    }
}
