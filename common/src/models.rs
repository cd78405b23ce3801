// Data models shared by the file state store, the API client and the job runners

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle status of one data message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum MessageStatus {
    #[default]
    Input,
    Enqueued,
    Succeeded,
    Failed,
    InProcess,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Input => "Input",
            MessageStatus::Enqueued => "Enqueued",
            MessageStatus::Succeeded => "Succeeded",
            MessageStatus::Failed => "Failed",
            MessageStatus::InProcess => "InProcess",
        };
        write!(f, "{}", s)
    }
}

impl MessageStatus {
    const ALL: [MessageStatus; 5] = [
        MessageStatus::Input,
        MessageStatus::Enqueued,
        MessageStatus::Succeeded,
        MessageStatus::Failed,
        MessageStatus::InProcess,
    ];
}

// Written as a name; dequeued messages may still carry the numeric form
impl<'de> Deserialize<'de> for MessageStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NameOrIndex {
            Name(String),
            Index(usize),
        }

        match NameOrIndex::deserialize(deserializer)? {
            NameOrIndex::Name(name) => MessageStatus::ALL
                .into_iter()
                .find(|s| s.to_string().eq_ignore_ascii_case(&name))
                .ok_or_else(|| serde::de::Error::custom(format!("unknown message status '{}'", name))),
            NameOrIndex::Index(index) => MessageStatus::ALL
                .get(index)
                .copied()
                .ok_or_else(|| serde::de::Error::custom(format!("unknown message status {}", index))),
        }
    }
}

/// State of a recurring data job on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataJobState {
    NotRun,
    Enqueued,
    Dequeued,
    Acked,
    Processing,
    Processed,
    ProcessedWithErrors,
    PreProcessing,
    PreProcessingError,
    PostProcessing,
    PostProcessingError,
    #[serde(other)]
    Unknown,
}

impl DataJobState {
    /// Terminal states reported by the processing endpoint
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DataJobState::Processed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DataJobState::ProcessedWithErrors
                | DataJobState::PreProcessingError
                | DataJobState::PostProcessingError
        )
    }
}

/// One unit of work: a local file or a dequeued remote message
///
/// `full_path` always points at the current location of the file. Transitions
/// produce a new value through [`DataMessage::relocated`]; the original is
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DataMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_path: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub pop_receipt: Option<String>,
    #[serde(default)]
    pub download_location: Option<String>,
    #[serde(default)]
    pub message_status: MessageStatus,
    #[serde(default, deserialize_with = "lenient_job_state")]
    pub data_job_state: Option<DataJobState>,
}

/// Unparseable states (numeric or malformed) read as absent
fn lenient_job_state<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DataJobState>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl DataMessage {
    pub fn from_path(path: &Path, status: MessageStatus) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            full_path: path.to_string_lossy().into_owned(),
            message_status: status,
            ..Default::default()
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.full_path)
    }

    /// Derived copy pointing at a new location with a new status
    pub fn relocated(&self, full_path: &Path, status: MessageStatus) -> Self {
        Self {
            full_path: full_path.to_string_lossy().into_owned(),
            message_status: status,
            ..self.clone()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Ordering applied to enumerated files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Created,
    Modified,
    Size,
    FileName,
}

/// Remote job status details returned by the processing status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DataJobStatusDetail {
    #[serde(default)]
    pub data_job_status: Option<DataJobStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_detail: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_log: Option<serde_json::Value>,
}

impl DataJobStatusDetail {
    pub fn state(&self) -> Option<DataJobState> {
        self.data_job_status.as_ref().map(|s| s.data_job_state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataJobStatus {
    pub data_job_state: DataJobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// Serializable snapshot of an HTTP response written into status sidecars
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseLog {
    pub status_code: u16,
    pub reason_phrase: Option<String>,
    pub is_success_status_code: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Payload of a status sidecar file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusLog {
    Message(DataMessage),
    Response(ResponseLog),
    JobStatus(DataJobStatusDetail),
    Text(String),
}
