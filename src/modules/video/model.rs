use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Lifecycle of a job record. The lowercase strings are a stable wire
/// contract read by API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only state machine. `processing -> processing` is allowed so a
    /// relaunched worker can pick a job back up.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Uploaded, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Statuses a record may be in for a transition to `next` to be accepted.
    pub fn predecessors_of(next: JobStatus) -> Vec<JobStatus> {
        [
            JobStatus::Uploaded,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Machine-readable reason stored with a `failed` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub code: String,
    pub detail: String,
}

impl FailureReason {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

/// One record per uploaded video, keyed by the source object's name.
///
/// `transcoding_time_seconds` and `variant_outputs` are only meaningful
/// while `status` is `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct VideoJob {
    pub key: String,
    pub status: JobStatus,
    #[schema(value_type = Option<String>, format = DateTime)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub uploaded_at: Option<OffsetDateTime>,
    pub transcoding_time_seconds: Option<f64>,
    pub variant_outputs: Option<BTreeMap<String, String>>,
    pub failure_reason: Option<String>,
    pub failure_detail: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub heartbeat_at: Option<OffsetDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl VideoJob {
    /// A freshly announced upload, as written by the upload notification.
    pub fn uploaded(key: impl Into<String>, uploaded_at: OffsetDateTime) -> Self {
        Self {
            key: key.into(),
            status: JobStatus::Uploaded,
            uploaded_at: Some(uploaded_at),
            transcoding_time_seconds: None,
            variant_outputs: None,
            failure_reason: None,
            failure_detail: None,
            heartbeat_at: None,
            updated_at: Some(uploaded_at),
        }
    }
}
