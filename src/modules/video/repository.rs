use super::model::{FailureReason, JobStatus, VideoJob};
use crate::common::retry::Retryable;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat_timeout";

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("job record {0} not found")]
    NotFound(String),

    #[error("job record {key} cannot move from {from} to {to}")]
    InvalidTransition {
        key: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job record {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Retryable for RecordError {
    fn is_retryable(&self) -> bool {
        match self {
            RecordError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }
}

/// Job record store. Every mutation is a single conditional update keyed by
/// the job key; a transition the state machine forbids is refused with
/// [`RecordError::InvalidTransition`] and leaves the record untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find(&self, key: &str) -> Result<Option<VideoJob>, RecordError>;

    async fn mark_processing(&self, key: &str) -> Result<(), RecordError>;

    /// Writes status, elapsed time and the full output map in one update.
    async fn mark_completed(
        &self,
        key: &str,
        transcoding_time_seconds: f64,
        variant_outputs: &BTreeMap<String, String>,
    ) -> Result<(), RecordError>;

    /// Clears completion fields so they never outlive a `completed` status.
    async fn mark_failed(&self, key: &str, reason: &FailureReason) -> Result<(), RecordError>;

    async fn heartbeat(&self, key: &str) -> Result<(), RecordError>;

    /// Fails every `processing` job whose heartbeat is older than
    /// `threshold`, returning their keys.
    async fn fail_stale(&self, threshold: Duration) -> Result<Vec<String>, RecordError>;
}

#[derive(Debug, FromRow)]
struct VideoRow {
    key: String,
    status: String,
    uploaded_at: Option<OffsetDateTime>,
    transcoding_time_seconds: Option<f64>,
    variant_outputs: Option<Json<BTreeMap<String, String>>>,
    failure_reason: Option<String>,
    failure_detail: Option<String>,
    heartbeat_at: Option<OffsetDateTime>,
    updated_at: Option<OffsetDateTime>,
}

impl TryFrom<VideoRow> for VideoJob {
    type Error = RecordError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(|e| RecordError::Corrupt {
            key: row.key.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            key: row.key,
            status,
            uploaded_at: row.uploaded_at,
            transcoding_time_seconds: row.transcoding_time_seconds,
            variant_outputs: row.variant_outputs.map(|Json(map)| map),
            failure_reason: row.failure_reason,
            failure_detail: row.failure_detail,
            heartbeat_at: row.heartbeat_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_list(next: JobStatus) -> Vec<String> {
    JobStatus::predecessors_of(next)
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains a refused conditional update.
    async fn refused(&self, key: &str, to: JobStatus) -> RecordError {
        match self.find(key).await {
            Ok(Some(job)) => RecordError::InvalidTransition {
                key: key.to_string(),
                from: job.status,
                to,
            },
            Ok(None) => RecordError::NotFound(key.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find(&self, key: &str) -> Result<Option<VideoJob>, RecordError> {
        let row = sqlx::query_as::<_, VideoRow>(
            r#"
            SELECT key, status, uploaded_at, transcoding_time_seconds, variant_outputs,
                   failure_reason, failure_detail, heartbeat_at, updated_at
            FROM videos
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VideoJob::try_from).transpose()
    }

    async fn mark_processing(&self, key: &str) -> Result<(), RecordError> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = 'processing', heartbeat_at = NOW(), updated_at = NOW()
            WHERE key = $1 AND status = ANY($2)
            "#,
        )
        .bind(key)
        .bind(status_list(JobStatus::Processing))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(key, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        key: &str,
        transcoding_time_seconds: f64,
        variant_outputs: &BTreeMap<String, String>,
    ) -> Result<(), RecordError> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = 'completed',
                transcoding_time_seconds = $2,
                variant_outputs = $3,
                failure_reason = NULL,
                failure_detail = NULL,
                updated_at = NOW()
            WHERE key = $1 AND status = ANY($4)
            "#,
        )
        .bind(key)
        .bind(transcoding_time_seconds)
        .bind(Json(variant_outputs))
        .bind(status_list(JobStatus::Completed))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(key, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &str, reason: &FailureReason) -> Result<(), RecordError> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = 'failed',
                failure_reason = $2,
                failure_detail = $3,
                transcoding_time_seconds = NULL,
                variant_outputs = NULL,
                updated_at = NOW()
            WHERE key = $1 AND status = ANY($4)
            "#,
        )
        .bind(key)
        .bind(&reason.code)
        .bind(&reason.detail)
        .bind(status_list(JobStatus::Failed))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(key, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn heartbeat(&self, key: &str) -> Result<(), RecordError> {
        sqlx::query("UPDATE videos SET heartbeat_at = NOW() WHERE key = $1 AND status = 'processing'")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_stale(&self, threshold: Duration) -> Result<Vec<String>, RecordError> {
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE videos
            SET status = 'failed',
                failure_reason = $2,
                failure_detail = $3,
                transcoding_time_seconds = NULL,
                variant_outputs = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND COALESCE(heartbeat_at, updated_at) < NOW() - make_interval(secs => $1)
            RETURNING key
            "#,
        )
        .bind(threshold.as_secs_f64())
        .bind(HEARTBEAT_TIMEOUT_REASON)
        .bind(format!("no worker heartbeat for {}s", threshold.as_secs()))
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}
