//! The transcoding pipeline: one job from `processing` to a terminal status.

use super::encoder::{EncodeError, Encoder};
use super::fanout::{FanOutReport, fan_out};
use super::heartbeat::HeartbeatGuard;
use crate::common::naming::{derive_output_name, local_file_name};
use crate::common::retry::{RetryConfig, Retryable, backoff_delay, with_retry};
use crate::config::formats::{FormatTable, TargetFormat};
use crate::infrastructure::storage::{ObjectStore, StorageError};
use crate::modules::video::model::{FailureReason, JobStatus};
use crate::modules::video::repository::{JobStore, RecordError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What to do with the variants that did encode when others did not.
/// The job ends `failed` either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialFailurePolicy {
    /// Publish the successful variants, then fail the job.
    #[default]
    PublishSuccesses,
    /// Fail the job without publishing anything.
    Discard,
}

impl FromStr for PartialFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "publish" => Ok(Self::PublishSuccesses),
            "discard" => Ok(Self::Discard),
            other => Err(format!("expected \"publish\" or \"discard\", got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source_bucket: String,
    pub output_bucket: String,
    pub work_dir: PathBuf,
    pub formats: FormatTable,
    pub max_parallel_encodes: Option<usize>,
    pub partial_failure_policy: PartialFailurePolicy,
    pub retry: RetryConfig,
    pub heartbeat_interval: Duration,
}

/// Terminal error of a pipeline run. Every variant maps to the reason code
/// written to the failed job record.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("could not fetch source {key}: {source}")]
    Fetch { key: String, source: StorageError },

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(EncodeError),

    #[error("variants failed to encode: {}", .failed.join(", "))]
    Encode {
        failed: Vec<String>,
        published: Vec<String>,
        unpublished: Vec<String>,
        detail: String,
    },

    #[error("variants failed to publish: {}", .failed.join(", "))]
    Publish { failed: Vec<String>, detail: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("record store: {0}")]
    Record(#[from] RecordError),

    #[error("workspace: {0}")]
    Workspace(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            TranscodeError::Fetch { .. } => "fetch_failed",
            TranscodeError::EncoderUnavailable(_) => "encoder_unavailable",
            TranscodeError::Encode { .. } => "encode_failed",
            TranscodeError::Publish { .. } => "publish_failed",
            TranscodeError::Cancelled => "cancelled",
            TranscodeError::Record(_) => "record_store_error",
            TranscodeError::Workspace(_) => "workspace_error",
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        let detail = match self {
            TranscodeError::Encode {
                failed,
                published,
                unpublished,
                detail,
            } => format!(
                "encode failed: {}; published: {}; publish failed: {}; {}",
                list(failed),
                list(published),
                list(unpublished),
                detail
            ),
            TranscodeError::Publish { failed, detail } => {
                format!("publish failed: {}; {}", list(failed), detail)
            }
            other => other.to_string(),
        };
        FailureReason::new(self.reason_code(), detail)
    }

    /// The record is already terminal or gone; writing `failed` would be refused.
    fn record_is_settled(&self) -> bool {
        matches!(
            self,
            TranscodeError::Record(RecordError::InvalidTransition { .. } | RecordError::NotFound(_))
        )
    }
}

fn list(labels: &[String]) -> String {
    if labels.is_empty() {
        "none".to_string()
    } else {
        labels.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub key: String,
    pub source_bytes: u64,
    pub transcoding_time: Duration,
    /// label -> published object name
    pub variant_outputs: BTreeMap<String, String>,
}

pub struct TranscodePipeline {
    storage: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    encoder: Arc<dyn Encoder>,
    settings: PipelineSettings,
}

impl TranscodePipeline {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        jobs: Arc<dyn JobStore>,
        encoder: Arc<dyn Encoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            storage,
            jobs,
            encoder,
            settings,
        }
    }

    /// Runs one job. Once claimed, the record ends `completed` or `failed`
    /// unless the record store itself is unreachable.
    ///
    /// A record that cannot be claimed is left as it is; only a job this
    /// worker moved to `processing` is ever marked `failed`.
    pub async fn run(&self, key: &str, cancel: CancellationToken) -> Result<JobOutcome, TranscodeError> {
        if let Err(e) = with_retry(&self.settings.retry, "mark_processing", || self.jobs.mark_processing(key)).await {
            error!(key = %key, "❌ Could not claim job: {}", e);
            return Err(e.into());
        }
        info!(key = %key, "▶️ Job processing");

        match self.execute(key, &cancel).await {
            Ok(outcome) => {
                info!(
                    key = %key,
                    "✅ Job completed: {} variants in {:.3}s",
                    outcome.variant_outputs.len(),
                    outcome.transcoding_time.as_secs_f64()
                );
                Ok(outcome)
            }
            Err(err) if err.record_is_settled() => {
                error!(key = %key, "❌ Job record refused the update: {}", err);
                Err(err)
            }
            Err(err) => {
                error!(key = %key, reason = err.reason_code(), "❌ Job failed: {}", err);
                let reason = err.failure_reason();
                if let Err(e) = with_retry(&self.settings.retry, "mark_failed", || {
                    self.jobs.mark_failed(key, &reason)
                })
                .await
                {
                    error!(key = %key, "Could not record job failure: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, key: &str, cancel: &CancellationToken) -> Result<JobOutcome, TranscodeError> {
        let settings = &self.settings;

        let _heartbeat = HeartbeatGuard::start(self.jobs.clone(), key.to_string(), settings.heartbeat_interval);

        tokio::fs::create_dir_all(&settings.work_dir).await?;
        let workspace = tempfile::Builder::new()
            .prefix("transcode-")
            .tempdir_in(&settings.work_dir)?;
        let source = workspace.path().join(local_file_name(key));
        let output_dir = workspace.path().join("out");
        tokio::fs::create_dir_all(&output_dir).await?;

        info!(key = %key, "⬇️ Fetching source from {}", settings.source_bucket);
        let fetch = with_retry(&settings.retry, "fetch_source", || {
            self.storage.fetch(&settings.source_bucket, key, &source)
        });
        let source_bytes = tokio::select! {
            fetched = fetch => fetched.map_err(|source| TranscodeError::Fetch {
                key: key.to_string(),
                source,
            })?,
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
        };
        info!(key = %key, "⬇️ Fetched {} bytes", source_bytes);

        let started = Instant::now();
        let mut report = self.encode_variants(&source, &output_dir, cancel).await;
        let transcoding_time = started.elapsed();

        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        if let Some(pos) = report
            .failures
            .iter()
            .position(|e| matches!(e, EncodeError::Spawn { .. }))
        {
            return Err(TranscodeError::EncoderUnavailable(report.failures.swap_remove(pos)));
        }

        if !report.is_success() {
            let failed = report.failed_labels();
            let detail = report
                .failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | ");

            let (published, unpublished) = match settings.partial_failure_policy {
                PartialFailurePolicy::PublishSuccesses => {
                    let (published, publish_failures) = self.publish_all(key, &report.outputs, cancel).await?;
                    (published, publish_failures.into_iter().map(|(label, _)| label).collect())
                }
                PartialFailurePolicy::Discard => {
                    info!(key = %key, "Discarding {} successful variants", report.outputs.len());
                    (Vec::new(), Vec::new())
                }
            };

            return Err(TranscodeError::Encode {
                failed,
                published,
                unpublished,
                detail,
            });
        }

        let (published, publish_failures) = self.publish_all(key, &report.outputs, cancel).await?;
        if !publish_failures.is_empty() {
            let detail = publish_failures
                .iter()
                .map(|(_, e)| e.to_string())
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(TranscodeError::Publish {
                failed: publish_failures.into_iter().map(|(label, _)| label).collect(),
                detail,
            });
        }

        let variant_outputs: BTreeMap<String, String> = published
            .into_iter()
            .map(|label| {
                let name = derive_output_name(key, &label);
                (label, name)
            })
            .collect();

        let recorded = with_retry(&settings.retry, "mark_completed", || {
            self.jobs
                .mark_completed(key, transcoding_time.as_secs_f64(), &variant_outputs)
        })
        .await;
        match recorded {
            Ok(()) => {}
            // An earlier attempt committed but its reply was lost.
            Err(RecordError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Completed,
                ..
            }) => {
                warn!(key = %key, "Completion was already recorded");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(JobOutcome {
            key: key.to_string(),
            source_bytes,
            transcoding_time,
            variant_outputs,
        })
    }

    /// Encodes every format. Variants whose encoder could not be started for
    /// a transient reason are relaunched, up to the retry budget.
    async fn encode_variants(&self, source: &Path, output_dir: &Path, cancel: &CancellationToken) -> FanOutReport {
        let settings = &self.settings;
        let mut report = fan_out(
            self.encoder.clone(),
            source,
            output_dir,
            &settings.formats,
            settings.max_parallel_encodes,
            cancel,
        )
        .await;

        for attempt in 1..settings.retry.max_attempts.max(1) {
            let relaunch: Vec<TargetFormat> = settings
                .formats
                .iter()
                .filter(|f| {
                    report
                        .failures
                        .iter()
                        .any(|e| e.label() == f.label && e.is_retryable())
                })
                .cloned()
                .collect();
            // Empty when nothing is worth relaunching.
            let Ok(formats) = FormatTable::new(relaunch) else {
                break;
            };

            warn!(
                attempt,
                "Relaunching encoders that failed to start: {}",
                formats.labels().join(", ")
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff_delay(&settings.retry, attempt)) => {}
                _ = cancel.cancelled() => break,
            }

            report.failures.retain(|e| !e.is_retryable());
            let retried = fan_out(
                self.encoder.clone(),
                source,
                output_dir,
                &formats,
                settings.max_parallel_encodes,
                cancel,
            )
            .await;
            report.absorb(retried);
        }

        report
    }

    /// Publishes each variant in turn. A failed publish does not stop the
    /// others; the caller gets the published labels and the failures apart.
    async fn publish_all(
        &self,
        key: &str,
        outputs: &BTreeMap<String, PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<(String, StorageError)>), TranscodeError> {
        let mut published = Vec::new();
        let mut failures = Vec::new();

        for (label, path) in outputs {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }

            let object_key = derive_output_name(key, label);
            match self.publish_one(&object_key, path).await {
                Ok(()) => {
                    info!(variant = %label, "⬆️ Published {}/{}", self.settings.output_bucket, object_key);
                    published.push(label.clone());
                }
                Err(e) => {
                    warn!(variant = %label, "Publish of {} failed: {}", object_key, e);
                    failures.push((label.clone(), e));
                }
            }
        }

        Ok((published, failures))
    }

    async fn publish_one(&self, object_key: &str, path: &Path) -> Result<(), StorageError> {
        with_retry(&self.settings.retry, "publish_variant", || {
            self.storage.publish(&self.settings.output_bucket, object_key, path)
        })
        .await
    }
}

impl fmt::Debug for TranscodePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodePipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("publish".parse::<PartialFailurePolicy>(), Ok(PartialFailurePolicy::PublishSuccesses));
        assert_eq!("DISCARD".parse::<PartialFailurePolicy>(), Ok(PartialFailurePolicy::Discard));
        assert!("keep".parse::<PartialFailurePolicy>().is_err());
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(TranscodeError::Cancelled.reason_code(), "cancelled");
        assert_eq!(
            TranscodeError::Publish {
                failed: vec!["144p".to_string()],
                detail: String::new(),
            }
            .reason_code(),
            "publish_failed"
        );
        assert_eq!(
            TranscodeError::Fetch {
                key: "clip.mp4".to_string(),
                source: StorageError::NotFound {
                    bucket: "uploads".to_string(),
                    key: "clip.mp4".to_string(),
                },
            }
            .reason_code(),
            "fetch_failed"
        );
    }

    #[test]
    fn encode_failure_detail_separates_encode_and_publish() {
        let err = TranscodeError::Encode {
            failed: vec!["360p".to_string()],
            published: vec!["1080p".to_string(), "144p".to_string()],
            unpublished: Vec::new(),
            detail: "encode 360p failed".to_string(),
        };
        let reason = err.failure_reason();
        assert_eq!(reason.code, "encode_failed");
        assert!(reason.detail.starts_with("encode failed: 360p; published: 1080p, 144p; publish failed: none"));
    }
}
