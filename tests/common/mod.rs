#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use video_transcoder::common::retry::RetryConfig;
use video_transcoder::config::formats::FormatTable;
use video_transcoder::infrastructure::storage::{ObjectStore, StorageError};
use video_transcoder::modules::video::model::{FailureReason, JobStatus, VideoJob};
use video_transcoder::modules::video::repository::{HEARTBEAT_TIMEOUT_REASON, JobStore, RecordError};
use video_transcoder::workers::encoder::{EncodeError, EncodeRequest, Encoder};
use video_transcoder::workers::transcoder::{PartialFailurePolicy, PipelineSettings};

pub const SOURCE_BUCKET: &str = "uploads-tmp";
pub const OUTPUT_BUCKET: &str = "videos-out";

pub fn settings(work_dir: &Path, policy: PartialFailurePolicy) -> PipelineSettings {
    PipelineSettings {
        source_bucket: SOURCE_BUCKET.to_string(),
        output_bucket: OUTPUT_BUCKET.to_string(),
        work_dir: work_dir.to_path_buf(),
        formats: FormatTable::default(),
        max_parallel_encodes: None,
        partial_failure_policy: policy,
        retry: RetryConfig::immediate(2),
        heartbeat_interval: Duration::from_secs(3600),
    }
}

/// Job records in memory, enforcing the same transitions as the database.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, VideoJob>>,
    history: Mutex<Vec<(String, JobStatus)>>,
    heartbeats: AtomicUsize,
    /// Transient failures returned by `mark_completed` before it succeeds.
    completed_outages: AtomicU32,
    /// `mark_completed` calls that commit but report a dropped connection.
    lost_completion_replies: AtomicU32,
    /// `mark_processing` always reports a dropped connection.
    unclaimable: bool,
}

impl MemoryJobStore {
    pub fn with_job(key: &str, status: JobStatus) -> Self {
        let store = Self::default();
        store.insert(key, status);
        store
    }

    pub fn insert(&self, key: &str, status: JobStatus) {
        let mut job = VideoJob::uploaded(key, OffsetDateTime::now_utc());
        job.status = status;
        if status == JobStatus::Processing {
            job.heartbeat_at = job.updated_at;
        }
        self.records.lock().unwrap().insert(key.to_string(), job);
    }

    pub fn fail_completion_times(&self, n: u32) {
        self.completed_outages.store(n, Ordering::SeqCst);
    }

    pub fn lose_completion_replies(&self, n: u32) {
        self.lost_completion_replies.store(n, Ordering::SeqCst);
    }

    pub fn unclaimable(mut self) -> Self {
        self.unclaimable = true;
        self
    }

    pub fn get(&self, key: &str) -> VideoJob {
        self.records.lock().unwrap()[key].clone()
    }

    pub fn statuses(&self, key: &str) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    fn transition(&self, key: &str, next: JobStatus, apply: impl FnOnce(&mut VideoJob)) -> Result<(), RecordError> {
        let mut records = self.records.lock().unwrap();
        let job = records
            .get_mut(key)
            .ok_or_else(|| RecordError::NotFound(key.to_string()))?;

        if !job.status.can_transition_to(next) {
            return Err(RecordError::InvalidTransition {
                key: key.to_string(),
                from: job.status,
                to: next,
            });
        }

        let now = OffsetDateTime::now_utc();
        job.status = next;
        job.updated_at = Some(now);
        apply(job);
        self.history.lock().unwrap().push((key.to_string(), next));
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find(&self, key: &str) -> Result<Option<VideoJob>, RecordError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn mark_processing(&self, key: &str) -> Result<(), RecordError> {
        if self.unclaimable {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }
        self.transition(key, JobStatus::Processing, |job| {
            job.heartbeat_at = job.updated_at;
        })
    }

    async fn mark_completed(
        &self,
        key: &str,
        transcoding_time_seconds: f64,
        variant_outputs: &BTreeMap<String, String>,
    ) -> Result<(), RecordError> {
        let outage = self
            .completed_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if outage.is_ok() {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }

        self.transition(key, JobStatus::Completed, |job| {
            job.transcoding_time_seconds = Some(transcoding_time_seconds);
            job.variant_outputs = Some(variant_outputs.clone());
            job.failure_reason = None;
            job.failure_detail = None;
        })?;

        let lost = self
            .lost_completion_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if lost.is_ok() {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &str, reason: &FailureReason) -> Result<(), RecordError> {
        self.transition(key, JobStatus::Failed, |job| {
            job.transcoding_time_seconds = None;
            job.variant_outputs = None;
            job.failure_reason = Some(reason.code.clone());
            job.failure_detail = Some(reason.detail.clone());
        })
    }

    async fn heartbeat(&self, key: &str) -> Result<(), RecordError> {
        let mut records = self.records.lock().unwrap();
        if let Some(job) = records.get_mut(key) {
            if job.status == JobStatus::Processing {
                job.heartbeat_at = Some(OffsetDateTime::now_utc());
                self.heartbeats.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn fail_stale(&self, threshold: Duration) -> Result<Vec<String>, RecordError> {
        let now = OffsetDateTime::now_utc();
        let mut stale: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|job| {
                let last = job.heartbeat_at.or(job.updated_at).unwrap_or(now);
                job.status == JobStatus::Processing && now - last >= threshold
            })
            .map(|job| job.key.clone())
            .collect();
        stale.sort();

        let detail = format!("no worker heartbeat for {}s", threshold.as_secs());
        for key in &stale {
            self.transition(key, JobStatus::Failed, |job| {
                job.transcoding_time_seconds = None;
                job.variant_outputs = None;
                job.failure_reason = Some(HEARTBEAT_TIMEOUT_REASON.to_string());
                job.failure_detail = Some(detail.clone());
            })?;
        }

        Ok(stale)
    }
}

/// Buckets in memory. Publishing a key listed in `failing_publish` fails
/// every time.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_publish: HashSet<String>,
    fetches: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn with_source(key: &str, body: &[u8]) -> Self {
        let store = Self::default();
        store
            .objects
            .lock()
            .unwrap()
            .insert((SOURCE_BUCKET.to_string(), key.to_string()), body.to_vec());
        store
    }

    pub fn failing_publish(mut self, key: &str) -> Self {
        self.failing_publish.insert(key.to_string());
        self
    }

    pub fn keys_in(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self
            .object(bucket, key)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }

    async fn publish(&self, bucket: &str, key: &str, src: &Path) -> Result<(), StorageError> {
        if self.failing_publish.contains(key) {
            return Err(StorageError::Request {
                operation: "put_object",
                message: "service unavailable".to_string(),
            });
        }
        let body = tokio::fs::read(src).await?;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

/// Writes `<label>` into the output file instead of running a real encoder.
#[derive(Default)]
pub struct ScriptedEncoder {
    pub failing: HashSet<String>,
    /// Behave as if the encoder binary were missing.
    pub unavailable: bool,
    /// Block until cancelled.
    pub hang: bool,
    pub delay: Duration,
    /// Launches that fail with a transient error before encoders start.
    spawn_hiccups: AtomicUsize,
    started: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn failing(labels: &[&str]) -> Self {
        Self {
            failing: labels.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn with_spawn_hiccups(n: usize) -> Self {
        let encoder = Self::default();
        encoder.spawn_hiccups.store(n, Ordering::SeqCst);
        encoder
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn encode(&self, request: EncodeRequest, cancel: CancellationToken) -> Result<PathBuf, EncodeError> {
        let label = request.format.label.clone();

        if self.unavailable {
            return Err(EncodeError::Spawn {
                label,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg: not found"),
            });
        }

        let hiccup = self
            .spawn_hiccups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if hiccup.is_ok() {
            return Err(EncodeError::Spawn {
                label,
                source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "Resource temporarily unavailable"),
            });
        }

        self.started.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            cancel.cancelled().await;
            return Err(EncodeError::Cancelled { label });
        }

        tokio::time::sleep(self.delay).await;

        if self.failing.contains(&label) {
            return Err(EncodeError::Failed {
                label,
                exit_code: Some(1),
                detail: "Invalid data found when processing input".to_string(),
            });
        }

        let output = request.output_path();
        tokio::fs::write(&output, label.as_bytes())
            .await
            .map_err(|source| EncodeError::Io {
                label: label.clone(),
                source,
            })?;
        Ok(output)
    }
}
