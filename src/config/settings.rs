use crate::common::retry::RetryConfig;
use crate::config::env::{self, ConfigError, EnvKey, EnvSource, ProcessEnv};
use crate::config::formats::FormatTable;
use crate::workers::transcoder::{PartialFailurePolicy, PipelineSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the object store.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl StorageConfig {
    fn load(source: &impl EnvSource, region: String) -> Self {
        Self {
            region,
            endpoint: env::get_opt(source, EnvKey::S3Endpoint),
            access_key: env::get_opt(source, EnvKey::AwsAccessKey),
            secret_key: env::get_opt(source, EnvKey::AwsSecretKey),
        }
    }
}

/// Launch configuration of one worker process (one job).
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub source_bucket: String,
    pub output_bucket: String,
    pub object_key: String,
    pub database_url: String,
    pub storage: StorageConfig,
    pub work_dir: PathBuf,
    pub ffmpeg_command: Vec<String>,
    pub encode_timeout: Option<Duration>,
    pub max_parallel_encodes: Option<usize>,
    pub formats: FormatTable,
    pub partial_failure_policy: PartialFailurePolicy,
    pub retry: RetryConfig,
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ProcessEnv)
    }

    pub fn load(source: &impl EnvSource) -> Result<Self, ConfigError> {
        let source_bucket = env::get(source, EnvKey::SourceBucket)?;
        let output_bucket = env::get(source, EnvKey::OutputBucket)?;
        let region = env::get(source, EnvKey::BucketRegion)?;
        let object_key = env::get(source, EnvKey::ObjectKey)?;
        let database_url = env::get(source, EnvKey::DatabaseUrl)?;

        let ffmpeg_command: Vec<String> = env::get_or(source, EnvKey::FfmpegCommand, "ffmpeg")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let max_parallel_encodes = env::get_opt_parsed::<usize>(source, EnvKey::MaxParallelEncodes)?;
        if max_parallel_encodes == Some(0) {
            return Err(ConfigError::Invalid {
                key: EnvKey::MaxParallelEncodes.as_str(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let retry = RetryConfig {
            max_attempts: env::get_parsed(source, EnvKey::RetryMaxAttempts, 3u32)?.max(1),
            base_delay: Duration::from_millis(env::get_parsed(source, EnvKey::RetryBaseDelayMs, 200u64)?),
            max_delay: Duration::from_millis(env::get_parsed(source, EnvKey::RetryMaxDelayMs, 5000u64)?),
        };

        Ok(Self {
            source_bucket,
            output_bucket,
            object_key,
            database_url,
            storage: StorageConfig::load(source, region),
            work_dir: env::get_opt(source, EnvKey::WorkDir)
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            ffmpeg_command,
            encode_timeout: env::get_opt_parsed::<u64>(source, EnvKey::EncodeTimeoutSecs)?
                .map(Duration::from_secs),
            max_parallel_encodes,
            formats: load_formats(source)?,
            partial_failure_policy: env::get_parsed(
                source,
                EnvKey::PartialFailurePolicy,
                PartialFailurePolicy::default(),
            )?,
            retry,
            heartbeat_interval: Duration::from_secs(
                env::get_parsed(source, EnvKey::HeartbeatIntervalSecs, 15u64)?.max(1),
            ),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            source_bucket: self.source_bucket.clone(),
            output_bucket: self.output_bucket.clone(),
            work_dir: self.work_dir.clone(),
            formats: self.formats.clone(),
            max_parallel_encodes: self.max_parallel_encodes,
            partial_failure_policy: self.partial_failure_policy,
            retry: self.retry.clone(),
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

/// Configuration of the status API process.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub server_port: u16,
    pub database_url: String,
    pub formats: FormatTable,
    pub stale_job_threshold: Duration,
    pub stale_sweep_interval: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ProcessEnv)
    }

    pub fn load(source: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            server_port: env::get_parsed(source, EnvKey::ServerPort, 3000)?,
            database_url: env::get(source, EnvKey::DatabaseUrl)?,
            formats: load_formats(source)?,
            stale_job_threshold: Duration::from_secs(env::get_parsed(
                source,
                EnvKey::StaleJobThresholdSecs,
                300u64,
            )?),
            stale_sweep_interval: Duration::from_secs(
                env::get_parsed(source, EnvKey::StaleSweepIntervalSecs, 60u64)?.max(1),
            ),
        })
    }
}

fn load_formats(source: &impl EnvSource) -> Result<FormatTable, ConfigError> {
    match env::get_opt(source, EnvKey::TargetFormats) {
        Some(raw) => FormatTable::parse(&raw).map_err(|e| ConfigError::Invalid {
            key: EnvKey::TargetFormats.as_str(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(FormatTable::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn launch_env() -> HashMap<EnvKey, String> {
        HashMap::from([
            (EnvKey::SourceBucket, "uploads-tmp".to_string()),
            (EnvKey::OutputBucket, "videos-out".to_string()),
            (EnvKey::BucketRegion, "ap-south-1".to_string()),
            (EnvKey::ObjectKey, "clip.mp4".to_string()),
            (EnvKey::DatabaseUrl, "postgres://localhost/videos".to_string()),
        ])
    }

    #[test]
    fn worker_config_uses_defaults() {
        let config = WorkerConfig::load(&launch_env()).unwrap();

        assert_eq!(config.source_bucket, "uploads-tmp");
        assert_eq!(config.object_key, "clip.mp4");
        assert_eq!(config.storage.region, "ap-south-1");
        assert_eq!(config.ffmpeg_command, vec!["ffmpeg".to_string()]);
        assert_eq!(config.formats, FormatTable::default());
        assert_eq!(config.partial_failure_policy, PartialFailurePolicy::PublishSuccesses);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.encode_timeout.is_none());
        assert!(config.max_parallel_encodes.is_none());
    }

    #[test]
    fn every_launch_parameter_is_required() {
        for key in [
            EnvKey::SourceBucket,
            EnvKey::OutputBucket,
            EnvKey::BucketRegion,
            EnvKey::ObjectKey,
            EnvKey::DatabaseUrl,
        ] {
            let mut source = launch_env();
            source.remove(&key);
            match WorkerConfig::load(&source) {
                Err(ConfigError::Missing(name)) => assert_eq!(name, key.as_str()),
                other => panic!("expected missing {}, got {:?}", key.as_str(), other.map(|_| ())),
            }
        }
    }

    #[test]
    fn tuning_overrides_are_parsed() {
        let mut source = launch_env();
        source.insert(EnvKey::FfmpegCommand, "nice -n 10 ffmpeg".to_string());
        source.insert(EnvKey::EncodeTimeoutSecs, "600".to_string());
        source.insert(EnvKey::MaxParallelEncodes, "2".to_string());
        source.insert(EnvKey::TargetFormats, "360p=640:360".to_string());
        source.insert(EnvKey::PartialFailurePolicy, "discard".to_string());

        let config = WorkerConfig::load(&source).unwrap();
        assert_eq!(config.ffmpeg_command, vec!["nice", "-n", "10", "ffmpeg"]);
        assert_eq!(config.encode_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.max_parallel_encodes, Some(2));
        assert_eq!(config.formats.labels(), vec!["360p"]);
        assert_eq!(config.partial_failure_policy, PartialFailurePolicy::Discard);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut source = launch_env();
        source.insert(EnvKey::MaxParallelEncodes, "0".to_string());
        assert!(matches!(
            WorkerConfig::load(&source),
            Err(ConfigError::Invalid { key: "MAX_PARALLEL_ENCODES", .. })
        ));
    }

    #[test]
    fn bad_format_table_is_a_config_error() {
        let mut source = launch_env();
        source.insert(EnvKey::TargetFormats, "144p".to_string());
        assert!(matches!(
            WorkerConfig::load(&source),
            Err(ConfigError::Invalid { key: "TARGET_FORMATS", .. })
        ));
    }

    #[test]
    fn api_config_needs_only_the_database() {
        let source = HashMap::from([(EnvKey::DatabaseUrl, "postgres://localhost/videos".to_string())]);
        let config = ApiConfig::load(&source).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.stale_job_threshold, Duration::from_secs(300));
    }
}
