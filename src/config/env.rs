use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    SourceBucket,
    OutputBucket,
    BucketRegion,
    ObjectKey,
    S3Endpoint,
    AwsAccessKey,
    AwsSecretKey,
    WorkDir,
    FfmpegCommand,
    EncodeTimeoutSecs,
    MaxParallelEncodes,
    TargetFormats,
    PartialFailurePolicy,
    RetryMaxAttempts,
    RetryBaseDelayMs,
    RetryMaxDelayMs,
    HeartbeatIntervalSecs,
    StaleJobThresholdSecs,
    StaleSweepIntervalSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::SourceBucket => "TEMPORARY_BUCKET_NAME",
            EnvKey::OutputBucket => "OUTPUT_BUCKET_NAME",
            EnvKey::BucketRegion => "BUCKET_REGION",
            EnvKey::ObjectKey => "OBJECT_KEY",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::AwsAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::AwsSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::FfmpegCommand => "FFMPEG_COMMAND",
            EnvKey::EncodeTimeoutSecs => "ENCODE_TIMEOUT_SECS",
            EnvKey::MaxParallelEncodes => "MAX_PARALLEL_ENCODES",
            EnvKey::TargetFormats => "TARGET_FORMATS",
            EnvKey::PartialFailurePolicy => "PARTIAL_FAILURE_POLICY",
            EnvKey::RetryMaxAttempts => "RETRY_MAX_ATTEMPTS",
            EnvKey::RetryBaseDelayMs => "RETRY_BASE_DELAY_MS",
            EnvKey::RetryMaxDelayMs => "RETRY_MAX_DELAY_MS",
            EnvKey::HeartbeatIntervalSecs => "HEARTBEAT_INTERVAL_SECS",
            EnvKey::StaleJobThresholdSecs => "STALE_JOB_THRESHOLD_SECS",
            EnvKey::StaleSweepIntervalSecs => "STALE_SWEEP_INTERVAL_SECS",
        }
    }
}

/// Errors raised while reading configuration. Always raised before any
/// storage or record side effect happens.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where configuration values come from. The process environment in
/// production, a plain map in tests.
pub trait EnvSource {
    fn lookup(&self, key: EnvKey) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn lookup(&self, key: EnvKey) -> Option<String> {
        env::var(key.as_str()).ok()
    }
}

impl EnvSource for std::collections::HashMap<EnvKey, String> {
    fn lookup(&self, key: EnvKey) -> Option<String> {
        self.get(&key).cloned()
    }
}

/// Required value; blank counts as missing.
pub fn get(source: &impl EnvSource, key: EnvKey) -> Result<String, ConfigError> {
    get_opt(source, key).ok_or(ConfigError::Missing(key.as_str()))
}

pub fn get_opt(source: &impl EnvSource, key: EnvKey) -> Option<String> {
    source
        .lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    get_opt(source, key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T>(source: &impl EnvSource, key: EnvKey, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_opt_parsed(source, key)? {
        Some(val) => Ok(val),
        None => Ok(default),
    }
}

pub fn get_opt_parsed<T>(source: &impl EnvSource, key: EnvKey) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_opt(source, key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key: key.as_str(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}
