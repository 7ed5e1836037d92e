//! Single-variant encoder invocation.

use crate::common::naming::{derive_output_name, local_file_name};
use crate::common::retry::Retryable;
use crate::config::formats::TargetFormat;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Diagnostic lines kept for the error detail of a failed encode.
const DIAGNOSTIC_TAIL: usize = 12;

/// How long to wait for the diagnostic reader once the child has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoder for {label} could not be started: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encode {label} failed (exit code {exit_code:?}): {detail}")]
    Failed {
        label: String,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("encode {label} timed out after {secs}s")]
    Timeout { label: String, secs: u64 },

    #[error("encode {label} cancelled")]
    Cancelled { label: String },

    #[error("encode {label} IO error: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encode {label} panicked")]
    Panicked { label: String },
}

impl EncodeError {
    pub fn label(&self) -> &str {
        match self {
            EncodeError::Spawn { label, .. }
            | EncodeError::Failed { label, .. }
            | EncodeError::Timeout { label, .. }
            | EncodeError::Cancelled { label }
            | EncodeError::Io { label, .. }
            | EncodeError::Panicked { label } => label,
        }
    }
}

impl Retryable for EncodeError {
    /// Only a launch that failed for lack of resources (EAGAIN, ENOMEM and
    /// the like) is worth another try. A missing or unusable binary is not.
    fn is_retryable(&self) -> bool {
        match self {
            EncodeError::Spawn { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}

/// One (source, target format) pair to encode.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub format: TargetFormat,
}

impl EncodeRequest {
    /// `<output_dir>/<stem>_<label>.<ext>`, derived from the source file name.
    pub fn output_path(&self) -> PathBuf {
        let source_name = self.source.to_string_lossy();
        self.output_dir
            .join(derive_output_name(local_file_name(&source_name), &self.format.label))
    }
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Produces exactly one output file and returns its path. Never retries.
    async fn encode(&self, request: EncodeRequest, cancel: CancellationToken) -> Result<PathBuf, EncodeError>;
}

/// Runs the external `ffmpeg` binary: scales video to the target geometry
/// and copies audio through untouched.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    /// Program followed by leading arguments, e.g. `["nice", "-n", "10", "ffmpeg"]`.
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(vec!["ffmpeg".to_string()])
    }
}

impl FfmpegEncoder {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_args(source: &Path, output: &Path, format: &TargetFormat) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("scale={}", format.geometry()),
            "-c:a".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, request: EncodeRequest, cancel: CancellationToken) -> Result<PathBuf, EncodeError> {
        let label = request.format.label.clone();
        let output = request.output_path();
        let args = Self::build_args(&request.source, &output, &request.format);

        let Some((program, leading)) = self.command.split_first() else {
            return Err(EncodeError::Spawn {
                label,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "encoder command is empty"),
            });
        };

        info!(variant = %label, "🎬 {} {} {}", program, leading.join(" "), args.join(" "));

        let mut child = Command::new(program)
            .args(leading)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                label: label.clone(),
                source,
            })?;

        let Some(stderr) = child.stderr.take() else {
            let _ = child.kill().await;
            return Err(EncodeError::Io {
                label,
                source: std::io::Error::other("encoder stderr was not captured"),
            });
        };

        let reader = tokio::spawn(read_diagnostics(stderr, label.clone()));
        let reader_abort = reader.abort_handle();

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = deadline => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Exited(Ok(status)) => {
                // The reader ends on EOF; bounded in case a grandchild holds the pipe.
                let tail = match tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await {
                    Ok(Ok(tail)) => tail,
                    _ => {
                        reader_abort.abort();
                        VecDeque::new()
                    }
                };

                if !status.success() {
                    warn!(variant = %label, "Encoder exited with {}", status);
                    return Err(EncodeError::Failed {
                        label,
                        exit_code: status.code(),
                        detail: Vec::from(tail).join("\n"),
                    });
                }

                if tokio::fs::metadata(&output).await.is_err() {
                    return Err(EncodeError::Failed {
                        label,
                        exit_code: status.code(),
                        detail: format!("encoder reported success but wrote no {}", output.display()),
                    });
                }

                info!(variant = %label, "✅ Encoded {}", output.display());
                Ok(output)
            }
            Outcome::Exited(Err(source)) => {
                reader_abort.abort();
                Err(EncodeError::Io { label, source })
            }
            Outcome::Cancelled => {
                warn!(variant = %label, "Encode cancelled, killing encoder");
                let _ = child.kill().await;
                reader_abort.abort();
                Err(EncodeError::Cancelled { label })
            }
            Outcome::TimedOut => {
                let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!(variant = %label, "Encode timed out after {}s, killing encoder", secs);
                let _ = child.kill().await;
                reader_abort.abort();
                Err(EncodeError::Timeout { label, secs })
            }
        }
    }
}

/// Streams the encoder's stderr into the log, keeping the last lines.
async fn read_diagnostics(stderr: ChildStderr, label: String) -> VecDeque<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(variant = %label, "{}", line);
        if tail.len() == DIAGNOSTIC_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail
}
