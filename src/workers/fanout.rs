//! Concurrent fan-out of one source into every target format.
//!
//! One task is spawned per format. Successful tasks record their output in a
//! shared, lock-guarded result map; the lock is held for the insert only, so
//! encodes run in parallel. The coordinator drains every task before it
//! returns, failed ones included, and never cancels siblings on a failure.
//!
//! Concurrency is bounded only by the format table unless a cap is given.
//! The default table has six entries; a larger or caller-supplied table
//! should be run with `max_parallel` set.

use super::encoder::{EncodeError, EncodeRequest, Encoder};
use crate::config::formats::FormatTable;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Job-scoped collection of finished variants. Each label is written once,
/// by the task that encoded it.
#[derive(Debug, Default)]
pub struct VariantResults {
    outputs: Mutex<BTreeMap<String, PathBuf>>,
}

impl VariantResults {
    pub fn record(&self, label: &str, output: PathBuf) {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.to_string(), output);
    }

    pub fn into_inner(self) -> BTreeMap<String, PathBuf> {
        self.outputs.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
pub struct FanOutReport {
    /// label -> local output path, successful variants only
    pub outputs: BTreeMap<String, PathBuf>,
    pub failures: Vec<EncodeError>,
    /// Completion signals observed, success or failure.
    pub completed: usize,
}

impl FanOutReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds in the report of a relaunch over some of the same labels.
    pub fn absorb(&mut self, other: FanOutReport) {
        self.outputs.extend(other.outputs);
        self.failures.extend(other.failures);
        self.completed += other.completed;
    }

    pub fn failed_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.failures.iter().map(|e| e.label().to_string()).collect();
        labels.sort();
        labels
    }
}

pub async fn fan_out(
    encoder: Arc<dyn Encoder>,
    source: &Path,
    output_dir: &Path,
    formats: &FormatTable,
    max_parallel: Option<usize>,
    cancel: &CancellationToken,
) -> FanOutReport {
    let permits = max_parallel.unwrap_or(formats.len()).max(1);
    let limit = Arc::new(Semaphore::new(permits));
    let results = Arc::new(VariantResults::default());

    let mut tasks = JoinSet::new();
    let mut labels = HashMap::new();

    info!("🎞️ Fanning out {} variants ({} at a time)", formats.len(), permits);

    for format in formats.iter() {
        let label = format.label.clone();
        let request = EncodeRequest {
            source: source.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            format: format.clone(),
        };
        let encoder = encoder.clone();
        let limit = limit.clone();
        let results = results.clone();
        let cancel = cancel.clone();

        let handle = tasks.spawn(async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = limit.acquire_owned().await;

            if cancel.is_cancelled() {
                return Err(EncodeError::Cancelled { label });
            }

            let output = encoder.encode(request, cancel).await?;
            results.record(&label, output);
            Ok(())
        });
        labels.insert(handle.id(), format.label.clone());
    }

    let mut failures = Vec::new();
    let mut completed = 0;

    while let Some(joined) = tasks.join_next_with_id().await {
        completed += 1;
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(e))) => {
                warn!(variant = %e.label(), "❌ {}", e);
                failures.push(e);
            }
            Err(join_err) => {
                let label = labels.get(&join_err.id()).cloned().unwrap_or_default();
                warn!(variant = %label, "❌ Encode task aborted: {}", join_err);
                failures.push(EncodeError::Panicked { label });
            }
        }
    }

    // Every task has finished, so this is the last reference.
    let outputs = match Arc::try_unwrap(results) {
        Ok(results) => results.into_inner(),
        Err(shared) => shared.outputs.lock().unwrap_or_else(PoisonError::into_inner).clone(),
    };

    FanOutReport {
        outputs,
        failures,
        completed,
    }
}
