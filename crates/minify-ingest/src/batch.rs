use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::acquire::{validate_identifier, Acquirer};
use crate::error::IngestError;
use crate::manifest::Manifest;
use crate::processor::{FileOutcome, FileProcessor};
use crate::spatial::SpatialIndexer;

/// What to do after one file fails to acquire or process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next file.
    #[default]
    Continue,
    /// Stop at the first failure; the summary is marked aborted.
    FailFast,
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Directory holding (or receiving) the source files.
    pub data_dir: PathBuf,
    pub acquire_if_missing: bool,
    pub on_error: FailurePolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            acquire_if_missing: true,
            on_error: FailurePolicy::Continue,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Ingested { rows_retained: u64, rows_original: u64 },
    Skipped { ingested_at: DateTime<Utc> },
    AcquisitionFailed { error: String },
    ProcessingFailed { error: String },
}

impl BatchStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchStatus::AcquisitionFailed { .. } | BatchStatus::ProcessingFailed { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchEntry {
    pub source_file_id: String,
    #[serde(flatten)]
    pub status: BatchStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub ingested: usize,
    pub skipped: usize,
    pub acquisition_failed: usize,
    pub processing_failed: usize,
    /// Totals over files ingested by this run.
    pub rows_retained: u64,
    pub rows_original: u64,
}

impl BatchCounts {
    fn add(&mut self, status: &BatchStatus) {
        match status {
            BatchStatus::Ingested {
                rows_retained,
                rows_original,
            } => {
                self.ingested += 1;
                self.rows_retained += rows_retained;
                self.rows_original += rows_original;
            }
            BatchStatus::Skipped { .. } => self.skipped += 1,
            BatchStatus::AcquisitionFailed { .. } => self.acquisition_failed += 1,
            BatchStatus::ProcessingFailed { .. } => self.processing_failed += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.acquisition_failed + self.processing_failed
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub entries: Vec<BatchEntry>,
    pub counts: BatchCounts,
    /// Set when [`FailurePolicy::FailFast`] stopped the run early.
    pub aborted: bool,
}

impl BatchSummary {
    fn push(&mut self, source_file_id: &str, status: BatchStatus) {
        self.counts.add(&status);
        self.entries.push(BatchEntry {
            source_file_id: source_file_id.to_string(),
            status,
        });
    }
}

/// Runs a [`FileProcessor`] over every identifier of a [`Manifest`].
///
/// Files already recorded in the store are skipped without being acquired.
/// A failure on one file is recorded and does not affect other files unless
/// [`FailurePolicy::FailFast`] is chosen; configuration errors always end
/// the run.
pub struct BatchOrchestrator<'a, I> {
    processor: &'a FileProcessor<I>,
    acquirer: Option<&'a dyn Acquirer>,
    options: BatchOptions,
}

impl<'a, I: SpatialIndexer> BatchOrchestrator<'a, I> {
    pub fn new(processor: &'a FileProcessor<I>, options: BatchOptions) -> Self {
        Self {
            processor,
            acquirer: None,
            options,
        }
    }

    pub fn with_acquirer(mut self, acquirer: &'a dyn Acquirer) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    pub fn run(&self, manifest: &Manifest) -> Result<BatchSummary, IngestError> {
        self.processor.store().verify(self.processor.catalog())?;

        let mut summary = BatchSummary::default();
        for source_file_id in manifest.ids() {
            let status = self.run_one(source_file_id)?;
            let failed = status.is_failure();
            summary.push(source_file_id, status);
            if failed && self.options.on_error == FailurePolicy::FailFast {
                log::warn!("[{source_file_id}] failed; stopping batch (fail-fast)");
                summary.aborted = true;
                break;
            }
        }

        let counts = &summary.counts;
        log::info!(
            "batch done: {} ingested, {} skipped, {} failed",
            counts.ingested,
            counts.skipped,
            counts.failed()
        );
        Ok(summary)
    }

    fn run_one(&self, source_file_id: &str) -> Result<BatchStatus, IngestError> {
        // Entries must name a file directly inside the data directory.
        if let Err(err) = validate_identifier(source_file_id) {
            log::warn!("[{source_file_id}] {err}");
            return Ok(BatchStatus::AcquisitionFailed {
                error: err.to_string(),
            });
        }

        match self.processor.store().ingestion_record(source_file_id) {
            Ok(Some(record)) => {
                log::info!(
                    "[{source_file_id}] Already added on {}. Skipping.",
                    record.ingested_at
                );
                return Ok(BatchStatus::Skipped {
                    ingested_at: record.ingested_at,
                });
            }
            Ok(None) => {}
            Err(err) => return self.failed(source_file_id, err.into()),
        }

        let path = self.options.data_dir.join(source_file_id);
        if !path.exists() {
            match self.acquirer.filter(|_| self.options.acquire_if_missing) {
                Some(acquirer) => {
                    if let Err(err) = acquirer.acquire(source_file_id, &path) {
                        log::warn!("[{source_file_id}] {err}");
                        return Ok(BatchStatus::AcquisitionFailed {
                            error: err.to_string(),
                        });
                    }
                }
                None => {
                    log::warn!("[{source_file_id}] missing at {}", path.display());
                    return Ok(BatchStatus::AcquisitionFailed {
                        error: format!("missing: {}", path.display()),
                    });
                }
            }
        }

        match self.processor.process_file(source_file_id, &path) {
            Ok(FileOutcome::Ingested(record)) => Ok(BatchStatus::Ingested {
                rows_retained: record.rows_retained,
                rows_original: record.rows_original,
            }),
            Ok(FileOutcome::Skipped(record)) => Ok(BatchStatus::Skipped {
                ingested_at: record.ingested_at,
            }),
            Err(err) => self.failed(source_file_id, err),
        }
    }

    fn failed(&self, source_file_id: &str, err: IngestError) -> Result<BatchStatus, IngestError> {
        if err.is_fatal() {
            log::error!("[{source_file_id}] {err}");
            return Err(err);
        }
        log::warn!("[{source_file_id}] {err}");
        Ok(BatchStatus::ProcessingFailed {
            error: err.to_string(),
        })
    }
}
