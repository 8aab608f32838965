//! Dataset retrieval orchestrator
//!
//! Drives one dataset through the state machine
//! `Probing -> Paginating -> (Completed | FallbackExport)`. Every failure
//! mode downgrades rather than aborting: the orchestrator always terminates
//! with some output file, as complete as practically obtainable, and one
//! dataset's total failure never blocks the others.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::FetchConfig;
use crate::datasets::DatasetDescriptor;
use crate::record::{self, Record};
use crate::snapshot;

use super::checkpoint::CheckpointStore;
use super::client::DatasetSource;
use super::FetchError;

/// Why pagination was abandoned in favour of the bulk export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTrigger {
    /// The zero-row probe failed; pagination was never attempted.
    ProbeFailed,
    /// The probed record count exceeded the dataset's export threshold.
    ThresholdExceeded,
    /// A page kept failing transiently until the attempt limit ran out.
    RetriesExhausted,
    /// A page failed with a permanent error; no retry.
    StructuralFailure,
    /// One half of a parallel page pair failed; pagination abandoned.
    ParallelFetchFailed,
    /// Pagination finished with fewer records than advertised.
    Shortfall,
}

/// Report for one dataset's retrieval run.
#[derive(Debug, Clone)]
pub struct FetchSummary {
    /// Dataset slug.
    pub dataset: String,
    /// Records in the final snapshot.
    pub records_written: usize,
    /// Record count advertised by the probe, when one succeeded.
    pub nhits: Option<u64>,
    /// Set when the run went through the bulk export.
    pub fallback: Option<FallbackTrigger>,
    /// Records whose district code could not be classified.
    pub invalid_districts: usize,
}

/// Mutable state of one pagination run. Owned exclusively by the
/// orchestrator and dropped when retrieval completes or permanently fails.
struct FetchSession {
    nhits: u64,
    offset: u64,
    records: Vec<Record>,
    /// Records fetched since the network session was last rotated.
    since_rotation: u64,
    /// Accumulator length at the last partial snapshot write.
    persisted: usize,
}

impl FetchSession {
    fn new(nhits: u64) -> Self {
        Self {
            nhits,
            offset: 0,
            records: Vec::new(),
            since_rotation: 0,
            persisted: 0,
        }
    }

    fn resumed(nhits: u64, offset: u64, records: Vec<Record>) -> Self {
        let persisted = records.len();
        Self {
            nhits,
            offset,
            records,
            since_rotation: 0,
            persisted,
        }
    }
}

/// Orchestrates retrieval for a catalog of datasets.
pub struct Orchestrator<S> {
    source: S,
    checkpoints: CheckpointStore,
    config: FetchConfig,
    show_progress: bool,
}

impl<S: DatasetSource> Orchestrator<S> {
    /// Create an orchestrator over a dataset source.
    pub fn new(source: S, checkpoints: CheckpointStore, config: FetchConfig) -> Self {
        Self {
            source,
            checkpoints,
            config,
            show_progress: false,
        }
    }

    /// Enable or disable the pagination progress bar.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Access the underlying dataset source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Retrieve every dataset in the catalog, sequentially.
    ///
    /// A dataset whose run errors locally (disk problems) is logged and
    /// skipped; the batch never aborts.
    pub async fn run_all(&self, catalog: &[DatasetDescriptor]) -> Vec<FetchSummary> {
        let mut summaries = Vec::with_capacity(catalog.len());
        for dataset in catalog {
            match self.run(dataset).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!("Dataset {} failed: {}", dataset.name, e),
            }
        }
        summaries
    }

    /// Retrieve one dataset.
    ///
    /// Remote failures degrade to the bulk export; only local I/O problems
    /// surface as errors.
    pub async fn run(&self, dataset: &DatasetDescriptor) -> Result<FetchSummary, FetchError> {
        info!("Fetching dataset {}", dataset.name);

        // Probing: a zero-row query to learn the advertised total.
        let nhits = match self.source.probe(dataset).await {
            Ok(nhits) => nhits,
            Err(e) => {
                warn!("Probe failed for {}: {}", dataset.name, e);
                return self
                    .fall_back(dataset, FallbackTrigger::ProbeFailed, Vec::new(), None)
                    .await;
            }
        };
        debug!("Dataset {} advertises {} records", dataset.name, nhits);

        // Size gate: above the threshold the export is cheaper and more
        // reliable than thousands of pages.
        if let Some(threshold) = dataset.export_threshold {
            if nhits > threshold {
                info!(
                    "Dataset {} has {} records (threshold {}), skipping pagination",
                    dataset.name, nhits, threshold
                );
                return self
                    .fall_back(
                        dataset,
                        FallbackTrigger::ThresholdExceeded,
                        Vec::new(),
                        Some(nhits),
                    )
                    .await;
            }
        }

        // Paginating.
        let mut session = self.resume_or_start(dataset, nhits)?;
        let progress = self.progress_bar(&session);

        while session.offset < session.nhits {
            let requested = if self.parallel(dataset) {
                dataset.page_size * 2
            } else {
                dataset.page_size
            };

            let fetched = if self.parallel(dataset) {
                self.fetch_pair(dataset, session.offset).await
            } else {
                self.fetch_with_retry(dataset, session.offset, dataset.page_size)
                    .await
            };

            let page = match fetched {
                Ok(page) => page,
                Err(trigger) => {
                    if let Some(bar) = &progress {
                        bar.finish_and_clear();
                    }
                    self.persist_progress(dataset, &mut session)?;
                    return self
                        .fall_back(dataset, trigger, session.records, Some(nhits))
                        .await;
                }
            };

            let got = page.len() as u64;
            session.records.extend(page);
            session.offset += got;
            session.since_rotation += got;
            if let Some(bar) = &progress {
                bar.set_position(session.offset.min(session.nhits));
            }

            if dataset.resumable
                && (session.records.len() - session.persisted) as u64
                    >= self.config.snapshot_interval
            {
                self.persist_progress(dataset, &mut session)?;
            }

            if session.since_rotation >= self.config.session_rotation_interval {
                debug!("Rotating network session for {}", dataset.name);
                self.source.rotate_session()?;
                session.since_rotation = 0;
            }

            // A short or empty page means the server has no more data.
            if got < requested {
                break;
            }
        }

        if let Some(bar) = &progress {
            bar.finish_and_clear();
        }

        // Completed, unless the server delivered less than it advertised,
        // in which case the export is the authoritative gap-filler.
        if (session.records.len() as u64) < session.nhits {
            warn!(
                "Dataset {} short by {} records ({} of {}), refetching via export",
                dataset.name,
                session.nhits - session.records.len() as u64,
                session.records.len(),
                session.nhits
            );
            return self
                .fall_back(dataset, FallbackTrigger::Shortfall, session.records, Some(nhits))
                .await;
        }

        self.finish(dataset, session.records, Some(nhits), None)
    }

    fn parallel(&self, dataset: &DatasetDescriptor) -> bool {
        self.config.parallel_pagination && dataset.resumable
    }

    fn progress_bar(&self, session: &FetchSession) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = ProgressBar::new(session.nhits);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_position(session.offset);
        Some(bar)
    }

    /// Resume from a checkpoint when both it and the partial snapshot are
    /// usable; otherwise cold-start from offset 0.
    fn resume_or_start(
        &self,
        dataset: &DatasetDescriptor,
        nhits: u64,
    ) -> Result<FetchSession, FetchError> {
        if !dataset.resumable {
            return Ok(FetchSession::new(nhits));
        }

        let Some(checkpoint) = self.checkpoints.load(&dataset.name) else {
            return Ok(FetchSession::new(nhits));
        };

        if checkpoint.offset > nhits {
            warn!(
                "Checkpoint offset {} exceeds advertised total {} for {}, discarding",
                checkpoint.offset, nhits, dataset.name
            );
            self.checkpoints.clear(&dataset.name)?;
            return Ok(FetchSession::new(nhits));
        }

        let partial = snapshot::partial_path(&dataset.output);
        if !partial.exists() {
            warn!(
                "Checkpoint for {} has no partial snapshot, restarting from zero",
                dataset.name
            );
            self.checkpoints.clear(&dataset.name)?;
            return Ok(FetchSession::new(nhits));
        }

        match snapshot::read_partial(&partial) {
            Ok(records) => {
                info!(
                    "Resuming {} at offset {} with {} accumulated records",
                    dataset.name,
                    checkpoint.offset,
                    records.len()
                );
                Ok(FetchSession::resumed(nhits, checkpoint.offset, records))
            }
            Err(e) => {
                warn!(
                    "Unreadable partial snapshot for {} ({}), restarting from zero",
                    dataset.name, e
                );
                self.checkpoints.clear(&dataset.name)?;
                Ok(FetchSession::new(nhits))
            }
        }
    }

    /// Fetch one page, retrying transient failures with fixed backoff.
    async fn fetch_with_retry(
        &self,
        dataset: &DatasetDescriptor,
        start: u64,
        rows: u64,
    ) -> Result<Vec<Record>, FallbackTrigger> {
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.source.fetch_page(dataset, start, rows).await {
                Ok(records) => return Ok(records),
                Err(e) if !e.is_transient() => {
                    warn!(
                        "Permanent failure at offset {} for {}: {}",
                        start, dataset.name, e
                    );
                    return Err(FallbackTrigger::StructuralFailure);
                }
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(
                        "Page at offset {} for {} failed after {} attempts: {}",
                        start, dataset.name, attempt, e
                    );
                    return Err(FallbackTrigger::RetriesExhausted);
                }
                Err(e) => {
                    debug!(
                        "Attempt {} at offset {} for {} failed: {}; retrying",
                        attempt, start, dataset.name, e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Fetch two adjacent pages concurrently. Either half failing abandons
    /// pagination for this run; simpler than partial retry in the parallel
    /// path.
    async fn fetch_pair(
        &self,
        dataset: &DatasetDescriptor,
        start: u64,
    ) -> Result<Vec<Record>, FallbackTrigger> {
        let rows = dataset.page_size;
        let (left, right) = tokio::join!(
            self.source.fetch_page(dataset, start, rows),
            self.source.fetch_page(dataset, start + rows, rows),
        );

        match (left, right) {
            (Ok(mut first), Ok(second)) => {
                first.extend(second);
                Ok(first)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    "Parallel fetch at offset {} for {} failed: {}",
                    start, dataset.name, e
                );
                Err(FallbackTrigger::ParallelFetchFailed)
            }
        }
    }

    /// Write partial snapshot + checkpoint, bounding crash loss to one
    /// interval's worth of work.
    fn persist_progress(
        &self,
        dataset: &DatasetDescriptor,
        session: &mut FetchSession,
    ) -> Result<(), FetchError> {
        if !dataset.resumable {
            return Ok(());
        }

        snapshot::write_partial(&snapshot::partial_path(&dataset.output), &session.records)?;
        self.checkpoints.save(&dataset.name, session.offset)?;
        session.persisted = session.records.len();
        debug!(
            "Persisted {} records at offset {} for {}",
            session.records.len(),
            session.offset,
            dataset.name
        );
        Ok(())
    }

    /// FallbackExport: one direct full retrieval. On failure the run
    /// degrades: already-accumulated records are kept if there are any,
    /// otherwise the output is an empty (header-only) snapshot.
    async fn fall_back(
        &self,
        dataset: &DatasetDescriptor,
        trigger: FallbackTrigger,
        accumulated: Vec<Record>,
        nhits: Option<u64>,
    ) -> Result<FetchSummary, FetchError> {
        info!("Falling back to bulk export for {} ({:?})", dataset.name, trigger);

        let exported = match self.source.export(dataset).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Bulk export failed for {}: {}", dataset.name, e);
                Vec::new()
            }
        };

        let records = if exported.is_empty() && !accumulated.is_empty() {
            info!(
                "Keeping {} paginated records for {} after empty export",
                accumulated.len(),
                dataset.name
            );
            accumulated
        } else {
            exported
        };

        self.finish(dataset, records, nhits, Some(trigger))
    }

    /// Reconcile district codes, write the final snapshot and clear all
    /// resume state.
    fn finish(
        &self,
        dataset: &DatasetDescriptor,
        mut records: Vec<Record>,
        nhits: Option<u64>,
        fallback: Option<FallbackTrigger>,
    ) -> Result<FetchSummary, FetchError> {
        let mut invalid_districts = 0;
        if let Some(field) = &dataset.district_field {
            let report = record::reconcile(&mut records, field);
            invalid_districts = report.invalid;
            if report.invalid > 0 {
                warn!(
                    "{} of {} records in {} have unclassifiable district codes",
                    report.invalid,
                    records.len(),
                    dataset.name
                );
            }
        }

        snapshot::write_csv(&dataset.output, &records, dataset.district_field.is_some())?;
        self.checkpoints.clear(&dataset.name)?;
        snapshot::remove_partial(&snapshot::partial_path(&dataset.output))?;

        info!(
            "Wrote {} records to {}",
            records.len(),
            dataset.output.display()
        );

        Ok(FetchSummary {
            dataset: dataset.name.clone(),
            records_written: records.len(),
            nhits,
            fallback,
            invalid_districts,
        })
    }
}
