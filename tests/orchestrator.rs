//! End-to-end tests for the retrieval orchestrator
//!
//! These drive the full state machine against a scripted in-memory source,
//! covering resume, retry exhaustion, threshold gating, shortfall top-up and
//! the degradation paths.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use canopee::config::FetchConfig;
use canopee::datasets::DatasetDescriptor;
use canopee::fetch::{
    client::DatasetSource, CheckpointStore, FallbackTrigger, FetchError, Orchestrator,
};
use canopee::record::Record;
use canopee::snapshot;

#[derive(Debug, Default)]
struct CallLog {
    probes: u32,
    /// (start, rows) for every page attempt, in order.
    pages: Vec<(u64, u64)>,
    exports: u32,
    rotations: u32,
}

/// In-memory dataset source with scripted failures.
struct ScriptedSource {
    /// Advertised total returned by the probe.
    nhits: u64,
    /// Records the paginated endpoint actually serves (may be less than
    /// advertised, to simulate a shortfall).
    available: u64,
    /// Page index (start / page_size) that always fails transiently.
    fail_page: Option<u64>,
    /// Page index that fails permanently (malformed response).
    structural_page: Option<u64>,
    probe_fails: bool,
    export_size: u64,
    export_fails: bool,
    log: Mutex<CallLog>,
}

impl ScriptedSource {
    fn new(nhits: u64) -> Self {
        Self {
            nhits,
            available: nhits,
            fail_page: None,
            structural_page: None,
            probe_fails: false,
            export_size: nhits,
            export_fails: false,
            log: Mutex::new(CallLog::default()),
        }
    }

    fn page_record(i: u64) -> Record {
        Record::from_api(&json!({
            "recordid": format!("page-{i}"),
            "fields": {
                "c_arinsee": format!("750{:02}", i % 20 + 1),
                "libelle": format!("site {i}"),
            }
        }))
    }

    fn export_record(i: u64) -> Record {
        Record::from_api(&json!({
            "recordid": format!("export-{i}"),
            "fields": {
                "c_arinsee": format!("750{:02}", i % 20 + 1),
                "libelle": format!("site {i}"),
            }
        }))
    }

    fn attempts_at(&self, start: u64) -> usize {
        self.log
            .lock()
            .unwrap()
            .pages
            .iter()
            .filter(|(s, _)| *s == start)
            .count()
    }
}

#[async_trait]
impl DatasetSource for ScriptedSource {
    async fn probe(&self, _dataset: &DatasetDescriptor) -> Result<u64, FetchError> {
        self.log.lock().unwrap().probes += 1;
        if self.probe_fails {
            return Err(FetchError::Timeout(Duration::from_secs(30)));
        }
        Ok(self.nhits)
    }

    async fn fetch_page(
        &self,
        _dataset: &DatasetDescriptor,
        start: u64,
        rows: u64,
    ) -> Result<Vec<Record>, FetchError> {
        self.log.lock().unwrap().pages.push((start, rows));

        let page_index = start / rows.max(1);
        if self.fail_page == Some(page_index) {
            return Err(FetchError::Timeout(Duration::from_secs(30)));
        }
        if self.structural_page == Some(page_index) {
            return Err(FetchError::Malformed("truncated body".into()));
        }

        let end = (start + rows).min(self.available);
        Ok((start.min(end)..end).map(Self::page_record).collect())
    }

    async fn export(&self, _dataset: &DatasetDescriptor) -> Result<Vec<Record>, FetchError> {
        self.log.lock().unwrap().exports += 1;
        if self.export_fails {
            return Err(FetchError::Timeout(Duration::from_secs(60)));
        }
        Ok((0..self.export_size).map(Self::export_record).collect())
    }

    fn rotate_session(&self) -> Result<(), FetchError> {
        self.log.lock().unwrap().rotations += 1;
        Ok(())
    }
}

fn test_config() -> FetchConfig {
    FetchConfig {
        retry_backoff_ms: 0,
        ..FetchConfig::default()
    }
}

fn descriptor(dir: &TempDir) -> DatasetDescriptor {
    DatasetDescriptor::new("les-arbres", dir.path().join("raw_trees.csv"))
        .with_district_field("fields.c_arinsee")
        .resumable()
}

fn orchestrator(
    dir: &TempDir,
    source: ScriptedSource,
    config: FetchConfig,
) -> Orchestrator<ScriptedSource> {
    let checkpoints = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
    Orchestrator::new(source, checkpoints, config)
}

fn snapshot_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

fn column_values(path: &Path, column: &str) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let index = headers.iter().position(|h| h == column).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().get(index).unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn persistent_page_failure_falls_back_to_export() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(12_000);
    source.fail_page = Some(6); // 7th page
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::RetriesExhausted));
    assert_eq!(summary.records_written, 12_000);
    assert_eq!(snapshot_rows(&dataset.output).len(), 12_000);

    // The failing page was attempted exactly max_retries times.
    assert_eq!(orch.source().attempts_at(6000), 5);

    // Fallback output comes from the export, not the partial pagination.
    let ids = column_values(&dataset.output, "recordid");
    assert!(ids.iter().all(|id| id.starts_with("export-")));

    // Resume state is cleared once the export is authoritative.
    let checkpoints = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
    assert!(checkpoints.load(&dataset.name).is_none());
    assert!(!snapshot::partial_path(&dataset.output).exists());
}

#[tokio::test]
async fn resume_continues_from_checkpoint_without_refetching() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);

    // Simulate an interrupted run: 5000 records accumulated at offset 5000.
    let checkpoints = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
    checkpoints.save(&dataset.name, 5000).unwrap();
    let resumed: Vec<Record> = (0..5000)
        .map(|i| {
            Record::from_api(&json!({
                "recordid": format!("resumed-{i}"),
                "fields": {"c_arinsee": "75001"}
            }))
        })
        .collect();
    snapshot::write_partial(&snapshot::partial_path(&dataset.output), &resumed).unwrap();

    let source = ScriptedSource::new(8000);
    let orch = orchestrator(&dir, source, test_config());
    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, None);
    assert_eq!(summary.records_written, 8000);

    // Nothing below offset 5000 was refetched.
    let log = orch.source().log.lock().unwrap();
    assert_eq!(log.pages.first(), Some(&(5000, 1000)));
    assert!(log.pages.iter().all(|(start, _)| *start >= 5000));
    drop(log);

    // The first 5000 rows come from the partial snapshot, the rest from the
    // resumed pagination; no duplicates.
    let ids = column_values(&dataset.output, "recordid");
    assert_eq!(ids.iter().filter(|id| id.starts_with("resumed-")).count(), 5000);
    assert_eq!(ids.iter().filter(|id| id.starts_with("page-")).count(), 3000);

    let checkpoints = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
    assert!(checkpoints.load(&dataset.name).is_none());
    assert!(!snapshot::partial_path(&dataset.output).exists());
}

#[tokio::test]
async fn probe_failure_never_attempts_pagination() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(0);
    source.probe_fails = true;
    source.export_size = 250;
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::ProbeFailed));
    assert_eq!(summary.records_written, 250);
    assert_eq!(summary.nhits, None);

    let log = orch.source().log.lock().unwrap();
    assert!(log.pages.is_empty());
    assert_eq!(log.exports, 1);
}

#[tokio::test]
async fn threshold_exceeded_skips_pagination_entirely() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir).with_export_threshold(1000);
    let mut source = ScriptedSource::new(5000);
    source.export_size = 5000;
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::ThresholdExceeded));
    assert_eq!(summary.records_written, 5000);
    assert!(orch.source().log.lock().unwrap().pages.is_empty());
}

#[tokio::test]
async fn empty_dataset_produces_header_only_snapshot_and_no_checkpoint() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let source = ScriptedSource::new(0);
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, None);
    assert_eq!(summary.records_written, 0);

    let content = std::fs::read_to_string(&dataset.output).unwrap();
    assert_eq!(content, "arrondissement\n");

    let checkpoints = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
    assert!(checkpoints.load(&dataset.name).is_none());
}

#[tokio::test]
async fn shortfall_refetches_the_whole_dataset_via_export() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(5000);
    source.available = 3000; // server runs dry early
    source.export_size = 5000;
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::Shortfall));
    assert_eq!(summary.records_written, 5000);

    // The export replaces the partial accumulation entirely.
    let ids = column_values(&dataset.output, "recordid");
    assert!(ids.iter().all(|id| id.starts_with("export-")));
}

#[tokio::test]
async fn structural_failure_escalates_without_retry() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(5000);
    source.structural_page = Some(2);
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::StructuralFailure));
    // Exactly one attempt at the malformed page.
    assert_eq!(orch.source().attempts_at(2000), 1);
}

#[tokio::test]
async fn parallel_sub_fetch_failure_abandons_pagination() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(6000);
    source.fail_page = Some(1);
    let config = FetchConfig {
        parallel_pagination: true,
        ..test_config()
    };
    let orch = orchestrator(&dir, source, config);

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::ParallelFetchFailed));
    assert_eq!(summary.records_written, 6000);

    // Both halves of the first pair were issued once; no retries in the
    // parallel path.
    let log = orch.source().log.lock().unwrap();
    assert_eq!(log.pages.len(), 2);
}

#[tokio::test]
async fn failed_export_keeps_accumulated_records() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let mut source = ScriptedSource::new(5000);
    source.fail_page = Some(2);
    source.export_fails = true;
    let orch = orchestrator(&dir, source, test_config());

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, Some(FallbackTrigger::RetriesExhausted));
    assert_eq!(summary.records_written, 2000);

    let ids = column_values(&dataset.output, "recordid");
    assert_eq!(ids.len(), 2000);
    assert!(ids.iter().all(|id| id.starts_with("page-")));
}

#[tokio::test]
async fn session_rotates_on_the_configured_interval() {
    let dir = TempDir::new().unwrap();
    let dataset = descriptor(&dir);
    let source = ScriptedSource::new(6000);
    let config = FetchConfig {
        session_rotation_interval: 2000,
        ..test_config()
    };
    let orch = orchestrator(&dir, source, config);

    let summary = orch.run(&dataset).await.unwrap();

    assert_eq!(summary.fallback, None);
    assert_eq!(orch.source().log.lock().unwrap().rotations, 3);
}

#[tokio::test]
async fn run_all_isolates_total_dataset_failures() {
    let dir = TempDir::new().unwrap();
    let green_spaces =
        DatasetDescriptor::new("espaces-verts-et-assimiles", dir.path().join("gs.csv"));
    let arrondissements = DatasetDescriptor::new("arrondissements", dir.path().join("arr.csv"))
        .with_district_field("fields.c_arinsee");

    // Both tiers are down: every dataset gets an empty fallback result.
    let mut source = ScriptedSource::new(40);
    source.probe_fails = true;
    source.export_fails = true;
    let orch = orchestrator(&dir, source, test_config());

    let summaries = orch
        .run_all(&[green_spaces.clone(), arrondissements.clone()])
        .await;

    // A dataset that got nothing from either tier still yields a summary and
    // an output file, and the batch moves on to the next dataset.
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.records_written == 0));
    assert!(green_spaces.output.exists());
    assert!(arrondissements.output.exists());
    assert_eq!(orch.source().log.lock().unwrap().exports, 2);
}
