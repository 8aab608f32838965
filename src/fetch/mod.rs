//! Dataset retrieval pipeline
//!
//! Implements a two-tier retrieval strategy per dataset:
//! - Tier 1: paginated search API with retry, checkpointing and resume
//! - Tier 2: bulk CSV export - fallback when pagination proves unreliable
//!   or the dataset is large
//!
//! The orchestrator guarantees that every dataset run terminates with some
//! output file, as complete as practically obtainable.

pub mod airparif;
pub mod checkpoint;
pub mod client;
pub mod export;
pub mod orchestrator;

pub use airparif::AirparifClient;
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use client::{ApiClient, DatasetSource};
pub use orchestrator::{FallbackTrigger, FetchSummary, Orchestrator};

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during dataset retrieval.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("No CSV link found on export page {0}")]
    MissingExportLink(String),
    #[error("Failed to parse URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] crate::snapshot::SnapshotError),
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Timeouts, connection failures and server-side errors (5xx, 429) are
    /// transient; everything else (4xx, decode failures, missing export
    /// links) is structural and escalates straight to the fallback.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status.as_u16() == 429
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        assert!(FetchError::Timeout(Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn structural_errors_are_not_transient() {
        assert!(!FetchError::Malformed("truncated body".into()).is_transient());
        assert!(!FetchError::MissingExportLink("https://example.test/export/".into())
            .is_transient());
        assert!(!FetchError::Checkpoint("bad state".into()).is_transient());
    }
}
