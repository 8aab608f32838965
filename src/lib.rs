//! Canopee: batch fetcher for Paris open civic datasets
//!
//! A single-process, best-effort batch fetcher for a fixed set of open civic
//! datasets (trees, green spaces, air quality, cooling spaces, arrondissement
//! boundaries), featuring:
//! - Resumable paginated retrieval with checkpointing and session rotation
//! - Bulk CSV-export fallback when pagination proves unreliable or the
//!   dataset is large
//! - Arrondissement-code normalization shared with downstream aggregation
//! - One flat-file CSV snapshot per dataset
//!
//! The downstream stages (geometry parsing, per-district aggregation,
//! database loading, dashboard) consume the snapshots this crate produces.

pub mod config;
pub mod datasets;
pub mod district;
pub mod fetch;
pub mod record;
pub mod snapshot;

pub use config::Config;
