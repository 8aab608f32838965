//! Dataset descriptors
//!
//! Each dataset the batch run covers is described once, up front. Descriptors
//! are immutable inputs to the orchestrator; nothing in the pipeline mutates
//! them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default rows-per-page for paginated retrieval.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// Immutable description of one dataset to retrieve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Portal slug, e.g. `"les-arbres"`.
    pub name: String,
    /// Path of the final CSV snapshot.
    pub output: PathBuf,
    /// Rows requested per page.
    pub page_size: u64,
    /// Facet filters forwarded to the search endpoint.
    pub facets: Vec<String>,
    /// Flattened column holding the raw district code, when the source has one.
    pub district_field: Option<String>,
    /// Whether this dataset checkpoints and resumes. Only the large paginated
    /// dataset sets this.
    pub resumable: bool,
    /// When set, a probed record count above this goes straight to the bulk
    /// export instead of paginating.
    pub export_threshold: Option<u64>,
}

impl DatasetDescriptor {
    /// Create a descriptor with default pagination and no reconciliation.
    pub fn new(name: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            page_size: DEFAULT_PAGE_SIZE,
            facets: Vec::new(),
            district_field: None,
            resumable: false,
            export_threshold: None,
        }
    }

    /// Override the page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Add a facet filter.
    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facets.push(facet.into());
        self
    }

    /// Name the flattened column carrying the raw district code.
    pub fn with_district_field(mut self, field: impl Into<String>) -> Self {
        self.district_field = Some(field.into());
        self
    }

    /// Mark the dataset as checkpointed/resumable.
    pub fn resumable(mut self) -> Self {
        self.resumable = true;
        self
    }

    /// Flag the dataset as size-sensitive with the given export threshold.
    pub fn with_export_threshold(mut self, threshold: u64) -> Self {
        self.export_threshold = Some(threshold);
        self
    }
}

/// The fixed catalog of Paris datasets this batch run covers.
///
/// Trees is by far the largest dataset and is the only one that checkpoints;
/// everything else restarts from offset 0 on every run.
pub fn paris_catalog(data_dir: &Path) -> Vec<DatasetDescriptor> {
    vec![
        DatasetDescriptor::new("les-arbres", data_dir.join("raw_trees.csv"))
            .with_district_field("fields.c_arinsee")
            .resumable()
            .with_export_threshold(500_000),
        DatasetDescriptor::new(
            "espaces-verts-et-assimiles",
            data_dir.join("raw_green_spaces.csv"),
        )
        .with_district_field("fields.adr_arrondissement"),
        DatasetDescriptor::new(
            "qualite-de-lair-concentration-moyenne-no2-pm2-5-pm10-o3-a-partir-de-2015",
            data_dir.join("raw_air_quality.csv"),
        ),
        DatasetDescriptor::new(
            "ilots-de-fraicheur-espaces-verts-frais",
            data_dir.join("raw_cooling_spaces.csv"),
        )
        .with_district_field("fields.arrondissement"),
        DatasetDescriptor::new("arrondissements", data_dir.join("raw_arrondissements.csv"))
            .with_district_field("fields.c_arinsee"),
    ]
}
