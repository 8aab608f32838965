//! Configuration for canopee
//!
//! All tunables live in one explicit value passed into the orchestrator at
//! construction; there are no process-wide singletons.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default timeout for one paginated page fetch.
fn default_page_timeout() -> u64 {
    30
}

/// Default timeout for a bulk export download.
fn default_export_timeout() -> u64 {
    60
}

/// Main configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for snapshots and checkpoints.
    pub data_dir: PathBuf,
    /// HTTP client configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Retrieval behaviour.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Complementary Airparif feed.
    #[serde(default)]
    pub airparif: AirparifConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            http: HttpConfig::default(),
            fetch: FetchConfig::default(),
            airparif: AirparifConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all violations and reports them together so the user can fix
    /// everything in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }

        if self.http.base_url.is_empty() {
            errors.push("http base_url must not be empty".to_string());
        } else if url::Url::parse(&self.http.base_url).is_err() {
            errors.push(format!(
                "http base_url '{}' is not a valid URL",
                self.http.base_url
            ));
        }
        if self.http.page_timeout_secs == 0 {
            errors.push("page_timeout_secs must be positive".to_string());
        }
        if self.http.export_timeout_secs == 0 {
            errors.push("export_timeout_secs must be positive".to_string());
        }

        if self.fetch.max_retries == 0 {
            errors.push("max_retries must be positive".to_string());
        }
        if self.fetch.snapshot_interval == 0 {
            errors.push("snapshot_interval must be positive".to_string());
        }
        if self.fetch.session_rotation_interval == 0 {
            errors.push("session_rotation_interval must be positive".to_string());
        }

        if self.airparif.enabled {
            if url::Url::parse(&self.airparif.base_url).is_err() {
                errors.push(format!(
                    "airparif base_url '{}' is not a valid URL",
                    self.airparif.base_url
                ));
            }
            if self.airparif.year < 2015 {
                errors.push("airparif year must be 2015 or later".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Portal base URL.
    pub base_url: String,
    /// User agent string.
    pub user_agent: String,
    /// Page fetch timeout in seconds.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
    /// Bulk export timeout in seconds.
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://opendata.paris.fr".to_string(),
            user_agent: "canopee/0.1 (+https://github.com/canopee/canopee)".to_string(),
            page_timeout_secs: default_page_timeout(),
            export_timeout_secs: default_export_timeout(),
        }
    }
}

/// Retrieval behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per page before escalating to the bulk export.
    pub max_retries: u32,
    /// Fixed backoff between page retries, milliseconds.
    pub retry_backoff_ms: u64,
    /// Accumulated records between partial snapshot + checkpoint writes
    /// (resumable dataset only).
    pub snapshot_interval: u64,
    /// Records fetched within one network session before it is rotated.
    pub session_rotation_interval: u64,
    /// Fetch two adjacent pages concurrently (resumable dataset only).
    pub parallel_pagination: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 2000,
            snapshot_interval: 5000,
            session_rotation_interval: 5000,
            parallel_pagination: false,
        }
    }
}

/// Complementary Airparif measurement feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirparifConfig {
    /// Whether to fetch the feed at all.
    pub enabled: bool,
    /// ArcGIS FeatureServer query endpoint.
    pub base_url: String,
    /// Only measurements from this year onwards are requested.
    pub year: u32,
}

impl Default for AirparifConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://services9.arcgis.com/7Sr9EkvgbJsCyFVQ/arcgis/rest/services/indice_atmo_agglo_paris/FeatureServer/0/query".to_string(),
            year: 2025,
        }
    }
}
