//! Paginated search client
//!
//! One network call per method: a zero-row probe to learn the advertised
//! record count, and a single page fetch. The client owns the network
//! session; rotation rebuilds the underlying HTTP client without touching
//! offsets or checkpoints.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::config::HttpConfig;
use crate::datasets::DatasetDescriptor;
use crate::record::{Record, SearchResponse};

use super::{export, FetchError};

/// Search endpoint path on the portal.
const SEARCH_PATH: &str = "/api/records/1.0/search/";

/// Remote face of one dataset: paginated queries plus the bulk-export
/// escape hatch.
///
/// The orchestrator only talks to this trait, which keeps its state machine
/// testable against an in-memory implementation.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Zero-row query returning only the advertised record count.
    async fn probe(&self, dataset: &DatasetDescriptor) -> Result<u64, FetchError>;

    /// Fetch one page of records starting at `start`.
    async fn fetch_page(
        &self,
        dataset: &DatasetDescriptor,
        start: u64,
        rows: u64,
    ) -> Result<Vec<Record>, FetchError>;

    /// Retrieve the entire dataset through the bulk export endpoint.
    async fn export(&self, dataset: &DatasetDescriptor) -> Result<Vec<Record>, FetchError>;

    /// Tear down and reopen the network session.
    fn rotate_session(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// HTTP client for the open-data portal.
pub struct ApiClient {
    /// Current page-fetch session; swapped wholesale on rotation.
    http: Mutex<reqwest::Client>,
    /// Separate client for bulk exports, which get a longer timeout.
    export_http: reqwest::Client,
    base: Url,
    user_agent: String,
    page_timeout: Duration,
}

impl ApiClient {
    /// Build a client from configuration.
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let base = Url::parse(&config.base_url)?;
        let page_timeout = Duration::from_secs(config.page_timeout_secs);
        let export_timeout = Duration::from_secs(config.export_timeout_secs);

        Ok(Self {
            http: Mutex::new(Self::build_session(&config.user_agent, page_timeout)?),
            export_http: Self::build_session(&config.user_agent, export_timeout)?,
            base,
            user_agent: config.user_agent.clone(),
            page_timeout,
        })
    }

    fn build_session(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(client)
    }

    fn session(&self) -> reqwest::Client {
        self.http.lock().clone()
    }

    async fn search(
        &self,
        dataset: &DatasetDescriptor,
        start: u64,
        rows: u64,
    ) -> Result<SearchResponse, FetchError> {
        let mut url = self.base.join(SEARCH_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("dataset", &dataset.name);
            query.append_pair("rows", &rows.to_string());
            query.append_pair("start", &start.to_string());
            for facet in &dataset.facets {
                query.append_pair("facet", facet);
            }
        }

        let response = self
            .session()
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        let page = response.json::<SearchResponse>().await?;
        Ok(page)
    }
}

#[async_trait]
impl DatasetSource for ApiClient {
    async fn probe(&self, dataset: &DatasetDescriptor) -> Result<u64, FetchError> {
        Ok(self.search(dataset, 0, 0).await?.nhits)
    }

    async fn fetch_page(
        &self,
        dataset: &DatasetDescriptor,
        start: u64,
        rows: u64,
    ) -> Result<Vec<Record>, FetchError> {
        let page = self.search(dataset, start, rows).await?;
        Ok(page.records.iter().map(Record::from_api).collect())
    }

    async fn export(&self, dataset: &DatasetDescriptor) -> Result<Vec<Record>, FetchError> {
        export::download(&self.export_http, &self.base, &dataset.name).await
    }

    fn rotate_session(&self) -> Result<(), FetchError> {
        *self.http.lock() = Self::build_session(&self.user_agent, self.page_timeout)?;
        Ok(())
    }
}
