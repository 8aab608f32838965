//! Airparif measurement feed
//!
//! Complementary air-quality measurements from the Airparif ArcGIS
//! FeatureServer. Plain REST: one query, no pagination, no checkpoint, no
//! export fallback. A failed fetch degrades to an empty snapshot so the rest
//! of the batch is unaffected.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::AirparifConfig;
use crate::record::Record;

use super::FetchError;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Value,
}

/// Client for the Airparif FeatureServer query endpoint.
pub struct AirparifClient {
    http: reqwest::Client,
    config: AirparifConfig,
}

impl AirparifClient {
    /// Build a client from configuration.
    pub fn new(config: AirparifConfig, user_agent: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(Self { http, config })
    }

    /// Fetch measurements from the configured year onwards.
    pub async fn measurements(&self) -> Result<Vec<Record>, FetchError> {
        let mut url = Url::parse(&self.config.base_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("where", &format!("date_ech >= '{}-01-01'", self.config.year));
            query.append_pair("outFields", "*");
            query.append_pair("f", "geojson");
            query.append_pair("returnGeometry", "true");
        }

        let collection = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<FeatureCollection>()
            .await?;

        Ok(flatten_features(&collection))
    }
}

fn flatten_features(collection: &FeatureCollection) -> Vec<Record> {
    collection
        .features
        .iter()
        .map(|feature| Record::from_api(&feature.properties))
        .collect()
}
