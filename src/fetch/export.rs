//! Bulk CSV export fallback
//!
//! The portal's export page links to a full dump of each dataset as
//! semicolon-delimited CSV. This path is used when pagination is unreliable
//! or the dataset is large: scrape the export page for the CSV link, download
//! it, and parse rows into records.

use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::record::Record;

use super::FetchError;

/// Retrieve the entire dataset through its export page.
pub(crate) async fn download(
    client: &reqwest::Client,
    base: &Url,
    dataset: &str,
) -> Result<Vec<Record>, FetchError> {
    let page_url = base.join(&format!("/explore/dataset/{dataset}/export/"))?;
    debug!("Fetching export page {}", page_url);

    let html = client
        .get(page_url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let link = find_csv_link(&html, &page_url)
        .ok_or_else(|| FetchError::MissingExportLink(page_url.to_string()))?;
    debug!("Downloading export {}", link);

    let body = client
        .get(link)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let records = parse_export(&body)?;
    info!("Exported {} records for {}", records.len(), dataset);
    Ok(records)
}

/// Find the first CSV link on an export page.
fn find_csv_link(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;

    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            if href.contains("csv") {
                if let Ok(url) = base.join(href) {
                    return Some(url);
                }
            }
        }
    }

    None
}

/// Parse a semicolon-delimited export dump into records.
fn parse_export(body: &str) -> Result<Vec<Record>, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        records.push(Record::from_csv_row(&headers, &row?));
    }
    Ok(records)
}
