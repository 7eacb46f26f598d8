use crate::checkpoint::StoreSchema;
use crate::models::{Source, WorkItem};
use crate::scrapers::types::{Document, Extraction, FetchError};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Turns a URL into a page. Implemented over plain HTTP and over a browser.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Common trait for all listing sites.
/// A site knows its page layouts; the job runner knows nothing about them.
pub trait ListingSite: Send + Sync {
    fn source(&self) -> Source;

    /// Search result pages to harvest links from
    fn listing_pages(&self, first: u32, last: u32) -> Vec<WorkItem>;

    /// Detail links found on one listing page
    fn extract_links(&self, page: &Document) -> Result<Vec<String>>;

    /// Layout of the detail store, placed under `dir`
    fn detail_schema(&self, dir: &Path) -> StoreSchema;

    /// Pull the detail record, nearby places and price history from a page.
    /// Fields that cannot be found carry the placeholder value.
    fn extract_details(&self, page: &Document) -> Extraction;

    /// Whether detail pages list nearby places worth a satellite store
    fn collects_nearby(&self) -> bool {
        false
    }

    /// Whether detail pages carry price history charts
    fn collects_history(&self) -> bool {
        false
    }
}
