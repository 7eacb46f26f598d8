use crate::models::{NearbyPlace, PricePoint, ProcessedRecord};
use std::time::Duration;
use thiserror::Error;

/// Raw page handed from a fetcher to the extractors
#[derive(Debug, Clone)]
pub struct Document {
    /// URL that was requested
    pub url: String,
    pub html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Everything pulled from one detail page
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ProcessedRecord,
    pub nearby: Vec<NearbyPlace>,
    pub history: Vec<PricePoint>,
}

/// Why a page could not be fetched. All variants are per-item failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("browser failed on {url}: {message}")]
    Browser { url: String, message: String },
    #[error("operator confirmation for {url} was not received")]
    Interrupted { url: String },
}

/// Knobs shared by the fetchers
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub timeout: Duration,
    pub user_agent: String,
    /// Show the browser window instead of running headless
    pub headed: bool,
    /// Wait for the operator to press ENTER after each navigation
    pub confirm_challenge: bool,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            headed: false,
            confirm_challenge: false,
        }
    }
}
