pub mod browser;
pub mod extract;
pub mod hipflat;
pub mod http;
pub mod livinginsider;
pub mod traits;
pub mod types;

pub use browser::BrowserFetcher;
pub use hipflat::HipflatSite;
pub use http::HttpFetcher;
pub use livinginsider::LivingInsiderSite;
pub use traits::{ListingSite, PageFetcher};
pub use types::{Document, Extraction, FetchError, ScrapeSettings};

use anyhow::Result;

/// Listing sites with a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SiteKind {
    Hipflat,
    Livinginsider,
}

/// How pages are retrieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FetcherKind {
    #[default]
    Http,
    Browser,
}

pub fn build_site(kind: SiteKind) -> Result<Box<dyn ListingSite>> {
    Ok(match kind {
        SiteKind::Hipflat => Box::new(HipflatSite::new()?),
        SiteKind::Livinginsider => Box::new(LivingInsiderSite::new()?),
    })
}

pub fn build_fetcher(kind: FetcherKind, settings: &ScrapeSettings) -> Result<Box<dyn PageFetcher>> {
    Ok(match kind {
        FetcherKind::Http => Box::new(HttpFetcher::new(settings)?),
        FetcherKind::Browser => Box::new(BrowserFetcher::new(settings)?),
    })
}
