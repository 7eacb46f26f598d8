//! Batch jobs over a list of work items.
//!
//! Every job follows the same cycle: load the checkpoint, then for each
//! pending item fetch, extract and persist before moving on. Per-item
//! failures are logged and contained; only store I/O ends a run early.

use crate::checkpoint::{
    load_column, pending_items, CheckpointSet, CheckpointStore, ResumePolicy, StoreSchema,
};
use crate::models::{ProcessedRecord, WorkItem};
use crate::scrapers::{Document, FetchError, ListingSite, PageFetcher};
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// What to do with an item whose page could not be fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Leave it out of the store so the next run retries it
    #[default]
    Skip,
    /// Record it with placeholder values
    Placeholder,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub delay: Duration,
    pub on_failure: FailurePolicy,
    pub resume: ResumePolicy,
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

pub fn nearby_schema(dir: &Path) -> StoreSchema {
    StoreSchema::new(
        dir.join("nearby.csv"),
        &["condo_name", "nearby", "distance", "link"],
        "link",
    )
}

pub fn history_schema(dir: &Path) -> StoreSchema {
    StoreSchema::new(
        dir.join("historical_data.csv"),
        &["canvas_index", "currencyStringFormat", "date", "value", "link"],
        "link",
    )
}

pub fn links_schema(path: &Path) -> StoreSchema {
    StoreSchema::new(path, &["link", "page", "index", "source_page"], "source_page")
}

enum Step {
    Recorded,
    Failed,
    /// Nothing more to do after this item
    Finished,
}

/// One kind of batch job, driven by [`drive`]
trait Job {
    fn is_recorded(&self, url: &str) -> bool;

    fn persist(&mut self, item: &WorkItem, fetched: Result<Document, FetchError>) -> Result<Step>;

    fn flush(&mut self) -> Result<()>;
}

async fn drive<J, F>(
    job: &mut J,
    fetcher: &dyn PageFetcher,
    pending: Vec<WorkItem>,
    delay: Duration,
    shutdown: F,
) -> Result<RunSummary>
where
    J: Job,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let total = pending.len();
    let mut summary = RunSummary {
        pending: total,
        ..Default::default()
    };
    let mut outcome = Ok(());

    for (i, item) in pending.iter().enumerate() {
        if job.is_recorded(&item.url) {
            summary.skipped += 1;
            continue;
        }

        if i > 0 && !delay.is_zero() {
            tokio::select! {
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Processing {}/{} via {}: {}", i + 1, total, fetcher.name(), item.url);

        let fetched = tokio::select! {
            _ = &mut shutdown => {
                summary.interrupted = true;
                break;
            }
            fetched = fetcher.fetch(&item.url) => fetched,
        };

        if let Err(FetchError::Interrupted { .. }) = &fetched {
            summary.interrupted = true;
            break;
        }

        match job.persist(item, fetched) {
            Ok(Step::Recorded) => summary.processed += 1,
            Ok(Step::Failed) => summary.failed += 1,
            Ok(Step::Finished) => {
                summary.processed += 1;
                break;
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }

        info!("Remaining items to process: {}", total - i - 1);
    }

    if summary.interrupted {
        info!("Interrupt received, flushing stores before exit");
    }

    // Flush even when a store failed, so the other stores keep what they have
    let flushed = job.flush();
    outcome?;
    flushed?;

    info!(
        "Run finished: {} processed, {} failed, {} skipped{}",
        summary.processed,
        summary.failed,
        summary.skipped,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    Ok(summary)
}

/// Detail extraction: one record per link, plus satellite rows for nearby
/// places and price history when the site has them
pub struct DetailJob<'a> {
    site: &'a dyn ListingSite,
    fetcher: &'a dyn PageFetcher,
    details: CheckpointStore,
    nearby: Option<CheckpointStore>,
    history: Option<CheckpointStore>,
    options: RunOptions,
}

impl<'a> DetailJob<'a> {
    pub fn open(
        site: &'a dyn ListingSite,
        fetcher: &'a dyn PageFetcher,
        output_dir: &Path,
        options: RunOptions,
    ) -> Result<Self> {
        let details = CheckpointStore::open(site.detail_schema(output_dir), options.resume)?;
        let nearby = site
            .collects_nearby()
            .then(|| CheckpointStore::open(nearby_schema(output_dir), ResumePolicy::Presence))
            .transpose()?;
        let history = site
            .collects_history()
            .then(|| CheckpointStore::open(history_schema(output_dir), ResumePolicy::Presence))
            .transpose()?;

        Ok(Self {
            site,
            fetcher,
            details,
            nearby,
            history,
            options,
        })
    }

    /// Process every item not yet in the detail store, until done or until
    /// `shutdown` resolves.
    pub async fn run<F>(mut self, items: &[WorkItem], shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let pending = pending_items(items, self.details.checkpoint());
        info!(
            "🏠 {}: {} of {} links left to process",
            self.site.source(),
            pending.len(),
            items.len()
        );

        let fetcher = self.fetcher;
        let delay = self.options.delay;
        drive(&mut self, fetcher, pending, delay, shutdown).await
    }

    fn placeholder_record(item: &WorkItem) -> ProcessedRecord {
        let mut record = ProcessedRecord::new(item.url.as_str());
        annotate(&mut record, item);
        record
    }
}

impl Job for DetailJob<'_> {
    fn is_recorded(&self, url: &str) -> bool {
        self.details.contains(url)
    }

    fn persist(&mut self, item: &WorkItem, fetched: Result<Document, FetchError>) -> Result<Step> {
        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch {}: {}", item.url, e);
                if self.options.on_failure == FailurePolicy::Placeholder {
                    self.details.record_processed(&Self::placeholder_record(item))?;
                }
                return Ok(Step::Failed);
            }
        };

        let mut extraction = self.site.extract_details(&page);
        annotate(&mut extraction.record, item);

        let columns = self.details.columns();
        let dropped: Vec<&str> = extraction
            .record
            .field_names()
            .filter(|name| !columns.iter().any(|c| c.as_str() == *name))
            .collect();
        if !dropped.is_empty() {
            warn!("Fields without a column in the store for {}: {:?}", item.url, dropped);
        }

        // Satellites first: the detail row marks the item as done
        if let Some(store) = self.nearby.as_mut() {
            let condo_name = extraction.record.get("condo_name").to_string();
            let rows: Vec<ProcessedRecord> = extraction
                .nearby
                .iter()
                .map(|place| {
                    ProcessedRecord::new(item.url.as_str())
                        .with("condo_name", condo_name.as_str())
                        .with("nearby", place.name.as_str())
                        .with("distance", place.distance.as_str())
                })
                .collect();
            store.record_group(&item.url, &rows)?;
        }

        if let Some(store) = self.history.as_mut() {
            let rows: Vec<ProcessedRecord> = extraction
                .history
                .iter()
                .map(|point| {
                    ProcessedRecord::new(item.url.as_str())
                        .with("canvas_index", point.canvas_index.to_string())
                        .with("currencyStringFormat", point.currency_format.as_str())
                        .with("date", point.date.as_str())
                        .with("value", point.value.as_str())
                })
                .collect();
            store.record_group(&item.url, &rows)?;
        }

        self.details.record_processed(&extraction.record)?;
        Ok(Step::Recorded)
    }

    fn flush(&mut self) -> Result<()> {
        let mut result = self.details.flush();
        for store in [self.nearby.as_mut(), self.history.as_mut()].into_iter().flatten() {
            if let Err(e) = store.flush() {
                warn!("{:#}", e);
                result = result.and(Err(e));
            }
        }
        result
    }
}

/// Link harvesting: every listing page contributes its detail links, one
/// row per link, keyed by the page it came from
pub struct LinkJob<'a> {
    site: &'a dyn ListingSite,
    fetcher: &'a dyn PageFetcher,
    store: CheckpointStore,
    seen: CheckpointSet,
    options: RunOptions,
}

impl<'a> LinkJob<'a> {
    pub fn open(
        site: &'a dyn ListingSite,
        fetcher: &'a dyn PageFetcher,
        output: &Path,
        options: RunOptions,
    ) -> Result<Self> {
        let schema = links_schema(output);
        let seen = load_column(schema.path(), "link", ResumePolicy::Presence);
        let store = CheckpointStore::open(schema, ResumePolicy::Presence)?;

        Ok(Self {
            site,
            fetcher,
            store,
            seen,
            options,
        })
    }

    /// Harvest pages `first..=last`, stopping early at the first page
    /// without links.
    pub async fn run<F>(mut self, first: u32, last: u32, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let pages = self.site.listing_pages(first, last);
        let pending = pending_items(&pages, self.store.checkpoint());
        info!(
            "🔗 {}: {} of {} listing pages left to harvest",
            self.site.source(),
            pending.len(),
            pages.len()
        );

        let fetcher = self.fetcher;
        let delay = self.options.delay;
        drive(&mut self, fetcher, pending, delay, shutdown).await
    }
}

impl Job for LinkJob<'_> {
    fn is_recorded(&self, url: &str) -> bool {
        self.store.contains(url)
    }

    fn persist(&mut self, item: &WorkItem, fetched: Result<Document, FetchError>) -> Result<Step> {
        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch listing page {}: {}", item.url, e);
                return Ok(Step::Failed);
            }
        };

        let links = match self.site.extract_links(&page) {
            Ok(links) => links,
            Err(e) => {
                warn!("Error extracting links from {}: {:#}", item.url, e);
                return Ok(Step::Failed);
            }
        };

        if links.is_empty() {
            info!("No links on {}, assuming the last listing page was reached", item.url);
            return Ok(Step::Finished);
        }

        let page_number = item.page.map(|p| p.to_string()).unwrap_or_default();
        let mut rows = Vec::new();
        for (position, link) in links.into_iter().enumerate() {
            if !self.seen.insert(link.as_str()) {
                continue;
            }
            rows.push(
                ProcessedRecord::new(item.url.as_str())
                    .with("link", link)
                    .with("page", page_number.as_str())
                    .with("index", (position + 1).to_string()),
            );
        }

        info!("Extracted {} new links from {}", rows.len(), item.url);
        self.store.record_group(&item.url, &rows)?;
        Ok(Step::Recorded)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

fn annotate(record: &mut ProcessedRecord, item: &WorkItem) {
    if let Some(page) = item.page {
        record.set("page", page.to_string());
    }
    if let Some(position) = item.position {
        record.set("index", position.to_string());
    }
    record.set("scraped_at", Utc::now().to_rfc3339());
}
