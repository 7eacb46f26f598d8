use crate::models::WorkItem;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

/// Marker the link harvesters write when a card had no link
const NO_LINK: &str = "No Link";

/// Read the work list: URL in the first column, optional header row.
///
/// When a header is present, `page` and `index` columns (any case) fill in the
/// ordinal metadata of each item.
pub fn read_work_items<P: AsRef<Path>>(path: P) -> Result<Vec<WorkItem>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open input file {}", path.display()))?;

    let mut page_column = None;
    let mut index_column = None;
    let mut items = Vec::new();

    for (row_number, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping unreadable input row {}: {}", row_number + 1, e);
                continue;
            }
        };

        let first = row.get(0).unwrap_or("");

        if row_number == 0 && parse_link(first).is_none() && first != NO_LINK {
            for (i, name) in row.iter().enumerate() {
                match name.to_lowercase().as_str() {
                    "page" => page_column = Some(i),
                    "index" | "position" => index_column = Some(i),
                    _ => {}
                }
            }
            debug!("Input header: {:?}", row);
            continue;
        }

        if first.is_empty() || first == NO_LINK {
            continue;
        }

        let Some(url) = parse_link(first) else {
            warn!("Skipping invalid URL on row {}: {}", row_number + 1, first);
            continue;
        };

        items.push(WorkItem {
            url,
            page: page_column.and_then(|i| parse_ordinal(row.get(i))),
            position: index_column.and_then(|i| parse_ordinal(row.get(i))),
        });
    }

    info!("Loaded {} work items from {}", items.len(), path.display());
    Ok(items)
}

fn parse_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| raw.to_string())
}

fn parse_ordinal(raw: Option<&str>) -> Option<u32> {
    let raw = raw?.trim();
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u32))
}
