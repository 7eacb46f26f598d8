use crate::models::{ProcessedRecord, WorkItem, PLACEHOLDER};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a CSV store lives and which columns it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    path: PathBuf,
    columns: Vec<String>,
    id_column: String,
    required: Vec<String>,
}

impl StoreSchema {
    /// Create a schema. The identifier column is appended to the column list
    /// when the caller left it out.
    pub fn new(path: impl Into<PathBuf>, columns: &[&str], id_column: &str) -> Self {
        let mut columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        if !columns.iter().any(|c| c == id_column) {
            columns.push(id_column.to_string());
        }

        Self {
            path: path.into(),
            columns,
            id_column: id_column.to_string(),
            required: Vec::new(),
        }
    }

    /// Columns that must hold a real value for a row to count as complete.
    /// Without this every non-identifier column is checked.
    pub fn with_required<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }
}

/// What counts as "already processed" when rebuilding a checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResumePolicy {
    /// The identifier appears in the store
    #[default]
    Presence,
    /// The identifier appears on a row whose required columns hold no
    /// placeholder
    Complete,
}

/// Identifiers already represented in an output store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    ids: HashSet<String>,
}

impl CheckpointSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false when the identifier was already present
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for CheckpointSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Identifiers read back from an existing store
#[derive(Debug, Default)]
struct StoreScan {
    /// Every identifier with at least one row
    present: CheckpointSet,
    /// Identifiers with at least one row passing the completeness check
    complete: CheckpointSet,
}

impl StoreScan {
    fn checkpoint(&self, policy: ResumePolicy) -> CheckpointSet {
        match policy {
            ResumePolicy::Presence => self.present.clone(),
            ResumePolicy::Complete => self.complete.clone(),
        }
    }
}

/// Rebuild the checkpoint from the store's identifier column.
///
/// Never fails: a missing, empty or malformed store yields an empty set, which
/// only costs resumption.
pub fn load_processed(schema: &StoreSchema, policy: ResumePolicy) -> CheckpointSet {
    let checkpoint = scan_store(schema.path(), schema.id_column(), schema.required()).checkpoint(policy);
    log_resume(schema.path(), &checkpoint);
    checkpoint
}

/// Collect the distinct values of any column of a store, with the same soft
/// failure rules as [`load_processed`].
pub fn load_column(path: &Path, column: &str, policy: ResumePolicy) -> CheckpointSet {
    scan_store(path, column, &[]).checkpoint(policy)
}

fn log_resume(path: &Path, checkpoint: &CheckpointSet) {
    if !checkpoint.is_empty() {
        info!(
            "Resuming from {}: {} items already processed",
            path.display(),
            checkpoint.len()
        );
    }
}

fn scan_store(path: &Path, column: &str, required: &[String]) -> StoreScan {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => {
            info!("Store {} is empty, starting fresh", path.display());
            return StoreScan::default();
        }
        Ok(_) => {}
        Err(_) => {
            info!("No store found at {}, starting fresh", path.display());
            return StoreScan::default();
        }
    }

    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Could not open store {}: {}. Starting fresh.", path.display(), e);
            return StoreScan::default();
        }
    };

    let header: Vec<String> = match reader.headers() {
        Ok(headers) => headers.iter().map(|h| h.trim().to_string()).collect(),
        Err(e) => {
            warn!("Could not read header of {}: {}. Starting fresh.", path.display(), e);
            return StoreScan::default();
        }
    };

    let Some(id_index) = header.iter().position(|h| h == column) else {
        warn!(
            "Store {} has no '{}' column, resumption disabled for this run",
            path.display(),
            column
        );
        return StoreScan::default();
    };

    let checked = checked_indices(&header, id_index, required);
    let mut present = CheckpointSet::default();
    let mut complete = CheckpointSet::default();
    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Malformed store {}: {}. Starting fresh.", path.display(), e);
                return StoreScan::default();
            }
        };

        let Some(id) = row.get(id_index).map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };

        if checked.iter().all(|&i| is_filled(row.get(i).unwrap_or_default())) {
            complete.insert(id);
        } else {
            debug!("Row for {} has placeholder values", id);
        }
        present.insert(id);
    }

    StoreScan { present, complete }
}

/// Header positions the completeness check looks at
fn checked_indices(header: &[String], id_index: usize, required: &[String]) -> Vec<usize> {
    if required.is_empty() {
        return (0..header.len()).filter(|&i| i != id_index).collect();
    }
    header
        .iter()
        .enumerate()
        .filter(|(_, name)| required.contains(*name))
        .map(|(i, _)| i)
        .collect()
}

fn is_filled(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != PLACEHOLDER
}

/// Items still needing work, in input order
pub fn pending_items(all_items: &[WorkItem], checkpoint: &CheckpointSet) -> Vec<WorkItem> {
    all_items
        .iter()
        .filter(|item| !checkpoint.contains(&item.url))
        .cloned()
        .collect()
}

/// Append-only CSV store paired with its live checkpoint.
///
/// Every write is flushed before the identifier joins the checkpoint, so an
/// interruption loses at most the item in flight. The store holds at most one
/// record per identifier: a retried incomplete row is replaced, never
/// duplicated.
pub struct CheckpointStore {
    schema: StoreSchema,
    /// Column order of the file on disk
    columns: Vec<String>,
    checkpoint: CheckpointSet,
    present: CheckpointSet,
    writer: csv::Writer<File>,
}

impl CheckpointStore {
    /// Load the checkpoint and open the store for appending. The header is
    /// written only when the file is new or empty; an existing header decides
    /// the column order of appended rows.
    pub fn open(schema: StoreSchema, policy: ResumePolicy) -> Result<Self> {
        let checkpoint = load_processed(&schema, policy);
        let path = schema.path().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let existing_len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let columns = match read_header(&path).filter(|_| existing_len > 0) {
            Some(header) => existing_layout(&schema, header)?,
            None => schema.columns().to_vec(),
        };

        // Under Presence every row already counts as processed
        let present = match policy {
            ResumePolicy::Presence => checkpoint.clone(),
            ResumePolicy::Complete => load_column(&path, schema.id_column(), ResumePolicy::Presence),
        };

        let mut file = open_append(&path)?;

        // A crash mid-row leaves no trailing newline; start on a fresh line.
        if existing_len > 0 && !ends_with_newline(&path)? {
            file.write_all(b"\n")
                .with_context(|| format!("Failed to repair store {}", path.display()))?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if existing_len == 0 {
            writer
                .write_record(&columns)
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
            writer.flush()?;
            debug!("Created store {}", path.display());
        }

        Ok(Self {
            schema,
            columns,
            checkpoint,
            present,
            writer,
        })
    }

    /// Append one record and mark its identifier as processed.
    ///
    /// A record whose identifier is already in the checkpoint is not written
    /// again. An identifier that only has an incomplete row keeps that row
    /// unless the new record is complete, in which case it replaces it.
    pub fn record_processed(&mut self, record: &ProcessedRecord) -> Result<()> {
        let id = record.id();
        if self.checkpoint.contains(id) {
            debug!("{} already recorded in {}", id, self.path().display());
            return Ok(());
        }

        if self.present.contains(id) {
            if !self.is_complete(record) {
                debug!("{} is still incomplete, keeping its existing row", id);
                self.checkpoint.insert(id);
                return Ok(());
            }
            self.remove_rows(id)?;
        }

        self.append(record)?;
        self.flush()?;
        self.checkpoint.insert(id);
        self.present.insert(id);
        Ok(())
    }

    /// Append every row produced for one identifier, then mark it. Rows left
    /// by an earlier incomplete attempt are replaced.
    pub fn record_group(&mut self, id: &str, records: &[ProcessedRecord]) -> Result<()> {
        if self.checkpoint.contains(id) {
            debug!("{} already recorded in {}", id, self.path().display());
            return Ok(());
        }

        if self.present.contains(id) {
            self.remove_rows(id)?;
        }

        for record in records {
            self.append(record)?;
        }
        self.flush()?;
        self.checkpoint.insert(id);
        self.present.insert(id);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush store {}", self.schema.path().display()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checkpoint.contains(id)
    }

    pub fn checkpoint(&self) -> &CheckpointSet {
        &self.checkpoint
    }

    /// Column order rows are written in
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn path(&self) -> &Path {
        self.schema.path()
    }

    fn is_complete(&self, record: &ProcessedRecord) -> bool {
        let id_column = self.schema.id_column();
        let required = self.schema.required();
        self.columns
            .iter()
            .filter(|c| c.as_str() != id_column)
            .filter(|c| required.is_empty() || required.contains(*c))
            .all(|c| is_filled(record.get(c)))
    }

    fn append(&mut self, record: &ProcessedRecord) -> Result<()> {
        let row = record.to_row(&self.columns, self.schema.id_column());
        self.writer
            .write_record(&row)
            .with_context(|| format!("Failed to append to {}", self.schema.path().display()))
    }

    /// Rewrite the store without the rows of `id`, then reopen it for
    /// appending.
    fn remove_rows(&mut self, id: &str) -> Result<()> {
        self.flush()?;
        let path = self.schema.path().to_path_buf();
        let id_index = self
            .columns
            .iter()
            .position(|c| c == self.schema.id_column())
            .with_context(|| format!("Store {} lost its identifier column", path.display()))?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let staging = path.with_extension("csv.tmp");
        let mut staged = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        staged.write_record(reader.headers()?)?;
        let mut removed = 0;
        for row in reader.records() {
            let row = row.with_context(|| format!("Failed to read {}", path.display()))?;
            if row.get(id_index).map(str::trim) == Some(id) {
                removed += 1;
                continue;
            }
            staged.write_record(&row)?;
        }
        staged.flush()?;
        drop(staged);

        fs::rename(&staging, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        self.writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(open_append(&path)?);

        debug!("Replaced {} incomplete rows for {} in {}", removed, id, path.display());
        Ok(())
    }
}

fn read_header(path: &Path) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path).ok()?;
    let headers = reader.headers().ok()?;
    Some(headers.iter().map(|h| h.trim().to_string()).collect())
}

/// Column order for appending to a store that already has a header. Schema
/// columns missing from it are not stored.
fn existing_layout(schema: &StoreSchema, header: Vec<String>) -> Result<Vec<String>> {
    if !header.iter().any(|c| c == schema.id_column()) {
        bail!(
            "Store {} has no '{}' column; rows appended to it could never be resumed",
            schema.path().display(),
            schema.id_column()
        );
    }

    if header != schema.columns() {
        let missing: Vec<&str> = schema
            .columns()
            .iter()
            .filter(|c| !header.contains(*c))
            .map(String::as_str)
            .collect();
        warn!(
            "Header of {} differs from the expected columns, appending in its order; not stored: {:?}",
            schema.path().display(),
            missing
        );
    }

    Ok(header)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open store {}", path.display()))
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn schema(dir: &TempDir) -> StoreSchema {
        StoreSchema::new(dir.path().join("details.csv"), &["price", "floor", "link"], "link")
    }

    fn items(urls: &[&str]) -> Vec<WorkItem> {
        urls.iter().map(|u| WorkItem::new(*u)).collect()
    }

    fn urls(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|i| i.url.as_str()).collect()
    }

    fn record(url: &str) -> ProcessedRecord {
        ProcessedRecord::new(url).with("price", "1 MB").with("floor", "3")
    }

    #[test]
    fn empty_checkpoint_keeps_everything_in_order() {
        let all = items(&["u1", "u2", "u3"]);
        let pending = pending_items(&all, &CheckpointSet::default());
        assert_eq!(pending, all);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let checkpoint: CheckpointSet = vec!["u1".to_string()].into_iter().collect();
        assert!(pending_items(&[], &checkpoint).is_empty());
    }

    #[test]
    fn missing_store_gives_empty_checkpoint() {
        let dir = TempDir::new().unwrap();
        let checkpoint = load_processed(&schema(&dir), ResumePolicy::Presence);
        assert!(checkpoint.is_empty());
    }

    #[test]
    fn store_without_id_column_gives_empty_checkpoint() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(schema.path(), "price,url\n1 MB,u1\n").unwrap();

        assert!(load_processed(&schema, ResumePolicy::Presence).is_empty());
    }

    #[test]
    fn malformed_store_gives_empty_checkpoint() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(schema.path(), b"price,floor,link\n1,2,u1\n\xff\xfe,3,u2\n").unwrap();

        assert!(load_processed(&schema, ResumePolicy::Presence).is_empty());
    }

    #[test]
    fn recorded_item_is_no_longer_pending() {
        let dir = TempDir::new().unwrap();
        let all = items(&["u1", "u2", "u3"]);
        let schema = schema(&dir);
        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Presence).unwrap();

        store.record_processed(&record("u2")).unwrap();

        assert!(store.contains("u2"));
        assert_eq!(urls(&pending_items(&all, store.checkpoint())), vec!["u1", "u3"]);

        let reloaded = load_processed(&schema, ResumePolicy::Presence);
        assert!(reloaded.contains("u2"));
        assert_eq!(urls(&pending_items(&all, &reloaded)), vec!["u1", "u3"]);
    }

    #[test]
    fn header_is_written_once_across_runs() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = CheckpointStore::open(schema(&dir), ResumePolicy::Presence).unwrap();
            store.record_processed(&record("u1")).unwrap();
        }
        {
            let mut store = CheckpointStore::open(schema(&dir), ResumePolicy::Presence).unwrap();
            store.record_processed(&record("u2")).unwrap();
        }

        let content = fs::read_to_string(dir.path().join("details.csv")).unwrap();
        assert_eq!(content, "price,floor,link\n1 MB,3,u1\n1 MB,3,u2\n");
    }

    #[test]
    fn duplicate_record_is_not_written_twice() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(schema(&dir), ResumePolicy::Presence).unwrap();
        store.record_processed(&record("u1")).unwrap();
        store.record_processed(&record("u1")).unwrap();
        drop(store);

        let content = fs::read_to_string(dir.path().join("details.csv")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn interrupted_run_resumes_with_the_rest_in_order() {
        let dir = TempDir::new().unwrap();
        let all = items(&["u1", "u2", "u3", "u4", "u5"]);

        {
            let mut store = CheckpointStore::open(schema(&dir), ResumePolicy::Presence).unwrap();
            for item in all.iter().take(2) {
                store.record_processed(&record(&item.url)).unwrap();
            }
        }

        let store = CheckpointStore::open(schema(&dir), ResumePolicy::Presence).unwrap();
        assert_eq!(
            urls(&pending_items(&all, store.checkpoint())),
            vec!["u3", "u4", "u5"]
        );
    }

    #[test]
    fn partial_last_line_is_terminated_before_appending() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(schema.path(), "price,floor,link\n1 MB,3,u1").unwrap();

        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Presence).unwrap();
        assert!(store.contains("u1"));
        store.record_processed(&record("u2")).unwrap();
        drop(store);

        let content = fs::read_to_string(schema.path()).unwrap();
        assert_eq!(content, "price,floor,link\n1 MB,3,u1\n1 MB,3,u2\n");
    }

    #[test]
    fn complete_policy_retries_placeholder_rows() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(
            schema.path(),
            format!("price,floor,link\n1 MB,3,u1\n{},3,u2\n", PLACEHOLDER),
        )
        .unwrap();

        let presence = load_processed(&schema, ResumePolicy::Presence);
        assert!(presence.contains("u1") && presence.contains("u2"));

        let complete = load_processed(&schema, ResumePolicy::Complete);
        assert!(complete.contains("u1"));
        assert!(!complete.contains("u2"));
    }

    #[test]
    fn completeness_only_checks_required_columns() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir).with_required(["price"]);
        fs::write(schema.path(), "price,floor,link
1 MB,,u1
,3,u2
").unwrap();

        let complete = load_processed(&schema, ResumePolicy::Complete);
        assert!(complete.contains("u1"));
        assert!(!complete.contains("u2"));
    }

    #[test]
    fn retried_incomplete_row_is_never_duplicated() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        let seeded = format!("price,floor,link\n1 MB,3,u1\n{},3,u2\n", PLACEHOLDER);
        fs::write(schema.path(), &seeded).unwrap();
        let still_missing = ProcessedRecord::new("u2").with("floor", "3");

        for _ in 0..2 {
            let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Complete).unwrap();
            assert!(!store.contains("u2"));
            store.record_processed(&still_missing).unwrap();
            store.record_processed(&still_missing).unwrap();
        }
        assert_eq!(fs::read_to_string(schema.path()).unwrap(), seeded);

        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Complete).unwrap();
        store.record_processed(&record("u2")).unwrap();
        drop(store);

        let content = fs::read_to_string(schema.path()).unwrap();
        assert_eq!(content, "price,floor,link\n1 MB,3,u1\n1 MB,3,u2\n");
        assert_eq!(load_processed(&schema, ResumePolicy::Complete).len(), 2);
    }

    #[test]
    fn rows_follow_the_existing_header_order() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(schema.path(), "link,price,floor\nu1,1 MB,3\n").unwrap();

        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Presence).unwrap();
        assert_eq!(store.columns(), ["link", "price", "floor"]);
        store
            .record_processed(&ProcessedRecord::new("u2").with("price", "2 MB").with("floor", "4"))
            .unwrap();
        drop(store);

        let content = fs::read_to_string(schema.path()).unwrap();
        assert_eq!(content, "link,price,floor\nu1,1 MB,3\nu2,2 MB,4\n");

        let reloaded = load_processed(&schema, ResumePolicy::Presence);
        let expected: CheckpointSet = vec!["u1".to_string(), "u2".to_string()].into_iter().collect();
        assert_eq!(reloaded, expected);
    }

    #[test]
    fn store_without_id_column_is_not_appended_to() {
        let dir = TempDir::new().unwrap();
        let schema = schema(&dir);
        fs::write(schema.path(), "price,url\n1 MB,u1\n").unwrap();

        assert!(CheckpointStore::open(schema.clone(), ResumePolicy::Presence).is_err());
        assert_eq!(fs::read_to_string(schema.path()).unwrap(), "price,url\n1 MB,u1\n");
    }

    #[test]
    fn group_marks_identifier_once_for_many_rows() {
        let dir = TempDir::new().unwrap();
        let schema = StoreSchema::new(
            dir.path().join("nearby.csv"),
            &["nearby", "distance", "link"],
            "link",
        );
        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Presence).unwrap();
        let rows = vec![
            ProcessedRecord::new("u1").with("nearby", "BTS Asok").with("distance", "300 m"),
            ProcessedRecord::new("u1").with("nearby", "Terminal 21").with("distance", "450 m"),
        ];

        store.record_group("u1", &rows).unwrap();
        store.record_group("u1", &rows).unwrap();
        drop(store);

        let content = fs::read_to_string(schema.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(load_processed(&schema, ResumePolicy::Presence).len(), 1);
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let schema = StoreSchema::new(
            dir.path().join("out/nested/details.csv"),
            &["price", "floor", "link"],
            "link",
        );

        let mut store = CheckpointStore::open(schema.clone(), ResumePolicy::Presence).unwrap();
        store.record_processed(&record("u1")).unwrap();

        assert!(schema.path().is_file());
    }
}
