use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value written for any field that could not be located on the page
pub const PLACEHOLDER: &str = "Not Found";

/// Source of the listing data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Source {
    Hipflat,
    LivingInsider,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Hipflat => write!(f, "Hipflat"),
            Source::LivingInsider => write!(f, "LivingInsider"),
        }
    }
}

/// One unit of extraction work, identified by its URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    /// Listing page the URL was harvested from
    pub page: Option<u32>,
    /// Position of the URL on that listing page
    pub position: Option<u32>,
}

impl WorkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page: None,
            position: None,
        }
    }

    pub fn with_position(mut self, page: u32, position: u32) -> Self {
        self.page = Some(page);
        self.position = Some(position);
        self
    }
}

/// Extracted fields of one work item, keyed by field name.
///
/// Records are append-only: once written to a store they are never touched
/// again. Empty values read back as [`PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    id: String,
    fields: BTreeMap<String, String>,
}

impl ProcessedRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn extend(&mut self, fields: impl IntoIterator<Item = (String, String)>) {
        self.fields.extend(fields);
    }

    pub fn get(&self, field: &str) -> &str {
        match self.fields.get(field) {
            Some(value) if !value.trim().is_empty() => value,
            _ => PLACEHOLDER,
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Lays the record out in column order. The identifier column always
    /// carries the record id, whatever the field map says.
    pub fn to_row(&self, columns: &[String], id_column: &str) -> Vec<String> {
        columns
            .iter()
            .map(|column| {
                if column == id_column {
                    self.id.clone()
                } else {
                    self.get(column).to_string()
                }
            })
            .collect()
    }
}

/// A point of interest listed near a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyPlace {
    pub name: String,
    pub distance: String,
}

impl NearbyPlace {
    pub fn not_found() -> Self {
        Self {
            name: PLACEHOLDER.to_string(),
            distance: PLACEHOLDER.to_string(),
        }
    }
}

/// One sample of a price history chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub canvas_index: usize,
    pub currency_format: String,
    pub date: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_missing_fields_read_as_placeholder() {
        let record = ProcessedRecord::new("https://a.test/1")
            .with("price", "")
            .with("floor", "12");

        assert_eq!(record.get("price"), PLACEHOLDER);
        assert_eq!(record.get("bedroom"), PLACEHOLDER);
        assert_eq!(record.get("floor"), "12");
    }

    #[test]
    fn row_puts_id_in_id_column() {
        let record = ProcessedRecord::new("https://a.test/1")
            .with("link", "something else")
            .with("price", "3 MB");
        let columns = vec!["price".to_string(), "link".to_string(), "space".to_string()];

        assert_eq!(
            record.to_row(&columns, "link"),
            vec!["3 MB", "https://a.test/1", PLACEHOLDER]
        );
    }
}
