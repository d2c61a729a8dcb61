//! Shared data types for page ranges, extracted tables, document metadata and entities.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Half-open range of zero-based page indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRange {
    /// First page in the range (inclusive, zero-based).
    pub start: usize,
    /// One past the last page in the range.
    pub end: usize,
}

impl PageRange {
    /// Creates a new range `[start, end)`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Creates a range covering exactly one page.
    #[must_use]
    pub const fn single(page: usize) -> Self {
        Self {
            start: page,
            end: page.saturating_add(1),
        }
    }

    /// Number of pages in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the range contains no pages.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the page indices in the range.
    pub fn pages(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Returns `true` if `page` lies inside the range.
    #[must_use]
    pub const fn contains(&self, page: usize) -> bool {
        page >= self.start && page < self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // One-based for humans reading logs and progress messages.
        match self.len() {
            0 => write!(f, "no pages"),
            1 => write!(f, "page {}", self.start.saturating_add(1)),
            _ => write!(f, "pages {}-{}", self.start.saturating_add(1), self.end),
        }
    }
}

/// A single extracted table cell. `None` marks an empty cell.
pub type Cell = Option<String>;

/// A table extracted from one or more statement pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Optional caption or section name reported by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Column headers in display order.
    pub headers: Vec<String>,
    /// Data rows; each row is aligned with `headers` where possible.
    pub rows: Vec<Vec<Cell>>,
    /// Indices into `rows` that hold summary/subtotal lines.
    #[serde(default)]
    pub summary_row_indices: BTreeSet<usize>,
}

impl Table {
    /// Creates a table from headers and rows with no summary rows marked.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: None,
            headers,
            rows,
            summary_row_indices: BTreeSet::new(),
        }
    }

    /// Number of data rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One metadata value with the model's optional confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    /// The reported value, as text.
    pub value: String,
    /// Confidence in `[0.0, 1.0]` when the model reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl MetadataField {
    /// Creates a field without a confidence score.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            confidence: None,
        }
    }

    /// Creates a field with a confidence score.
    #[must_use]
    pub fn scored(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: Some(confidence),
        }
    }

    /// Returns `true` when the value carries no information.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        let v = self.value.trim();
        v.is_empty() || v.eq_ignore_ascii_case("null") || v.eq_ignore_ascii_case("unknown")
    }
}

/// Document-level metadata (carrier, broker, statement date, totals), keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentMetadata {
    /// Fields ordered by name.
    pub fields: BTreeMap<String, MetadataField>,
}

impl DocumentMetadata {
    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetadataField> {
        self.fields.get(name)
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, name: impl Into<String>, field: MetadataField) {
        self.fields.insert(name.into(), field);
    }

    /// Returns `true` if no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A group or company named on the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Display name as reported.
    pub name: String,
    /// Remaining attributes (group number, agent, premium, ...).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    /// Creates an entity with no extra attributes.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_range_display_is_one_based() {
        assert_eq!(PageRange::new(0, 3).to_string(), "pages 1-3");
        assert_eq!(PageRange::single(4).to_string(), "page 5");
        assert_eq!(PageRange::new(2, 2).to_string(), "no pages");
    }

    #[test]
    fn test_metadata_blank_values() {
        assert!(MetadataField::new("  ").is_blank());
        assert!(MetadataField::new("null").is_blank());
        assert!(MetadataField::new("Unknown").is_blank());
        assert!(!MetadataField::new("Aetna").is_blank());
    }
}
