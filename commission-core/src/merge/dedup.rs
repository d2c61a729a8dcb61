//! Table signatures and row hashes.

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

use crate::types::{Cell, Table};

/// The part of a table's signature that identifies the logical table.
///
/// Row count completes the signature but decides which copy wins rather
/// than whether two copies are the same table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    headers: Vec<String>,
    first_row: Option<Vec<Cell>>,
    second_row: Option<Vec<Cell>>,
}

/// Full table signature: headers, the first two rows and the row count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSignature {
    /// Identity of the logical table.
    pub key: SignatureKey,
    /// Rows in this copy.
    pub row_count: usize,
}

impl TableSignature {
    /// Computes the signature of `table`.
    #[must_use]
    pub fn of(table: &Table) -> Self {
        Self {
            key: SignatureKey {
                headers: table.headers.iter().map(|h| fold(h)).collect(),
                first_row: table.rows.first().map(|r| fold_row(r)),
                second_row: table.rows.get(1).map(|r| fold_row(r)),
            },
            row_count: table.row_count(),
        }
    }
}

fn fold(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn fold_row(row: &[Cell]) -> Vec<Cell> {
    row.iter()
        .map(|c| c.as_deref().map(fold).filter(|s| !s.is_empty()))
        .collect()
}

/// SHA-256 of a row's cells, scoped by the table's headers.
#[must_use]
pub fn row_hash(headers: &[String], row: &[Cell]) -> String {
    let mut hasher = Sha256::new();
    for header in headers {
        hasher.update(fold(header).as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1e]);
    for cell in row {
        match cell.as_deref().map(fold) {
            Some(text) if !text.is_empty() => hasher.update(text.as_bytes()),
            _ => hasher.update([0x00]),
        }
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Keeps the rows of `table` for which `keep` returns `true`, remapping
/// summary indices. Returns how many rows were dropped.
pub fn retain_rows(table: &mut Table, mut keep: impl FnMut(&[Cell]) -> bool) -> usize {
    let before = table.rows.len();
    let mut remap = HashMap::new();
    let mut kept = Vec::with_capacity(before);
    for (old, row) in std::mem::take(&mut table.rows).into_iter().enumerate() {
        if keep(&row) {
            remap.insert(old, kept.len());
            kept.push(row);
        }
    }
    table.summary_row_indices = table
        .summary_row_indices
        .iter()
        .filter_map(|i| remap.get(i).copied())
        .collect::<BTreeSet<_>>();
    table.rows = kept;
    before - table.rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Some((*v).to_string())).collect()
    }

    #[test]
    fn test_signature_ignores_case_and_spacing() {
        let a = Table::new(vec!["Group  Name".into()], vec![cells(&["Acme"]), cells(&["Beta"])]);
        let b = Table::new(vec!["group name".into()], vec![cells(&["ACME"]), cells(&["beta "])]);
        assert_eq!(TableSignature::of(&a), TableSignature::of(&b));
    }

    #[test]
    fn test_signature_key_ignores_row_count() {
        let short = Table::new(vec!["A".into()], vec![cells(&["1"]), cells(&["2"])]);
        let long = Table::new(vec!["A".into()], vec![cells(&["1"]), cells(&["2"]), cells(&["3"])]);
        let (s, l) = (TableSignature::of(&short), TableSignature::of(&long));
        assert_eq!(s.key, l.key);
        assert_ne!(s, l);
    }

    #[test]
    fn test_row_hash_scoped_by_headers() {
        let row = cells(&["Total", "100.00"]);
        let h1 = row_hash(&["Group".into(), "Amount".into()], &row);
        let h2 = row_hash(&["Agent".into(), "Amount".into()], &row);
        assert_ne!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, row_hash(&["group".into(), "amount".into()], &row));
    }

    #[test]
    fn test_empty_cell_and_blank_text_hash_alike() {
        let headers = vec!["A".to_string(), "B".to_string()];
        let a = vec![Some("x".to_string()), None];
        let b = vec![Some("x".to_string()), Some("  ".to_string())];
        assert_eq!(row_hash(&headers, &a), row_hash(&headers, &b));
    }

    #[test]
    fn test_retain_rows_remaps_summary_indices() {
        let mut table = Table::new(
            vec!["A".into()],
            vec![cells(&["dup"]), cells(&["keep"]), cells(&["Total"])],
        );
        table.summary_row_indices = [0, 2].into_iter().collect();
        let dropped = retain_rows(&mut table, |row| row[0].as_deref() != Some("dup"));
        assert_eq!(dropped, 1);
        assert_eq!(table.rows, vec![cells(&["keep"]), cells(&["Total"])]);
        assert_eq!(table.summary_row_indices, [1].into_iter().collect());
    }
}
