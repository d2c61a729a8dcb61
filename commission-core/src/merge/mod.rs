//! Consolidates chunk results into one document result.
//!
//! - [`ResultMerger`] - table/row dedup, metadata and entity merge
//! - [`TableSignature`] and [`row_hash`] - duplicate detection keys
//! - [`reconcile_totals`] and [`parse_money`] - authoritative statement total

mod dedup;
mod totals;

pub use dedup::{retain_rows, row_hash, SignatureKey, TableSignature};
pub use totals::{is_total_field, parse_money, reconcile_totals, TotalCandidate};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::extraction::{ChunkProvenance, ChunkSuccess};
use crate::types::{DocumentMetadata, Entity, MetadataField, PageRange, Table};

/// One successful chunk handed to the merger.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInput {
    /// Chunk position in document order.
    pub index: usize,
    /// Pages the chunk owns.
    pub page_range: PageRange,
    /// What the chunk extracted.
    pub success: ChunkSuccess,
}

/// Counts describing what the merge removed and resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Tables across all chunks.
    pub tables_before: usize,
    /// Tables after signature dedup.
    pub tables_after: usize,
    /// Rows across all chunks.
    pub rows_before: usize,
    /// Rows after table and row dedup.
    pub rows_after: usize,
    /// `rows_before - rows_after`.
    pub duplicates_removed: usize,
    /// Entities after name dedup.
    pub entities: usize,
    /// Total candidates that disagreed with the chosen total.
    pub total_conflicts: usize,
}

/// The consolidated result of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedResult {
    /// Deduplicated tables in document order.
    pub tables: Vec<Table>,
    /// One value per field.
    pub document_metadata: DocumentMetadata,
    /// Deduplicated groups and companies.
    pub groups_and_companies: Vec<Entity>,
    /// Where each piece came from, failed chunks included.
    pub chunk_provenance: Vec<ChunkProvenance>,
    /// Merge counters.
    pub stats: MergeStats,
}

/// Stateless merger of chunk outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMerger;

struct Candidate {
    chunk: usize,
    table: Table,
}

impl ResultMerger {
    /// Merges successful chunk outcomes. Inputs may arrive in any order.
    #[must_use]
    pub fn merge(&self, inputs: &[MergeInput]) -> MergedResult {
        let mut ordered: Vec<&MergeInput> = inputs.iter().collect();
        ordered.sort_by_key(|i| (i.page_range.start, i.index));

        let (tables, mut stats) = merge_tables(&ordered);
        let (document_metadata, total_conflicts) = merge_metadata(&ordered);
        let groups_and_companies = merge_entities(&ordered);

        stats.total_conflicts = total_conflicts;
        stats.entities = groups_and_companies.len();
        tracing::info!(
            event = "merge_complete",
            chunks = ordered.len(),
            tables_before = stats.tables_before,
            tables_after = stats.tables_after,
            duplicates_removed = stats.duplicates_removed,
            total_conflicts,
            "merge_complete"
        );

        MergedResult {
            tables,
            document_metadata,
            groups_and_companies,
            chunk_provenance: Vec::new(),
            stats,
        }
    }
}

fn merge_tables(ordered: &[&MergeInput]) -> (Vec<Table>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut candidates = Vec::new();
    for (chunk, input) in ordered.iter().enumerate() {
        for table in &input.success.tables {
            stats.tables_before += 1;
            stats.rows_before += table.row_count();
            candidates.push(Candidate {
                chunk,
                table: table.clone(),
            });
        }
    }
    let slots = collapse_signatures(candidates);

    // First chunk in which each row appears among the surviving tables.
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for candidate in &slots {
        for row in &candidate.table.rows {
            let entry = first_seen
                .entry(row_hash(&candidate.table.headers, row))
                .or_insert(candidate.chunk);
            *entry = (*entry).min(candidate.chunk);
        }
    }

    let mut trimmed = Vec::with_capacity(slots.len());
    for Candidate { chunk, mut table } in slots {
        let headers = table.headers.clone();
        let dropped = retain_rows(&mut table, |row| {
            first_seen
                .get(&row_hash(&headers, row))
                .is_none_or(|&first| first >= chunk)
        });
        // Nothing left but rows already emitted by an earlier chunk.
        if dropped > 0 && table.rows.is_empty() {
            continue;
        }
        trimmed.push(Candidate { chunk, table });
    }

    // Dropping lead-in rows can give two survivors the same leading rows.
    let tables: Vec<Table> = collapse_signatures(trimmed)
        .into_iter()
        .map(|candidate| candidate.table)
        .collect();
    stats.rows_after = tables.iter().map(Table::row_count).sum();
    stats.tables_after = tables.len();
    stats.duplicates_removed = stats.rows_before.saturating_sub(stats.rows_after);
    (tables, stats)
}

/// One table per signature, kept at its first position; the fuller copy wins.
fn collapse_signatures(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut slots: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut by_key: HashMap<SignatureKey, usize> = HashMap::new();
    for candidate in candidates {
        let signature = TableSignature::of(&candidate.table);
        match by_key.get(&signature.key) {
            Some(&slot) => {
                if candidate.table.row_count() > slots[slot].table.row_count() {
                    slots[slot] = candidate;
                }
            }
            None => {
                by_key.insert(signature.key, slots.len());
                slots.push(candidate);
            }
        }
    }
    slots
}

fn merge_metadata(ordered: &[&MergeInput]) -> (DocumentMetadata, usize) {
    let mut merged = DocumentMetadata::default();
    let mut totals: BTreeMap<String, Vec<TotalCandidate>> = BTreeMap::new();

    for (chunk, input) in ordered.iter().enumerate() {
        for (name, field) in &input.success.document_metadata.fields {
            if field.is_blank() {
                continue;
            }
            if is_total_field(name) {
                totals.entry(name.clone()).or_default().push(TotalCandidate {
                    chunk,
                    field: field.clone(),
                });
                continue;
            }
            let replace = merged
                .get(name)
                .is_none_or(|current| outranks(field, current));
            if replace {
                merged.insert(name.clone(), field.clone());
            }
        }
    }

    let mut conflicts = 0;
    for (name, candidates) in totals {
        if let Some((field, disagreeing)) = reconcile_totals(&candidates) {
            conflicts += disagreeing;
            merged.insert(name, field);
        }
    }
    (merged, conflicts)
}

/// Higher confidence replaces; a scored value replaces an unscored one;
/// otherwise the first value stays.
fn outranks(candidate: &MetadataField, current: &MetadataField) -> bool {
    match (candidate.confidence, current.confidence) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn entity_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn merge_entities(ordered: &[&MergeInput]) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for input in ordered {
        for entity in &input.success.entities {
            let key = entity_key(&entity.name);
            if key.is_empty() {
                continue;
            }
            match by_key.get(&key) {
                Some(&slot) => {
                    let existing = &mut merged[slot];
                    for (attr, value) in &entity.attributes {
                        let missing = existing.attributes.get(attr).is_none_or(serde_json::Value::is_null);
                        if missing {
                            existing.attributes.insert(attr.clone(), value.clone());
                        }
                    }
                }
                None => {
                    by_key.insert(key, merged.len());
                    merged.push(entity.clone());
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Some((*v).to_string())).collect()
    }

    fn table(rows: &[&[&str]]) -> Table {
        Table::new(
            vec!["Group".into(), "Premium".into()],
            rows.iter().map(|r| cells(r)).collect(),
        )
    }

    fn input(index: usize, start: usize, tables: Vec<Table>) -> MergeInput {
        MergeInput {
            index,
            page_range: PageRange::new(start, start + 1),
            success: ChunkSuccess {
                tables,
                ..ChunkSuccess::default()
            },
        }
    }

    #[test]
    fn test_overlap_duplicate_keeps_fuller_table() {
        let partial = table(&[&["Acme", "10"], &["Beta", "20"]]);
        let full = table(&[&["Acme", "10"], &["Beta", "20"], &["Cara", "30"]]);
        let merged = ResultMerger.merge(&[input(0, 0, vec![partial]), input(1, 1, vec![full.clone()])]);
        assert_eq!(merged.tables, vec![full]);
        assert_eq!(merged.stats.tables_before, 2);
        assert_eq!(merged.stats.tables_after, 1);
        assert_eq!(merged.stats.rows_before, 5);
        assert_eq!(merged.stats.rows_after, 3);
        assert_eq!(merged.stats.duplicates_removed, 2);
    }

    #[test]
    fn test_rows_repeated_from_earlier_chunk_are_dropped() {
        let first = table(&[&["Acme", "10"], &["Beta", "20"]]);
        // Continuation re-read the lead-in page, so it starts with Beta.
        let second = table(&[&["Beta", "20"], &["Cara", "30"], &["Dune", "40"]]);
        let merged = ResultMerger.merge(&[input(0, 0, vec![first]), input(1, 1, vec![second])]);
        assert_eq!(merged.tables.len(), 2);
        assert_eq!(merged.tables[1].rows, vec![cells(&["Cara", "30"]), cells(&["Dune", "40"])]);
        assert_eq!(merged.stats.duplicates_removed, 1);
    }

    #[test]
    fn test_repeated_rows_within_one_chunk_survive() {
        let t = table(&[&["Acme", "10"], &["Acme", "10"]]);
        let merged = ResultMerger.merge(&[input(0, 0, vec![t.clone()])]);
        assert_eq!(merged.tables, vec![t]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let inputs = vec![
            input(0, 0, vec![table(&[&["Acme", "10"], &["Beta", "20"]])]),
            input(1, 1, vec![table(&[&["Beta", "20"], &["Cara", "30"]])]),
            input(2, 2, vec![table(&[&["Beta", "20"], &["Cara", "30"], &["Dune", "1"]])]),
        ];
        let once = ResultMerger.merge(&inputs);
        let again = ResultMerger.merge(&[input(0, 0, once.tables.clone())]);
        assert_eq!(again.tables, once.tables);
        assert_eq!(again.stats.duplicates_removed, 0);
    }

    #[test]
    fn test_merge_is_idempotent_when_row_dedup_aligns_tables() {
        let inputs = vec![
            input(0, 0, vec![table(&[&["P", "1"], &["Q", "2"]])]),
            input(
                1,
                1,
                vec![
                    table(&[&["X", "9"], &["P", "1"], &["Q", "2"], &["R", "3"]]),
                    table(&[&["X", "9"], &["R", "3"], &["S", "4"]]),
                ],
            ),
        ];
        let once = ResultMerger.merge(&inputs);
        assert_eq!(
            once.tables,
            vec![
                table(&[&["P", "1"], &["Q", "2"]]),
                table(&[&["X", "9"], &["R", "3"], &["S", "4"]]),
            ]
        );
        assert_eq!(once.stats.tables_after, 2);
        assert_eq!(once.stats.rows_after, 5);

        let again = ResultMerger.merge(&[input(0, 0, once.tables.clone())]);
        assert_eq!(again.tables, once.tables);
        assert_eq!(again.stats.duplicates_removed, 0);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = input(0, 0, vec![table(&[&["Acme", "10"], &["Beta", "20"]])]);
        let b = input(1, 1, vec![table(&[&["Beta", "20"], &["Cara", "30"]])]);
        let forward = ResultMerger.merge(&[a.clone(), b.clone()]);
        let backward = ResultMerger.merge(&[b, a]);
        assert_eq!(forward.tables, backward.tables);
    }

    #[test]
    fn test_metadata_confidence_and_first_seen() {
        let mut first = input(0, 0, vec![]);
        first.success.document_metadata.insert("carrier_name", MetadataField::scored("Aetna", 0.6));
        first.success.document_metadata.insert("broker_company", MetadataField::new("Northside"));
        first.success.document_metadata.insert("statement_date", MetadataField::new("unknown"));
        let mut second = input(1, 1, vec![]);
        second.success.document_metadata.insert("carrier_name", MetadataField::scored("Aetna Inc", 0.9));
        second.success.document_metadata.insert("broker_company", MetadataField::new("Southside"));
        second.success.document_metadata.insert("statement_date", MetadataField::new("2024-03-31"));

        let merged = ResultMerger.merge(&[first, second]);
        let meta = &merged.document_metadata;
        assert_eq!(meta.value("carrier_name"), Some("Aetna Inc"));
        assert_eq!(meta.value("broker_company"), Some("Northside"));
        assert_eq!(meta.value("statement_date"), Some("2024-03-31"));
    }

    #[test]
    fn test_totals_reconciled_with_conflict_count() {
        let mut first = input(0, 0, vec![]);
        first.success.document_metadata.insert("total_amount", MetadataField::scored("$900.00", 0.8));
        let mut last = input(1, 1, vec![]);
        last.success.document_metadata.insert("total_amount", MetadataField::scored("$1,250.00", 0.8));
        let merged = ResultMerger.merge(&[first, last]);
        assert_eq!(merged.document_metadata.value("total_amount"), Some("$1,250.00"));
        assert_eq!(merged.stats.total_conflicts, 1);
    }

    #[test]
    fn test_entities_dedup_by_normalized_name() {
        let mut first = input(0, 0, vec![]);
        let mut acme = Entity::named("ACME Corp.");
        acme.attributes.insert("group_number".into(), serde_json::Value::Null);
        first.success.entities = vec![acme, Entity::named("Beta LLC")];
        let mut second = input(1, 1, vec![]);
        let mut acme_again = Entity::named("acme corp");
        acme_again.attributes.insert("group_number".into(), serde_json::json!("G-7"));
        acme_again.attributes.insert("agent".into(), serde_json::json!("Kim"));
        second.success.entities = vec![acme_again];

        let merged = ResultMerger.merge(&[first, second]);
        assert_eq!(merged.groups_and_companies.len(), 2);
        let acme = &merged.groups_and_companies[0];
        assert_eq!(acme.name, "ACME Corp.");
        assert_eq!(acme.attributes["group_number"], "G-7");
        assert_eq!(acme.attributes["agent"], "Kim");
        assert_eq!(merged.stats.entities, 2);
    }
}
