//! Statement totals: money parsing and picking one authoritative figure.

use crate::types::MetadataField;

/// Parses a printed amount into cents.
///
/// Accepts currency symbols and codes, thousands separators, a leading minus
/// and accounting parentheses for negatives.
///
/// ```
/// use commission_core::merge::parse_money;
///
/// assert_eq!(parse_money("$1,234.56"), Some(123_456));
/// assert_eq!(parse_money("(12.00)"), Some(-1_200));
/// assert_eq!(parse_money("n/a"), None);
/// ```
#[must_use]
pub fn parse_money(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let negative = (trimmed.starts_with('(') && trimmed.ends_with(')'))
        || trimmed
            .chars()
            .take_while(|c| !c.is_ascii_digit())
            .any(|c| c == '-')
        || trimmed.ends_with('-');
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if !digits.chars().any(|c| c.is_ascii_digit()) || digits.matches('.').count() > 1 {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    let cents = (value * 100.0).round() as i64;
    Some(if negative { -cents } else { cents })
}

/// Whether a metadata field holds a statement total.
#[must_use]
pub fn is_total_field(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("total") && !lower.ends_with("confidence")
}

/// A total reported by one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalCandidate {
    /// Chunk position; later chunks win ties.
    pub chunk: usize,
    /// The reported field.
    pub field: MetadataField,
}

/// Picks the authoritative total and counts candidates that disagree with it.
///
/// Highest confidence wins (unscored ranks below any score); on a tie the
/// later chunk wins, since statements print their grand total last.
#[must_use]
pub fn reconcile_totals(candidates: &[TotalCandidate]) -> Option<(MetadataField, usize)> {
    let winner = candidates
        .iter()
        .filter(|c| !c.field.is_blank())
        .max_by(|a, b| {
            let rank = |c: &TotalCandidate| c.field.confidence.unwrap_or(-1.0);
            rank(a)
                .total_cmp(&rank(b))
                .then_with(|| a.chunk.cmp(&b.chunk))
        })?;

    let winning_amount = parse_money(&winner.field.value);
    let conflicts = candidates
        .iter()
        .filter(|c| !c.field.is_blank())
        .filter(|c| match (parse_money(&c.field.value), winning_amount) {
            (Some(a), Some(b)) => a != b,
            _ => c.field.value.trim() != winner.field.value.trim(),
        })
        .count();

    if conflicts > 0 {
        tracing::info!(
            event = "total_conflict",
            candidates = candidates.len(),
            conflicts,
            chosen = %winner.field.value,
            "total_conflict"
        );
    }
    Some((winner.field.clone(), conflicts))
}
