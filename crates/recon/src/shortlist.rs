use std::collections::BTreeMap;

use crate::config::{ShortlistEmit, ShortlistOrdering};
use crate::error::ReconError;
use crate::model::{FamilyTag, Keyed, OccurrenceCount, ShortlistRecord, UnionRecord, WithOccurrences};
use crate::traits::FamilyCounts;

/// Join the union with per-family counts and apply the any-of threshold rule.
///
/// Families without counts (not configured, or id never seen) count as 0.
/// Rows are ordered per `ordering`; with `ShortlistEmit::Qualifying` only
/// rows whose flag is set are kept.
pub fn build_shortlist(
    union: &[UnionRecord],
    counts: &[FamilyCounts],
    threshold: usize,
    ordering: ShortlistOrdering,
    emit: ShortlistEmit,
) -> Vec<ShortlistRecord> {
    select(evaluate(union, counts, threshold), ordering, emit)
}

/// One record per union row, in union order, qualifying or not.
pub fn evaluate(
    union: &[UnionRecord],
    counts: &[FamilyCounts],
    threshold: usize,
) -> Vec<ShortlistRecord> {
    let mut by_family: [Option<&FamilyCounts>; 3] = [None; 3];
    for fc in counts {
        by_family[fc.family.index()] = Some(fc);
    }

    union
        .iter()
        .map(|u| {
            let mut family_counts = [0usize; 3];
            let mut qualifies = [false; 3];
            for family in FamilyTag::ALL {
                let i = family.index();
                family_counts[i] = by_family[i].map_or(0, |fc| fc.get(&u.canonical_id));
                qualifies[i] = family_counts[i] >= threshold;
            }
            ShortlistRecord {
                canonical_id: u.canonical_id.clone(),
                display_name: u.display_name.clone(),
                counts: family_counts,
                qualifies,
                shortlist_flag: qualifies.iter().any(|q| *q),
            }
        })
        .collect()
}

/// Filter evaluated rows per `emit` and put them in output order.
pub fn select(
    evaluated: Vec<ShortlistRecord>,
    ordering: ShortlistOrdering,
    emit: ShortlistEmit,
) -> Vec<ShortlistRecord> {
    let total = evaluated.len();
    let mut rows: Vec<ShortlistRecord> = evaluated
        .into_iter()
        .filter(|r| emit == ShortlistEmit::All || r.shortlist_flag)
        .collect();
    sort_shortlist(&mut rows, ordering);
    tracing::info!(evaluated = total, emitted = rows.len(), "built shortlist");
    rows
}

/// Stable sort by display name (byte order), then canonical id; or by id alone.
pub fn sort_shortlist(rows: &mut [ShortlistRecord], ordering: ShortlistOrdering) {
    match ordering {
        ShortlistOrdering::DisplayName => rows.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        }),
        ShortlistOrdering::CanonicalId => rows.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id)),
    }
}

/// Check the flag equals the OR of per-family qualification at `threshold`.
pub fn verify_shortlist(rows: &[ShortlistRecord], threshold: usize) -> Result<(), ReconError> {
    for r in rows {
        let expected = r.counts.iter().any(|c| *c >= threshold);
        let qualifies_ok = r
            .counts
            .iter()
            .zip(r.qualifies.iter())
            .all(|(c, q)| (*c >= threshold) == *q);
        if r.shortlist_flag != expected || !qualifies_ok {
            return Err(ReconError::InvariantViolation(format!(
                "shortlist record '{}': flag disagrees with counts {:?}",
                r.canonical_id, r.counts
            )));
        }
    }
    Ok(())
}

/// Qualification combination label: `eive+try`, `aus_only`, `none`.
pub fn combination(record: &ShortlistRecord) -> String {
    let families: Vec<&str> = FamilyTag::ALL
        .into_iter()
        .filter(|f| record.qualifies_via(*f))
        .map(|f| f.as_str())
        .collect();
    match families.as_slice() {
        [] => "none".into(),
        [one] => format!("{one}_only"),
        many => many.join("+"),
    }
}

/// Attach occurrence counts, keeping the rows' order.
pub fn attach_occurrences<R: Keyed + Clone>(
    rows: &[R],
    occurrences: &BTreeMap<String, OccurrenceCount>,
) -> Vec<WithOccurrences<R>> {
    rows.iter()
        .map(|r| WithOccurrences {
            record: r.clone(),
            occurrences: occurrences
                .get(r.canonical_id())
                .copied()
                .unwrap_or_default(),
        })
        .collect()
}

/// Rows with at least `min_occurrences` total occurrences, order preserved.
pub fn with_min_occurrences<R: Clone>(
    rows: &[WithOccurrences<R>],
    min_occurrences: usize,
) -> Vec<WithOccurrences<R>> {
    rows.iter()
        .filter(|r| r.occurrences.total >= min_occurrences)
        .cloned()
        .collect()
}
