//! Modelling shortlist: ids with every field of the complete family populated
//! on one row, that also carry enough distinct canonical traits across the
//! configured trait sets.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ShortlistOrdering;
use crate::model::{Defects, ModellingRecord, UnionRecord};
use crate::normalize::SourceAdapter;
use crate::numeric::NumericCell;
use crate::traits::FamilyCounts;

/// Distinct canonical trait names per id for one trait set.
#[derive(Debug, Clone)]
pub struct TraitSetTraits {
    pub name: String,
    pub traits: BTreeMap<String, BTreeSet<String>>,
}

impl TraitSetTraits {
    pub fn get(&self, canonical_id: &str) -> Option<&BTreeSet<String>> {
        self.traits.get(canonical_id)
    }
}

/// Collect the canonical names of every field holding a valid number.
///
/// `canonical` is aligned with the adapter's fields; several fields may share
/// a canonical name and then count once. Rows without an id and unparseable
/// cells are counted under `scope`.
pub fn collect_traits(
    name: &str,
    adapter: &dyn SourceAdapter,
    canonical: &[String],
    scope: &str,
    defects: &mut Defects,
) -> TraitSetTraits {
    let mut traits: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut null_id = 0;
    let mut invalid = 0;

    for row in 0..adapter.row_count() {
        let Some(id) = adapter.canonical_id(row) else {
            null_id += 1;
            continue;
        };
        for (field, trait_name) in canonical.iter().enumerate() {
            match adapter.get_numeric(row, field) {
                NumericCell::Value(_) => {
                    traits
                        .entry(id.to_string())
                        .or_default()
                        .insert(trait_name.clone());
                }
                NumericCell::Invalid => invalid += 1,
                NumericCell::Absent => {}
            }
        }
    }

    defects.record(scope, "null_id", null_id);
    defects.record(scope, "invalid_numeric", invalid);
    tracing::info!(
        set = name,
        rows = adapter.row_count(),
        ids = traits.len(),
        "collected modelling traits"
    );

    TraitSetTraits {
        name: name.to_string(),
        traits,
    }
}

/// Ids with all `field_count` fields populated on at least one row.
pub fn complete_ids(counts: &FamilyCounts, field_count: usize) -> BTreeSet<String> {
    counts
        .counts
        .iter()
        .filter(|(_, c)| **c == field_count)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Union rows that are complete and reach `min_traits` distinct traits.
///
/// Ids outside the union never appear. Rows are ordered like the shortlist.
pub fn build_modelling(
    union: &[UnionRecord],
    complete: &BTreeSet<String>,
    sets: &[TraitSetTraits],
    min_traits: usize,
    ordering: ShortlistOrdering,
) -> Vec<ModellingRecord> {
    let mut rows: Vec<ModellingRecord> = union
        .iter()
        .filter(|u| complete.contains(&u.canonical_id))
        .map(|u| {
            let mut all: BTreeSet<&str> = BTreeSet::new();
            let set_counts = sets
                .iter()
                .map(|set| match set.get(&u.canonical_id) {
                    Some(names) => {
                        all.extend(names.iter().map(String::as_str));
                        names.len()
                    }
                    None => 0,
                })
                .collect();
            ModellingRecord {
                canonical_id: u.canonical_id.clone(),
                display_name: u.display_name.clone(),
                set_counts,
                total_traits: all.len(),
            }
        })
        .filter(|r| r.total_traits >= min_traits)
        .collect();

    match ordering {
        ShortlistOrdering::DisplayName => rows.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        }),
        ShortlistOrdering::CanonicalId => rows.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id)),
    }
    tracing::info!(
        complete = complete.len(),
        emitted = rows.len(),
        min_traits,
        "built modelling shortlist"
    );
    rows
}
