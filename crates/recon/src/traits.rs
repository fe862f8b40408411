use std::collections::BTreeMap;

use crate::model::{Defects, FamilyTag, TraitCountRecord};
use crate::normalize::SourceAdapter;
use crate::numeric::NumericCell;

/// Per-id trait counts for one family.
#[derive(Debug, Clone)]
pub struct FamilyCounts {
    pub family: FamilyTag,
    pub counts: BTreeMap<String, usize>,
}

impl FamilyCounts {
    /// Count for an id; ids the family never saw count as 0.
    pub fn get(&self, canonical_id: &str) -> usize {
        self.counts.get(canonical_id).copied().unwrap_or(0)
    }

    pub fn records(&self) -> Vec<TraitCountRecord> {
        self.counts
            .iter()
            .map(|(id, &count)| TraitCountRecord {
                canonical_id: id.clone(),
                family: self.family,
                count,
            })
            .collect()
    }
}

/// For every id, the maximum number of populated fields on any single row.
///
/// "Populated" means the cell parses under `parse_numeric`. Blank cells are
/// absent; unparseable cells are absent and counted as `invalid_numeric`.
/// Rows without an id are skipped and counted as `null_id`.
pub fn count_traits(
    family: FamilyTag,
    adapter: &dyn SourceAdapter,
    defects: &mut Defects,
) -> FamilyCounts {
    let field_count = adapter.list_fields().len();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut null_id = 0;
    let mut invalid = 0;

    for row in 0..adapter.row_count() {
        let Some(id) = adapter.canonical_id(row) else {
            null_id += 1;
            continue;
        };
        let mut populated = 0;
        for field in 0..field_count {
            match adapter.get_numeric(row, field) {
                NumericCell::Value(_) => populated += 1,
                NumericCell::Invalid => invalid += 1,
                NumericCell::Absent => {}
            }
        }
        match counts.get_mut(id) {
            Some(best) => *best = (*best).max(populated),
            None => {
                counts.insert(id.to_string(), populated);
            }
        }
    }

    let scope = format!("family:{family}");
    defects.record(&scope, "null_id", null_id);
    defects.record(&scope, "invalid_numeric", invalid);
    tracing::info!(
        family = family.as_str(),
        rows = adapter.row_count(),
        ids = counts.len(),
        "counted traits"
    );

    FamilyCounts { family, counts }
}
