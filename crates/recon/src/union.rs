//! Union of all normalized sources, one record per canonical id.
//!
//! Rows are consumed strictly in source enumeration order (duke, eive,
//! mabberly, try_enhanced, austraits), each source in its own row order.
//! "First non-null name" and "first appearance" are defined against that
//! concatenation. Groups live in a `BTreeMap`, so emission order is the
//! byte order of `canonical_id` and never depends on hashing.

use std::collections::BTreeMap;

use crate::error::ReconError;
use crate::model::{Defects, SourceRecord, SourceTag, UnionRecord};
use crate::normalize::NormalizedSource;

#[derive(Debug, Default)]
struct Group {
    display_name: Option<String>,
    sources: Vec<SourceTag>,
    presence: [bool; 5],
}

/// Single-pass group-by over concatenated source records.
#[derive(Debug, Default)]
pub struct UnionBuilder {
    groups: BTreeMap<String, Group>,
    last_source: Option<SourceTag>,
}

impl UnionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one record. Records must arrive grouped by source in enumeration
    /// order; going back to an earlier source is an invariant violation.
    pub fn push(&mut self, record: &SourceRecord) -> Result<(), ReconError> {
        if let Some(last) = self.last_source {
            if record.source < last {
                return Err(ReconError::InvariantViolation(format!(
                    "union input out of order: '{}' after '{}'",
                    record.source, last
                )));
            }
        }
        self.last_source = Some(record.source);

        let group = self.groups.entry(record.canonical_id.clone()).or_default();
        if group.display_name.is_none() {
            if let Some(name) = &record.display_name {
                group.display_name = Some(name.trim().to_string());
            }
        }
        let idx = record.source.index();
        if !group.presence[idx] {
            group.presence[idx] = true;
            group.sources.push(record.source);
        }
        Ok(())
    }

    /// Emit records sorted by `canonical_id`. Groups without any name get an
    /// empty display name and are counted as `unnamed`.
    pub fn finish(self, defects: &mut Defects) -> Vec<UnionRecord> {
        let mut unnamed = 0;
        let records: Vec<UnionRecord> = self
            .groups
            .into_iter()
            .map(|(canonical_id, g)| {
                if g.display_name.is_none() {
                    unnamed += 1;
                }
                UnionRecord {
                    canonical_id,
                    display_name: g.display_name.unwrap_or_default(),
                    source_count: g.sources.len(),
                    sources: g.sources,
                    presence: g.presence,
                }
            })
            .collect();
        defects.record("union", "unnamed", unnamed);
        records
    }
}

/// Build the union from normalized sources.
///
/// The slice may be in any order; sources are visited in the fixed
/// enumeration order. A source supplied twice is an invariant violation.
pub fn build_union(
    sources: &[NormalizedSource],
    defects: &mut Defects,
) -> Result<Vec<UnionRecord>, ReconError> {
    let mut by_tag: BTreeMap<SourceTag, &NormalizedSource> = BTreeMap::new();
    for source in sources {
        if by_tag.insert(source.source, source).is_some() {
            return Err(ReconError::InvariantViolation(format!(
                "source '{}' supplied twice to the union",
                source.source
            )));
        }
    }

    let mut builder = UnionBuilder::new();
    let mut tuples = 0;
    for tag in SourceTag::ALL {
        let Some(source) = by_tag.get(&tag) else {
            continue;
        };
        for record in &source.records {
            if record.source != tag {
                return Err(ReconError::InvariantViolation(format!(
                    "record tagged '{}' inside source '{tag}'",
                    record.source
                )));
            }
            builder.push(record)?;
            tuples += 1;
        }
    }

    let union = builder.finish(defects);
    verify_union(&union)?;
    tracing::info!(tuples, taxa = union.len(), "built union");
    Ok(union)
}

/// Structural checks on a finished union.
pub fn verify_union(union: &[UnionRecord]) -> Result<(), ReconError> {
    for pair in union.windows(2) {
        if pair[0].canonical_id >= pair[1].canonical_id {
            return Err(ReconError::DuplicateKey {
                table: "union".into(),
                key: pair[1].canonical_id.clone(),
            });
        }
    }
    for record in union {
        let flagged = record.presence.iter().filter(|p| **p).count();
        let mut distinct = record.sources.clone();
        distinct.sort();
        distinct.dedup();
        if record.source_count != record.sources.len()
            || distinct.len() != record.sources.len()
            || flagged != record.source_count
        {
            return Err(ReconError::InvariantViolation(format!(
                "union record '{}': source_count {} disagrees with sources [{}]",
                record.canonical_id,
                record.source_count,
                record.sources_joined()
            )));
        }
    }
    Ok(())
}
