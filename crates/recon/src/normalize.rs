//! Source normalization and per-source trait adapters.
//!
//! Schema quirks stay here: the rest of the engine sees `SourceRecord`s and
//! rows through the [`SourceAdapter`] capability set, never raw columns.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::{FamilyConfig, FamilyKey, SourceConfig};
use crate::error::ReconError;
use crate::model::{Defects, SourceRecord, SourceTag};
use crate::numeric::{classify, NumericCell};
use crate::table::Table;

// ---------------------------------------------------------------------------
// SourceNormalizer
// ---------------------------------------------------------------------------

/// Normalized tuples for one source, plus row accounting.
#[derive(Debug, Clone)]
pub struct NormalizedSource {
    pub source: SourceTag,
    /// Deduplicated `(id, name)` tuples in first-occurrence order.
    pub records: Vec<SourceRecord>,
    pub rows_read: usize,
    pub null_id_skipped: usize,
}

/// Project a source table to `(canonical_id, display_name)` tuples.
///
/// Fails if the id column or any name column is missing. Rows whose id is
/// null or blank are skipped and counted.
pub fn normalize_source(
    source: SourceTag,
    table: &Table,
    cfg: &SourceConfig,
    defects: &mut Defects,
) -> Result<NormalizedSource, ReconError> {
    let id_col = table.require(&cfg.id_column)?;
    let name_cols = cfg
        .name_columns
        .iter()
        .map(|c| table.require(c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen: HashSet<(&str, Option<&str>)> = HashSet::new();
    let mut records = Vec::new();
    let mut null_id_skipped = 0;

    for row in 0..table.len() {
        let Some(id) = table.cell(row, id_col) else {
            null_id_skipped += 1;
            continue;
        };
        let name = name_cols.iter().find_map(|&c| table.cell(row, c));
        if seen.insert((id, name)) {
            records.push(SourceRecord {
                canonical_id: id.to_string(),
                display_name: name.map(str::to_string),
                source,
            });
        }
    }

    defects.record(source.as_str(), "null_id", null_id_skipped);
    tracing::info!(
        source = source.as_str(),
        rows = table.len(),
        skipped = null_id_skipped,
        tuples = records.len(),
        "normalized source"
    );

    Ok(NormalizedSource {
        source,
        records,
        rows_read: table.len(),
        null_id_skipped,
    })
}

// ---------------------------------------------------------------------------
// NameOracle
// ---------------------------------------------------------------------------

/// Raw name to canonical id lookup, matched case-insensitively.
///
/// Keys are trimmed and lowercased. When case-only variants map to different
/// ids, the first mapping in row order wins. Collisions are counted once per
/// affected name key, however many rows repeat the losing variant.
#[derive(Debug, Clone, Default)]
pub struct NameOracle {
    map: BTreeMap<String, String>,
    collided: BTreeSet<String>,
}

impl NameOracle {
    pub fn build(
        table: &Table,
        raw_name_column: &str,
        id_column: &str,
    ) -> Result<Self, ReconError> {
        let name_col = table.require(raw_name_column)?;
        let id_col = table.require(id_column)?;

        let mut oracle = Self::default();
        for row in 0..table.len() {
            let (Some(name), Some(id)) = (table.cell(row, name_col), table.cell(row, id_col))
            else {
                continue;
            };
            oracle.insert(name, id);
        }
        Ok(oracle)
    }

    fn insert(&mut self, raw_name: &str, id: &str) {
        let key = name_key(raw_name);
        match self.map.get(&key) {
            Some(existing) if existing != id => {
                self.collided.insert(key);
            }
            Some(_) => {}
            None => {
                self.map.insert(key, id.to_string());
            }
        }
    }

    pub fn resolve(&self, raw_name: &str) -> Option<&str> {
        self.map.get(&name_key(raw_name)).map(String::as_str)
    }

    /// Number of distinct name keys seen with more than one id.
    pub fn collisions(&self) -> usize {
        self.collided.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn name_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// SourceAdapter
// ---------------------------------------------------------------------------

/// Row-shaped view of one source's trait fields.
pub trait SourceAdapter {
    /// Trait fields in configured order.
    fn list_fields(&self) -> &[String];
    /// Number of logical rows.
    fn row_count(&self) -> usize;
    /// Canonical id of a row; `None` when the row has no usable id.
    fn canonical_id(&self, row: usize) -> Option<&str>;
    /// Field value of a row, by index into `list_fields`.
    fn get_numeric(&self, row: usize, field: usize) -> NumericCell;
}

/// One column per field; one logical row per table row.
pub struct WideAdapter<'a> {
    table: &'a Table,
    id_col: usize,
    fields: &'a [String],
    field_cols: Vec<usize>,
}

impl<'a> WideAdapter<'a> {
    pub fn new(table: &'a Table, id_column: &str, fields: &'a [String]) -> Result<Self, ReconError> {
        let id_col = table.require(id_column)?;
        let field_cols = fields
            .iter()
            .map(|f| table.require(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            table,
            id_col,
            fields,
            field_cols,
        })
    }
}

impl SourceAdapter for WideAdapter<'_> {
    fn list_fields(&self) -> &[String] {
        self.fields
    }

    fn row_count(&self) -> usize {
        self.table.len()
    }

    fn canonical_id(&self, row: usize) -> Option<&str> {
        self.table.cell(row, self.id_col)
    }

    fn get_numeric(&self, row: usize, field: usize) -> NumericCell {
        match self.field_cols.get(field) {
            Some(&col) => classify(self.table.cell(row, col)),
            None => NumericCell::Absent,
        }
    }
}

/// Trait/value rows pivoted to one logical row per canonical id.
///
/// A field is populated for an id when any of its rows carries a valid number
/// for that trait. Invalid values, unkeyed rows and unresolved names are
/// counted while pivoting; the pivoted cells are never `Invalid`.
pub struct LongAdapter {
    fields: Vec<String>,
    rows: Vec<(String, Vec<Option<f64>>)>,
}

impl LongAdapter {
    pub fn build(
        table: &Table,
        family: &FamilyConfig,
        source: &SourceConfig,
        oracle: Option<&NameOracle>,
        scope: &str,
        defects: &mut Defects,
    ) -> Result<Self, ReconError> {
        let (trait_column, value_column) = match (&family.trait_column, &family.value_column) {
            (Some(t), Some(v)) => (t, v),
            _ => {
                return Err(ReconError::ConfigValidation(format!(
                    "family '{scope}': long layout requires trait_column and value_column"
                )))
            }
        };
        let key = family.key(source);
        let key_col = match key {
            FamilyKey::Id(c) | FamilyKey::RawName(c) => table.require(c)?,
        };
        let trait_col = table.require(trait_column)?;
        let value_col = table.require(value_column)?;

        let field_index: BTreeMap<&str, usize> = family
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();

        let mut position: BTreeMap<String, usize> = BTreeMap::new();
        let mut rows: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        let mut null_key = 0;
        let mut unresolved = 0;
        let mut invalid = 0;

        for row in 0..table.len() {
            let Some(raw_key) = table.cell(row, key_col) else {
                null_key += 1;
                continue;
            };
            let id = match key {
                FamilyKey::Id(_) => raw_key,
                FamilyKey::RawName(_) => match oracle.and_then(|o| o.resolve(raw_key)) {
                    Some(id) => id,
                    None => {
                        unresolved += 1;
                        continue;
                    }
                },
            };
            let Some(&field) = table
                .cell(row, trait_col)
                .and_then(|t| field_index.get(t))
            else {
                continue;
            };
            let value = match classify(table.cell(row, value_col)) {
                NumericCell::Value(v) => v,
                NumericCell::Absent => continue,
                NumericCell::Invalid => {
                    invalid += 1;
                    continue;
                }
            };

            let slot = match position.get(id) {
                Some(&i) => i,
                None => {
                    position.insert(id.to_string(), rows.len());
                    rows.push((id.to_string(), vec![None; family.fields.len()]));
                    rows.len() - 1
                }
            };
            // First valid value per (id, field) is kept; only presence is counted.
            let cell = &mut rows[slot].1[field];
            if cell.is_none() {
                *cell = Some(value);
            }
        }

        defects.record(scope, "null_id", null_key);
        defects.record(scope, "unresolved_name", unresolved);
        defects.record(scope, "invalid_numeric", invalid);

        Ok(Self {
            fields: family.fields.clone(),
            rows,
        })
    }
}

impl SourceAdapter for LongAdapter {
    fn list_fields(&self) -> &[String] {
        &self.fields
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn canonical_id(&self, row: usize) -> Option<&str> {
        self.rows.get(row).map(|(id, _)| id.as_str())
    }

    fn get_numeric(&self, row: usize, field: usize) -> NumericCell {
        match self.rows.get(row).and_then(|(_, cells)| cells.get(field)) {
            Some(Some(v)) => NumericCell::Value(*v),
            _ => NumericCell::Absent,
        }
    }
}
