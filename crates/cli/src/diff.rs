// Keyed table comparison for `traitlist verify`
// Pure functions: two tables in, matched/unmatched/diff rows out.
// No IO, no clap, no formatting.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use traitlist_recon::numeric::parse_numeric;
use traitlist_recon::quantile::relative_rmsd;
use traitlist_recon::Table;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub key: String,
    /// Absolute tolerance for numeric cells.
    pub tolerance: f64,
    /// Per-column overrides for algorithm-sensitive columns.
    pub column_tolerance: BTreeMap<String, f64>,
}

impl DiffOptions {
    pub fn new(key: impl Into<String>, tolerance: f64) -> Self {
        Self {
            key: key.into(),
            tolerance,
            column_tolerance: BTreeMap::new(),
        }
    }

    pub fn tolerance_for(&self, column: &str) -> f64 {
        self.column_tolerance
            .get(column)
            .copied()
            .unwrap_or(self.tolerance)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub results: Vec<DiffRow>,
    pub summary: DiffSummary,
    /// Non-key columns present in both tables, in primary column order.
    pub columns: Vec<String>,
    pub drift: Vec<ColumnDrift>,
}

impl DiffResult {
    pub fn keys_with(&self, status: RowStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Cell differences outside tolerance, in row then column order.
    pub fn mismatches(&self) -> impl Iterator<Item = (&str, &ColumnDiff)> {
        self.results.iter().flat_map(|r| {
            r.diffs
                .iter()
                .filter(|d| !d.within_tolerance)
                .map(move |d| (r.key.as_str(), d))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Matched,
    OnlyPrimary,
    OnlyReference,
    Diff,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Matched => "matched",
            RowStatus::OnlyPrimary => "only_primary",
            RowStatus::OnlyReference => "only_reference",
            RowStatus::Diff => "diff",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffRow {
    pub status: RowStatus,
    pub key: String,
    pub diffs: Vec<ColumnDiff>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDiff {
    pub column: String,
    pub primary: String,
    pub reference: String,
    /// Absolute difference when both cells are numeric.
    pub delta: Option<f64>,
    pub tolerance: Option<f64>,
    pub within_tolerance: bool,
}

/// Scale-aware dispersion of one numeric column across shared keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDrift {
    pub column: String,
    pub pairs: usize,
    /// RMSD between primary and reference over the reference's sample stddev.
    pub relative_rmsd: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Primary,
    Reference,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Primary => "primary",
            Side::Reference => "reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKey {
    pub side: Side,
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub primary_rows: usize,
    pub reference_rows: usize,
    pub matched: usize,
    pub only_primary: usize,
    pub only_reference: usize,
    pub diff: usize,
    pub diff_outside_tolerance: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("{} table has no key column '{key}'", .side.as_str())]
    MissingKey { side: Side, key: String },

    #[error("{}", format_duplicates(.0))]
    DuplicateKeys(Vec<DuplicateKey>),
}

fn format_duplicates(dups: &[DuplicateKey]) -> String {
    let mut out = String::from("duplicate keys found:");
    for dup in dups {
        out.push_str(&format!(
            "\n  {} key {:?} appears {} times",
            dup.side.as_str(),
            dup.key,
            dup.count
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub fn key_column(table: &Table, key: &str, side: Side) -> Result<usize, DiffError> {
    table.position(key).ok_or_else(|| DiffError::MissingKey {
        side,
        key: key.to_string(),
    })
}

/// Trimmed key of every row, in row order. A null key is the empty string.
pub fn row_keys(table: &Table, key_col: usize) -> Vec<String> {
    (0..table.len())
        .map(|row| table.cell(row, key_col).unwrap_or("").to_string())
        .collect()
}

/// Keys appearing more than once, sorted by key.
pub fn find_duplicates(keys: &[String], side: Side) -> Vec<DuplicateKey> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, count)| DuplicateKey {
            side,
            key: key.to_string(),
            count,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Cell comparison
// ---------------------------------------------------------------------------

/// Absolute delta and whether it is within `tolerance`.
///
/// Epsilon-inclusive: a delta that equals the tolerance in decimal terms
/// passes even when IEEE-754 rounding lands it a few ulps above.
pub fn within_tolerance(primary: f64, reference: f64, tolerance: f64) -> (f64, bool) {
    let delta = (primary - reference).abs();
    let scale = 1.0_f64
        .max(primary.abs())
        .max(reference.abs())
        .max(delta)
        .max(tolerance);
    let eps = f64::EPSILON * 16.0 * scale;
    (delta, delta <= tolerance + eps)
}

/// Compare two cells. `None` when they agree exactly.
///
/// Cells that both parse as numbers are compared with `tolerance`; anything
/// else must match as text. Null and blank are the same.
pub fn compare_cells(
    column: &str,
    primary: Option<&str>,
    reference: Option<&str>,
    tolerance: f64,
) -> Option<ColumnDiff> {
    let p = primary.map(str::trim).unwrap_or("");
    let r = reference.map(str::trim).unwrap_or("");
    if p == r {
        return None;
    }

    let diff = match (parse_numeric(p), parse_numeric(r)) {
        (Some(pv), Some(rv)) => {
            let (delta, within) = within_tolerance(pv, rv, tolerance);
            ColumnDiff {
                column: column.to_string(),
                primary: p.to_string(),
                reference: r.to_string(),
                delta: Some(delta),
                tolerance: Some(tolerance),
                within_tolerance: within,
            }
        }
        _ => ColumnDiff {
            column: column.to_string(),
            primary: p.to_string(),
            reference: r.to_string(),
            delta: None,
            tolerance: None,
            within_tolerance: false,
        },
    };
    Some(diff)
}

// ---------------------------------------------------------------------------
// Core reconciliation
// ---------------------------------------------------------------------------

pub fn reconcile(
    primary: &Table,
    reference: &Table,
    options: &DiffOptions,
) -> Result<DiffResult, DiffError> {
    // 1. Key columns and duplicate check
    let p_key = key_column(primary, &options.key, Side::Primary)?;
    let r_key = key_column(reference, &options.key, Side::Reference)?;
    let p_keys = row_keys(primary, p_key);
    let r_keys = row_keys(reference, r_key);

    let mut duplicates = find_duplicates(&p_keys, Side::Primary);
    duplicates.extend(find_duplicates(&r_keys, Side::Reference));
    if !duplicates.is_empty() {
        return Err(DiffError::DuplicateKeys(duplicates));
    }

    // 2. Shared non-key columns, primary order
    let columns: Vec<(String, usize, usize)> = primary
        .headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != p_key)
        .filter_map(|(i, h)| reference.position(h).map(|j| (h.clone(), i, j)))
        .collect();

    // 3. Index reference side
    let r_index: HashMap<&str, usize> = r_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    let mut r_consumed = vec![false; reference.len()];
    let mut results = Vec::new();
    let mut numeric_pairs: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); columns.len()];

    // 4. Primary rows in order
    for (p_row, key) in p_keys.iter().enumerate() {
        let Some(&r_row) = r_index.get(key.as_str()) else {
            results.push(DiffRow {
                status: RowStatus::OnlyPrimary,
                key: key.clone(),
                diffs: Vec::new(),
            });
            continue;
        };
        r_consumed[r_row] = true;

        let mut diffs = Vec::new();
        for (idx, (name, p_col, r_col)) in columns.iter().enumerate() {
            let p_cell = primary.cell(p_row, *p_col);
            let r_cell = reference.cell(r_row, *r_col);

            if let (Some(pv), Some(rv)) = (p_cell.and_then(parse_numeric), r_cell.and_then(parse_numeric)) {
                numeric_pairs[idx].0.push(pv);
                numeric_pairs[idx].1.push(rv);
            }
            if let Some(diff) = compare_cells(name, p_cell, r_cell, options.tolerance_for(name)) {
                diffs.push(diff);
            }
        }

        results.push(DiffRow {
            status: if diffs.is_empty() {
                RowStatus::Matched
            } else {
                RowStatus::Diff
            },
            key: key.clone(),
            diffs,
        });
    }

    // 5. Reference rows not consumed
    for (i, key) in r_keys.iter().enumerate() {
        if !r_consumed[i] {
            results.push(DiffRow {
                status: RowStatus::OnlyReference,
                key: key.clone(),
                diffs: Vec::new(),
            });
        }
    }

    // 6. Drift over numeric columns
    let drift = columns
        .iter()
        .zip(&numeric_pairs)
        .filter(|(_, (p, _))| !p.is_empty())
        .map(|((name, _, _), (p, r))| ColumnDrift {
            column: name.clone(),
            pairs: p.len(),
            relative_rmsd: relative_rmsd(p, r),
        })
        .collect();

    // 7. Summary
    let count = |status: RowStatus| results.iter().filter(|r| r.status == status).count();
    let summary = DiffSummary {
        primary_rows: primary.len(),
        reference_rows: reference.len(),
        matched: count(RowStatus::Matched),
        only_primary: count(RowStatus::OnlyPrimary),
        only_reference: count(RowStatus::OnlyReference),
        diff: count(RowStatus::Diff),
        diff_outside_tolerance: results
            .iter()
            .filter(|r| r.diffs.iter().any(|d| !d.within_tolerance))
            .count(),
    };

    Ok(DiffResult {
        results,
        summary,
        columns: columns.into_iter().map(|(name, _, _)| name).collect(),
        drift,
    })
}
