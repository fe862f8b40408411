//! Records to canonical tables. Cell text produced here is exactly what gets
//! written and hashed, so every float goes through [`format_float`].

use std::collections::HashSet;

use crate::error::ReconError;
use crate::model::{
    FamilyTag, ModellingRecord, ShortlistRecord, ShortlistWithOccurrences, SourceTag, StatsOutput,
    UnionRecord, WithOccurrences,
};
use crate::occurrence::OccurrenceCounts;
use crate::table::Table;

pub const UNION_FILE: &str = "master_taxa_union.csv";
pub const SHORTLIST_FILE: &str = "shortlist_candidates.csv";
pub const SHORTLIST_OCCURRENCE_FILE: &str = "shortlist_with_gbif.csv";
pub const OCCURRENCE_FILE: &str = "gbif_occurrence_counts.csv";
pub const MODELLING_FILE: &str = "modelling_shortlist.csv";
pub const MODELLING_OCCURRENCE_FILE: &str = "modelling_shortlist_with_gbif.csv";

pub fn shortlist_min_occurrence_file(min_occurrences: usize) -> String {
    format!("shortlist_with_gbif_ge{min_occurrences}.csv")
}

pub fn modelling_min_occurrence_file(min_occurrences: usize) -> String {
    format!("modelling_shortlist_with_gbif_ge{min_occurrences}.csv")
}

pub fn stats_file(dataset: &str) -> String {
    format!("{dataset}_species_quantiles.csv")
}

/// Suffixes of the per-variable statistics columns, in column order.
pub const STAT_SUFFIXES: [&str; 8] = ["mean", "stddev", "min", "max", "q05", "q50", "q95", "iqr"];

/// Fixed-decimal rendering. Negative zero (including values that round to
/// zero) is written without the sign.
pub fn format_float(v: f64, decimals: usize) -> String {
    let s = format!("{v:.decimals$}");
    match s.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_string(),
        _ => s,
    }
}

fn fmt_bool(b: bool) -> Option<String> {
    Some(if b { "true" } else { "false" }.to_string())
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> Option<String> {
    v.map(|v| format_float(v, decimals))
}

fn text(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn union_table(union: &[UnionRecord]) -> Table {
    let mut cols = vec![
        "canonical_id".to_string(),
        "display_name".into(),
        "sources".into(),
        "source_count".into(),
    ];
    cols.extend(SourceTag::ALL.iter().map(|t| format!("presence_{t}")));

    let mut table = Table::new("master_taxa_union", cols);
    for u in union {
        let mut row = vec![
            text(&u.canonical_id),
            text(&u.display_name),
            text(&u.sources_joined()),
            Some(u.source_count.to_string()),
        ];
        row.extend(SourceTag::ALL.iter().map(|t| fmt_bool(u.is_present(*t))));
        table.push(row);
    }
    table
}

fn shortlist_headers() -> Vec<String> {
    let mut cols = vec!["canonical_id".to_string(), "display_name".into()];
    cols.extend(FamilyTag::ALL.iter().map(|f| format!("{f}_count")));
    cols.extend(FamilyTag::ALL.iter().map(|f| format!("qualifies_via_{f}")));
    cols.push("shortlist_flag".into());
    cols
}

fn shortlist_cells(r: &ShortlistRecord) -> Vec<Option<String>> {
    let mut row = vec![text(&r.canonical_id), text(&r.display_name)];
    row.extend(FamilyTag::ALL.iter().map(|f| Some(r.count(*f).to_string())));
    row.extend(FamilyTag::ALL.iter().map(|f| fmt_bool(r.qualifies_via(*f))));
    row.push(fmt_bool(r.shortlist_flag));
    row
}

pub fn shortlist_table(rows: &[ShortlistRecord]) -> Table {
    let mut table = Table::new("shortlist_candidates", shortlist_headers());
    for r in rows {
        table.push(shortlist_cells(r));
    }
    table
}

pub fn shortlist_occurrence_table(name: &str, rows: &[ShortlistWithOccurrences]) -> Table {
    let mut cols = shortlist_headers();
    cols.push("gbif_occurrence_count".into());
    cols.push("gbif_georeferenced_count".into());

    let mut table = Table::new(name, cols);
    for r in rows {
        let mut row = shortlist_cells(&r.record);
        row.push(Some(r.occurrences.total.to_string()));
        row.push(Some(r.occurrences.georeferenced.to_string()));
        table.push(row);
    }
    table
}

fn modelling_headers(sets: &[String]) -> Vec<String> {
    let mut cols = vec!["canonical_id".to_string(), "display_name".into()];
    cols.extend(sets.iter().map(|s| format!("{s}_count")));
    cols.push("total_trait_count".into());
    cols
}

fn modelling_cells(r: &ModellingRecord) -> Vec<Option<String>> {
    let mut row = vec![text(&r.canonical_id), text(&r.display_name)];
    row.extend(r.set_counts.iter().map(|c| Some(c.to_string())));
    row.push(Some(r.total_traits.to_string()));
    row
}

/// One count column per trait set, in configured order.
pub fn modelling_table(sets: &[String], rows: &[ModellingRecord]) -> Table {
    let mut table = Table::new("modelling_shortlist", modelling_headers(sets));
    for r in rows {
        table.push(modelling_cells(r));
    }
    table
}

pub fn modelling_occurrence_table(
    name: &str,
    sets: &[String],
    rows: &[WithOccurrences<ModellingRecord>],
) -> Table {
    let mut cols = modelling_headers(sets);
    cols.push("gbif_occurrence_count".into());
    cols.push("gbif_georeferenced_count".into());

    let mut table = Table::new(name, cols);
    for r in rows {
        let mut row = modelling_cells(&r.record);
        row.push(Some(r.occurrences.total.to_string()));
        row.push(Some(r.occurrences.georeferenced.to_string()));
        table.push(row);
    }
    table
}

/// Occurrence counts ranked by count descending, then id.
pub fn occurrence_table(counts: &OccurrenceCounts) -> Table {
    let mut table = Table::new(
        "gbif_occurrence_counts",
        vec![
            "canonical_id".to_string(),
            "gbif_occurrence_count".into(),
            "gbif_georeferenced_count".into(),
        ],
    );
    for (id, c) in counts.ranked() {
        table.push(vec![
            text(id),
            Some(c.total.to_string()),
            Some(c.georeferenced.to_string()),
        ]);
    }
    table
}

/// One row per id, eight columns per variable. Expects records grouped by id
/// with variables in `output.variables` order, as `compute_dataset` emits them.
pub fn stats_table(output: &StatsOutput, decimals: usize) -> Result<Table, ReconError> {
    let mut cols = vec!["canonical_id".to_string()];
    for v in &output.variables {
        cols.extend(STAT_SUFFIXES.iter().map(|s| format!("{v}_{s}")));
    }
    let mut table = Table::new(format!("{}_species_quantiles", output.name), cols);

    let width = output.variables.len();
    if width == 0 {
        return Err(ReconError::InvariantViolation(format!(
            "stats '{}': no variables to write",
            output.name
        )));
    }
    for chunk in output.records.chunks(width) {
        let id = &chunk[0].canonical_id;
        let mut row = vec![text(id)];
        for (record, variable) in chunk.iter().zip(&output.variables) {
            if &record.canonical_id != id || &record.variable != variable {
                return Err(ReconError::InvariantViolation(format!(
                    "stats '{}': record '{}'/'{}' out of place",
                    output.name, record.canonical_id, record.variable
                )));
            }
            for v in [
                record.mean,
                record.stddev,
                record.min,
                record.max,
                record.q05,
                record.q50,
                record.q95,
                record.iqr,
            ] {
                row.push(fmt_opt(v, decimals));
            }
        }
        if chunk.len() != width {
            return Err(ReconError::InvariantViolation(format!(
                "stats '{}': id '{id}' has {} of {width} variables",
                output.name,
                chunk.len()
            )));
        }
        table.push(row);
    }
    Ok(table)
}

/// A table keyed by `key` must not repeat a key.
pub fn ensure_unique(table: &Table, key: &str) -> Result<(), ReconError> {
    let col = table.require(key)?;
    let mut seen = HashSet::new();
    for row in 0..table.len() {
        let k = table.cell(row, col).unwrap_or("");
        if !seen.insert(k) {
            return Err(ReconError::DuplicateKey {
                table: table.name.clone(),
                key: k.to_string(),
            });
        }
    }
    Ok(())
}
