use std::collections::BTreeMap;

use crate::config::OccurrenceConfig;
use crate::error::ReconError;
use crate::model::{Defects, OccurrenceCount};
use crate::numeric::{classify, NumericCell};
use crate::table::Table;

/// Occurrence counts per canonical id.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceCounts {
    pub rows: usize,
    pub by_id: BTreeMap<String, OccurrenceCount>,
}

impl OccurrenceCounts {
    /// Count descending, then id ascending.
    pub fn ranked(&self) -> Vec<(&str, OccurrenceCount)> {
        let mut ranked: Vec<_> = self
            .by_id
            .iter()
            .map(|(id, c)| (id.as_str(), *c))
            .collect();
        ranked.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Count occurrence rows per id. A row is georeferenced when both coordinates
/// are numeric; a coordinate that is present but unparseable is a defect.
pub fn count_occurrences(
    table: &Table,
    cfg: &OccurrenceConfig,
    defects: &mut Defects,
) -> Result<OccurrenceCounts, ReconError> {
    let id_col = table.require(&cfg.id_column)?;
    let lat_col = table.require(&cfg.latitude_column)?;
    let lon_col = table.require(&cfg.longitude_column)?;

    let mut by_id: BTreeMap<String, OccurrenceCount> = BTreeMap::new();
    let mut null_id = 0;
    let mut invalid = 0;

    for row in 0..table.len() {
        let Some(id) = table.cell(row, id_col) else {
            null_id += 1;
            continue;
        };
        let lat = classify(table.cell(row, lat_col));
        let lon = classify(table.cell(row, lon_col));
        invalid += [lat, lon]
            .iter()
            .filter(|c| matches!(c, NumericCell::Invalid))
            .count();

        let entry = by_id.entry(id.to_string()).or_default();
        entry.total += 1;
        if lat.value().is_some() && lon.value().is_some() {
            entry.georeferenced += 1;
        }
    }

    defects.record("occurrences", "null_id", null_id);
    defects.record("occurrences", "invalid_coordinate", invalid);
    tracing::info!(rows = table.len(), species = by_id.len(), "counted occurrences");

    Ok(OccurrenceCounts {
        rows: table.len(),
        by_id,
    })
}
