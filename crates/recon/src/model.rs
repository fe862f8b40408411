use std::collections::BTreeMap;

use serde::Serialize;

use crate::table::Table;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// One of the five matched source datasets.
///
/// Declaration order is the enumeration order used everywhere
/// (S1 = duke .. S5 = austraits). `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Duke,
    Eive,
    Mabberly,
    TryEnhanced,
    #[serde(rename = "austraits")]
    AusTraits,
}

impl SourceTag {
    pub const ALL: [SourceTag; 5] = [
        Self::Duke,
        Self::Eive,
        Self::Mabberly,
        Self::TryEnhanced,
        Self::AusTraits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duke => "duke",
            Self::Eive => "eive",
            Self::Mabberly => "mabberly",
            Self::TryEnhanced => "try_enhanced",
            Self::AusTraits => "austraits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Position in the fixed enumeration order.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait family used for the readiness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyTag {
    Eive,
    Try,
    Aus,
}

impl FamilyTag {
    pub const ALL: [FamilyTag; 3] = [Self::Eive, Self::Try, Self::Aus];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eive => "eive",
            Self::Try => "try",
            Self::Aus => "aus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for FamilyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Pre-loaded tables. Files are read by the caller; the engine only sees tables.
#[derive(Debug, Default)]
pub struct PipelineInput {
    pub sources: BTreeMap<SourceTag, Table>,
    /// Families configured with their own `file`.
    pub family_tables: BTreeMap<FamilyTag, Table>,
    pub occurrences: Option<Table>,
    /// Sample tables keyed by stats dataset name.
    pub stats: BTreeMap<String, Table>,
    /// Modelling trait sets configured with their own `file`, keyed by set name.
    pub modelling_tables: BTreeMap<String, Table>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A normalized `(canonical_id, display_name)` tuple with provenance.
/// Rows without an identifier never become a `SourceRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub canonical_id: String,
    pub display_name: Option<String>,
    pub source: SourceTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnionRecord {
    pub canonical_id: String,
    /// Empty when no source supplied a name.
    pub display_name: String,
    /// Distinct tags in order of first appearance.
    pub sources: Vec<SourceTag>,
    pub source_count: usize,
    pub presence: [bool; 5],
}

impl UnionRecord {
    pub fn is_present(&self, tag: SourceTag) -> bool {
        self.presence[tag.index()]
    }

    /// `duke,eive` style provenance summary. Never re-sorted.
    pub fn sources_joined(&self) -> String {
        self.sources
            .iter()
            .map(SourceTag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraitCountRecord {
    pub canonical_id: String,
    pub family: FamilyTag,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortlistRecord {
    pub canonical_id: String,
    pub display_name: String,
    /// Indexed by `FamilyTag::index`.
    pub counts: [usize; 3],
    pub qualifies: [bool; 3],
    pub shortlist_flag: bool,
}

impl ShortlistRecord {
    pub fn count(&self, family: FamilyTag) -> usize {
        self.counts[family.index()]
    }

    pub fn qualifies_via(&self, family: FamilyTag) -> bool {
        self.qualifies[family.index()]
    }
}

/// Output rows keyed by canonical id.
pub trait Keyed {
    fn canonical_id(&self) -> &str;
}

impl Keyed for ShortlistRecord {
    fn canonical_id(&self) -> &str {
        &self.canonical_id
    }
}

/// A modelling-shortlist row: complete in the complete family, with the
/// distinct canonical traits found per trait set and across all sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModellingRecord {
    pub canonical_id: String,
    pub display_name: String,
    /// Indexed like the configured trait sets.
    pub set_counts: Vec<usize>,
    /// Size of the union of trait names over every set.
    pub total_traits: usize,
}

impl Keyed for ModellingRecord {
    fn canonical_id(&self) -> &str {
        &self.canonical_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OccurrenceCount {
    pub total: usize,
    pub georeferenced: usize,
}

/// Output row with occurrence counts attached (missing counts are 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithOccurrences<R> {
    pub record: R,
    pub occurrences: OccurrenceCount,
}

pub type ShortlistWithOccurrences = WithOccurrences<ShortlistRecord>;

/// Summary statistics for one `(canonical_id, variable)` pair.
/// All statistics are `None` when the pair had no valid samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsRecord {
    pub canonical_id: String,
    pub variable: String,
    pub n: usize,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub q05: Option<f64>,
    pub q50: Option<f64>,
    pub q95: Option<f64>,
    pub iqr: Option<f64>,
}

/// Output of one stats dataset: records ordered by id, then variable order.
#[derive(Debug, Clone)]
pub struct StatsOutput {
    pub name: String,
    pub variables: Vec<String>,
    pub records: Vec<StatisticsRecord>,
}

// ---------------------------------------------------------------------------
// Data quality
// ---------------------------------------------------------------------------

/// Data-quality defect counts keyed by scope (source, family, dataset) then class.
///
/// Defects never abort a run. Each non-zero class is logged once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Defects {
    counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl Defects {
    pub fn record(&mut self, scope: &str, class: &str, count: usize) {
        if count == 0 {
            return;
        }
        tracing::warn!(scope, class, count, "data-quality defects");
        *self
            .counts
            .entry(scope.to_string())
            .or_default()
            .entry(class.to_string())
            .or_insert(0) += count;
    }

    pub fn get(&self, scope: &str, class: &str) -> usize {
        self.counts
            .get(scope)
            .and_then(|m| m.get(class))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().flat_map(|m| m.values()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: SourceTag,
    pub rows_read: usize,
    pub null_id_skipped: usize,
    pub tuples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilySummary {
    pub family: FamilyTag,
    pub source: SourceTag,
    pub ids_with_data: usize,
    pub qualifying: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub name: String,
    pub species: usize,
    pub variables: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccurrenceSummary {
    pub rows: usize,
    pub species: usize,
    pub shortlisted_with_occurrences: usize,
    pub min_occurrences: usize,
    pub shortlisted_at_min: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModellingSummary {
    pub complete_family: FamilyTag,
    pub complete_ids: usize,
    pub min_traits: usize,
    pub size: usize,
    /// Rows meeting `min_occurrences`, when occurrences are configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_min_occurrences: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub config_name: String,
    pub engine_version: String,
    pub sources: Vec<SourceSummary>,
    pub union_size: usize,
    /// `duke&eive` style keys; every configured pair.
    pub pairwise_overlap: BTreeMap<String, usize>,
    pub all_sources_overlap: usize,
    pub families: Vec<FamilySummary>,
    pub shortlist_size: usize,
    pub combinations: BTreeMap<String, usize>,
    pub stats: Vec<StatsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<OccurrenceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modelling: Option<ModellingSummary>,
    pub defects: Defects,
    /// Table file name to content checksum. Filled in by the writer.
    pub checksums: BTreeMap<String, String>,
}

/// A canonical table ready to be written, with its output file name.
#[derive(Debug, Clone)]
pub struct OutputTable {
    pub file_name: String,
    pub table: Table,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub union: Vec<UnionRecord>,
    pub shortlist: Vec<ShortlistRecord>,
    /// Empty unless modelling is configured.
    pub modelling: Vec<ModellingRecord>,
    pub stats: Vec<StatsOutput>,
    pub summary: RunSummary,
    /// Every table to persist, in write order.
    pub tables: Vec<OutputTable>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_order_is_fixed() {
        let names: Vec<_> = SourceTag::ALL.iter().map(SourceTag::as_str).collect();
        assert_eq!(
            names,
            ["duke", "eive", "mabberly", "try_enhanced", "austraits"]
        );
        assert!(SourceTag::Duke < SourceTag::AusTraits);
        assert_eq!(SourceTag::parse("try_enhanced"), Some(SourceTag::TryEnhanced));
        assert_eq!(SourceTag::parse("TRY"), None);
    }

    #[test]
    fn serde_names_match_as_str() {
        for tag in SourceTag::ALL {
            let json = serde_json::to_string(&tag).unwrap();
            assert_eq!(json, format!("\"{}\"", tag.as_str()));
        }
    }

    #[test]
    fn defects_ignore_zero_counts() {
        let mut d = Defects::default();
        d.record("eive", "invalid_numeric", 0);
        assert!(d.is_empty());
        d.record("eive", "invalid_numeric", 2);
        d.record("eive", "invalid_numeric", 1);
        assert_eq!(d.get("eive", "invalid_numeric"), 3);
        assert_eq!(d.total(), 3);
    }
}
