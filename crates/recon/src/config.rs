use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{FamilyTag, SourceTag};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Pipeline configuration. Paths are relative; the caller resolves
/// `input_root`/`output_root` against the config file's directory.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_root")]
    pub input_root: String,
    #[serde(default = "default_output_root")]
    pub output_root: String,
    #[serde(default = "default_float_decimals")]
    pub float_decimals: usize,
    #[serde(default)]
    pub ordering: ShortlistOrdering,
    #[serde(default)]
    pub emit: ShortlistEmit,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub families: BTreeMap<String, FamilyConfig>,
    #[serde(default)]
    pub occurrences: Option<OccurrenceConfig>,
    #[serde(default)]
    pub stats: Vec<StatsConfig>,
    #[serde(default)]
    pub modelling: Option<ModellingConfig>,
}

fn default_root() -> String {
    ".".into()
}

fn default_output_root() -> String {
    "out".into()
}

fn default_float_decimals() -> usize {
    6
}

fn default_threshold() -> usize {
    3
}

fn default_id_column() -> String {
    "wfo_taxon_id".into()
}

/// Shortlist row order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortlistOrdering {
    /// `display_name`, then `canonical_id`.
    #[default]
    DisplayName,
    CanonicalId,
}

/// Which union rows the shortlist table carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortlistEmit {
    #[default]
    Qualifying,
    All,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Coalesced left to right into the display name.
    #[serde(default)]
    pub name_columns: Vec<String>,
    /// When set, the source also provides a raw-name lookup.
    #[serde(default)]
    pub raw_name_column: Option<String>,
}

// ---------------------------------------------------------------------------
// Families
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One column per trait field.
    #[default]
    Wide,
    /// One row per measurement: `(key, trait, value)`.
    Long,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FamilyConfig {
    pub source: String,
    #[serde(default)]
    pub layout: Layout,
    /// Defaults to the source's file.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub id_column: Option<String>,
    /// Long layout only: rows keyed by raw name, resolved through the source's lookup.
    #[serde(default)]
    pub name_column: Option<String>,
    #[serde(default)]
    pub trait_column: Option<String>,
    #[serde(default)]
    pub value_column: Option<String>,
    pub fields: Vec<String>,
}

/// How a family's rows find their canonical identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKey<'a> {
    Id(&'a str),
    RawName(&'a str),
}

// ---------------------------------------------------------------------------
// Occurrences + Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OccurrenceConfig {
    pub file: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_latitude")]
    pub latitude_column: String,
    #[serde(default = "default_longitude")]
    pub longitude_column: String,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
}

fn default_latitude() -> String {
    "decimalLatitude".into()
}

fn default_longitude() -> String {
    "decimalLongitude".into()
}

fn default_min_occurrences() -> usize {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    pub name: String,
    pub file: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Columns that are never variables (besides the id column).
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Explicit variable list; overrides the exclude rule.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Modelling
// ---------------------------------------------------------------------------

/// Modelling shortlist: ids complete in one family that also carry at least
/// `min_traits` distinct canonical traits across the trait sets.
#[derive(Debug, Clone, Deserialize)]
pub struct ModellingConfig {
    #[serde(default = "default_complete_family")]
    pub complete_family: String,
    #[serde(default = "default_min_traits")]
    pub min_traits: usize,
    pub traits: Vec<TraitSetConfig>,
}

fn default_complete_family() -> String {
    "eive".into()
}

fn default_min_traits() -> usize {
    8
}

/// One table contributing canonical trait names. Same shape rules as a family.
#[derive(Debug, Clone, Deserialize)]
pub struct TraitSetConfig {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub name_column: Option<String>,
    #[serde(default)]
    pub trait_column: Option<String>,
    #[serde(default)]
    pub value_column: Option<String>,
    /// Column (wide) or trait value (long) to canonical trait name.
    pub fields: BTreeMap<String, String>,
}

impl TraitSetConfig {
    /// The set viewed as a family, fields in key order.
    pub fn as_family(&self) -> FamilyConfig {
        FamilyConfig {
            source: self.source.clone(),
            layout: self.layout,
            file: self.file.clone(),
            id_column: self.id_column.clone(),
            name_column: self.name_column.clone(),
            trait_column: self.trait_column.clone(),
            value_column: self.value_column.clone(),
            fields: self.fields.keys().cloned().collect(),
        }
    }

    /// Canonical trait names, aligned with `as_family().fields`.
    pub fn canonical_names(&self) -> Vec<String> {
        self.fields.values().cloned().collect()
    }
}

impl ModellingConfig {
    fn validate(
        &self,
        families: &BTreeMap<String, FamilyConfig>,
        sources: &BTreeMap<String, SourceConfig>,
    ) -> Result<(), ReconError> {
        if FamilyTag::parse(&self.complete_family).is_none()
            || !families.contains_key(&self.complete_family)
        {
            return Err(ReconError::ConfigValidation(format!(
                "modelling: complete_family '{}' is not a configured family",
                self.complete_family
            )));
        }
        if self.min_traits == 0 {
            return Err(ReconError::ConfigValidation(
                "modelling: min_traits must be at least 1".into(),
            ));
        }
        if self.traits.is_empty() {
            return Err(ReconError::ConfigValidation(
                "modelling: at least one trait set is required".into(),
            ));
        }

        let mut names = BTreeSet::new();
        for set in &self.traits {
            if set.name.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "modelling: trait set name must not be empty".into(),
                ));
            }
            if !names.insert(set.name.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "modelling: duplicate trait set '{}'",
                    set.name
                )));
            }
            let label = format!("modelling set '{}'", set.name);
            if let Some((field, _)) = set.fields.iter().find(|(_, c)| c.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: field '{field}' maps to an empty trait name"
                )));
            }
            validate_shape(&label, &set.as_family(), sources)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.sources.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one source is required".into(),
            ));
        }

        for key in self.sources.keys() {
            if SourceTag::parse(key).is_none() {
                return Err(ReconError::ConfigValidation(format!(
                    "unknown source '{key}' (expected one of: {})",
                    tag_list(SourceTag::ALL.iter().map(SourceTag::as_str))
                )));
            }
        }

        if self.float_decimals > 17 {
            return Err(ReconError::ConfigValidation(format!(
                "float_decimals must be at most 17, got {}",
                self.float_decimals
            )));
        }

        for (key, family) in &self.families {
            validate_family(key, family, &self.sources)?;
        }

        if let Some(occ) = &self.occurrences {
            if occ.file.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "occurrences: file must not be empty".into(),
                ));
            }
        }

        if let Some(modelling) = &self.modelling {
            modelling.validate(&self.families, &self.sources)?;
        }

        let mut names = BTreeSet::new();
        for stats in &self.stats {
            if stats.name.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "stats: dataset name must not be empty".into(),
                ));
            }
            if !names.insert(stats.name.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "stats '{}': duplicate dataset name",
                    stats.name
                )));
            }
            if let Some(vars) = &stats.variables {
                stats.check_variables(vars)?;
                if !stats.exclude.is_empty() {
                    return Err(ReconError::ConfigValidation(format!(
                        "stats '{}': set either variables or exclude, not both",
                        stats.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Configured sources in the fixed enumeration order.
    pub fn sources_in_order(&self) -> Vec<(SourceTag, &SourceConfig)> {
        SourceTag::ALL
            .into_iter()
            .filter_map(|tag| self.sources.get(tag.as_str()).map(|cfg| (tag, cfg)))
            .collect()
    }

    /// Configured families in `eive, try, aus` order.
    pub fn families_in_order(&self) -> Vec<(FamilyTag, &FamilyConfig)> {
        FamilyTag::ALL
            .into_iter()
            .filter_map(|tag| self.families.get(tag.as_str()).map(|cfg| (tag, cfg)))
            .collect()
    }

    pub fn source(&self, tag: SourceTag) -> Option<&SourceConfig> {
        self.sources.get(tag.as_str())
    }
}

impl StatsConfig {
    /// Explicit variable lists: non-empty, never the id column, no repeats.
    pub fn check_variables(&self, vars: &[String]) -> Result<(), ReconError> {
        if vars.is_empty() {
            return Err(ReconError::ConfigValidation(format!(
                "stats '{}': variables must not be empty",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for v in vars {
            if *v == self.id_column {
                return Err(ReconError::ConfigValidation(format!(
                    "stats '{}': id column '{v}' cannot be a variable",
                    self.name
                )));
            }
            if !seen.insert(v.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "stats '{}': duplicate variable '{v}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl FamilyConfig {
    /// Validated source tag. Only call after `validate`.
    pub fn source_tag(&self) -> Option<SourceTag> {
        SourceTag::parse(&self.source)
    }

    /// Resolve the key column, falling back to the source's id column.
    pub fn key<'a>(&'a self, source: &'a SourceConfig) -> FamilyKey<'a> {
        match (&self.id_column, &self.name_column) {
            (_, Some(name)) => FamilyKey::RawName(name),
            (Some(id), None) => FamilyKey::Id(id),
            (None, None) => FamilyKey::Id(&source.id_column),
        }
    }
}

fn validate_family(
    key: &str,
    family: &FamilyConfig,
    sources: &BTreeMap<String, SourceConfig>,
) -> Result<(), ReconError> {
    if FamilyTag::parse(key).is_none() {
        return Err(ReconError::ConfigValidation(format!(
            "unknown family '{key}' (expected one of: {})",
            tag_list(FamilyTag::ALL.iter().map(FamilyTag::as_str))
        )));
    }
    validate_shape(&format!("family '{key}'"), family, sources)
}

/// Source, field and layout rules shared by families and modelling trait sets.
fn validate_shape(
    label: &str,
    family: &FamilyConfig,
    sources: &BTreeMap<String, SourceConfig>,
) -> Result<(), ReconError> {
    let Some(source) = sources.get(&family.source) else {
        return Err(ReconError::ConfigValidation(format!(
            "{label}: source '{}' is not configured",
            family.source
        )));
    };

    if family.fields.is_empty() {
        return Err(ReconError::ConfigValidation(format!(
            "{label}: fields must not be empty"
        )));
    }
    let mut seen = BTreeSet::new();
    for field in &family.fields {
        if !seen.insert(field.as_str()) {
            return Err(ReconError::ConfigValidation(format!(
                "{label}: duplicate field '{field}'"
            )));
        }
    }

    match family.layout {
        Layout::Wide => {
            if family.name_column.is_some()
                || family.trait_column.is_some()
                || family.value_column.is_some()
            {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: name_column, trait_column and value_column apply to long layout only"
                )));
            }
        }
        Layout::Long => {
            if family.trait_column.is_none() || family.value_column.is_none() {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: long layout requires trait_column and value_column"
                )));
            }
            match (&family.id_column, &family.name_column) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(ReconError::ConfigValidation(format!(
                        "{label}: long layout requires exactly one of id_column or name_column"
                    )));
                }
                (None, Some(_)) if source.raw_name_column.is_none() => {
                    return Err(ReconError::ConfigValidation(format!(
                        "{label}: name_column needs raw_name_column on source '{}'",
                        family.source
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn tag_list<'a>(tags: impl Iterator<Item = &'a str>) -> String {
    tags.collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "stage1"
input_root = "data"

[sources.duke]
file = "duke.csv"
name_columns = ["wfo_scientific_name", "scientific_name"]

[sources.eive]
file = "eive.csv"
name_columns = ["wfo_scientific_name"]

[sources.austraits]
file = "austraits_taxa.csv"
name_columns = ["wfo_scientific_name"]
raw_name_column = "taxon_name"

[families.eive]
source = "eive"
fields = ["EIVEres-M", "EIVEres-N", "EIVEres-R", "EIVEres-L", "EIVEres-T"]

[families.aus]
source = "austraits"
layout = "long"
file = "austraits_traits.csv"
name_column = "taxon_name"
trait_column = "trait_name"
value_column = "value"
fields = ["leaf_area", "plant_height"]
"#;

    #[test]
    fn parse_valid_with_defaults() {
        let config = PipelineConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "stage1");
        assert_eq!(config.input_root, "data");
        assert_eq!(config.output_root, "out");
        assert_eq!(config.float_decimals, 6);
        assert_eq!(config.threshold, 3);
        assert_eq!(config.ordering, ShortlistOrdering::DisplayName);
        assert_eq!(config.emit, ShortlistEmit::Qualifying);
        assert_eq!(config.sources["duke"].id_column, "wfo_taxon_id");
        assert!(config.occurrences.is_none());
        assert!(config.stats.is_empty());
    }

    #[test]
    fn sources_come_back_in_fixed_order() {
        let config = PipelineConfig::from_toml(VALID).unwrap();
        let tags: Vec<_> = config.sources_in_order().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, [SourceTag::Duke, SourceTag::Eive, SourceTag::AusTraits]);
        let fams: Vec<_> = config.families_in_order().into_iter().map(|(t, _)| t).collect();
        assert_eq!(fams, [FamilyTag::Eive, FamilyTag::Aus]);
    }

    #[test]
    fn family_key_resolution() {
        let config = PipelineConfig::from_toml(VALID).unwrap();
        let eive = &config.families["eive"];
        assert_eq!(
            eive.key(&config.sources["eive"]),
            FamilyKey::Id("wfo_taxon_id")
        );
        let aus = &config.families["aus"];
        assert_eq!(
            aus.key(&config.sources["austraits"]),
            FamilyKey::RawName("taxon_name")
        );
    }

    #[test]
    fn parse_occurrences_and_stats() {
        let input = format!(
            r#"{VALID}
[occurrences]
file = "occ.csv"

[[stats]]
name = "worldclim"
file = "worldclim.csv"
exclude = ["gbifID", "lon", "lat"]
"#
        );
        let config = PipelineConfig::from_toml(&input).unwrap();
        let occ = config.occurrences.unwrap();
        assert_eq!(occ.min_occurrences, 30);
        assert_eq!(occ.latitude_column, "decimalLatitude");
        assert_eq!(config.stats[0].exclude, vec!["gbifID", "lon", "lat"]);
    }

    #[test]
    fn reject_unknown_source() {
        let input = r#"
name = "bad"
[sources.gbif]
file = "g.csv"
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("unknown source 'gbif'"));
    }

    #[test]
    fn reject_family_with_unconfigured_source() {
        let input = r#"
name = "bad"
[sources.duke]
file = "d.csv"
[families.try]
source = "try_enhanced"
fields = ["Leaf area (mm2)"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'try_enhanced' is not configured"));
    }

    #[test]
    fn reject_long_family_without_value_column() {
        let input = r#"
name = "bad"
[sources.austraits]
file = "a.csv"
[families.aus]
source = "austraits"
layout = "long"
id_column = "wfo_taxon_id"
trait_column = "trait_name"
fields = ["leaf_area"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("requires trait_column and value_column"));
    }

    #[test]
    fn reject_long_family_with_both_keys() {
        let input = r#"
name = "bad"
[sources.austraits]
file = "a.csv"
raw_name_column = "taxon_name"
[families.aus]
source = "austraits"
layout = "long"
id_column = "wfo_taxon_id"
name_column = "taxon_name"
trait_column = "trait_name"
value_column = "value"
fields = ["leaf_area"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("exactly one of id_column or name_column"));
    }

    #[test]
    fn reject_name_key_without_lookup() {
        let input = r#"
name = "bad"
[sources.austraits]
file = "a.csv"
[families.aus]
source = "austraits"
layout = "long"
name_column = "taxon_name"
trait_column = "trait_name"
value_column = "value"
fields = ["leaf_area"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("needs raw_name_column"));
    }

    #[test]
    fn reject_empty_fields() {
        let input = r#"
name = "bad"
[sources.eive]
file = "e.csv"
[families.eive]
source = "eive"
fields = []
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("fields must not be empty"));
    }

    #[test]
    fn reject_excessive_decimals() {
        let input = r#"
name = "bad"
float_decimals = 18
[sources.eive]
file = "e.csv"
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("float_decimals"));
    }

    #[test]
    fn reject_typo_in_ordering() {
        let input = r#"
name = "bad"
ordering = "displayname"
[sources.eive]
file = "e.csv"
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn reject_stats_with_variables_and_exclude() {
        let input = r#"
name = "bad"
[sources.eive]
file = "e.csv"
[[stats]]
name = "soil"
file = "soil.csv"
exclude = ["lat"]
variables = ["phh2o"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    const MODELLING: &str = r#"
[sources.try_enhanced]
file = "try_enhanced.csv"

[[modelling.traits]]
name = "try_enhanced"
source = "try_enhanced"
fields = { "LDMC (g/g)" = "leaf_dry_matter_content", "LMA (g/m2)" = "leaf_mass_per_area" }

[[modelling.traits]]
name = "try_raw"
source = "try_enhanced"
layout = "long"
file = "try_raw.csv"
id_column = "wfo_taxon_id"
trait_column = "TraitSlug"
value_column = "StdValue"
fields = { leaf_dry_matter_content = "leaf_dry_matter_content", specific_leaf_area = "leaf_mass_per_area" }
"#;

    #[test]
    fn parse_modelling_with_defaults() {
        let config = PipelineConfig::from_toml(&format!("{VALID}{MODELLING}")).unwrap();
        let modelling = config.modelling.unwrap();
        assert_eq!(modelling.complete_family, "eive");
        assert_eq!(modelling.min_traits, 8);
        assert_eq!(modelling.traits.len(), 2);

        let raw = &modelling.traits[1];
        let family = raw.as_family();
        assert_eq!(family.fields, ["leaf_dry_matter_content", "specific_leaf_area"]);
        assert_eq!(
            raw.canonical_names(),
            ["leaf_dry_matter_content", "leaf_mass_per_area"]
        );
        assert_eq!(
            family.key(&config.sources["try_enhanced"]),
            FamilyKey::Id("wfo_taxon_id")
        );
    }

    #[test]
    fn reject_modelling_without_complete_family() {
        let input = format!("{VALID}{MODELLING}").replace(
            "[[modelling.traits]]\nname = \"try_enhanced\"",
            "[modelling]\ncomplete_family = \"try\"\n\n[[modelling.traits]]\nname = \"try_enhanced\"",
        );
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("complete_family 'try'"));
    }

    #[test]
    fn reject_modelling_set_with_bad_layout() {
        let input = format!("{VALID}{MODELLING}").replace("value_column = \"StdValue\"\n", "");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err
            .to_string()
            .contains("modelling set 'try_raw': long layout requires trait_column and value_column"));
    }

    #[test]
    fn reject_duplicate_modelling_set() {
        let input = format!("{VALID}{MODELLING}").replace("name = \"try_raw\"", "name = \"try_enhanced\"");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("duplicate trait set 'try_enhanced'"));
    }

    #[test]
    fn reject_stats_variable_naming_id_column() {
        let input = r#"
name = "bad"
[sources.eive]
file = "e.csv"
[[stats]]
name = "soil"
file = "soil.csv"
variables = ["phh2o", "wfo_taxon_id"]
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("cannot be a variable"));
    }
}
