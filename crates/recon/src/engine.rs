use std::collections::BTreeMap;

use crate::config::{FamilyConfig, Layout, ModellingConfig, PipelineConfig, SourceConfig};
use crate::error::ReconError;
use crate::evidence::{combination_counts, overlap_counts, qualifying_counts};
use crate::export::{
    ensure_unique, modelling_min_occurrence_file, modelling_occurrence_table, modelling_table,
    occurrence_table, shortlist_min_occurrence_file, shortlist_occurrence_table, shortlist_table,
    stats_file, stats_table, union_table, MODELLING_FILE, MODELLING_OCCURRENCE_FILE,
    OCCURRENCE_FILE, SHORTLIST_FILE, SHORTLIST_OCCURRENCE_FILE, UNION_FILE,
};
use crate::model::{
    Defects, FamilySummary, FamilyTag, ModellingRecord, ModellingSummary, OccurrenceSummary,
    OutputTable, PipelineInput, PipelineResult, RunSummary, SourceSummary, SourceTag, StatsSummary,
};
use crate::modelling::{build_modelling, collect_traits, complete_ids, TraitSetTraits};
use crate::normalize::{normalize_source, LongAdapter, NameOracle, SourceAdapter, WideAdapter};
use crate::occurrence::count_occurrences;
use crate::quantile::compute_dataset;
use crate::shortlist::{attach_occurrences, evaluate, select, verify_shortlist, with_min_occurrences};
use crate::table::Table;
use crate::traits::{count_traits, FamilyCounts};

/// Run every stage per config over pre-loaded tables.
///
/// Either every output table is produced or the run fails; nothing partial is
/// returned. Data-quality defects are counted in the summary and never fail
/// the run.
pub fn run(config: &PipelineConfig, input: &PipelineInput) -> Result<PipelineResult, ReconError> {
    config.validate()?;
    let mut defects = Defects::default();

    // Sources -> union
    let mut normalized = Vec::new();
    let mut oracles: BTreeMap<SourceTag, NameOracle> = BTreeMap::new();
    for (tag, source_cfg) in config.sources_in_order() {
        let table = source_table(input, tag)?;
        normalized.push(normalize_source(tag, table, source_cfg, &mut defects)?);

        if let Some(raw_name_column) = &source_cfg.raw_name_column {
            let oracle = NameOracle::build(table, raw_name_column, &source_cfg.id_column)?;
            defects.record(tag.as_str(), "name_collisions", oracle.collisions());
            oracles.insert(tag, oracle);
        }
    }
    let union = crate::union::build_union(&normalized, &mut defects)?;

    // Trait families -> shortlist
    let mut family_counts: Vec<FamilyCounts> = Vec::new();
    let mut family_sources: Vec<(FamilyTag, SourceTag)> = Vec::new();
    for (family, family_cfg) in config.families_in_order() {
        let source = family_cfg.source_tag().ok_or_else(|| {
            ReconError::ConfigValidation(format!(
                "family '{family}': unknown source '{}'",
                family_cfg.source
            ))
        })?;
        let counts = count_family(config, input, family, source, family_cfg, &oracles, &mut defects)?;
        family_counts.push(counts);
        family_sources.push((family, source));
    }

    let evaluated = evaluate(&union, &family_counts, config.threshold);
    verify_shortlist(&evaluated, config.threshold)?;
    let qualifying = qualifying_counts(&evaluated);
    let combinations = combination_counts(&evaluated);
    let shortlist = select(evaluated, config.ordering, config.emit);

    let mut tables = vec![
        OutputTable {
            file_name: UNION_FILE.into(),
            table: union_table(&union),
        },
        OutputTable {
            file_name: SHORTLIST_FILE.into(),
            table: shortlist_table(&shortlist),
        },
    ];

    // Modelling shortlist
    let mut modelling: Vec<ModellingRecord> = Vec::new();
    let mut modelling_summary = None;
    let mut set_names = Vec::new();
    if let Some(modelling_cfg) = &config.modelling {
        let complete_family = FamilyTag::parse(&modelling_cfg.complete_family);
        let (Some(complete_family), Some(complete_cfg)) = (
            complete_family,
            config.families.get(&modelling_cfg.complete_family),
        ) else {
            return Err(ReconError::ConfigValidation(format!(
                "modelling: complete_family '{}' is not a configured family",
                modelling_cfg.complete_family
            )));
        };
        let complete = family_counts
            .iter()
            .find(|fc| fc.family == complete_family)
            .map(|fc| complete_ids(fc, complete_cfg.fields.len()))
            .unwrap_or_default();

        let sets = collect_modelling(config, input, modelling_cfg, &oracles, &mut defects)?;
        modelling = build_modelling(
            &union,
            &complete,
            &sets,
            modelling_cfg.min_traits,
            config.ordering,
        );
        set_names = sets.into_iter().map(|s| s.name).collect();

        modelling_summary = Some(ModellingSummary {
            complete_family,
            complete_ids: complete.len(),
            min_traits: modelling_cfg.min_traits,
            size: modelling.len(),
            at_min_occurrences: None,
        });
        tables.push(OutputTable {
            file_name: MODELLING_FILE.into(),
            table: modelling_table(&set_names, &modelling),
        });
    }

    // Occurrences
    let mut occurrence_summary = None;
    if let Some(occ_cfg) = &config.occurrences {
        let table = input.occurrences.as_ref().ok_or_else(|| {
            ReconError::ConfigValidation("occurrences configured but no table loaded".into())
        })?;
        let counts = count_occurrences(table, occ_cfg, &mut defects)?;
        let with = attach_occurrences(&shortlist, &counts.by_id);
        let at_min = with_min_occurrences(&with, occ_cfg.min_occurrences);

        occurrence_summary = Some(OccurrenceSummary {
            rows: counts.rows,
            species: counts.by_id.len(),
            shortlisted_with_occurrences: with.iter().filter(|r| r.occurrences.total > 0).count(),
            min_occurrences: occ_cfg.min_occurrences,
            shortlisted_at_min: at_min.len(),
        });

        let min_file = shortlist_min_occurrence_file(occ_cfg.min_occurrences);
        tables.push(OutputTable {
            file_name: OCCURRENCE_FILE.into(),
            table: occurrence_table(&counts),
        });
        tables.push(OutputTable {
            file_name: SHORTLIST_OCCURRENCE_FILE.into(),
            table: shortlist_occurrence_table("shortlist_with_gbif", &with),
        });
        tables.push(OutputTable {
            table: shortlist_occurrence_table(min_file.trim_end_matches(".csv"), &at_min),
            file_name: min_file,
        });

        if let Some(summary) = modelling_summary.as_mut() {
            let with = attach_occurrences(&modelling, &counts.by_id);
            let at_min = with_min_occurrences(&with, occ_cfg.min_occurrences);
            summary.at_min_occurrences = Some(at_min.len());

            let min_file = modelling_min_occurrence_file(occ_cfg.min_occurrences);
            tables.push(OutputTable {
                file_name: MODELLING_OCCURRENCE_FILE.into(),
                table: modelling_occurrence_table(
                    "modelling_shortlist_with_gbif",
                    &set_names,
                    &with,
                ),
            });
            tables.push(OutputTable {
                table: modelling_occurrence_table(
                    min_file.trim_end_matches(".csv"),
                    &set_names,
                    &at_min,
                ),
                file_name: min_file,
            });
        }
    }

    // Statistics
    let mut stats = Vec::new();
    let mut stats_summary = Vec::new();
    for stats_cfg in &config.stats {
        let table = input.stats.get(&stats_cfg.name).ok_or_else(|| {
            ReconError::ConfigValidation(format!(
                "stats '{}': no table loaded",
                stats_cfg.name
            ))
        })?;
        let output = compute_dataset(stats_cfg, table, &mut defects)?;
        stats_summary.push(StatsSummary {
            name: output.name.clone(),
            species: output.records.len() / output.variables.len().max(1),
            variables: output.variables.len(),
            samples: output.records.iter().map(|r| r.n).sum(),
        });
        tables.push(OutputTable {
            file_name: stats_file(&output.name),
            table: stats_table(&output, config.float_decimals)?,
        });
        stats.push(output);
    }

    for out in &tables {
        ensure_unique(&out.table, "canonical_id")?;
    }

    let configured: Vec<SourceTag> = config.sources_in_order().into_iter().map(|(t, _)| t).collect();
    let (pairwise_overlap, all_sources_overlap) = overlap_counts(&union, &configured);

    let summary = RunSummary {
        config_name: config.name.clone(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        sources: normalized
            .iter()
            .map(|n| SourceSummary {
                source: n.source,
                rows_read: n.rows_read,
                null_id_skipped: n.null_id_skipped,
                tuples: n.records.len(),
            })
            .collect(),
        union_size: union.len(),
        pairwise_overlap,
        all_sources_overlap,
        families: family_counts
            .iter()
            .zip(&family_sources)
            .map(|(fc, (family, source))| FamilySummary {
                family: *family,
                source: *source,
                ids_with_data: fc.counts.values().filter(|c| **c > 0).count(),
                qualifying: qualifying[family.index()],
            })
            .collect(),
        shortlist_size: shortlist.iter().filter(|r| r.shortlist_flag).count(),
        combinations,
        stats: stats_summary,
        occurrences: occurrence_summary,
        modelling: modelling_summary,
        defects,
        checksums: BTreeMap::new(),
    };

    tracing::info!(
        taxa = summary.union_size,
        shortlisted = summary.shortlist_size,
        modelling = summary.modelling.as_ref().map_or(0, |m| m.size),
        tables = tables.len(),
        defects = summary.defects.total(),
        "pipeline complete"
    );

    Ok(PipelineResult {
        union,
        shortlist,
        modelling,
        stats,
        summary,
        tables,
    })
}

fn source_table(input: &PipelineInput, tag: SourceTag) -> Result<&Table, ReconError> {
    input.sources.get(&tag).ok_or_else(|| {
        ReconError::ConfigValidation(format!("source '{tag}' configured but no table loaded"))
    })
}

fn count_family(
    config: &PipelineConfig,
    input: &PipelineInput,
    family: FamilyTag,
    source: SourceTag,
    family_cfg: &FamilyConfig,
    oracles: &BTreeMap<SourceTag, NameOracle>,
    defects: &mut Defects,
) -> Result<FamilyCounts, ReconError> {
    let source_cfg = config.source(source).ok_or_else(|| {
        ReconError::ConfigValidation(format!("family '{family}': source '{source}' not configured"))
    })?;
    let table = match (&family_cfg.file, input.family_tables.get(&family)) {
        (Some(_), Some(t)) => t,
        (Some(file), None) => {
            return Err(ReconError::ConfigValidation(format!(
                "family '{family}': table '{file}' not loaded"
            )))
        }
        (None, _) => source_table(input, source)?,
    };

    with_adapter(
        table,
        family_cfg,
        source_cfg,
        oracles.get(&source),
        &format!("family:{family}"),
        defects,
        |adapter, defects| count_traits(family, adapter, defects),
    )
}

/// Distinct canonical traits per id, one entry per trait set in config order.
fn collect_modelling(
    config: &PipelineConfig,
    input: &PipelineInput,
    modelling: &ModellingConfig,
    oracles: &BTreeMap<SourceTag, NameOracle>,
    defects: &mut Defects,
) -> Result<Vec<TraitSetTraits>, ReconError> {
    let mut sets = Vec::with_capacity(modelling.traits.len());
    for set in &modelling.traits {
        let label = format!("modelling set '{}'", set.name);
        let Some((source, source_cfg)) = SourceTag::parse(&set.source)
            .and_then(|tag| config.source(tag).map(|cfg| (tag, cfg)))
        else {
            return Err(ReconError::ConfigValidation(format!(
                "{label}: source '{}' not configured",
                set.source
            )));
        };
        let table = match (&set.file, input.modelling_tables.get(&set.name)) {
            (Some(_), Some(t)) => t,
            (Some(file), None) => {
                return Err(ReconError::ConfigValidation(format!(
                    "{label}: table '{file}' not loaded"
                )))
            }
            (None, _) => source_table(input, source)?,
        };

        let canonical = set.canonical_names();
        let scope = format!("modelling:{}", set.name);
        let traits = with_adapter(
            table,
            &set.as_family(),
            source_cfg,
            oracles.get(&source),
            &scope,
            defects,
            |adapter, defects| collect_traits(&set.name, adapter, &canonical, &scope, defects),
        )?;
        sets.push(traits);
    }
    Ok(sets)
}

/// Build the adapter for a family-shaped config and hand it to `f`.
fn with_adapter<T>(
    table: &Table,
    family_cfg: &FamilyConfig,
    source_cfg: &SourceConfig,
    oracle: Option<&NameOracle>,
    scope: &str,
    defects: &mut Defects,
    f: impl FnOnce(&dyn SourceAdapter, &mut Defects) -> T,
) -> Result<T, ReconError> {
    match family_cfg.layout {
        Layout::Wide => {
            let id_column = family_cfg
                .id_column
                .as_deref()
                .unwrap_or(&source_cfg.id_column);
            let adapter = WideAdapter::new(table, id_column, &family_cfg.fields)?;
            Ok(f(&adapter, defects))
        }
        Layout::Long => {
            let adapter =
                LongAdapter::build(table, family_cfg, source_cfg, oracle, scope, defects)?;
            Ok(f(&adapter, defects))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name = "unit"

[sources.duke]
file = "duke.csv"
name_columns = ["name"]

[sources.eive]
file = "eive.csv"
name_columns = ["name"]

[families.eive]
source = "eive"
fields = ["M", "N", "R", "L", "T"]
"#;

    fn input() -> PipelineInput {
        let mut input = PipelineInput::default();
        input.sources.insert(
            SourceTag::Duke,
            Table::from_rows("duke", &["wfo_taxon_id", "name"], &[&["X1", "Rosa"], &["X3", ""]]),
        );
        input.sources.insert(
            SourceTag::Eive,
            Table::from_rows(
                "eive",
                &["wfo_taxon_id", "name", "M", "N", "R", "L", "T"],
                &[
                    &["X1", "", "5", "", "3", "", "7"],
                    &["X2", "Abies alba", "1", "2", "", "", ""],
                ],
            ),
        );
        input
    }

    #[test]
    fn end_to_end_tables() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let result = run(&config, &input()).unwrap();

        assert_eq!(result.union.len(), 3);
        assert_eq!(result.union[0].display_name, "Rosa");
        assert_eq!(result.union[0].sources_joined(), "duke,eive");

        assert_eq!(result.shortlist.len(), 1);
        assert_eq!(result.shortlist[0].canonical_id, "X1");

        let files: Vec<_> = result.tables.iter().map(|t| t.file_name.as_str()).collect();
        assert_eq!(files, [UNION_FILE, SHORTLIST_FILE]);

        let s = &result.summary;
        assert_eq!(s.union_size, 3);
        assert_eq!(s.pairwise_overlap["duke&eive"], 1);
        assert_eq!(s.all_sources_overlap, 1);
        assert_eq!(s.combinations["eive_only"], 1);
        assert_eq!(s.combinations["none"], 2);
        assert_eq!(s.families[0].ids_with_data, 2);
        assert_eq!(s.defects.get("union", "unnamed"), 1);
    }

    #[test]
    fn missing_source_table_is_an_error() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let mut input = input();
        input.sources.remove(&SourceTag::Eive);
        let err = run(&config, &input).unwrap_err();
        assert!(err.to_string().contains("'eive'"));
    }

    #[test]
    fn missing_trait_column_fails_whole_run() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let mut input = input();
        input.sources.insert(
            SourceTag::Eive,
            Table::from_rows("eive", &["wfo_taxon_id", "name", "M"], &[&["X1", "", "5"]]),
        );
        let err = run(&config, &input).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { .. }));
    }

    const MODELLING: &str = r#"
[modelling]
min_traits = 2

[[modelling.traits]]
name = "eive_self"
source = "eive"
fields = { M = "moisture", N = "nitrogen", R = "moisture" }
"#;

    fn modelling_input() -> PipelineInput {
        let mut input = input();
        input.sources.insert(
            SourceTag::Eive,
            Table::from_rows(
                "eive",
                &["wfo_taxon_id", "name", "M", "N", "R", "L", "T"],
                &[
                    &["X1", "", "5", "", "3", "", "7"],
                    &["X2", "Abies alba", "1", "2", "", "", ""],
                    &["X4", "Quercus robur", "1", "2", "3", "4", "5"],
                ],
            ),
        );
        input
    }

    #[test]
    fn modelling_shortlist_is_written_after_the_shortlist() {
        let config = PipelineConfig::from_toml(&format!("{CONFIG}{MODELLING}")).unwrap();
        let result = run(&config, &modelling_input()).unwrap();

        assert_eq!(result.modelling.len(), 1);
        assert_eq!(result.modelling[0].canonical_id, "X4");
        // M and R share a trait name.
        assert_eq!(result.modelling[0].set_counts, [2]);
        assert_eq!(result.modelling[0].total_traits, 2);

        let files: Vec<_> = result.tables.iter().map(|t| t.file_name.as_str()).collect();
        assert_eq!(files, [UNION_FILE, SHORTLIST_FILE, MODELLING_FILE]);
        let m = result.summary.modelling.as_ref().unwrap();
        assert_eq!((m.complete_ids, m.size), (1, 1));
        assert_eq!(m.at_min_occurrences, None);
    }

    #[test]
    fn modelling_set_with_unloaded_file_is_an_error() {
        let toml = format!("{CONFIG}{MODELLING}").replace(
            "name = \"eive_self\"",
            "name = \"eive_self\"\nfile = \"extra.csv\"",
        );
        let config = PipelineConfig::from_toml(&toml).unwrap();
        let err = run(&config, &modelling_input()).unwrap_err();
        assert!(err.to_string().contains("table 'extra.csv' not loaded"));
    }

    #[test]
    fn reruns_are_identical() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let a = run(&config, &input()).unwrap();
        let b = run(&config, &input()).unwrap();
        for (x, y) in a.tables.iter().zip(&b.tables) {
            assert_eq!(x.table, y.table);
        }
    }
}
