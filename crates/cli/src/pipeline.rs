//! `traitlist pipeline` - build the canonical tables from a config.
//!
//! Subcommands:
//! - `traitlist pipeline run`      - read inputs, run every stage, write outputs
//! - `traitlist pipeline validate` - parse and validate the config only

use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

use traitlist_io::checksum::checksum_bytes;
use traitlist_io::csv::{read_table, to_canonical_bytes, StagedWrite};
use traitlist_io::ChecksumAlgo;
use traitlist_recon::model::{PipelineInput, RunSummary};
use traitlist_recon::{PipelineConfig, Table};

use crate::CliError;

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Run every stage and write the canonical tables plus run_summary.json
    #[command(after_help = "\
Relative input_root / output_root in the config resolve against the config
file's directory. Every table is computed in memory first; nothing is written
unless every stage succeeds, and no output is replaced unless every file
(run_summary.json included) was written in full.

Exit codes:
  0   All tables written
  3   Required column missing from an input
  4   Invariant violation (duplicate key, quantile ordering)
  5   Cannot read an input or write an output
  6   Invalid config

Examples:
  traitlist pipeline run stage1.toml
  traitlist pipeline run stage1.toml --json > summary.json
  RUST_LOG=traitlist=debug traitlist pipeline run stage1.toml")]
    Run {
        /// Pipeline config (TOML)
        config: PathBuf,

        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Override the config's output_root (relative to the working directory)
        #[arg(long)]
        output_root: Option<PathBuf>,
    },

    /// Parse and validate a config without reading any input
    Validate {
        /// Pipeline config (TOML)
        config: PathBuf,

        /// Print the validated config outline as JSON on stdout
        #[arg(long)]
        json: bool,
    },
}

pub fn cmd_pipeline(cmd: PipelineCommands, quiet: bool) -> Result<(), CliError> {
    match cmd {
        PipelineCommands::Run {
            config,
            json,
            output_root,
        } => cmd_run(config, json, output_root, quiet),
        PipelineCommands::Validate { config, json } => cmd_validate(config, json, quiet),
    }
}

// ── Config ──────────────────────────────────────────────────────────

/// Load and validate a config. Returns it with the directory its relative
/// paths resolve against.
fn load_config(path: &Path) -> Result<(PipelineConfig, PathBuf), CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::io(format!("cannot read {}: {e}", path.display()))
            .with_hint("pass the path to a pipeline TOML file")
    })?;
    let config = PipelineConfig::from_toml(&text).map_err(CliError::from)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base))
}

fn load(root: &Path, file: &str, name: &str) -> Result<Table, CliError> {
    let path = root.join(file);
    read_table(&path, name).map_err(|e| CliError::io(e.to_string()))
}

/// Read every table the config names, relative to `input_root`.
fn load_input(config: &PipelineConfig, input_root: &Path) -> Result<PipelineInput, CliError> {
    let mut input = PipelineInput::default();
    for (tag, cfg) in config.sources_in_order() {
        input.sources.insert(tag, load(input_root, &cfg.file, tag.as_str())?);
    }
    for (family, cfg) in config.families_in_order() {
        if let Some(file) = &cfg.file {
            input
                .family_tables
                .insert(family, load(input_root, file, family.as_str())?);
        }
    }
    if let Some(occ) = &config.occurrences {
        input.occurrences = Some(load(input_root, &occ.file, "occurrences")?);
    }
    for stats in &config.stats {
        input
            .stats
            .insert(stats.name.clone(), load(input_root, &stats.file, &stats.name)?);
    }
    for set in config.modelling.iter().flat_map(|m| &m.traits) {
        if let Some(file) = &set.file {
            input
                .modelling_tables
                .insert(set.name.clone(), load(input_root, file, &set.name)?);
        }
    }
    Ok(input)
}

// ── run ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RunSummaryFile<'a> {
    run_at: String,
    output_root: String,
    checksum_algorithm: ChecksumAlgo,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

fn cmd_run(
    config_path: PathBuf,
    json: bool,
    output_root_override: Option<PathBuf>,
    quiet: bool,
) -> Result<(), CliError> {
    let (config, base) = load_config(&config_path)?;
    let input_root = base.join(&config.input_root);
    let output_root = output_root_override.unwrap_or_else(|| base.join(&config.output_root));

    tracing::info!(
        config = %config.name,
        input_root = %input_root.display(),
        output_root = %output_root.display(),
        "pipeline start"
    );

    let input = load_input(&config, &input_root)?;
    let result = traitlist_recon::run(&config, &input)?;
    let mut summary = result.summary;

    // Every stage succeeded; only now touch the output directory. Nothing is
    // renamed into place until every table and the summary are staged.
    let algo = ChecksumAlgo::Blake3;
    let mut staged = StagedWrite::new();
    for out in &result.tables {
        let path = output_root.join(&out.file_name);
        let bytes = to_canonical_bytes(&out.table)
            .map_err(|e| CliError::io(format!("{}: {e}", path.display())))?;
        staged
            .stage(&path, &bytes)
            .map_err(|e| CliError::io(e.to_string()))?;
        summary.checksums.insert(
            out.file_name.clone(),
            format!("{algo}:{}", checksum_bytes(algo, &bytes)),
        );
        tracing::debug!(file = %out.file_name, rows = out.table.len(), "table staged");
    }

    let file = RunSummaryFile {
        run_at: chrono::Utc::now().to_rfc3339(),
        output_root: output_root.display().to_string(),
        checksum_algorithm: algo,
        summary: &summary,
    };
    let summary_json = serde_json::to_string_pretty(&file)
        .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
    let summary_path = output_root.join(RUN_SUMMARY_FILE);
    staged
        .stage(&summary_path, summary_json.as_bytes())
        .map_err(|e| CliError::io(e.to_string()))?;
    staged.commit().map_err(|e| CliError::io(e.to_string()))?;

    if json {
        println!("{}", summary_json);
    }
    if !quiet {
        eprintln!(
            "pipeline: {} OK ({} taxa, {} shortlisted, {} defects)",
            summary.config_name,
            summary.union_size,
            summary.shortlist_size,
            summary.defects.total(),
        );
        for (file, checksum) in &summary.checksums {
            eprintln!("  {:<40} {}", file, &checksum[..checksum.len().min(23)]);
        }
        eprintln!("  summary written to: {}", summary_path.display());
    }
    Ok(())
}

// ── validate ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ValidateOutput {
    valid: bool,
    name: String,
    sources: Vec<String>,
    families: Vec<String>,
    occurrences: bool,
    stats: Vec<String>,
    modelling_sets: Vec<String>,
}

fn cmd_validate(config_path: PathBuf, json: bool, quiet: bool) -> Result<(), CliError> {
    let (config, _) = load_config(&config_path)?;
    let output = ValidateOutput {
        valid: true,
        name: config.name.clone(),
        sources: config
            .sources_in_order()
            .into_iter()
            .map(|(tag, _)| tag.to_string())
            .collect(),
        families: config
            .families_in_order()
            .into_iter()
            .map(|(family, _)| family.to_string())
            .collect(),
        occurrences: config.occurrences.is_some(),
        stats: config.stats.iter().map(|s| s.name.clone()).collect(),
        modelling_sets: config
            .modelling
            .iter()
            .flat_map(|m| m.traits.iter().map(|t| t.name.clone()))
            .collect(),
    };

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{}", text);
    }
    if !quiet {
        eprintln!(
            "config OK: {} ({} sources, {} families, {} stats datasets)",
            output.name,
            output.sources.len(),
            output.families.len(),
            output.stats.len(),
        );
    }
    Ok(())
}
