//! `traitlist verify` - cross-engine reproducibility commands.
//!
//! Subcommands:
//! - `traitlist verify table`    - compare one primary/reference table pair
//! - `traitlist verify manifest` - compare every pair listed in a manifest

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Subcommand;

use traitlist_cli::manifest::{default_key, default_tolerance, Manifest, TableSpec};
use traitlist_cli::verifier::{verify_table, CheckStatus, VerificationReport, VerifyError};
use traitlist_io::csv::{read_table, write_atomic};
use traitlist_io::ChecksumAlgo;

use crate::CliError;

/// Mismatch lines printed per table in the human summary.
const MAX_MISMATCH_LINES: usize = 10;

#[derive(Subcommand)]
pub enum VerifyCommands {
    /// Compare one primary/reference table pair (exit 0 = match, exit 1 = divergent)
    #[command(after_help = "\
Checks, in order: row_count, column_set, duplicate_keys, key_set, row_order
(with --order-sensitive), values, checksum. All checks run even after a failure.

Numeric cells match when |primary - reference| <= tolerance (epsilon-inclusive).
Other cells must match exactly; null and empty are equal.

Exit codes:
  0   All checks pass
  1   At least one check failed
  3   Key column missing
  4   Duplicate keys in either table
  5   Cannot read a table

Examples:
  traitlist verify table out/shortlist_candidates.csv ref/shortlist_candidates.csv
  traitlist verify table a.csv b.csv --key canonical_id --order-sensitive
  traitlist verify table a.csv b.csv --column-tolerance bio_1_q05=0.5 --json")]
    Table {
        /// Table produced by this engine
        primary: PathBuf,

        /// Table produced by the reference engine
        reference: PathBuf,

        /// Key column, unique in both tables
        #[arg(long, default_value_t = default_key())]
        key: String,

        /// Absolute tolerance for numeric cells
        #[arg(long, default_value_t = default_tolerance())]
        tolerance: f64,

        /// Per-column tolerance override, COLUMN=TOLERANCE. Repeatable.
        #[arg(long = "column-tolerance", value_name = "COLUMN=TOL", value_parser = parse_column_tolerance)]
        column_tolerance: Vec<(String, f64)>,

        /// Row order is part of the contract
        #[arg(long)]
        order_sensitive: bool,

        /// Checksum algorithm (blake3 or sha256)
        #[arg(long, default_value = "blake3")]
        checksum: ChecksumAlgo,

        /// Print the verification report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the verification report JSON to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run every table pair listed in a verification manifest
    #[command(after_help = "\
Table paths in the manifest resolve against the manifest's directory.

Exit codes:
  0   Every table passes every check
  1   At least one check failed
  3   Key column missing
  4   Duplicate keys in any table
  5   Cannot read a table
  6   Invalid manifest

Examples:
  traitlist verify manifest parity.toml
  traitlist verify manifest parity.toml --output report.json")]
    Manifest {
        /// Verification manifest (TOML)
        manifest: PathBuf,

        /// Print the verification report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the verification report JSON to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn cmd_verify(cmd: VerifyCommands, quiet: bool) -> Result<(), CliError> {
    match cmd {
        VerifyCommands::Table {
            primary,
            reference,
            key,
            tolerance,
            column_tolerance,
            order_sensitive,
            checksum,
            json,
            output,
        } => {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(CliError::args(format!(
                    "--tolerance must be a finite non-negative number, got {tolerance}"
                )));
            }
            let name = primary
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "table".to_string());
            let spec = TableSpec {
                name: name.clone(),
                primary,
                reference,
                key,
                order_sensitive,
                tolerance: None,
                column_tolerance: column_tolerance.into_iter().collect::<BTreeMap<_, _>>(),
            };
            run_specs(&name, tolerance, checksum, &[spec], json, output, quiet)
        }
        VerifyCommands::Manifest {
            manifest,
            json,
            output,
        } => {
            let text = std::fs::read_to_string(&manifest).map_err(|e| {
                CliError::io(format!("cannot read {}: {e}", manifest.display()))
            })?;
            let mut parsed =
                Manifest::from_toml(&text).map_err(|e| CliError::config(e.to_string()))?;
            let base = manifest
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            parsed.resolve_paths(base);
            run_specs(
                &parsed.name,
                parsed.tolerance,
                parsed.checksum,
                &parsed.tables,
                json,
                output,
                quiet,
            )
        }
    }
}

fn parse_column_tolerance(s: &str) -> Result<(String, f64), String> {
    let (column, tol) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected COLUMN=TOLERANCE, got '{s}'"))?;
    let tol: f64 = tol
        .trim()
        .parse()
        .map_err(|e| format!("invalid tolerance '{tol}': {e}"))?;
    if !tol.is_finite() || tol < 0.0 {
        return Err(format!("tolerance must be finite and non-negative, got {tol}"));
    }
    Ok((column.trim().to_string(), tol))
}

// ── Core ────────────────────────────────────────────────────────────

fn run_specs(
    name: &str,
    tolerance: f64,
    algo: ChecksumAlgo,
    specs: &[TableSpec],
    json: bool,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<(), CliError> {
    let mut tables = Vec::with_capacity(specs.len());
    for spec in specs {
        let primary = read_table(&spec.primary, &spec.name).map_err(|e| CliError::io(e.to_string()))?;
        let reference =
            read_table(&spec.reference, &spec.name).map_err(|e| CliError::io(e.to_string()))?;
        let report = verify_table(spec, tolerance, algo, &primary, &reference).map_err(|e| match e {
            VerifyError::Key { .. } => CliError::schema(e.to_string()),
            VerifyError::Checksum { .. } => CliError::io(e.to_string()),
        })?;
        tables.push(report);
    }
    let report = VerificationReport::new(name, algo, tables);

    if !quiet {
        print_summary(&report);
    }

    if json || output.is_some() {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        if let Some(path) = &output {
            write_atomic(path, text.as_bytes()).map_err(|e| CliError::io(e.to_string()))?;
            if !quiet {
                eprintln!("  report written to: {}", path.display());
            }
        }
        if json {
            println!("{}", text);
        }
    }

    match report.exit_code() {
        0 => Ok(()),
        code => Err(CliError::silent(code)),
    }
}

fn print_summary(report: &VerificationReport) {
    eprintln!(
        "verify: {} {} ({} table{})",
        report.status.as_str().to_uppercase(),
        report.name,
        report.tables.len(),
        if report.tables.len() == 1 { "" } else { "s" },
    );
    for table in &report.tables {
        eprintln!("  {:<32} {}", table.name, table.status.as_str().to_uppercase());
        for check in table.checks.iter().filter(|c| c.status != CheckStatus::Pass) {
            eprintln!("    {:<15} {:<5} {}", check.check.as_str(), check.status.as_str(), check.detail);
        }
        for dup in &table.duplicate_keys {
            eprintln!("      {} key {:?} appears {} times", dup.side.as_str(), dup.key, dup.count);
        }
        for m in table.mismatches.iter().take(MAX_MISMATCH_LINES) {
            match (m.delta, m.tolerance) {
                (Some(delta), Some(tol)) => eprintln!(
                    "      {} {}: primary {} reference {} (delta {}, tolerance {})",
                    m.key, m.column, m.primary, m.reference, delta, tol
                ),
                _ => eprintln!(
                    "      {} {}: primary {:?} reference {:?}",
                    m.key, m.column, m.primary, m.reference
                ),
            }
        }
        if table.mismatches.len() > MAX_MISMATCH_LINES {
            eprintln!("      ... {} more", table.mismatches.len() - MAX_MISMATCH_LINES);
        }
        for d in &table.drift {
            if let Some(v) = d.relative_rmsd.filter(|v| *v > 0.0) {
                eprintln!("    drift {:<24} {:.3e} ({} pairs)", d.column, v, d.pairs);
            }
        }
    }
}
