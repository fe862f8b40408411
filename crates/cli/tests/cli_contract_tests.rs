// Integration tests enforcing the `traitlist` shell contract.
//
// These tests guarantee that:
//   1. Exit codes follow the registry in exit_codes.rs
//   2. stdout from --json commands is exactly one JSON value
//   3. Pipeline output is byte-reproducible across runs
//
// Run with: cargo test -p traitlist-cli --test cli_contract_tests -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn traitlist() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_traitlist"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn fixture_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../recon/tests/fixtures/pipeline.toml")
}

/// Assert stdout is a single, parseable JSON value with no extra lines.
fn assert_single_json(stdout: &str) -> serde_json::Value {
    let trimmed = stdout.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");

    let val: serde_json::Value = serde_json::from_str(trimmed).unwrap_or_else(|e| {
        panic!(
            "stdout must be valid JSON.\nParse error: {}\nstdout:\n{}",
            e, trimmed
        )
    });

    let re_serialized = serde_json::to_string(&val).unwrap();
    let re_parsed: serde_json::Value = serde_json::from_str(&re_serialized).unwrap();
    assert_eq!(val, re_parsed, "JSON round-trip should be stable");

    val
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("process exited by signal")
}

fn run_pipeline(out_dir: &Path) -> Output {
    traitlist()
        .args(["pipeline", "run"])
        .arg(fixture_config())
        .arg("--output-root")
        .arg(out_dir)
        .arg("--json")
        .output()
        .expect("traitlist pipeline run")
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ===========================================================================
// traitlist pipeline run
// ===========================================================================

#[test]
fn pipeline_run_writes_tables_and_summary() {
    let out = TempDir::new().unwrap();
    let output = run_pipeline(out.path());
    assert_eq!(code(&output), 0, "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let val = assert_single_json(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(val["config_name"], "fixture");
    assert_eq!(val["union_size"], 8);
    assert_eq!(val["shortlist_size"], 5);
    assert_eq!(val["checksum_algorithm"], "blake3");
    assert_eq!(val["defects"]["duke"]["null_id"], 1);
    assert_eq!(val["modelling"]["size"], 1);
    assert_eq!(val["modelling"]["complete_family"], "eive");

    let checksums = val["checksums"].as_object().expect("checksums object");
    for file in [
        "master_taxa_union.csv",
        "shortlist_candidates.csv",
        "gbif_occurrence_counts.csv",
        "shortlist_with_gbif.csv",
        "shortlist_with_gbif_ge2.csv",
        "modelling_shortlist.csv",
        "modelling_shortlist_with_gbif.csv",
        "modelling_shortlist_with_gbif_ge2.csv",
        "worldclim_species_quantiles.csv",
    ] {
        assert!(out.path().join(file).exists(), "{file} not written");
        let sum = checksums[file].as_str().unwrap();
        assert!(sum.starts_with("blake3:"), "{sum}");
    }
    assert!(out.path().join("run_summary.json").exists());

    let union = fs::read_to_string(out.path().join("master_taxa_union.csv")).unwrap();
    assert!(union.starts_with(
        "canonical_id,display_name,sources,source_count,presence_duke,presence_eive,\
         presence_mabberly,presence_try_enhanced,presence_austraits\n"
    ));
    assert!(!union.contains('\r'));
}

#[test]
fn pipeline_run_publishes_all_outputs_or_none() {
    let out = TempDir::new().unwrap();
    fs::write(out.path().join("master_taxa_union.csv"), "old").unwrap();
    // The summary is staged last; a directory in its temp path makes that fail.
    fs::create_dir(out.path().join("run_summary.json.tmp")).unwrap();

    let output = run_pipeline(out.path());
    assert_eq!(code(&output), 5, "stderr: {}", String::from_utf8_lossy(&output.stderr));

    assert_eq!(
        fs::read_to_string(out.path().join("master_taxa_union.csv")).unwrap(),
        "old"
    );
    assert!(!out.path().join("shortlist_candidates.csv").exists());
    assert!(!out.path().join("run_summary.json").exists());
    let leftovers: Vec<_> = fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".csv.tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn pipeline_run_is_byte_reproducible() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let first = assert_single_json(&String::from_utf8_lossy(&run_pipeline(a.path()).stdout));
    let second = assert_single_json(&String::from_utf8_lossy(&run_pipeline(b.path()).stdout));
    assert_eq!(first["checksums"], second["checksums"]);

    for file in ["shortlist_candidates.csv", "worldclim_species_quantiles.csv"] {
        assert_eq!(
            fs::read(a.path().join(file)).unwrap(),
            fs::read(b.path().join(file)).unwrap(),
            "{file} differs between runs"
        );
    }
}

#[test]
fn pipeline_missing_column_exits_3_without_output() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "duke.csv", "taxon_id,name\nX1,Rosa\n");
    let config = write(
        dir.path(),
        "p.toml",
        "name = \"bad\"\n[sources.duke]\nfile = \"duke.csv\"\nname_columns = [\"name\"]\n",
    );

    let output = traitlist().args(["pipeline", "run"]).arg(&config).output().unwrap();
    assert_eq!(code(&output), 3);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing column 'wfo_taxon_id'"), "stderr: {stderr}");
    assert!(!dir.path().join("out").exists(), "no partial output on failure");
}

#[test]
fn pipeline_missing_input_exits_5() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "p.toml",
        "name = \"bad\"\n[sources.duke]\nfile = \"absent.csv\"\n",
    );
    let output = traitlist().args(["pipeline", "run"]).arg(&config).output().unwrap();
    assert_eq!(code(&output), 5);
}

#[test]
fn pipeline_invalid_config_exits_6() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "p.toml",
        "name = \"bad\"\n[sources.kew]\nfile = \"kew.csv\"\n",
    );
    let output = traitlist().args(["pipeline", "run"]).arg(&config).output().unwrap();
    assert_eq!(code(&output), 6);
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown source 'kew'"));
}

// ===========================================================================
// traitlist pipeline validate
// ===========================================================================

#[test]
fn pipeline_validate_json() {
    let output = traitlist()
        .args(["pipeline", "validate"])
        .arg(fixture_config())
        .arg("--json")
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let val = assert_single_json(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(val["valid"], true);
    assert_eq!(
        val["sources"],
        serde_json::json!(["duke", "eive", "mabberly", "try_enhanced", "austraits"])
    );
    assert_eq!(val["families"], serde_json::json!(["eive", "try", "aus"]));
    assert_eq!(val["modelling_sets"], serde_json::json!(["try_enhanced", "try_raw"]));
}

#[test]
fn unknown_subcommand_is_usage_error() {
    let output = traitlist().args(["pipeline", "explode"]).output().unwrap();
    assert_eq!(code(&output), 2);
}

// ===========================================================================
// traitlist verify table
// ===========================================================================

#[test]
fn verify_table_against_itself_passes() {
    let out = TempDir::new().unwrap();
    assert_eq!(code(&run_pipeline(out.path())), 0);
    let shortlist = out.path().join("shortlist_candidates.csv");

    let output = traitlist()
        .args(["verify", "table"])
        .arg(&shortlist)
        .arg(&shortlist)
        .args(["--order-sensitive", "--json"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);

    let val = assert_single_json(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(val["contract_version"], 1);
    assert_eq!(val["status"], "pass");
    let checks: Vec<&str> = val["tables"][0]["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["check"].as_str().unwrap())
        .collect();
    assert_eq!(
        checks,
        ["row_count", "column_set", "duplicate_keys", "key_set", "row_order", "values", "checksum"]
    );
}

#[test]
fn verify_table_reports_row_column_delta() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.csv", "canonical_id,bio_1_q05,bio_1_mean\nX1,9009,1.0\nX2,5,2.0\n");
    let b = write(dir.path(), "b.csv", "canonical_id,bio_1_q05,bio_1_mean\nX1,23528.8,1.0\nX2,5,2.0000001\n");

    let output = traitlist()
        .args(["verify", "table"])
        .arg(&a)
        .arg(&b)
        .arg("--json")
        .output()
        .unwrap();
    assert_eq!(code(&output), 1);

    let val = assert_single_json(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(val["status"], "fail");
    let mismatches = val["tables"][0]["mismatches"].as_array().unwrap();
    assert_eq!(mismatches.len(), 1, "2.0 vs 2.0000001 is within 1e-6");
    assert_eq!(mismatches[0]["key"], "X1");
    assert_eq!(mismatches[0]["column"], "bio_1_q05");
    assert_eq!(mismatches[0]["primary"], "9009");
    assert_eq!(mismatches[0]["reference"], "23528.8");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("X1 bio_1_q05"), "stderr: {stderr}");
}

#[test]
fn verify_table_duplicate_keys_exit_4() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.csv", "canonical_id,n\nX1,1\nX1,2\n");
    let b = write(dir.path(), "b.csv", "canonical_id,n\nX1,1\n");
    let output = traitlist()
        .args(["verify", "table"])
        .arg(&a)
        .arg(&b)
        .arg("--quiet")
        .output()
        .unwrap();
    assert_eq!(code(&output), 4);
    assert!(output.stderr.is_empty(), "--quiet keeps stderr empty");
}

#[test]
fn verify_table_missing_key_exit_3() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.csv", "id,n\nX1,1\n");
    let output = traitlist()
        .args(["verify", "table"])
        .arg(&a)
        .arg(&a)
        .output()
        .unwrap();
    assert_eq!(code(&output), 3);
}

// ===========================================================================
// traitlist verify manifest
// ===========================================================================

#[test]
fn verify_manifest_column_tolerance_and_output_file() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("ref")).unwrap();
    write(dir.path(), "q.csv", "canonical_id,bio_1_q05,bio_1_q50\nX1,10,12\nX2,20,21\n");
    write(dir.path(), "ref/q.csv", "canonical_id,bio_1_q05,bio_1_q50\nX2,20.4,21\nX1,10,12\n");
    let manifest = write(
        dir.path(),
        "parity.toml",
        r#"
name = "parity"
checksum = "sha256"

[[tables]]
name = "quantiles"
primary = "q.csv"
reference = "ref/q.csv"
[tables.column_tolerance]
"bio_1_q05" = 0.5
"#,
    );
    let report = dir.path().join("report.json");

    let output = traitlist()
        .args(["verify", "manifest"])
        .arg(&manifest)
        .arg("--output")
        .arg(&report)
        .output()
        .unwrap();

    // Values within tolerance, but canonical bytes differ.
    assert_eq!(code(&output), 1);
    let val: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(val["checksum"], "sha256");
    let checks = val["tables"][0]["checks"].as_array().unwrap();
    let status = |name: &str| {
        checks
            .iter()
            .find(|c| c["check"] == name)
            .map(|c| c["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status("values"), "pass");
    assert_eq!(status("row_order"), "skip");
    assert_eq!(status("checksum"), "fail");
}

#[test]
fn verify_manifest_invalid_exits_6() {
    let dir = TempDir::new().unwrap();
    let manifest = write(dir.path(), "bad.toml", "name = \"x\"\ntolerance = -1\ntables = []\n");
    let output = traitlist().args(["verify", "manifest"]).arg(&manifest).output().unwrap();
    assert_eq!(code(&output), 6);
}
