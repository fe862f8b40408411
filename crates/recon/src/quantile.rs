//! Per-species summary and rank statistics over raw samples.
//!
//! Rank statistics are pinned, not delegated to a library default:
//!
//! - q05, q95, Q1, Q3: inverted empirical CDF (Hyndman-Fan type 1). With
//!   `np = p * n` and `j = floor(np + 4 * f64::EPSILON)`, the 1-based rank is
//!   `j + 1` when `np > j`, else `j`, clamped to `1..=n`. The result is always
//!   an observed sample.
//! - q50: conventional median, the mean of the two middle samples when `n`
//!   is even.
//! - iqr = Q3 - Q1.
//!
//! Moments: mean is a left-to-right sum in input order divided by `n`;
//! stddev is the two-pass sample standard deviation (`n - 1`), `None` for
//! `n < 2`.

use std::collections::BTreeMap;

use crate::config::StatsConfig;
use crate::error::ReconError;
use crate::model::{Defects, StatisticsRecord, StatsOutput};
use crate::numeric::{classify, NumericCell};
use crate::table::Table;

/// Tolerance added before flooring `p * n`, so that products like
/// `0.05 * 220` that land a hair below an integer still hit it.
const RANK_FUZZ: f64 = 4.0 * f64::EPSILON;

/// 1-based inverted-CDF rank for probability `p` over `n` samples.
pub fn inverted_cdf_rank(n: usize, p: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let np = p * n as f64;
    let j = (np + RANK_FUZZ).floor();
    let rank = if np > j { j + 1.0 } else { j };
    (rank.max(1.0) as usize).min(n)
}

/// Inverted-CDF quantile of ascending `sorted` samples.
pub fn inverted_cdf(sorted: &[f64], p: f64) -> Option<f64> {
    match inverted_cdf_rank(sorted.len(), p) {
        0 => None,
        rank => Some(sorted[rank - 1]),
    }
}

/// Median of ascending `sorted` samples.
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    if n % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for x in samples {
        sum += x;
    }
    Some(sum / samples.len() as f64)
}

/// Two-pass sample standard deviation.
pub fn sample_stddev(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let m = mean(samples)?;
    let mut ss = 0.0;
    for x in samples {
        let d = x - m;
        ss += d * d;
    }
    Some((ss / (samples.len() - 1) as f64).sqrt())
}

/// Every statistic for one sample set. `None` when `samples` is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    pub n: usize,
    pub mean: f64,
    pub stddev: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub q05: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub q95: f64,
}

impl SampleSummary {
    pub fn iqr(&self) -> f64 {
        self.q75 - self.q25
    }
}

/// Summarize finite samples given in input order.
pub fn summarize(samples: &[f64]) -> Option<SampleSummary> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(SampleSummary {
        n: samples.len(),
        mean: mean(samples)?,
        stddev: sample_stddev(samples),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        q05: inverted_cdf(&sorted, 0.05)?,
        q25: inverted_cdf(&sorted, 0.25)?,
        q50: median(&sorted)?,
        q75: inverted_cdf(&sorted, 0.75)?,
        q95: inverted_cdf(&sorted, 0.95)?,
    })
}

fn to_record(canonical_id: &str, variable: &str, samples: &[f64]) -> StatisticsRecord {
    let s = summarize(samples);
    StatisticsRecord {
        canonical_id: canonical_id.to_string(),
        variable: variable.to_string(),
        n: samples.len(),
        mean: s.map(|s| s.mean),
        stddev: s.and_then(|s| s.stddev),
        min: s.map(|s| s.min),
        max: s.map(|s| s.max),
        q05: s.map(|s| s.q05),
        q50: s.map(|s| s.q50),
        q95: s.map(|s| s.q95),
        iqr: s.map(|s| s.iqr()),
    }
}

/// Enforce `min <= q05 <= q50 <= q95 <= max`, `iqr >= 0`, and that every
/// emitted statistic is finite. Finite samples near `f64::MAX` can still
/// overflow the mean or stddev sums; such a record fails instead of writing
/// `inf` into a canonical table.
pub fn check_record(r: &StatisticsRecord) -> Result<(), ReconError> {
    let emitted = [
        ("mean", r.mean),
        ("stddev", r.stddev),
        ("min", r.min),
        ("max", r.max),
        ("q05", r.q05),
        ("q50", r.q50),
        ("q95", r.q95),
        ("iqr", r.iqr),
    ];
    if let Some((stat, Some(v))) = emitted
        .iter()
        .find(|(_, v)| v.is_some_and(|v| !v.is_finite()))
    {
        return Err(ReconError::InvariantViolation(format!(
            "'{}' / '{}': {stat} is not finite ({v})",
            r.canonical_id, r.variable
        )));
    }

    let (Some(min), Some(q05), Some(q50), Some(q95), Some(max), Some(iqr)) =
        (r.min, r.q05, r.q50, r.q95, r.max, r.iqr)
    else {
        if r.n > 0 {
            return Err(ReconError::InvariantViolation(format!(
                "'{}' / '{}': {} samples but missing statistics",
                r.canonical_id, r.variable, r.n
            )));
        }
        return Ok(());
    };
    let ordered = min <= q05 && q05 <= q50 && q50 <= q95 && q95 <= max;
    if !ordered || iqr < 0.0 || iqr.is_nan() {
        return Err(ReconError::InvariantViolation(format!(
            "'{}' / '{}': min={min} q05={q05} q50={q50} q95={q95} max={max} iqr={iqr}",
            r.canonical_id, r.variable
        )));
    }
    Ok(())
}

/// Root-mean-square deviation between paired values, divided by the sample
/// standard deviation of `reference`. `None` when fewer than two pairs are
/// given or the reference has zero spread.
pub fn relative_rmsd(primary: &[f64], reference: &[f64]) -> Option<f64> {
    if primary.len() != reference.len() || primary.len() < 2 {
        return None;
    }
    let mut ss = 0.0;
    for (p, r) in primary.iter().zip(reference) {
        let d = p - r;
        ss += d * d;
    }
    let rmsd = (ss / primary.len() as f64).sqrt();
    let sd = sample_stddev(reference)?;
    if sd == 0.0 || !sd.is_finite() {
        return None;
    }
    Some(rmsd / sd)
}

// ---------------------------------------------------------------------------
// Dataset aggregation
// ---------------------------------------------------------------------------

/// Tracked variables: the explicit list, or every column except the id
/// column and the excluded ones, in table column order.
///
/// An explicit list naming the id column or repeating a variable is a config
/// error, as is an exclude rule that leaves no variable at all.
pub fn resolve_variables(cfg: &StatsConfig, table: &Table) -> Result<Vec<String>, ReconError> {
    let variables = match &cfg.variables {
        Some(vars) => {
            cfg.check_variables(vars)?;
            for v in vars {
                table.require(v)?;
            }
            vars.clone()
        }
        None => table
            .headers
            .iter()
            .filter(|h| **h != cfg.id_column && !cfg.exclude.contains(h))
            .cloned()
            .collect(),
    };
    if variables.is_empty() {
        return Err(ReconError::ConfigValidation(format!(
            "stats '{}': no variables in table '{}' after excluding {:?}",
            cfg.name, table.name, cfg.exclude
        )));
    }
    Ok(variables)
}

/// Group samples by id and compute one record per `(id, variable)`.
///
/// Records come out sorted by id, variables in column order. Every record
/// passes [`check_record`] or the whole dataset fails.
pub fn compute_dataset(
    cfg: &StatsConfig,
    table: &Table,
    defects: &mut Defects,
) -> Result<StatsOutput, ReconError> {
    let id_col = table.require(&cfg.id_column)?;
    let variables = resolve_variables(cfg, table)?;
    let var_cols = variables
        .iter()
        .map(|v| table.require(v))
        .collect::<Result<Vec<_>, _>>()?;

    let mut samples: BTreeMap<String, Vec<Vec<f64>>> = BTreeMap::new();
    let mut null_id = 0;
    let mut invalid = 0;

    for row in 0..table.len() {
        let Some(id) = table.cell(row, id_col) else {
            null_id += 1;
            continue;
        };
        let per_var = samples
            .entry(id.to_string())
            .or_insert_with(|| vec![Vec::new(); var_cols.len()]);
        for (slot, &col) in per_var.iter_mut().zip(&var_cols) {
            match classify(table.cell(row, col)) {
                NumericCell::Value(v) => slot.push(v),
                NumericCell::Invalid => invalid += 1,
                NumericCell::Absent => {}
            }
        }
    }

    let mut records = Vec::with_capacity(samples.len() * variables.len());
    for (id, per_var) in &samples {
        for (variable, values) in variables.iter().zip(per_var) {
            let record = to_record(id, variable, values);
            check_record(&record)?;
            records.push(record);
        }
    }

    let scope = format!("stats:{}", cfg.name);
    defects.record(&scope, "null_id", null_id);
    defects.record(&scope, "invalid_numeric", invalid);
    tracing::info!(
        dataset = cfg.name.as_str(),
        rows = table.len(),
        species = samples.len(),
        variables = variables.len(),
        "computed statistics"
    );

    Ok(StatsOutput {
        name: cfg.name.clone(),
        variables,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<f64>) -> Vec<f64> {
        v.sort_by(f64::total_cmp);
        v
    }

    #[test]
    fn bimodal_q05_is_an_observed_point() {
        let mut samples = vec![9009.0; 11];
        samples.extend(std::iter::repeat(24293.0).take(209));
        assert_eq!(samples.len(), 220);
        let s = summarize(&samples).unwrap();
        assert_eq!(s.q05, 9009.0);
        assert_ne!(s.q05, 23528.8);
        assert_eq!(s.q95, 24293.0);
    }

    #[test]
    fn even_median_averages_middle_pair() {
        // 20 values below, the two middles, 20 values above.
        let mut samples: Vec<f64> = (0..20).map(|i| 1000.0 + i as f64).collect();
        samples.push(21258.0);
        samples.push(14930.0);
        samples.extend((0..20).map(|i| 30000.0 + i as f64));
        assert_eq!(samples.len(), 42);
        let s = summarize(&samples).unwrap();
        assert_eq!(s.q50, 18094.0);
    }

    #[test]
    fn rank_rule_matches_type_one() {
        // np exactly integral: rank = np.
        assert_eq!(inverted_cdf_rank(220, 0.05), 11);
        assert_eq!(inverted_cdf_rank(20, 0.25), 5);
        // np fractional: rank = floor(np) + 1.
        assert_eq!(inverted_cdf_rank(42, 0.25), 11);
        assert_eq!(inverted_cdf_rank(42, 0.75), 32);
        assert_eq!(inverted_cdf_rank(10, 0.05), 1);
        assert_eq!(inverted_cdf_rank(10, 0.95), 10);
        // Clamped.
        assert_eq!(inverted_cdf_rank(1, 0.05), 1);
        assert_eq!(inverted_cdf_rank(3, 1.0), 3);
        assert_eq!(inverted_cdf_rank(0, 0.5), 0);
    }

    #[test]
    fn small_samples() {
        let one = summarize(&[4.0]).unwrap();
        assert_eq!((one.min, one.q05, one.q50, one.q95, one.max), (4.0, 4.0, 4.0, 4.0, 4.0));
        assert_eq!(one.stddev, None);
        assert_eq!(one.iqr(), 0.0);

        let two = summarize(&[3.0, 1.0]).unwrap();
        assert_eq!(two.q05, 1.0);
        assert_eq!(two.q50, 2.0);
        assert_eq!(two.q95, 3.0);
        assert_eq!(two.iqr(), 2.0);
        assert!((two.stddev.unwrap() - std::f64::consts::SQRT_2).abs() < 1e-12);

        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn odd_median_is_middle_value() {
        assert_eq!(median(&sorted(vec![5.0, 1.0, 3.0])), Some(3.0));
    }

    #[test]
    fn moments_use_input_order() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.mean, 5.0);
        assert!((s.stddev.unwrap() - 2.138_089_935_299_395).abs() < 1e-12);
    }

    #[test]
    fn check_record_rejects_disorder() {
        let r = StatisticsRecord {
            canonical_id: "X".into(),
            variable: "bio_1".into(),
            n: 3,
            mean: Some(2.0),
            stddev: Some(1.0),
            min: Some(1.0),
            max: Some(3.0),
            q05: Some(2.5),
            q50: Some(2.0),
            q95: Some(3.0),
            iqr: Some(1.0),
        };
        assert!(check_record(&r).unwrap_err().is_invariant());
    }

    #[test]
    fn relative_rmsd_scales_by_reference_spread() {
        let reference = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(relative_rmsd(&reference, &reference), Some(0.0));
        let shifted = [2.0, 3.0, 4.0, 5.0];
        let sd = sample_stddev(&reference).unwrap();
        assert!((relative_rmsd(&shifted, &reference).unwrap() - 1.0 / sd).abs() < 1e-12);
        assert_eq!(relative_rmsd(&[1.0, 1.0], &[2.0, 2.0]), None);
        assert_eq!(relative_rmsd(&[1.0], &[2.0]), None);
    }

    #[test]
    fn dataset_groups_by_id_and_skips_bad_samples() {
        let cfg = StatsConfig {
            name: "worldclim".into(),
            file: "w.csv".into(),
            id_column: "wfo_taxon_id".into(),
            exclude: vec!["gbifID".into(), "lat".into()],
            variables: None,
        };
        let t = Table::from_rows(
            "worldclim",
            &["wfo_taxon_id", "gbifID", "lat", "bio_1", "bio_12"],
            &[
                &["X2", "1", "10", "5", "100"],
                &["X1", "2", "11", "1", ""],
                &["X1", "3", "12", "3", "oops"],
                &["", "4", "13", "9", "9"],
            ],
        );
        let mut d = Defects::default();
        let out = compute_dataset(&cfg, &t, &mut d).unwrap();
        assert_eq!(out.variables, ["bio_1", "bio_12"]);
        let keys: Vec<_> = out
            .records
            .iter()
            .map(|r| (r.canonical_id.as_str(), r.variable.as_str(), r.n))
            .collect();
        assert_eq!(
            keys,
            [
                ("X1", "bio_1", 2),
                ("X1", "bio_12", 0),
                ("X2", "bio_1", 1),
                ("X2", "bio_12", 1)
            ]
        );
        assert_eq!(out.records[0].q50, Some(2.0));
        assert_eq!(out.records[1].mean, None);
        assert_eq!(d.get("stats:worldclim", "invalid_numeric"), 1);
        assert_eq!(d.get("stats:worldclim", "null_id"), 1);
    }

    #[test]
    fn explicit_variable_must_exist() {
        let cfg = StatsConfig {
            name: "soil".into(),
            file: "s.csv".into(),
            id_column: "wfo_taxon_id".into(),
            exclude: vec![],
            variables: Some(vec!["phh2o".into()]),
        };
        let t = Table::from_rows("soil", &["wfo_taxon_id", "clay"], &[]);
        let err = compute_dataset(&cfg, &t, &mut Defects::default()).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { .. }));
    }

    fn stats_cfg(exclude: &[&str], variables: Option<&[&str]>) -> StatsConfig {
        StatsConfig {
            name: "worldclim".into(),
            file: "w.csv".into(),
            id_column: "wfo_taxon_id".into(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            variables: variables.map(|v| v.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn exclude_leaving_no_variables_is_rejected() {
        let cfg = stats_cfg(&["lat", "lon"], None);
        let t = Table::from_rows(
            "worldclim",
            &["wfo_taxon_id", "lat", "lon"],
            &[&["X1", "1", "2"], &["X2", "3", "4"]],
        );
        let err = compute_dataset(&cfg, &t, &mut Defects::default()).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
        assert!(err.to_string().contains("no variables"));
    }

    #[test]
    fn explicit_variables_cannot_name_id_or_repeat() {
        let t = Table::from_rows("worldclim", &["wfo_taxon_id", "bio_1"], &[&["X1", "1"]]);

        let cfg = stats_cfg(&[], Some(&["bio_1", "wfo_taxon_id"]));
        let err = resolve_variables(&cfg, &t).unwrap_err();
        assert!(err.to_string().contains("id column 'wfo_taxon_id'"));

        let cfg = stats_cfg(&[], Some(&["bio_1", "bio_1"]));
        let err = resolve_variables(&cfg, &t).unwrap_err();
        assert!(err.to_string().contains("duplicate variable 'bio_1'"));

        let cfg = stats_cfg(&[], Some(&["bio_1"]));
        assert_eq!(resolve_variables(&cfg, &t).unwrap(), ["bio_1"]);
    }

    #[test]
    fn overflowing_moments_fail_the_record() {
        let s = summarize(&[1.5e308, 1.5e308]).unwrap();
        assert!(s.mean.is_infinite());

        let t = Table::from_rows(
            "worldclim",
            &["wfo_taxon_id", "bio_1"],
            &[&["X1", "1.5e308"], &["X1", "1.5e308"]],
        );
        let err = compute_dataset(&stats_cfg(&[], None), &t, &mut Defects::default()).unwrap_err();
        assert!(err.is_invariant());
        assert!(err.to_string().contains("mean is not finite"));
    }
}
