//! Cross-engine reproducibility checks.
//!
//! Each primary/reference table pair goes through, in order: `row_count`,
//! `column_set`, `duplicate_keys`, `key_set`, `row_order`, `values`,
//! `checksum`. Every check runs even after an earlier one fails so a single
//! report carries the whole picture. A check that cannot run meaningfully
//! (row order of an order-insensitive table, key-based checks over duplicate
//! keys) is reported as `skip`.

use std::collections::BTreeSet;

use serde::Serialize;
use traitlist_io::checksum::checksum_table;
use traitlist_io::{ChecksumAlgo, TableError};
use traitlist_recon::Table;

use crate::diff::{
    find_duplicates, key_column, reconcile, row_keys, ColumnDrift, DiffError, DiffOptions,
    DiffSummary, DuplicateKey, RowStatus, Side,
};
use crate::exit_codes::{EXIT_DIVERGENCE, EXIT_INVARIANT, EXIT_SUCCESS};
use crate::manifest::TableSpec;

/// Bumped when the JSON report shape changes.
pub const CONTRACT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("table '{table}': {source}")]
    Key {
        table: String,
        #[source]
        source: DiffError,
    },

    #[error("table '{table}': {source}")]
    Checksum {
        table: String,
        #[source]
        source: TableError,
    },
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    RowCount,
    ColumnSet,
    DuplicateKeys,
    KeySet,
    RowOrder,
    Values,
    Checksum,
}

impl CheckName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::RowCount => "row_count",
            CheckName::ColumnSet => "column_set",
            CheckName::DuplicateKeys => "duplicate_keys",
            CheckName::KeySet => "key_set",
            CheckName::RowOrder => "row_order",
            CheckName::Values => "values",
            CheckName::Checksum => "checksum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
        }
    }

    fn from_pass(pass: bool) -> Self {
        if pass {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: CheckName,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMismatch {
    pub key: String,
    pub column: String,
    pub primary: String,
    pub reference: String,
    pub delta: Option<f64>,
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDivergence {
    /// Zero-based data row position.
    pub position: usize,
    pub primary: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub name: String,
    pub primary: String,
    pub reference: String,
    pub key: String,
    pub order_sensitive: bool,
    pub tolerance: f64,
    pub status: CheckStatus,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiffSummary>,
    pub columns_only_primary: Vec<String>,
    pub columns_only_reference: Vec<String>,
    pub duplicate_keys: Vec<DuplicateKey>,
    pub keys_only_primary: Vec<String>,
    pub keys_only_reference: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_divergence: Option<OrderDivergence>,
    pub mismatches: Vec<ValueMismatch>,
    pub drift: Vec<ColumnDrift>,
    pub primary_checksum: String,
    pub reference_checksum: String,
}

impl TableReport {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    pub fn check(&self, name: CheckName) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == name)
    }

    pub fn has_duplicate_keys(&self) -> bool {
        !self.duplicate_keys.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub contract_version: u32,
    pub name: String,
    pub status: CheckStatus,
    pub checksum: ChecksumAlgo,
    pub tables: Vec<TableReport>,
}

impl VerificationReport {
    pub fn new(name: impl Into<String>, checksum: ChecksumAlgo, tables: Vec<TableReport>) -> Self {
        let status = CheckStatus::from_pass(tables.iter().all(TableReport::passed));
        Self {
            contract_version: CONTRACT_VERSION,
            name: name.into(),
            status,
            checksum,
            tables,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    /// Duplicate keys outrank plain divergence.
    pub fn exit_code(&self) -> u8 {
        if self.tables.iter().any(TableReport::has_duplicate_keys) {
            EXIT_INVARIANT
        } else if !self.passed() {
            EXIT_DIVERGENCE
        } else {
            EXIT_SUCCESS
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Run every check over one table pair.
///
/// Fails only when the key column is absent from either side or a table
/// cannot be serialized for hashing; every divergence is reported instead.
pub fn verify_table(
    spec: &TableSpec,
    default_tolerance: f64,
    algo: ChecksumAlgo,
    primary: &Table,
    reference: &Table,
) -> Result<TableReport, VerifyError> {
    let key_err = |source| VerifyError::Key {
        table: spec.name.clone(),
        source,
    };
    let tolerance = spec.effective_tolerance(default_tolerance);
    let mut checks = Vec::with_capacity(7);

    // row_count
    checks.push(CheckResult {
        check: CheckName::RowCount,
        status: CheckStatus::from_pass(primary.len() == reference.len()),
        detail: format!("primary {} rows, reference {} rows", primary.len(), reference.len()),
    });

    // column_set
    let p_cols: BTreeSet<&str> = primary.headers.iter().map(String::as_str).collect();
    let r_cols: BTreeSet<&str> = reference.headers.iter().map(String::as_str).collect();
    let columns_only_primary: Vec<String> =
        p_cols.difference(&r_cols).map(|c| c.to_string()).collect();
    let columns_only_reference: Vec<String> =
        r_cols.difference(&p_cols).map(|c| c.to_string()).collect();
    checks.push(CheckResult {
        check: CheckName::ColumnSet,
        status: CheckStatus::from_pass(
            columns_only_primary.is_empty() && columns_only_reference.is_empty(),
        ),
        detail: if columns_only_primary.is_empty() && columns_only_reference.is_empty() {
            format!("{} columns", p_cols.len())
        } else {
            format!(
                "only in primary: [{}]; only in reference: [{}]",
                columns_only_primary.join(", "),
                columns_only_reference.join(", ")
            )
        },
    });

    // duplicate_keys
    let p_keys = row_keys(primary, key_column(primary, &spec.key, Side::Primary).map_err(key_err)?);
    let r_keys = row_keys(
        reference,
        key_column(reference, &spec.key, Side::Reference).map_err(key_err)?,
    );
    let mut duplicate_keys = find_duplicates(&p_keys, Side::Primary);
    duplicate_keys.extend(find_duplicates(&r_keys, Side::Reference));
    checks.push(CheckResult {
        check: CheckName::DuplicateKeys,
        status: CheckStatus::from_pass(duplicate_keys.is_empty()),
        detail: if duplicate_keys.is_empty() {
            format!("'{}' is unique on both sides", spec.key)
        } else {
            format!("{} duplicated key(s)", duplicate_keys.len())
        },
    });

    let mut summary = None;
    let mut keys_only_primary = Vec::new();
    let mut keys_only_reference = Vec::new();
    let mut order_divergence = None;
    let mut mismatches = Vec::new();
    let mut drift = Vec::new();

    if duplicate_keys.is_empty() {
        let options = DiffOptions {
            key: spec.key.clone(),
            tolerance,
            column_tolerance: spec.column_tolerance.clone(),
        };
        let result = reconcile(primary, reference, &options).map_err(key_err)?;

        // key_set
        keys_only_primary = sorted(result.keys_with(RowStatus::OnlyPrimary));
        keys_only_reference = sorted(result.keys_with(RowStatus::OnlyReference));
        let keys_match = keys_only_primary.is_empty() && keys_only_reference.is_empty();
        checks.push(CheckResult {
            check: CheckName::KeySet,
            status: CheckStatus::from_pass(keys_match),
            detail: format!(
                "{} only in primary, {} only in reference",
                keys_only_primary.len(),
                keys_only_reference.len()
            ),
        });

        // row_order
        checks.push(if spec.order_sensitive {
            order_divergence = first_divergence(&p_keys, &r_keys);
            CheckResult {
                check: CheckName::RowOrder,
                status: CheckStatus::from_pass(order_divergence.is_none()),
                detail: match &order_divergence {
                    None => "identical key sequence".into(),
                    Some(d) => format!(
                        "first divergence at row {}: primary {}, reference {}",
                        d.position,
                        d.primary.as_deref().unwrap_or("<end>"),
                        d.reference.as_deref().unwrap_or("<end>")
                    ),
                },
            }
        } else {
            skipped(CheckName::RowOrder, "not order-sensitive")
        });

        // values
        mismatches = result
            .mismatches()
            .map(|(key, d)| ValueMismatch {
                key: key.to_string(),
                column: d.column.clone(),
                primary: d.primary.clone(),
                reference: d.reference.clone(),
                delta: d.delta,
                tolerance: d.tolerance,
            })
            .collect();
        let compared = result.summary.matched + result.summary.diff;
        checks.push(CheckResult {
            check: CheckName::Values,
            status: CheckStatus::from_pass(mismatches.is_empty()),
            detail: format!(
                "{} shared keys x {} shared columns, {} outside tolerance",
                compared,
                result.columns.len(),
                mismatches.len()
            ),
        });

        drift = result.drift;
        summary = Some(result.summary);
    } else {
        checks.push(skipped(CheckName::KeySet, "duplicate keys"));
        checks.push(skipped(CheckName::RowOrder, "duplicate keys"));
        checks.push(skipped(CheckName::Values, "duplicate keys"));
    }

    // checksum
    let hash = |table: &Table, keys: &[String]| {
        let canonical = if spec.order_sensitive {
            table.clone()
        } else {
            sorted_by_key(table, keys)
        };
        checksum_table(algo, &canonical).map_err(|source| VerifyError::Checksum {
            table: spec.name.clone(),
            source,
        })
    };
    let primary_checksum = hash(primary, &p_keys)?;
    let reference_checksum = hash(reference, &r_keys)?;
    checks.push(CheckResult {
        check: CheckName::Checksum,
        status: CheckStatus::from_pass(primary_checksum == reference_checksum),
        detail: format!(
            "{algo} {} vs {}",
            short(&primary_checksum),
            short(&reference_checksum)
        ),
    });

    let status = CheckStatus::from_pass(checks.iter().all(|c| c.status != CheckStatus::Fail));

    for c in checks.iter().filter(|c| c.status == CheckStatus::Fail) {
        tracing::warn!(table = %spec.name, check = c.check.as_str(), detail = %c.detail, "check failed");
    }
    tracing::info!(
        table = %spec.name,
        status = status.as_str(),
        mismatches = mismatches.len(),
        "table verified"
    );

    Ok(TableReport {
        name: spec.name.clone(),
        primary: spec.primary.display().to_string(),
        reference: spec.reference.display().to_string(),
        key: spec.key.clone(),
        order_sensitive: spec.order_sensitive,
        tolerance,
        status,
        checks,
        summary,
        columns_only_primary,
        columns_only_reference,
        duplicate_keys,
        keys_only_primary,
        keys_only_reference,
        order_divergence,
        mismatches,
        drift,
        primary_checksum,
        reference_checksum,
    })
}

fn skipped(check: CheckName, why: &str) -> CheckResult {
    CheckResult {
        check,
        status: CheckStatus::Skip,
        detail: why.to_string(),
    }
}

fn sorted(keys: Vec<&str>) -> Vec<String> {
    let mut out: Vec<String> = keys.into_iter().map(str::to_string).collect();
    out.sort();
    out
}

fn short(hex: &str) -> &str {
    &hex[..hex.len().min(16)]
}

/// First position where the key sequences differ, including length.
pub fn first_divergence(primary: &[String], reference: &[String]) -> Option<OrderDivergence> {
    let len = primary.len().max(reference.len());
    (0..len)
        .find(|&i| primary.get(i) != reference.get(i))
        .map(|position| OrderDivergence {
            position,
            primary: primary.get(position).cloned(),
            reference: reference.get(position).cloned(),
        })
}

/// Copy of `table` with rows stably sorted by `keys` (one per row).
fn sorted_by_key(table: &Table, keys: &[String]) -> Table {
    let mut order: Vec<usize> = (0..table.len()).collect();
    order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
    let mut out = Table::new(table.name.clone(), table.headers.clone());
    for i in order {
        out.push(table.rows[i].clone());
    }
    out
}
