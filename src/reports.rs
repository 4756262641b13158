use std::fmt::Write as _;
use std::str::FromStr;

use log::{debug, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::MigrateError;
use crate::migration::{MigrationStatus, ModelRowPolicy};
use crate::model::{ModelSpecificMetrics, ModelTag};
use crate::schema::{ModelColumns, TableShape, PASS_THROUGH_COLUMNS, WEEKLY_TABLE, YIELD_COLUMNS};
use crate::utils::Utils;
use crate::weekly::{is_well_formed_week, load_model_specific};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = MigrateError;
    fn from_str(s: &str) -> Result<Self, MigrateError> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(MigrateError::Error("Invalid format specified.".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    pub policy: ModelRowPolicy,
    pub sample_size: usize,
}

/// A single expected-vs-actual comparison. A mismatch is advisory.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub expected: i64,
    pub actual: i64,
}

impl Check {
    pub fn new(name: impl Into<String>, expected: i64, actual: i64) -> Self {
        Check {
            name: name.into(),
            expected,
            actual,
        }
    }

    pub fn passed(&self) -> bool {
        self.expected == self.actual
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelCount {
    pub model: String,
    pub rows: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Sample {
    pub week_id: String,
    pub model_specific: Option<ModelSpecificMetrics>,
    /// Set when the week's model data could not be read back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only summary handed to the operator to decide whether the backup can go.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub target: String,
    pub policy: String,
    pub parent_rows: i64,
    pub backup_rows: Option<i64>,
    pub checks: Vec<Check>,
    pub model_counts: Vec<ModelCount>,
    pub samples: Vec<Sample>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(Check::passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|check| !check.passed())
    }

    pub fn check(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|check| check.name == name)
    }
}

pub const CHECK_PARENT_ROWS: &str = "parent rows match backup";
pub const CHECK_PASS_THROUGH: &str = "backup rows without identical pass-through columns";
pub const CHECK_YIELD_RANGE: &str = "rows with weekly yields outside [0, 100]";
pub const CHECK_WEEK_IDS: &str = "rows with malformed week ids";

// ============================================================================
// Checks shared by every target shape
// ============================================================================

/// Checks that only read the weekly table itself, plus the backup comparisons
/// when a backup is present. Returns the parent and backup row counts alongside.
pub fn common_checks(
    conn: &Connection,
    backup: Option<&str>,
) -> Result<(i64, Option<i64>, Vec<Check>), MigrateError> {
    let weekly = Utils::quote_ident(WEEKLY_TABLE)?;
    let parent_rows: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", weekly), [], |row| {
        row.get(0)
    })?;

    let mut checks = Vec::new();
    let mut backup_rows = None;

    if let Some(backup) = backup {
        let backup_ident = Utils::quote_ident(backup)?;
        let rows: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", backup_ident),
            [],
            |row| row.get(0),
        )?;
        backup_rows = Some(rows);
        checks.push(Check::new(CHECK_PARENT_ROWS, rows, parent_rows));

        // EXCEPT compares NULLs as equal, which is what byte-for-byte means here
        let columns = Utils::column_list(PASS_THROUGH_COLUMNS);
        let missing: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM (SELECT {cols} FROM {backup} EXCEPT SELECT {cols} FROM {weekly})",
                cols = columns,
                backup = backup_ident,
                weekly = weekly
            ),
            [],
            |row| row.get(0),
        )?;
        checks.push(Check::new(CHECK_PASS_THROUGH, 0, missing));
    }

    let out_of_range = YIELD_COLUMNS
        .iter()
        .map(|column| format!("{c} < 0 OR {c} > 100", c = column))
        .collect::<Vec<_>>()
        .join(" OR ");
    let bad_yields: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE {}", weekly, out_of_range),
        [],
        |row| row.get(0),
    )?;
    checks.push(Check::new(CHECK_YIELD_RANGE, 0, bad_yields));

    checks.push(Check::new(CHECK_WEEK_IDS, 0, malformed_week_count(conn)?));

    debug!(
        "Common checks: parent_rows={}, backup_rows={:?}",
        parent_rows, backup_rows
    );
    Ok((parent_rows, backup_rows, checks))
}

fn malformed_week_count(conn: &Connection) -> Result<i64, MigrateError> {
    let sql = format!(
        "SELECT week_id, week_start FROM {}",
        Utils::quote_ident(WEEKLY_TABLE)?
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut count = 0;
    for row in rows {
        let (week_id, week_start) = row?;
        if !is_well_formed_week(&week_id, &week_start) {
            debug!("Malformed week: id='{}', start='{}'", week_id, week_start);
            count += 1;
        }
    }
    Ok(count)
}

/// Number of backup rows that should produce an entry for `tag` under `policy`.
pub fn expected_model_entries(
    conn: &Connection,
    backup: &str,
    tag: ModelTag,
    policy: ModelRowPolicy,
) -> Result<i64, MigrateError> {
    let backup = Utils::quote_ident(backup)?;
    let sql = match policy {
        ModelRowPolicy::Always => format!("SELECT COUNT(*) FROM {}", backup),
        ModelRowPolicy::NonEmptyOnly => format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            backup,
            ModelColumns::for_model(tag).any_not_null_sql()
        ),
    };
    let count = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

/// Projection of the per-model data of the first `limit` weeks. A week whose
/// model data cannot be read (an incomplete document, an unknown model row) is
/// recorded in the sample rather than failing the verification.
pub fn sample_rows(
    conn: &Connection,
    shape: TableShape,
    limit: usize,
) -> Result<Vec<Sample>, MigrateError> {
    let sql = format!(
        "SELECT week_id FROM {} ORDER BY week_id LIMIT ?",
        Utils::quote_ident(WEEKLY_TABLE)?
    );
    let mut stmt = conn.prepare(&sql)?;
    let week_ids = stmt
        .query_map([limit as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut samples = Vec::with_capacity(week_ids.len());
    for week_id in week_ids {
        let sample = match load_model_specific(conn, WEEKLY_TABLE, shape, &week_id) {
            Ok(model_specific) => Sample {
                week_id,
                model_specific,
                error: None,
            },
            Err(err @ (MigrateError::JsonError(_) | MigrateError::Error(_))) => {
                warn!("Sample week '{}' is unreadable: {}", week_id, err);
                Sample {
                    week_id,
                    model_specific: None,
                    error: Some(err.to_string()),
                }
            }
            Err(err) => return Err(err),
        };
        samples.push(sample);
    }
    Ok(samples)
}

// ============================================================================
// Output
// ============================================================================

pub struct Reports {
    // No fields
}

impl Reports {
    pub fn print_verification(
        report: &VerificationReport,
        format: ReportFormat,
    ) -> Result<(), MigrateError> {
        match format {
            ReportFormat::Text => print!("{}", Self::render_verification(report)),
            ReportFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        }
        Ok(())
    }

    pub fn render_verification(report: &VerificationReport) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Verification of {} ({} shape, model entries: {})",
            WEEKLY_TABLE, report.target, report.policy
        );
        let _ = writeln!(out, "  Weekly rows: {}", report.parent_rows);
        match report.backup_rows {
            Some(rows) => {
                let _ = writeln!(out, "  Backup rows: {}", rows);
            }
            None => {
                let _ = writeln!(out, "  Backup rows: (no backup table)");
            }
        }

        let _ = writeln!(out, "\nChecks");
        for check in &report.checks {
            let _ = writeln!(
                out,
                "  {:<5} {:<55} expected {:>8}  actual {:>8}",
                if check.passed() { "ok" } else { "FAIL" },
                check.name,
                check.expected,
                check.actual
            );
        }

        if !report.model_counts.is_empty() {
            let _ = writeln!(out, "\nModel entries");
            for count in &report.model_counts {
                let _ = writeln!(out, "  {:<20} {:>8}", count.model, count.rows);
            }
        }

        if !report.samples.is_empty() {
            let _ = writeln!(out, "\nSamples");
            for sample in &report.samples {
                let projection = match (&sample.model_specific, &sample.error) {
                    (_, Some(error)) => format!("unreadable ({})", error),
                    (Some(doc), None) => serde_json::to_string(doc).unwrap_or_default(),
                    (None, None) => "null".to_string(),
                };
                let _ = writeln!(out, "  {}  {}", sample.week_id, projection);
            }
        }

        if report.passed() {
            let _ = writeln!(
                out,
                "\nResult: passed. Once satisfied, remove the backup with `tpymigrate discard-backup`."
            );
        } else {
            let _ = writeln!(
                out,
                "\nResult: {} check(s) did not match. Inspect the data; `tpymigrate restore` rebuilds the table from the backup.",
                report.failed_checks().count()
            );
        }

        out
    }

    pub fn print_status(status: &MigrationStatus) {
        println!("Table:  {} ({} shape)", WEEKLY_TABLE, status.shape);
        if let Some(rows) = status.rows {
            println!("  Weekly rows: {}", rows);
        }
        if let Some(rows) = status.model_rows {
            println!("  Model rows:  {}", rows);
        }
        match (&status.backup, status.backup_rows) {
            (Some(backup), Some(rows)) => println!("Backup: {} ({} rows)", backup, rows),
            _ => println!("Backup: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(checks: Vec<Check>) -> VerificationReport {
        VerificationReport {
            target: "normalized".to_string(),
            policy: "non-empty".to_string(),
            parent_rows: 2,
            backup_rows: Some(2),
            checks,
            model_counts: vec![ModelCount {
                model: "Tesla SXM4".to_string(),
                rows: 1,
            }],
            samples: vec![Sample {
                week_id: "2024-W01".to_string(),
                model_specific: None,
                error: None,
            }],
        }
    }

    #[test]
    fn test_report_format_from_str() {
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("table".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_check_passed() {
        assert!(Check::new("a", 3, 3).passed());
        assert!(!Check::new("a", 3, 2).passed());
    }

    #[test]
    fn test_report_passed_and_failed_checks() {
        let report = report_with(vec![Check::new("a", 1, 1), Check::new("b", 0, 4)]);
        assert!(!report.passed());

        let failed: Vec<&str> = report.failed_checks().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
        assert_eq!(report.check("a").map(|c| c.actual), Some(1));
        assert!(report.check("zzz").is_none());
    }

    #[test]
    fn test_render_verification_text() {
        let text = Reports::render_verification(&report_with(vec![Check::new(CHECK_PARENT_ROWS, 2, 2)]));

        assert!(text.contains("normalized shape"));
        assert!(text.contains("ok"));
        assert!(text.contains("Tesla SXM4"));
        assert!(text.contains("2024-W01  null"));
        assert!(text.contains("Result: passed"));
    }

    #[test]
    fn test_render_verification_reports_failures() {
        let text = Reports::render_verification(&report_with(vec![Check::new(CHECK_PARENT_ROWS, 2, 1)]));
        assert!(text.contains("FAIL"));
        assert!(text.contains("1 check(s) did not match"));
    }

    #[test]
    fn test_render_unreadable_sample() {
        let mut report = report_with(vec![Check::new(CHECK_PARENT_ROWS, 2, 2)]);
        report.samples[0].error = Some("JSON error: missing field `SXM5`".to_string());

        let text = Reports::render_verification(&report);
        assert!(text.contains("2024-W01  unreadable (JSON error: missing field `SXM5`)"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["samples"][0]["error"], "JSON error: missing field `SXM5`");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = report_with(vec![Check::new(CHECK_PARENT_ROWS, 2, 2)]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["checks"][0]["name"], CHECK_PARENT_ROWS);
        assert_eq!(value["backup_rows"], 2);
    }
}
