mod embedded;
mod normalized;
mod snapshot;

use log::{info, warn, Level};
use logging_timer::timer;
use rusqlite::Connection;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::database::Database;
use crate::error::MigrateError;
use crate::reports::{VerificationReport, VerifyOptions};
use crate::schema::{TableShape, MODEL_TABLE, WEEKLY_TABLE};
use crate::utils::Utils;

pub use snapshot::SnapshotSummary;

/// Function type for the backfill phase: reads the backup table and populates the
/// freshly redefined target shape.
pub type BackfillFn =
    fn(&Connection, &str, ModelRowPolicy) -> Result<BackfillSummary, MigrateError>;

/// Function type for the verification phase. Read-only.
pub type VerifyFn =
    fn(&Connection, Option<&str>, &VerifyOptions) -> Result<VerificationReport, MigrateError>;

/// Migration descriptor for one target shape:
/// - redefine_sql: drops the live table(s) and creates the target shape
/// - backfill_fn: copies pass-through columns and redistributes per-model data
/// - verify_fn: read-only counts and sample projections
pub struct Migration {
    pub redefine_sql: &'static str,
    pub backfill_fn: BackfillFn,
    pub verify_fn: VerifyFn,
    pub default_policy: ModelRowPolicy,
}

/// Whether a model that has no data in a given week still gets an entry.
#[derive(AsRefStr, EnumString, Display, EnumIter, Debug, PartialEq, Eq, Copy, Clone)]
pub enum ModelRowPolicy {
    /// Emit an entry only when at least one of the model's source columns is non-null
    #[strum(serialize = "non-empty")]
    NonEmptyOnly,
    /// Emit an entry for every known model, with nulls where data is absent
    #[strum(serialize = "always")]
    Always,
}

/// The two mutually exclusive physical shapes the per-model metrics can take.
#[derive(AsRefStr, EnumString, Display, EnumIter, Debug, PartialEq, Eq, Copy, Clone)]
#[strum(serialize_all = "lowercase")]
pub enum TargetSchema {
    Normalized,
    Embedded,
}

impl TargetSchema {
    pub fn migration(self) -> &'static Migration {
        match self {
            TargetSchema::Normalized => &normalized::MIGRATION,
            TargetSchema::Embedded => &embedded::MIGRATION,
        }
    }

    pub fn shape(self) -> TableShape {
        match self {
            TargetSchema::Normalized => TableShape::Normalized,
            TargetSchema::Embedded => TableShape::Embedded,
        }
    }

    pub fn from_shape(shape: TableShape) -> Option<TargetSchema> {
        match shape {
            TableShape::Normalized => Some(TargetSchema::Normalized),
            TableShape::Embedded => Some(TargetSchema::Embedded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub weekly_rows: usize,
    /// (model, entries written) in model order
    pub model_entries: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub shape: TableShape,
    pub rows: Option<i64>,
    pub model_rows: Option<i64>,
    pub backup: Option<String>,
    pub backup_rows: Option<i64>,
}

/// Drives the snapshot → redefine → backfill → verify procedure against
/// `weekly_tpy_metrics`. Each stage assumes the previous one succeeded; there is
/// no automatic rollback. The backup table is the recovery source and is only
/// removed by an explicit `discard_backup`.
pub struct Migrator<'a> {
    db: &'a mut Database,
    backup: String,
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a mut Database) -> Result<Self, MigrateError> {
        let backup = Utils::backup_table_name(WEEKLY_TABLE)?;
        Ok(Migrator { db, backup })
    }

    pub fn backup_table(&self) -> &str {
        &self.backup
    }

    /// Creates the legacy table if no weekly table exists yet. Returns true if created.
    pub fn init(&mut self) -> Result<bool, MigrateError> {
        if self.db.table_exists(WEEKLY_TABLE)? {
            info!("Table '{}' already exists; nothing to initialize", WEEKLY_TABLE);
            return Ok(false);
        }
        self.db.immediate_transaction(|tx| {
            tx.execute_batch(crate::schema::CREATE_LEGACY_SQL)?;
            Ok(())
        })?;
        info!("Created '{}' in legacy shape", WEEKLY_TABLE);
        Ok(true)
    }

    pub fn snapshot(&mut self) -> Result<SnapshotSummary, MigrateError> {
        snapshot::snapshot_table(self.db, WEEKLY_TABLE)
    }

    /// Drops the live table(s) and creates the target shape. Destructive: the
    /// backup must already exist and hold the legacy shape.
    pub fn redefine(&mut self, target: TargetSchema) -> Result<(), MigrateError> {
        self.require_legacy_backup()?;

        let _tmr = timer!(Level::Info; "REDEFINE", "{}", target);
        self.db.immediate_transaction(|tx| {
            tx.execute_batch(target.migration().redefine_sql)?;
            Ok(())
        })?;

        info!("Redefined '{}' in {} shape", WEEKLY_TABLE, target);
        Ok(())
    }

    pub fn backfill(
        &mut self,
        target: TargetSchema,
        policy: Option<ModelRowPolicy>,
    ) -> Result<BackfillSummary, MigrateError> {
        self.require_legacy_backup()?;
        self.require_shape(target.shape())?;

        let existing = self.db.row_count(WEEKLY_TABLE)?;
        if existing > 0 {
            return Err(MigrateError::Error(format!(
                "'{}' already holds {} rows; redefine it before backfilling again",
                WEEKLY_TABLE, existing
            )));
        }

        let migration = target.migration();
        let policy = policy.unwrap_or(migration.default_policy);
        let backup = self.backup.clone();

        let _tmr = timer!(Level::Info; "BACKFILL", "{} ({})", target, policy);
        let summary = self
            .db
            .immediate_transaction(|tx| (migration.backfill_fn)(tx, &backup, policy))?;

        info!(
            "Backfilled {} weekly rows into {} shape; model entries: {:?}",
            summary.weekly_rows, target, summary.model_entries
        );
        Ok(summary)
    }

    /// Read-only. Mismatches are recorded in the report, never raised as errors.
    pub fn verify(
        &self,
        target: TargetSchema,
        options: &VerifyOptions,
    ) -> Result<VerificationReport, MigrateError> {
        self.require_shape(target.shape())?;

        let conn = self.db.conn();
        let backup = match TableShape::detect_table(conn, &self.backup)? {
            TableShape::Legacy => Some(self.backup.as_str()),
            _ => None,
        };

        let _tmr = timer!(Level::Info; "VERIFY", "{}", target);
        let report = (target.migration().verify_fn)(conn, backup, options)?;

        if report.passed() {
            info!("Verification of {} shape passed", target);
        } else {
            for check in report.failed_checks() {
                warn!(
                    "Verification mismatch: {} (expected {}, actual {})",
                    check.name, check.expected, check.actual
                );
            }
        }
        Ok(report)
    }

    /// Runs every stage in order. Re-running is safe:
    /// - a table already in the target shape is only verified
    /// - a missing or half-built table is rebuilt from an existing legacy backup
    /// - a legacy table with a leftover backup is refused, since snapshotting
    ///   would overwrite the only rollback source
    pub fn run(
        &mut self,
        target: TargetSchema,
        policy: Option<ModelRowPolicy>,
        options: &VerifyOptions,
    ) -> Result<VerificationReport, MigrateError> {
        let conn = self.db.conn();
        let shape = TableShape::detect(conn)?;
        let backup_shape = TableShape::detect_table(conn, &self.backup)?;

        if shape == target.shape()
            && (backup_shape != TableShape::Legacy || self.db.row_count(WEEKLY_TABLE)? > 0)
        {
            info!(
                "'{}' is already in {} shape; verifying only",
                WEEKLY_TABLE, target
            );
            return self.verify(target, options);
        }

        match (shape, backup_shape) {
            (TableShape::Legacy, TableShape::Missing) => {
                self.snapshot()?;
            }
            (TableShape::Legacy, _) => {
                return Err(MigrateError::BackupExists(self.backup.clone()));
            }
            (TableShape::Missing, TableShape::Missing) => {
                return Err(MigrateError::TableMissing(WEEKLY_TABLE.to_string()));
            }
            (_, TableShape::Legacy) => {
                warn!(
                    "'{}' is in {} shape; rebuilding from backup '{}'",
                    WEEKLY_TABLE, shape, self.backup
                );
            }
            (_, backup_shape) => {
                return Err(self.backup_shape_error(backup_shape));
            }
        }

        self.redefine(target)?;
        self.backfill(target, policy)?;
        self.verify(target, options)
    }

    /// Manual rollback: rebuilds the legacy table from the backup. The backup is kept.
    pub fn restore(&mut self) -> Result<i64, MigrateError> {
        self.require_legacy_backup()?;
        let rows = snapshot::restore_table(self.db, WEEKLY_TABLE, &self.backup)?;
        info!("Restored {} rows into '{}' from '{}'", rows, WEEKLY_TABLE, self.backup);
        Ok(rows)
    }

    /// Drops the backup. Unless `force` is set, the live table must be in a target
    /// shape and pass verification first.
    pub fn discard_backup(
        &mut self,
        force: bool,
        options: &VerifyOptions,
    ) -> Result<(), MigrateError> {
        if !self.db.table_exists(&self.backup)? {
            return Err(MigrateError::BackupMissing(self.backup.clone()));
        }

        if !force {
            let shape = TableShape::detect(self.db.conn())?;
            let Some(target) = TargetSchema::from_shape(shape) else {
                return Err(MigrateError::Error(format!(
                    "'{}' is in {} shape; refusing to discard the backup without --force",
                    WEEKLY_TABLE, shape
                )));
            };
            let report = self.verify(target, options)?;
            if !report.passed() {
                return Err(MigrateError::Error(format!(
                    "Verification reported {} mismatch(es); refusing to discard the backup without --force",
                    report.failed_checks().count()
                )));
            }
        }

        snapshot::drop_table(self.db, &self.backup)?;
        info!("Discarded backup table '{}'", self.backup);
        Ok(())
    }

    pub fn status(&self) -> Result<MigrationStatus, MigrateError> {
        let shape = TableShape::detect(self.db.conn())?;
        let rows = match shape {
            TableShape::Missing => None,
            _ => Some(self.db.row_count(WEEKLY_TABLE)?),
        };
        let model_rows = match shape {
            TableShape::Normalized => Some(self.db.row_count(MODEL_TABLE)?),
            _ => None,
        };
        let (backup, backup_rows) = if self.db.table_exists(&self.backup)? {
            (Some(self.backup.clone()), Some(self.db.row_count(&self.backup)?))
        } else {
            (None, None)
        };

        Ok(MigrationStatus {
            shape,
            rows,
            model_rows,
            backup,
            backup_rows,
        })
    }

    fn require_legacy_backup(&self) -> Result<(), MigrateError> {
        match TableShape::detect_table(self.db.conn(), &self.backup)? {
            TableShape::Legacy => Ok(()),
            other => Err(self.backup_shape_error(other)),
        }
    }

    fn backup_shape_error(&self, backup_shape: TableShape) -> MigrateError {
        match backup_shape {
            TableShape::Missing => MigrateError::BackupMissing(self.backup.clone()),
            other => MigrateError::Error(format!(
                "Backup table '{}' is in {} shape, expected legacy",
                self.backup, other
            )),
        }
    }

    fn require_shape(&self, expected: TableShape) -> Result<(), MigrateError> {
        let shape = TableShape::detect(self.db.conn())?;
        if shape != expected {
            return Err(MigrateError::Error(format!(
                "'{}' is in {} shape, expected {}",
                WEEKLY_TABLE, shape, expected
            )));
        }
        Ok(())
    }
}
