use log::{info, Level};
use logging_timer::timer;

use crate::database::Database;
use crate::error::MigrateError;
use crate::schema::{TableShape, CREATE_LEGACY_SQL, MODEL_TABLE, PASS_THROUGH_COLUMNS};
use crate::utils::Utils;
use crate::weekly::legacy_model_columns;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub table: String,
    pub backup: String,
    pub rows: i64,
}

/// Copies every row and column of `table` into `<table>_backup`.
///
/// The copy is a plain table with no constraints, triggers or shared storage,
/// so later drops of the live table cannot touch it. An existing backup is
/// never overwritten.
pub fn snapshot_table(db: &mut Database, table: &str) -> Result<SnapshotSummary, MigrateError> {
    let backup = Utils::backup_table_name(table)?;
    let table_ident = Utils::quote_ident(table)?;
    let backup_ident = Utils::quote_ident(&backup)?;

    if !db.table_exists(table)? {
        return Err(MigrateError::TableMissing(table.to_string()));
    }
    if db.table_exists(&backup)? {
        return Err(MigrateError::BackupExists(backup));
    }
    // A migrated table keeps part of its data in other tables or shapes, so a
    // copy of it is not a rollback source
    let shape = TableShape::detect_table(db.conn(), table)?;
    if shape != TableShape::Legacy {
        return Err(MigrateError::Error(format!(
            "'{}' is in {} shape; only a legacy table can be snapshotted",
            table, shape
        )));
    }

    let _tmr = timer!(Level::Info; "SNAPSHOT", "{} -> {}", table, backup);
    let rows = db.immediate_transaction(|tx| {
        tx.execute_batch(&format!(
            "CREATE TABLE {} AS SELECT * FROM {};",
            backup_ident, table_ident
        ))?;

        let source_rows = Database::row_count_on(tx, table)?;
        let backup_rows = Database::row_count_on(tx, &backup)?;
        if source_rows != backup_rows {
            return Err(MigrateError::Error(format!(
                "Snapshot of '{}' copied {} of {} rows",
                table, backup_rows, source_rows
            )));
        }
        Ok(backup_rows)
    })?;

    info!("Snapshot of '{}' saved to '{}' ({} rows)", table, backup, rows);
    Ok(SnapshotSummary {
        table: table.to_string(),
        backup,
        rows,
    })
}

/// Rebuilds `table` in the legacy shape from its backup. Any target-shape
/// tables are dropped first. Returns the number of restored rows.
pub fn restore_table(db: &mut Database, table: &str, backup: &str) -> Result<i64, MigrateError> {
    let table_ident = Utils::quote_ident(table)?;
    let backup_ident = Utils::quote_ident(backup)?;

    let mut columns: Vec<&str> = PASS_THROUGH_COLUMNS.to_vec();
    let model_columns = legacy_model_columns();
    for (_, model) in &model_columns {
        columns.extend(model.all());
    }
    let column_list = Utils::column_list(&columns);

    let _tmr = timer!(Level::Info; "RESTORE", "{} -> {}", backup, table);
    db.immediate_transaction(|tx| {
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};\nDROP TABLE IF EXISTS {};\n{}",
            Utils::quote_ident(MODEL_TABLE)?,
            table_ident,
            CREATE_LEGACY_SQL
        ))?;

        let restored = tx.execute(
            &format!(
                "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
                table_ident,
                backup_ident,
                cols = column_list
            ),
            [],
        )? as i64;

        let backup_rows = Database::row_count_on(tx, backup)?;
        if restored != backup_rows {
            return Err(MigrateError::Error(format!(
                "Restore copied {} of {} backup rows",
                restored, backup_rows
            )));
        }
        Ok(restored)
    })
}

pub fn drop_table(db: &mut Database, table: &str) -> Result<(), MigrateError> {
    let ident = Utils::quote_ident(table)?;
    db.immediate_transaction(|tx| {
        tx.execute_batch(&format!("DROP TABLE {};", ident))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{REDEFINE_NORMALIZED_SQL, WEEKLY_TABLE};
    use crate::test_support::{sample_weeks, seeded_legacy_db};

    #[test]
    fn test_snapshot_copies_every_row() {
        let mut db = seeded_legacy_db(&sample_weeks());
        let summary = snapshot_table(&mut db, WEEKLY_TABLE).unwrap();

        assert_eq!(summary.backup, "weekly_tpy_metrics_backup");
        assert_eq!(summary.rows, 4);
        assert_eq!(db.row_count(&summary.backup).unwrap(), db.row_count(WEEKLY_TABLE).unwrap());
        assert_eq!(
            TableShape::detect_table(db.conn(), &summary.backup).unwrap(),
            TableShape::Legacy
        );
    }

    #[test]
    fn test_snapshot_of_empty_table() {
        let mut db = seeded_legacy_db(&[]);
        let summary = snapshot_table(&mut db, WEEKLY_TABLE).unwrap();
        assert_eq!(summary.rows, 0);
        assert!(db.table_exists(&summary.backup).unwrap());
    }

    #[test]
    fn test_snapshot_is_independent_of_source() {
        let mut db = seeded_legacy_db(&sample_weeks());
        snapshot_table(&mut db, WEEKLY_TABLE).unwrap();

        db.conn().execute_batch("DELETE FROM weekly_tpy_metrics;").unwrap();
        assert_eq!(db.row_count("weekly_tpy_metrics_backup").unwrap(), 4);
    }

    #[test]
    fn test_snapshot_errors() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(matches!(
            snapshot_table(&mut db, WEEKLY_TABLE),
            Err(MigrateError::TableMissing(_))
        ));

        let mut db = seeded_legacy_db(&sample_weeks());
        snapshot_table(&mut db, WEEKLY_TABLE).unwrap();
        assert!(matches!(
            snapshot_table(&mut db, WEEKLY_TABLE),
            Err(MigrateError::BackupExists(_))
        ));

        assert!(matches!(
            snapshot_table(&mut db, "weekly tpy"),
            Err(MigrateError::Error(_))
        ));
    }

    #[test]
    fn test_snapshot_refuses_migrated_table() {
        let mut db = seeded_legacy_db(&sample_weeks());
        db.conn().execute_batch(REDEFINE_NORMALIZED_SQL).unwrap();

        let result = snapshot_table(&mut db, WEEKLY_TABLE);
        assert!(matches!(result, Err(MigrateError::Error(ref msg)) if msg.contains("normalized shape")));
        assert!(!db.table_exists("weekly_tpy_metrics_backup").unwrap());
    }

    #[test]
    fn test_restore_after_table_was_dropped() {
        let mut db = seeded_legacy_db(&sample_weeks());
        snapshot_table(&mut db, WEEKLY_TABLE).unwrap();
        db.conn().execute_batch("DROP TABLE weekly_tpy_metrics;").unwrap();

        let rows = restore_table(&mut db, WEEKLY_TABLE, "weekly_tpy_metrics_backup").unwrap();
        assert_eq!(rows, 4);
        assert_eq!(TableShape::detect(db.conn()).unwrap(), TableShape::Legacy);
    }

    #[test]
    fn test_drop_table() {
        let mut db = seeded_legacy_db(&[]);
        drop_table(&mut db, WEEKLY_TABLE).unwrap();
        assert!(!db.table_exists(WEEKLY_TABLE).unwrap());
        assert!(drop_table(&mut db, WEEKLY_TABLE).is_err());
    }
}
