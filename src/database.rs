use log::{debug, info};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::MigrateError;
use crate::utils::Utils;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens an existing database file. A missing file is an error rather than
    /// a fresh empty database.
    pub fn open(db_path: &Path) -> Result<Self, MigrateError> {
        Self::check_folder(db_path)?;
        if !db_path.is_file() {
            return Err(MigrateError::Error(format!(
                "Database file '{}' does not exist - run `tpymigrate init` to create one",
                db_path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Database opened at: {}", db_path.display());

        Self::from_connection(conn)
    }

    /// Opens the database file, creating it if needed.
    pub fn create(db_path: &Path) -> Result<Self, MigrateError> {
        Self::check_folder(db_path)?;

        let conn = Connection::open(db_path)?;
        info!("Database opened (or created) at: {}", db_path.display());

        Self::from_connection(conn)
    }

    fn check_folder(db_path: &Path) -> Result<(), MigrateError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(MigrateError::Error(format!(
                    "Database folder '{}' does not exist or is not a directory",
                    parent.display()
                )));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, MigrateError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, MigrateError> {
        // Cascade deletes on the model metrics table depend on this
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction and commits if it returns `Ok`.
    /// Any error drops the transaction, which rolls it back.
    pub fn immediate_transaction<T, F>(&mut self, f: F) -> Result<T, MigrateError>
    where
        F: FnOnce(&Transaction) -> Result<T, MigrateError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, MigrateError> {
        Self::table_exists_on(&self.conn, table)
    }

    pub fn table_exists_on(conn: &Connection, table: &str) -> Result<bool, MigrateError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn row_count(&self, table: &str) -> Result<i64, MigrateError> {
        Self::row_count_on(&self.conn, table)
    }

    pub fn row_count_on(conn: &Connection, table: &str) -> Result<i64, MigrateError> {
        let sql = format!("SELECT COUNT(*) FROM {}", Utils::quote_ident(table)?);
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Column names of `table` in declaration order. Empty if the table does not exist.
    pub fn table_columns_on(conn: &Connection, table: &str) -> Result<Vec<String>, MigrateError> {
        let sql = format!("PRAGMA table_info({})", Utils::quote_ident(table)?);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

        let mut columns = Vec::new();
        for column in rows {
            columns.push(column?);
        }
        debug!("Table '{}' has {} columns", table, columns.len());

        Ok(columns)
    }
}
