use flexi_logger::FlexiLoggerError;
use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Logger error: {0}")]
    LoggerError(#[from] FlexiLoggerError),

    #[error("Table '{0}' does not exist")]
    TableMissing(String),

    #[error("Backup table '{0}' already exists - verify and discard it, or restore from it, before migrating again")]
    BackupExists(String),

    #[error("Backup table '{0}' does not exist - run a snapshot first")]
    BackupMissing(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
