use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use crate::config::Config;
use crate::database::Database;
use crate::error::MigrateError;
use crate::migration::{Migrator, ModelRowPolicy, TargetSchema};
use crate::model::Percent;
use crate::reports::{ReportFormat, Reports, VerifyOptions};
use crate::schema::{TableShape, WEEKLY_TABLE};
use crate::weekly::{load_model_specific, WeeklyMetrics};

#[derive(Parser)]
#[command(
    name = "tpymigrate",
    version,
    about = "tpymigrate: moves per-model throughput yield out of the flat weekly_tpy_metrics columns"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to the configured path)
    #[arg(long = "db", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run snapshot, redefine, backfill and verify in order
    Migrate {
        #[arg(long = "target", value_parser = clap::builder::PossibleValuesParser::new(["normalized", "embedded"]))]
        target: Option<String>,

        /// Whether models with no data in a week still get an entry (defaults per target)
        #[arg(long = "model-rows", value_parser = clap::builder::PossibleValuesParser::new(["non-empty", "always"]))]
        model_rows: Option<String>,

        #[arg(long = "format", value_parser = clap::builder::PossibleValuesParser::new(["text", "json"]), default_value = "text")]
        format: String,

        /// Number of weeks shown in the verification sample
        #[arg(long = "sample")]
        sample: Option<usize>,
    },

    /// Copy weekly_tpy_metrics into weekly_tpy_metrics_backup
    Snapshot,

    /// Drop the live table and create the target shape (requires a backup)
    Redefine {
        #[arg(long = "target", value_parser = clap::builder::PossibleValuesParser::new(["normalized", "embedded"]))]
        target: Option<String>,
    },

    /// Populate the redefined table from the backup
    Backfill {
        #[arg(long = "target", value_parser = clap::builder::PossibleValuesParser::new(["normalized", "embedded"]))]
        target: Option<String>,

        #[arg(long = "model-rows", value_parser = clap::builder::PossibleValuesParser::new(["non-empty", "always"]))]
        model_rows: Option<String>,
    },

    /// Compare the migrated table against the backup. Read-only.
    Verify {
        /// Defaults to the shape the live table is in
        #[arg(long = "target", value_parser = clap::builder::PossibleValuesParser::new(["normalized", "embedded"]))]
        target: Option<String>,

        #[arg(long = "model-rows", value_parser = clap::builder::PossibleValuesParser::new(["non-empty", "always"]))]
        model_rows: Option<String>,

        #[arg(long = "format", value_parser = clap::builder::PossibleValuesParser::new(["text", "json"]), default_value = "text")]
        format: String,

        #[arg(long = "sample")]
        sample: Option<usize>,
    },

    /// Rebuild the legacy table from the backup
    Restore,

    /// Drop the backup table once verification passes
    #[command(name = "discard-backup")]
    DiscardBackup {
        /// Drop the backup without verifying first
        #[arg(long = "force", default_value_t = false)]
        force: bool,

        #[arg(long = "model-rows", value_parser = clap::builder::PossibleValuesParser::new(["non-empty", "always"]))]
        model_rows: Option<String>,
    },

    /// Show the shape of the live table and whether a backup exists
    Status,

    /// Create the database file and an empty legacy table if none exists
    Init,

    /// Print one week's record and per-model metrics as JSON
    Show {
        #[arg(long = "week")]
        week: String,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), MigrateError> {
        let args = Cli::parse();
        let config = Config::get();

        let db_path = args
            .db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.database.path));
        let mut db = match args.command {
            Command::Init => Database::create(&db_path)?,
            _ => Database::open(&db_path)?,
        };

        args.command.execute(&mut db, &config)
    }
}

impl Command {
    fn execute(self, db: &mut Database, config: &Config) -> Result<(), MigrateError> {
        match self {
            Command::Migrate {
                target,
                model_rows,
                format,
                sample,
            } => {
                let target = Self::target_or_config(target, config)?;
                let policy = Self::policy_or_config(model_rows, config)?;
                let options = Self::verify_options(target, policy, sample, config);
                let format: ReportFormat = format.parse()?;

                let mut migrator = Migrator::new(db)?;
                let report = migrator.run(target, policy, &options)?;
                Reports::print_verification(&report, format)
            }
            Command::Snapshot => {
                let summary = Migrator::new(db)?.snapshot()?;
                println!(
                    "Saved {} rows of '{}' to '{}'",
                    summary.rows, summary.table, summary.backup
                );
                Ok(())
            }
            Command::Redefine { target } => {
                let target = Self::target_or_config(target, config)?;
                Migrator::new(db)?.redefine(target)?;
                println!("Redefined '{}' in {} shape", WEEKLY_TABLE, target);
                Ok(())
            }
            Command::Backfill { target, model_rows } => {
                let target = Self::target_or_config(target, config)?;
                let policy = Self::policy_or_config(model_rows, config)?;
                let summary = Migrator::new(db)?.backfill(target, policy)?;

                println!("Backfilled {} weekly rows", summary.weekly_rows);
                for (model, entries) in &summary.model_entries {
                    println!("  {:<12} {:>8} entries", model, entries);
                }
                Ok(())
            }
            Command::Verify {
                target,
                model_rows,
                format,
                sample,
            } => {
                let target = match target {
                    Some(target) => Self::parse_target(&target)?,
                    None => Self::live_target(db)?,
                };
                let policy = Self::policy_or_config(model_rows, config)?;
                let options = Self::verify_options(target, policy, sample, config);
                let format: ReportFormat = format.parse()?;

                let report = Migrator::new(db)?.verify(target, &options)?;
                Reports::print_verification(&report, format)
            }
            Command::Restore => {
                let mut migrator = Migrator::new(db)?;
                let rows = migrator.restore()?;
                println!(
                    "Restored {} rows into '{}' from '{}'",
                    rows,
                    WEEKLY_TABLE,
                    migrator.backup_table()
                );
                Ok(())
            }
            Command::DiscardBackup { force, model_rows } => {
                let policy = Self::policy_or_config(model_rows, config)?;
                let target = TargetSchema::from_shape(TableShape::detect(db.conn())?)
                    .unwrap_or_else(|| config.migration.target());
                let options = Self::verify_options(target, policy, Some(0), config);

                let mut migrator = Migrator::new(db)?;
                migrator.discard_backup(force, &options)?;
                println!("Discarded '{}'", migrator.backup_table());
                Ok(())
            }
            Command::Status => {
                let status = Migrator::new(db)?.status()?;
                Reports::print_status(&status);
                Ok(())
            }
            Command::Init => {
                if Migrator::new(db)?.init()? {
                    println!("Created '{}'", WEEKLY_TABLE);
                } else {
                    println!("'{}' already exists", WEEKLY_TABLE);
                }
                Ok(())
            }
            Command::Show { week } => {
                let conn = db.conn();
                let shape = TableShape::detect(conn)?;
                let Some(record) = WeeklyMetrics::load(conn, &week)? else {
                    return Err(MigrateError::Error(format!("Week '{}' not found", week)));
                };
                if !record.yields().all(Percent::is_in_range) {
                    warn!("Week '{}' has a yield outside [0, 100]", week);
                }
                let model_specific = load_model_specific(conn, WEEKLY_TABLE, shape, &week)?;

                let value = json!({
                    "shape": shape.to_string(),
                    "week": record,
                    "model_specific": model_specific,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
        }
    }

    fn parse_target(target: &str) -> Result<TargetSchema, MigrateError> {
        target
            .parse()
            .map_err(|_| MigrateError::Error(format!("Invalid target '{}'", target)))
    }

    fn target_or_config(
        target: Option<String>,
        config: &Config,
    ) -> Result<TargetSchema, MigrateError> {
        match target {
            Some(target) => Self::parse_target(&target),
            None => Ok(config.migration.target()),
        }
    }

    fn policy_or_config(
        model_rows: Option<String>,
        config: &Config,
    ) -> Result<Option<ModelRowPolicy>, MigrateError> {
        match model_rows {
            Some(model_rows) => model_rows
                .parse()
                .map(Some)
                .map_err(|_| MigrateError::Error(format!("Invalid model rows '{}'", model_rows))),
            None => Ok(config.migration.model_rows()),
        }
    }

    fn live_target(db: &Database) -> Result<TargetSchema, MigrateError> {
        let shape = TableShape::detect(db.conn())?;
        TargetSchema::from_shape(shape).ok_or_else(|| {
            MigrateError::Error(format!(
                "'{}' is in {} shape; pass --target to choose what to verify",
                WEEKLY_TABLE, shape
            ))
        })
    }

    fn verify_options(
        target: TargetSchema,
        policy: Option<ModelRowPolicy>,
        sample: Option<usize>,
        config: &Config,
    ) -> VerifyOptions {
        let options = VerifyOptions {
            policy: policy.unwrap_or(target.migration().default_policy),
            sample_size: sample.unwrap_or_else(|| config.migration.sample_size()),
        };
        info!("Verify options for {}: {:?}", target, options);
        options
    }
}
