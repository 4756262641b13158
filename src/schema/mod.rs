mod embedded;
mod legacy;
mod normalized;

use log::debug;
use rusqlite::Connection;
use strum::{AsRefStr, Display};

use crate::database::Database;
use crate::error::MigrateError;
use crate::model::ModelTag;

pub use embedded::REDEFINE_EMBEDDED_SQL;
pub use legacy::CREATE_LEGACY_SQL;
pub use normalized::REDEFINE_NORMALIZED_SQL;

pub const WEEKLY_TABLE: &str = "weekly_tpy_metrics";
pub const MODEL_TABLE: &str = "weekly_tpy_model_metrics";
pub const MODEL_DOC_COLUMN: &str = "weekly_throughput_yield_model_specific";

/// Columns carried unchanged from the legacy table into either target shape.
pub const PASS_THROUGH_COLUMNS: &[&str] = &[
    "week_id",
    "week_start",
    "week_end",
    "days_in_week",
    "weekly_first_pass_yield_traditional_parts_started",
    "weekly_first_pass_yield_traditional_first_pass_success",
    "weekly_first_pass_yield_traditional_first_pass_yield",
    "weekly_first_pass_yield_completed_only_active_parts",
    "weekly_first_pass_yield_completed_only_first_pass_success",
    "weekly_first_pass_yield_completed_only_first_pass_yield",
    "weekly_first_pass_yield_breakdown_parts_completed",
    "weekly_first_pass_yield_breakdown_parts_failed",
    "weekly_first_pass_yield_breakdown_parts_stuck_in_limbo",
    "weekly_first_pass_yield_breakdown_total_parts",
    "weekly_overall_yield_total_parts",
    "weekly_overall_yield_completed_parts",
    "weekly_overall_yield_overall_yield",
    "weekly_throughput_yield_station_metrics",
    "weekly_throughput_yield_average_yield",
    "total_stations",
    "best_station_name",
    "best_station_yield",
    "worst_station_name",
    "worst_station_yield",
    "created_at",
];

/// Pass-through `DECIMAL(5,2)` columns that must hold a value in [0, 100].
pub const YIELD_COLUMNS: &[&str] = &[
    "weekly_first_pass_yield_traditional_first_pass_yield",
    "weekly_first_pass_yield_completed_only_first_pass_yield",
    "weekly_overall_yield_overall_yield",
    "weekly_throughput_yield_average_yield",
    "best_station_yield",
    "worst_station_yield",
];

/// DDL for the pass-through columns, shared by every shape of `weekly_tpy_metrics`.
macro_rules! weekly_columns_ddl {
    () => {
        r#"
    week_id VARCHAR(10) PRIMARY KEY,
    week_start DATE NOT NULL,
    week_end DATE NOT NULL,
    days_in_week INTEGER,
    weekly_first_pass_yield_traditional_parts_started INTEGER,
    weekly_first_pass_yield_traditional_first_pass_success INTEGER,
    weekly_first_pass_yield_traditional_first_pass_yield DECIMAL(5,2),
    weekly_first_pass_yield_completed_only_active_parts INTEGER,
    weekly_first_pass_yield_completed_only_first_pass_success INTEGER,
    weekly_first_pass_yield_completed_only_first_pass_yield DECIMAL(5,2),
    weekly_first_pass_yield_breakdown_parts_completed INTEGER,
    weekly_first_pass_yield_breakdown_parts_failed INTEGER,
    weekly_first_pass_yield_breakdown_parts_stuck_in_limbo INTEGER,
    weekly_first_pass_yield_breakdown_total_parts INTEGER,
    weekly_overall_yield_total_parts INTEGER,
    weekly_overall_yield_completed_parts INTEGER,
    weekly_overall_yield_overall_yield DECIMAL(5,2),
    weekly_throughput_yield_station_metrics TEXT,
    weekly_throughput_yield_average_yield DECIMAL(5,2),
    total_stations INTEGER,
    best_station_name VARCHAR(100),
    best_station_yield DECIMAL(5,2),
    worst_station_name VARCHAR(100),
    worst_station_yield DECIMAL(5,2),
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"#
    };
}
pub(crate) use weekly_columns_ddl;

/// Names of the flat per-model columns in the legacy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelColumns {
    pub hardcoded_stations: String,
    pub hardcoded_tpy: String,
    pub dynamic_stations: String,
    pub dynamic_tpy: String,
    pub dynamic_station_count: String,
}

impl ModelColumns {
    pub fn for_model(tag: ModelTag) -> Self {
        let m = tag.column_fragment();
        ModelColumns {
            hardcoded_stations: format!("weekly_tpy_hardcoded_{}_stations", m),
            hardcoded_tpy: format!("weekly_tpy_hardcoded_{}_tpy", m),
            dynamic_stations: format!("weekly_tpy_dynamic_{}_stations", m),
            dynamic_tpy: format!("weekly_tpy_dynamic_{}_tpy", m),
            dynamic_station_count: format!("weekly_tpy_dynamic_{}_station_count", m),
        }
    }

    /// In the order expected by `ModelMetrics::from_columns`
    pub fn all(&self) -> [&str; 5] {
        [
            self.hardcoded_stations.as_str(),
            self.hardcoded_tpy.as_str(),
            self.dynamic_stations.as_str(),
            self.dynamic_tpy.as_str(),
            self.dynamic_station_count.as_str(),
        ]
    }

    /// SQL predicate that holds when at least one of the model's columns is non-null.
    pub fn any_not_null_sql(&self) -> String {
        self.all()
            .iter()
            .map(|column| format!("{} IS NOT NULL", column))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Physical shape of a table, detected from its columns.
#[derive(AsRefStr, Display, Debug, PartialEq, Eq, Copy, Clone)]
#[strum(serialize_all = "lowercase")]
pub enum TableShape {
    Missing,
    Legacy,
    Normalized,
    Embedded,
    Unknown,
}

impl TableShape {
    pub fn detect(conn: &Connection) -> Result<TableShape, MigrateError> {
        Self::detect_table(conn, WEEKLY_TABLE)
    }

    /// Classifies `table`. A backup table is classified the same way as the live
    /// table it was copied from.
    pub fn detect_table(conn: &Connection, table: &str) -> Result<TableShape, MigrateError> {
        let columns = Database::table_columns_on(conn, table)?;
        let has = |name: &str| columns.iter().any(|c| c == name);

        let shape = if columns.is_empty() {
            TableShape::Missing
        } else if !PASS_THROUGH_COLUMNS.iter().all(|c| has(*c)) {
            TableShape::Unknown
        } else if ModelColumns::for_model(ModelTag::Sxm4)
            .all()
            .iter()
            .all(|c| has(*c))
        {
            TableShape::Legacy
        } else if has(MODEL_DOC_COLUMN) {
            TableShape::Embedded
        } else if Database::table_exists_on(conn, MODEL_TABLE)? {
            TableShape::Normalized
        } else {
            TableShape::Unknown
        };

        debug!("Table '{}' detected as {} shape", table, shape);
        Ok(shape)
    }
}
