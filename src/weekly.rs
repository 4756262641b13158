use chrono::{NaiveDate, Weekday};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::MigrateError;
use crate::model::{ModelMetrics, ModelSpecificMetrics, ModelTag, Percent};
use crate::schema::{ModelColumns, TableShape, MODEL_DOC_COLUMN, MODEL_TABLE, WEEKLY_TABLE};
use crate::utils::Utils;

/// Parses an ISO week identifier (`2024-W01`) and returns the Monday that starts it.
pub fn iso_week_start(week_id: &str) -> Option<NaiveDate> {
    let (year, week) = week_id.split_once("-W")?;
    if year.len() != 4 || week.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let week: u32 = week.parse().ok()?;
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
}

/// True when `week_id` is a valid ISO week and `week_start` is its Monday.
pub fn is_well_formed_week(week_id: &str, week_start: &str) -> bool {
    match iso_week_start(week_id) {
        Some(monday) => monday.format("%Y-%m-%d").to_string() == week_start,
        None => false,
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TraditionalFirstPass {
    pub parts_started: Option<i64>,
    pub first_pass_success: Option<i64>,
    pub first_pass_yield: Option<Percent>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct CompletedOnlyFirstPass {
    pub active_parts: Option<i64>,
    pub first_pass_success: Option<i64>,
    pub first_pass_yield: Option<Percent>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FirstPassBreakdown {
    pub parts_completed: Option<i64>,
    pub parts_failed: Option<i64>,
    pub parts_stuck_in_limbo: Option<i64>,
    pub total_parts: Option<i64>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct OverallYield {
    pub total_parts: Option<i64>,
    pub completed_parts: Option<i64>,
    pub overall_yield: Option<Percent>,
}

/// The pass-through part of a `weekly_tpy_metrics` row: identical in every shape.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct WeeklyMetrics {
    pub week_id: String,
    pub week_start: String,
    pub week_end: String,
    pub days_in_week: Option<i64>,
    pub traditional: TraditionalFirstPass,
    pub completed_only: CompletedOnlyFirstPass,
    pub breakdown: FirstPassBreakdown,
    pub overall: OverallYield,
    pub station_metrics: Option<String>,
    pub average_yield: Option<Percent>,
    pub total_stations: Option<i64>,
    pub best_station_name: Option<String>,
    pub best_station_yield: Option<Percent>,
    pub worst_station_name: Option<String>,
    pub worst_station_yield: Option<Percent>,
    pub created_at: Option<String>,
}

impl WeeklyMetrics {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WeeklyMetrics {
            week_id: row.get("week_id")?,
            week_start: row.get("week_start")?,
            week_end: row.get("week_end")?,
            days_in_week: row.get("days_in_week")?,
            traditional: TraditionalFirstPass {
                parts_started: row.get("weekly_first_pass_yield_traditional_parts_started")?,
                first_pass_success: row
                    .get("weekly_first_pass_yield_traditional_first_pass_success")?,
                first_pass_yield: row.get("weekly_first_pass_yield_traditional_first_pass_yield")?,
            },
            completed_only: CompletedOnlyFirstPass {
                active_parts: row.get("weekly_first_pass_yield_completed_only_active_parts")?,
                first_pass_success: row
                    .get("weekly_first_pass_yield_completed_only_first_pass_success")?,
                first_pass_yield: row
                    .get("weekly_first_pass_yield_completed_only_first_pass_yield")?,
            },
            breakdown: FirstPassBreakdown {
                parts_completed: row.get("weekly_first_pass_yield_breakdown_parts_completed")?,
                parts_failed: row.get("weekly_first_pass_yield_breakdown_parts_failed")?,
                parts_stuck_in_limbo: row
                    .get("weekly_first_pass_yield_breakdown_parts_stuck_in_limbo")?,
                total_parts: row.get("weekly_first_pass_yield_breakdown_total_parts")?,
            },
            overall: OverallYield {
                total_parts: row.get("weekly_overall_yield_total_parts")?,
                completed_parts: row.get("weekly_overall_yield_completed_parts")?,
                overall_yield: row.get("weekly_overall_yield_overall_yield")?,
            },
            station_metrics: row.get("weekly_throughput_yield_station_metrics")?,
            average_yield: row.get("weekly_throughput_yield_average_yield")?,
            total_stations: row.get("total_stations")?,
            best_station_name: row.get("best_station_name")?,
            best_station_yield: row.get("best_station_yield")?,
            worst_station_name: row.get("worst_station_name")?,
            worst_station_yield: row.get("worst_station_yield")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn load(conn: &Connection, week_id: &str) -> Result<Option<WeeklyMetrics>, MigrateError> {
        let sql = format!("SELECT * FROM {} WHERE week_id = ?", Utils::quote_ident(WEEKLY_TABLE)?);
        let record = conn
            .query_row(&sql, [week_id], WeeklyMetrics::from_row)
            .optional()?;
        Ok(record)
    }

    pub fn yields(&self) -> impl Iterator<Item = Percent> {
        [
            self.traditional.first_pass_yield,
            self.completed_only.first_pass_yield,
            self.overall.overall_yield,
            self.average_yield,
            self.best_station_yield,
            self.worst_station_yield,
        ]
        .into_iter()
        .flatten()
    }
}

/// Builds the per-model document from a row holding the flat legacy columns.
pub fn model_specific_from_legacy_row(row: &Row) -> rusqlite::Result<ModelSpecificMetrics> {
    let mut doc = ModelSpecificMetrics::default();
    for (tag, columns) in legacy_model_columns() {
        let [hc_stations, hc_tpy, dyn_stations, dyn_tpy, dyn_count] = columns.all();
        *doc.get_mut(tag) = ModelMetrics::from_columns(
            row.get(hc_stations)?,
            row.get(hc_tpy)?,
            row.get(dyn_stations)?,
            row.get(dyn_tpy)?,
            row.get(dyn_count)?,
        );
    }
    Ok(doc)
}

pub fn legacy_model_columns() -> Vec<(ModelTag, ModelColumns)> {
    use strum::IntoEnumIterator;
    ModelTag::iter()
        .map(|tag| (tag, ModelColumns::for_model(tag)))
        .collect()
}

/// Reads the per-model metrics of one week from whichever shape `shape` names.
///
/// Every shape yields the same logical value: in the normalized shape a model
/// without a row reads back as empty metrics. `None` means the week does not
/// exist, or (embedded) its document is null.
pub fn load_model_specific(
    conn: &Connection,
    table: &str,
    shape: TableShape,
    week_id: &str,
) -> Result<Option<ModelSpecificMetrics>, MigrateError> {
    let table = Utils::quote_ident(table)?;

    match shape {
        TableShape::Legacy => {
            let sql = format!("SELECT * FROM {} WHERE week_id = ?", table);
            let doc = conn
                .query_row(&sql, [week_id], model_specific_from_legacy_row)
                .optional()?;
            Ok(doc)
        }
        TableShape::Embedded => {
            let sql = format!("SELECT {} FROM {} WHERE week_id = ?", MODEL_DOC_COLUMN, table);
            let text: Option<Option<String>> = conn
                .query_row(&sql, [week_id], |row| row.get(0))
                .optional()?;
            match text.flatten() {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        }
        TableShape::Normalized => {
            let exists: Option<i64> = conn
                .query_row(
                    &format!("SELECT 1 FROM {} WHERE week_id = ?", table),
                    [week_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let sql = format!(
                "SELECT model, hardcoded_stations, hardcoded_tpy, dynamic_stations, dynamic_tpy, dynamic_station_count
                 FROM {} WHERE week_id = ?",
                MODEL_TABLE
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![week_id])?;

            let mut doc = ModelSpecificMetrics::default();
            while let Some(row) = rows.next()? {
                let model: String = row.get(0)?;
                let Some(tag) = ModelTag::from_model_name(&model) else {
                    return Err(MigrateError::Error(format!(
                        "Unknown model '{}' in {} for week {}",
                        model, MODEL_TABLE, week_id
                    )));
                };
                *doc.get_mut(tag) = ModelMetrics::from_columns(
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                );
            }
            Ok(Some(doc))
        }
        TableShape::Missing | TableShape::Unknown => Err(MigrateError::Error(format!(
            "Cannot read model metrics from a table in {} shape",
            shape
        ))),
    }
}
