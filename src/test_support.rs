//! Fixtures shared by the unit tests: legacy-shaped weekly rows and a seeded database.

use chrono::Duration;
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::model::ModelTag;
use crate::schema::CREATE_LEGACY_SQL;
use crate::weekly::iso_week_start;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyModelValues {
    pub hardcoded_stations: Option<String>,
    pub hardcoded_tpy: Option<f64>,
    pub dynamic_stations: Option<String>,
    pub dynamic_tpy: Option<f64>,
    pub dynamic_station_count: Option<i64>,
}

impl LegacyModelValues {
    pub fn full(stations: &str, tpy: f64, station_count: i64) -> Self {
        LegacyModelValues {
            hardcoded_stations: Some(stations.to_string()),
            hardcoded_tpy: Some(tpy),
            dynamic_stations: Some(stations.to_string()),
            dynamic_tpy: Some(tpy - 1.0),
            dynamic_station_count: Some(station_count),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LegacyModelValues::default()
    }
}

#[derive(Clone, Debug)]
pub struct LegacyWeek {
    pub week_id: String,
    pub overall_yield: f64,
    pub sxm4: LegacyModelValues,
    pub sxm5: LegacyModelValues,
}

impl LegacyWeek {
    pub fn new(week_id: &str) -> Self {
        LegacyWeek {
            week_id: week_id.to_string(),
            overall_yield: 95.12,
            sxm4: LegacyModelValues::default(),
            sxm5: LegacyModelValues::default(),
        }
    }

    pub fn with_sxm4_hardcoded(mut self, stations: &str, tpy: f64) -> Self {
        self.sxm4.hardcoded_stations = Some(stations.to_string());
        self.sxm4.hardcoded_tpy = Some(tpy);
        self
    }

    pub fn with_model(mut self, tag: ModelTag, values: LegacyModelValues) -> Self {
        match tag {
            ModelTag::Sxm4 => self.sxm4 = values,
            ModelTag::Sxm5 => self.sxm5 = values,
        }
        self
    }

    pub fn with_overall_yield(mut self, overall_yield: f64) -> Self {
        self.overall_yield = overall_yield;
        self
    }

    pub fn model(&self, tag: ModelTag) -> &LegacyModelValues {
        match tag {
            ModelTag::Sxm4 => &self.sxm4,
            ModelTag::Sxm5 => &self.sxm5,
        }
    }

    fn week_bounds(&self) -> (String, String) {
        match iso_week_start(&self.week_id) {
            Some(start) => (
                start.format("%Y-%m-%d").to_string(),
                (start + Duration::days(6)).format("%Y-%m-%d").to_string(),
            ),
            None => ("1970-01-01".to_string(), "1970-01-07".to_string()),
        }
    }
}

pub fn insert_legacy_week(conn: &Connection, week: &LegacyWeek) -> rusqlite::Result<()> {
    let (week_start, week_end) = week.week_bounds();
    conn.execute(
        "INSERT INTO weekly_tpy_metrics (
            week_id, week_start, week_end, days_in_week,
            weekly_first_pass_yield_traditional_parts_started,
            weekly_first_pass_yield_traditional_first_pass_success,
            weekly_first_pass_yield_traditional_first_pass_yield,
            weekly_first_pass_yield_completed_only_active_parts,
            weekly_first_pass_yield_completed_only_first_pass_success,
            weekly_first_pass_yield_completed_only_first_pass_yield,
            weekly_first_pass_yield_breakdown_parts_completed,
            weekly_first_pass_yield_breakdown_parts_failed,
            weekly_first_pass_yield_breakdown_parts_stuck_in_limbo,
            weekly_first_pass_yield_breakdown_total_parts,
            weekly_overall_yield_total_parts,
            weekly_overall_yield_completed_parts,
            weekly_overall_yield_overall_yield,
            weekly_throughput_yield_station_metrics,
            weekly_throughput_yield_average_yield,
            total_stations,
            best_station_name, best_station_yield,
            worst_station_name, worst_station_yield,
            created_at,
            weekly_tpy_hardcoded_sxm4_stations, weekly_tpy_hardcoded_sxm4_tpy,
            weekly_tpy_hardcoded_sxm5_stations, weekly_tpy_hardcoded_sxm5_tpy,
            weekly_tpy_dynamic_sxm4_stations, weekly_tpy_dynamic_sxm4_tpy, weekly_tpy_dynamic_sxm4_station_count,
            weekly_tpy_dynamic_sxm5_stations, weekly_tpy_dynamic_sxm5_tpy, weekly_tpy_dynamic_sxm5_station_count
        ) VALUES (
            ?1, ?2, ?3, 7,
            120, 110, 91.67,
            100, 95, 95.0,
            100, 12, 8, 120,
            1000, 951, ?4,
            '{\"BAT\":{\"throughputYield\":94.3},\"FCT\":{\"throughputYield\":98.5}}', 96.4,
            2,
            'FCT', 98.5,
            'BAT', 94.3,
            '2024-01-08 06:00:00',
            ?5, ?6, ?7, ?8,
            ?9, ?10, ?11,
            ?12, ?13, ?14
        )",
        params![
            week.week_id,
            week_start,
            week_end,
            week.overall_yield,
            week.sxm4.hardcoded_stations,
            week.sxm4.hardcoded_tpy,
            week.sxm5.hardcoded_stations,
            week.sxm5.hardcoded_tpy,
            week.sxm4.dynamic_stations,
            week.sxm4.dynamic_tpy,
            week.sxm4.dynamic_station_count,
            week.sxm5.dynamic_stations,
            week.sxm5.dynamic_tpy,
            week.sxm5.dynamic_station_count,
        ],
    )?;
    Ok(())
}

/// In-memory database holding the legacy table populated with `weeks`.
pub fn seeded_legacy_db(weeks: &[LegacyWeek]) -> Database {
    let db = Database::open_in_memory().unwrap();
    db.conn().execute_batch(CREATE_LEGACY_SQL).unwrap();
    for week in weeks {
        insert_legacy_week(db.conn(), week).unwrap();
    }
    db
}

/// A small, varied data set: a week with both models, one with only SXM4
/// hardcoded data, one with only SXM5 dynamic data and one with no model data.
pub fn sample_weeks() -> Vec<LegacyWeek> {
    vec![
        LegacyWeek::new("2024-W01").with_sxm4_hardcoded(r#"["BAT","FCT","FQC"]"#, 92.5),
        LegacyWeek::new("2024-W02")
            .with_model(ModelTag::Sxm4, LegacyModelValues::full(r#"["BAT","FCT"]"#, 93.25, 2))
            .with_model(ModelTag::Sxm5, LegacyModelValues::full(r#"["BAT","FI"]"#, 89.0, 2)),
        LegacyWeek::new("2024-W03").with_model(
            ModelTag::Sxm5,
            LegacyModelValues {
                dynamic_stations: Some(r#"["FCT"]"#.to_string()),
                dynamic_tpy: Some(97.1),
                dynamic_station_count: Some(1),
                ..LegacyModelValues::default()
            },
        ),
        LegacyWeek::new("2024-W04"),
    ]
}
