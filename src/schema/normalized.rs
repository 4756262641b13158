use super::weekly_columns_ddl;

/// Redefine `weekly_tpy_metrics` in the normalized shape.
///
/// Per-model metrics move to `weekly_tpy_model_metrics`, one row per
/// (week, model). Deleting a week deletes its model rows.
pub const REDEFINE_NORMALIZED_SQL: &str = concat!(
    r#"
DROP TABLE IF EXISTS weekly_tpy_model_metrics;
DROP TABLE IF EXISTS weekly_tpy_metrics;

CREATE TABLE weekly_tpy_metrics ("#,
    weekly_columns_ddl!(),
    r#"
);

CREATE TABLE weekly_tpy_model_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    week_id VARCHAR(10) NOT NULL,
    model VARCHAR(50) NOT NULL,
    hardcoded_stations TEXT,          -- Serialized JSON list of station names
    hardcoded_tpy DECIMAL(5,2),
    dynamic_stations TEXT,            -- Serialized JSON list of station names
    dynamic_tpy DECIMAL(5,2),
    dynamic_station_count INTEGER,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (week_id) REFERENCES weekly_tpy_metrics(week_id) ON DELETE CASCADE,
    UNIQUE (week_id, model)
);

CREATE INDEX idx_weekly_tpy_model_metrics_model ON weekly_tpy_model_metrics (model);
"#
);
