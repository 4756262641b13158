use super::weekly_columns_ddl;

/// Legacy shape of `weekly_tpy_metrics`: per-model metrics flattened into
/// `weekly_tpy_{hardcoded,dynamic}_<model>_*` columns on the weekly row.
///
/// This is the source shape for both target migrations and the shape `restore`
/// rebuilds from the backup.
pub const CREATE_LEGACY_SQL: &str = concat!(
    r#"
CREATE TABLE IF NOT EXISTS weekly_tpy_metrics ("#,
    weekly_columns_ddl!(),
    r#",
    weekly_tpy_hardcoded_sxm4_stations TEXT,
    weekly_tpy_hardcoded_sxm4_tpy DECIMAL(5,2),
    weekly_tpy_hardcoded_sxm5_stations TEXT,
    weekly_tpy_hardcoded_sxm5_tpy DECIMAL(5,2),
    weekly_tpy_dynamic_sxm4_stations TEXT,
    weekly_tpy_dynamic_sxm4_tpy DECIMAL(5,2),
    weekly_tpy_dynamic_sxm4_station_count INTEGER,
    weekly_tpy_dynamic_sxm5_stations TEXT,
    weekly_tpy_dynamic_sxm5_tpy DECIMAL(5,2),
    weekly_tpy_dynamic_sxm5_station_count INTEGER
);
"#
);
