use super::weekly_columns_ddl;

/// Redefine `weekly_tpy_metrics` in the embedded shape.
///
/// Per-model metrics live in a single JSON document column keyed by model.
/// Any child table left by a normalized migration is dropped.
pub const REDEFINE_EMBEDDED_SQL: &str = concat!(
    r#"
DROP TABLE IF EXISTS weekly_tpy_model_metrics;
DROP TABLE IF EXISTS weekly_tpy_metrics;

CREATE TABLE weekly_tpy_metrics ("#,
    weekly_columns_ddl!(),
    r#",
    weekly_throughput_yield_model_specific TEXT
        CHECK (weekly_throughput_yield_model_specific IS NULL
               OR json_valid(weekly_throughput_yield_model_specific))
);
"#
);
