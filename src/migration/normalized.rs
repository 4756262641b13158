use log::{debug, info};
use rusqlite::Connection;
use strum::IntoEnumIterator;

use super::{BackfillSummary, Migration, ModelRowPolicy};
use crate::error::MigrateError;
use crate::model::ModelTag;
use crate::reports::{
    common_checks, expected_model_entries, sample_rows, Check, ModelCount, VerificationReport,
    VerifyOptions,
};
use crate::schema::{
    ModelColumns, TableShape, MODEL_TABLE, PASS_THROUGH_COLUMNS, REDEFINE_NORMALIZED_SQL,
    WEEKLY_TABLE,
};
use crate::utils::Utils;

pub static MIGRATION: Migration = Migration {
    redefine_sql: REDEFINE_NORMALIZED_SQL,
    backfill_fn: backfill_normalized,
    verify_fn: verify_normalized,
    default_policy: ModelRowPolicy::NonEmptyOnly,
};

/// Direct projection of the pass-through columns, then one `INSERT ... SELECT`
/// per model that fans the flat columns out into child rows.
fn backfill_normalized(
    conn: &Connection,
    backup: &str,
    policy: ModelRowPolicy,
) -> Result<BackfillSummary, MigrateError> {
    let backup = Utils::quote_ident(backup)?;
    let columns = Utils::column_list(PASS_THROUGH_COLUMNS);

    info!("Backfill (normalized): copying weekly rows...");
    let weekly_rows = conn.execute(
        &format!(
            "INSERT INTO {weekly} ({cols}) SELECT {cols} FROM {backup}",
            weekly = WEEKLY_TABLE,
            cols = columns,
            backup = backup
        ),
        [],
    )?;

    let mut model_entries = Vec::new();
    for tag in ModelTag::iter() {
        let source = ModelColumns::for_model(tag);
        let filter = match policy {
            ModelRowPolicy::NonEmptyOnly => format!("WHERE {}", source.any_not_null_sql()),
            ModelRowPolicy::Always => String::new(),
        };
        let [hc_stations, hc_tpy, dyn_stations, dyn_tpy, dyn_count] = source.all();

        let sql = format!(
            "INSERT INTO {model_table} (
                week_id, model, hardcoded_stations, hardcoded_tpy,
                dynamic_stations, dynamic_tpy, dynamic_station_count
             )
             SELECT week_id, ?1, {hc_stations}, {hc_tpy}, {dyn_stations}, {dyn_tpy}, {dyn_count}
             FROM {backup} {filter}
             ORDER BY week_id",
            model_table = MODEL_TABLE,
            backup = backup,
        );
        debug!("Backfill (normalized): {}", sql);

        let inserted = conn.execute(&sql, [tag.model_name()])?;
        info!(
            "Backfill (normalized): {} rows for model '{}'",
            inserted,
            tag.model_name()
        );
        model_entries.push((tag.model_name().to_string(), inserted));
    }

    Ok(BackfillSummary {
        weekly_rows,
        model_entries,
    })
}

fn verify_normalized(
    conn: &Connection,
    backup: Option<&str>,
    options: &VerifyOptions,
) -> Result<VerificationReport, MigrateError> {
    let (parent_rows, backup_rows, mut checks) = common_checks(conn, backup)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT model, COUNT(*) FROM {} GROUP BY model ORDER BY model",
        MODEL_TABLE
    ))?;
    let model_counts = stmt
        .query_map([], |row| {
            Ok(ModelCount {
                model: row.get(0)?,
                rows: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let unknown: i64 = model_counts
        .iter()
        .filter(|count| ModelTag::from_model_name(&count.model).is_none())
        .map(|count| count.rows)
        .sum();
    checks.push(Check::new("model rows with an unknown model", 0, unknown));

    if let Some(backup) = backup {
        for tag in ModelTag::iter() {
            let expected = expected_model_entries(conn, backup, tag, options.policy)?;
            let actual = model_counts
                .iter()
                .find(|count| count.model == tag.model_name())
                .map_or(0, |count| count.rows);
            checks.push(Check::new(
                format!("model rows for {}", tag.model_name()),
                expected,
                actual,
            ));
        }
    }

    let bad_tpy: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE hardcoded_tpy < 0 OR hardcoded_tpy > 100
                                       OR dynamic_tpy < 0 OR dynamic_tpy > 100",
            MODEL_TABLE
        ),
        [],
        |row| row.get(0),
    )?;
    checks.push(Check::new("model rows with yields outside [0, 100]", 0, bad_tpy));

    Ok(VerificationReport {
        target: TableShape::Normalized.to_string(),
        policy: options.policy.to_string(),
        parent_rows,
        backup_rows,
        checks,
        model_counts,
        samples: sample_rows(conn, TableShape::Normalized, options.sample_size)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::migration::{Migrator, TargetSchema};
    use crate::test_support::{
        insert_legacy_week, sample_weeks, seeded_legacy_db, LegacyModelValues, LegacyWeek,
    };
    use proptest::prelude::*;

    fn migrate(db: &mut Database, policy: Option<ModelRowPolicy>) -> BackfillSummary {
        let mut migrator = Migrator::new(db).unwrap();
        migrator.snapshot().unwrap();
        migrator.redefine(TargetSchema::Normalized).unwrap();
        migrator.backfill(TargetSchema::Normalized, policy).unwrap()
    }

    fn model_rows(db: &Database, week_id: &str) -> Vec<String> {
        let mut stmt = db
            .conn()
            .prepare("SELECT model FROM weekly_tpy_model_metrics WHERE week_id = ? ORDER BY model")
            .unwrap();
        stmt.query_map([week_id], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_backfill_emits_rows_only_for_models_with_data() {
        let mut db = seeded_legacy_db(&sample_weeks());
        let summary = migrate(&mut db, None);

        assert_eq!(summary.weekly_rows, 4);
        assert_eq!(
            summary.model_entries,
            vec![("Tesla SXM4".to_string(), 2), ("Tesla SXM5".to_string(), 2)]
        );
        assert_eq!(model_rows(&db, "2024-W01"), vec!["Tesla SXM4"]);
        assert_eq!(model_rows(&db, "2024-W02"), vec!["Tesla SXM4", "Tesla SXM5"]);
        assert_eq!(model_rows(&db, "2024-W03"), vec!["Tesla SXM5"]);
        assert!(model_rows(&db, "2024-W04").is_empty());
    }

    #[test]
    fn test_backfill_always_policy_emits_every_model() {
        let mut db = seeded_legacy_db(&sample_weeks());
        let summary = migrate(&mut db, Some(ModelRowPolicy::Always));

        assert_eq!(
            summary.model_entries,
            vec![("Tesla SXM4".to_string(), 4), ("Tesla SXM5".to_string(), 4)]
        );
        assert_eq!(model_rows(&db, "2024-W04"), vec!["Tesla SXM4", "Tesla SXM5"]);

        let migrator = Migrator::new(&mut db).unwrap();
        let report = migrator
            .verify(
                TargetSchema::Normalized,
                &VerifyOptions {
                    policy: ModelRowPolicy::Always,
                    sample_size: 0,
                },
            )
            .unwrap();
        assert!(report.passed(), "{:?}", report.checks);
        assert!(report.samples.is_empty());
    }

    #[test]
    fn test_backfill_copies_model_values() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);

        let (stations, tpy, dyn_tpy, count): (String, f64, f64, i64) = db
            .conn()
            .query_row(
                "SELECT hardcoded_stations, hardcoded_tpy, dynamic_tpy, dynamic_station_count
                 FROM weekly_tpy_model_metrics WHERE week_id = '2024-W02' AND model = 'Tesla SXM5'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        assert_eq!(stations, r#"["BAT","FI"]"#);
        assert_eq!(tpy, 89.0);
        assert_eq!(dyn_tpy, 88.0);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_deleting_week_cascades_to_model_rows() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);
        assert_eq!(model_rows(&db, "2024-W02").len(), 2);

        db.conn()
            .execute("DELETE FROM weekly_tpy_metrics WHERE week_id = '2024-W02'", [])
            .unwrap();

        assert!(model_rows(&db, "2024-W02").is_empty());
        assert_eq!(db.row_count(MODEL_TABLE).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_week_model_pair_is_rejected() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);

        let result = db.conn().execute(
            "INSERT INTO weekly_tpy_model_metrics (week_id, model) VALUES ('2024-W01', 'Tesla SXM4')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_model_row_requires_existing_week() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);

        let result = db.conn().execute(
            "INSERT INTO weekly_tpy_model_metrics (week_id, model) VALUES ('2030-W01', 'Tesla SXM4')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_reports_missing_model_row() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);
        db.conn()
            .execute(
                "DELETE FROM weekly_tpy_model_metrics WHERE week_id = '2024-W03'",
                [],
            )
            .unwrap();

        let migrator = Migrator::new(&mut db).unwrap();
        let report = migrator
            .verify(
                TargetSchema::Normalized,
                &VerifyOptions {
                    policy: ModelRowPolicy::NonEmptyOnly,
                    sample_size: 1,
                },
            )
            .unwrap();

        let check = report.check("model rows for Tesla SXM5").unwrap();
        assert_eq!((check.expected, check.actual), (2, 1));
        assert!(!report.passed());
    }

    #[test]
    fn test_verify_reports_unknown_model_row_in_sample() {
        let mut db = seeded_legacy_db(&sample_weeks());
        migrate(&mut db, None);
        db.conn()
            .execute(
                "INSERT INTO weekly_tpy_model_metrics (week_id, model, hardcoded_tpy)
                 VALUES ('2024-W04', 'SXM6', 90.0)",
                [],
            )
            .unwrap();

        let migrator = Migrator::new(&mut db).unwrap();
        let report = migrator
            .verify(
                TargetSchema::Normalized,
                &VerifyOptions {
                    policy: ModelRowPolicy::NonEmptyOnly,
                    sample_size: 5,
                },
            )
            .unwrap();

        let check = report.check("model rows with an unknown model").unwrap();
        assert_eq!((check.expected, check.actual), (0, 1));
        assert!(!report.passed());

        assert_eq!(report.samples.len(), 4);
        let unreadable = &report.samples[3];
        assert_eq!(unreadable.week_id, "2024-W04");
        assert_eq!(unreadable.model_specific, None);
        assert!(unreadable.error.as_deref().unwrap().contains("SXM6"));
        assert!(report.samples[..3].iter().all(|s| s.error.is_none()));
    }

    #[test]
    fn test_verify_flags_out_of_range_yields() {
        let week = LegacyWeek::new("2024-W05")
            .with_overall_yield(101.5)
            .with_sxm4_hardcoded(r#"["BAT"]"#, 120.0);
        let mut db = seeded_legacy_db(&[week]);
        migrate(&mut db, None);

        let migrator = Migrator::new(&mut db).unwrap();
        let report = migrator
            .verify(
                TargetSchema::Normalized,
                &VerifyOptions {
                    policy: ModelRowPolicy::NonEmptyOnly,
                    sample_size: 1,
                },
            )
            .unwrap();

        assert_eq!(
            report.check(crate::reports::CHECK_YIELD_RANGE).map(|c| c.actual),
            Some(1)
        );
        assert_eq!(
            report
                .check("model rows with yields outside [0, 100]")
                .map(|c| c.actual),
            Some(1)
        );
    }

    #[test]
    fn test_verify_flags_malformed_week_id() {
        let db = seeded_legacy_db(&[]);
        insert_legacy_week(db.conn(), &LegacyWeek::new("week-1")).unwrap();
        let mut db = db;
        migrate(&mut db, None);

        let migrator = Migrator::new(&mut db).unwrap();
        let report = migrator
            .verify(
                TargetSchema::Normalized,
                &VerifyOptions {
                    policy: ModelRowPolicy::NonEmptyOnly,
                    sample_size: 1,
                },
            )
            .unwrap();
        assert_eq!(
            report.check(crate::reports::CHECK_WEEK_IDS).map(|c| c.actual),
            Some(1)
        );
    }

    fn arb_model_values() -> impl Strategy<Value = LegacyModelValues> {
        (
            proptest::option::of(Just(r#"["BAT","FCT"]"#.to_string())),
            proptest::option::of(0u32..=10_000),
            proptest::option::of(Just(r#"["FCT"]"#.to_string())),
            proptest::option::of(0u32..=10_000),
            proptest::option::of(0i64..20),
        )
            .prop_map(|(hs, ht, ds, dt, dc)| LegacyModelValues {
                hardcoded_stations: hs,
                hardcoded_tpy: ht.map(|h| h as f64 / 100.0),
                dynamic_stations: ds,
                dynamic_tpy: dt.map(|h| h as f64 / 100.0),
                dynamic_station_count: dc,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_one_child_row_per_model_with_data(
            models in proptest::collection::vec((arb_model_values(), arb_model_values()), 1..6)
        ) {
            let weeks: Vec<LegacyWeek> = models
                .into_iter()
                .enumerate()
                .map(|(i, (sxm4, sxm5))| {
                    LegacyWeek::new(&format!("2024-W{:02}", i + 1))
                        .with_model(ModelTag::Sxm4, sxm4)
                        .with_model(ModelTag::Sxm5, sxm5)
                })
                .collect();
            let mut db = seeded_legacy_db(&weeks);
            migrate(&mut db, None);

            for week in &weeks {
                let mut expected: Vec<String> = ModelTag::iter()
                    .filter(|tag| !week.model(*tag).is_empty())
                    .map(|tag| tag.model_name().to_string())
                    .collect();
                expected.sort();
                prop_assert_eq!(model_rows(&db, &week.week_id), expected);
            }

            let weekly_rows = db.row_count(WEEKLY_TABLE).unwrap();
            prop_assert_eq!(weekly_rows, weeks.len() as i64);
        }
    }
}
