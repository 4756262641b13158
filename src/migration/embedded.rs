use log::info;
use rusqlite::{params, Connection};
use strum::IntoEnumIterator;

use super::{BackfillSummary, Migration, ModelRowPolicy};
use crate::error::MigrateError;
use crate::model::{ModelSpecificMetrics, ModelTag};
use crate::reports::{
    common_checks, expected_model_entries, sample_rows, Check, ModelCount, VerificationReport,
    VerifyOptions,
};
use crate::schema::{
    ModelColumns, TableShape, MODEL_DOC_COLUMN, PASS_THROUGH_COLUMNS, REDEFINE_EMBEDDED_SQL,
    WEEKLY_TABLE,
};
use crate::utils::Utils;
use crate::weekly::model_specific_from_legacy_row;

pub static MIGRATION: Migration = Migration {
    redefine_sql: REDEFINE_EMBEDDED_SQL,
    backfill_fn: backfill_embedded,
    verify_fn: verify_embedded,
    default_policy: ModelRowPolicy::Always,
};

/// Direct projection of the pass-through columns, then a Rust pass that folds
/// the flat per-model columns of each backup row into one document.
///
/// Under `Always` every week gets a document with every model key. Under
/// `NonEmptyOnly` a week without any model data keeps a null document; the
/// document itself always carries the full key set.
fn backfill_embedded(
    conn: &Connection,
    backup: &str,
    policy: ModelRowPolicy,
) -> Result<BackfillSummary, MigrateError> {
    let backup = Utils::quote_ident(backup)?;
    let columns = Utils::column_list(PASS_THROUGH_COLUMNS);

    info!("Backfill (embedded): copying weekly rows...");
    let weekly_rows = conn.execute(
        &format!(
            "INSERT INTO {weekly} ({cols}) SELECT {cols} FROM {backup}",
            weekly = WEEKLY_TABLE,
            cols = columns,
            backup = backup
        ),
        [],
    )?;

    info!("Backfill (embedded): building model documents...");
    let mut select = conn.prepare(&format!("SELECT * FROM {} ORDER BY week_id", backup))?;
    let mut update = conn.prepare(&format!(
        "UPDATE {} SET {} = ?1 WHERE week_id = ?2",
        WEEKLY_TABLE, MODEL_DOC_COLUMN
    ))?;

    let mut counts: Vec<usize> = vec![0; ModelTag::iter().count()];
    let mut rows = select.query([])?;
    while let Some(row) = rows.next()? {
        let week_id: String = row.get("week_id")?;
        let doc = model_specific_from_legacy_row(row)?;

        if policy == ModelRowPolicy::NonEmptyOnly && doc.is_empty() {
            continue;
        }

        for (i, (_, metrics)) in doc.iter().enumerate() {
            if policy == ModelRowPolicy::Always || !metrics.is_empty() {
                counts[i] += 1;
            }
        }

        let json = serde_json::to_string(&doc)?;
        update.execute(params![json, week_id])?;
    }

    let model_entries = ModelTag::iter()
        .zip(counts)
        .map(|(tag, count)| (tag.doc_key().to_string(), count))
        .collect();

    Ok(BackfillSummary {
        weekly_rows,
        model_entries,
    })
}

fn verify_embedded(
    conn: &Connection,
    backup: Option<&str>,
    options: &VerifyOptions,
) -> Result<VerificationReport, MigrateError> {
    let (parent_rows, backup_rows, mut checks) = common_checks(conn, backup)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {}",
        MODEL_DOC_COLUMN, WEEKLY_TABLE
    ))?;
    let documents = stmt
        .query_map([], |row| row.get::<_, Option<String>>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut complete = 0i64;
    let mut non_null = 0i64;
    let mut bad_tpy = 0i64;
    let mut entries: Vec<i64> = vec![0; ModelTag::iter().count()];

    for text in documents.iter().flatten() {
        non_null += 1;
        // A document that does not parse is missing a model key or carries an unknown one
        let Ok(doc) = serde_json::from_str::<ModelSpecificMetrics>(text) else {
            continue;
        };
        complete += 1;

        for (i, (_, metrics)) in doc.iter().enumerate() {
            let has_entry = options.policy == ModelRowPolicy::Always || !metrics.is_empty();
            if has_entry {
                entries[i] += 1;
            }
            if metrics.tpy_values().any(|tpy| !tpy.is_in_range()) {
                bad_tpy += 1;
            }
        }
    }

    checks.push(Check::new(
        "documents carrying every model key",
        non_null,
        complete,
    ));

    let model_counts: Vec<ModelCount> = ModelTag::iter()
        .zip(entries.iter())
        .map(|(tag, rows)| ModelCount {
            model: tag.doc_key().to_string(),
            rows: *rows,
        })
        .collect();

    if let Some(backup) = backup {
        let expected_docs = match options.policy {
            ModelRowPolicy::Always => backup_rows.unwrap_or(0),
            ModelRowPolicy::NonEmptyOnly => {
                let any_model = ModelTag::iter()
                    .map(|tag| format!("({})", ModelColumns::for_model(tag).any_not_null_sql()))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE {}",
                        Utils::quote_ident(backup)?,
                        any_model
                    ),
                    [],
                    |row| row.get(0),
                )?
            }
        };
        checks.push(Check::new("weeks with a model document", expected_docs, non_null));

        for (tag, count) in ModelTag::iter().zip(model_counts.iter()) {
            let expected = expected_model_entries(conn, backup, tag, options.policy)?;
            checks.push(Check::new(
                format!("documents with {} entries", tag.doc_key()),
                expected,
                count.rows,
            ));
        }
    }

    checks.push(Check::new("model entries with yields outside [0, 100]", 0, bad_tpy));

    Ok(VerificationReport {
        target: TableShape::Embedded.to_string(),
        policy: options.policy.to_string(),
        parent_rows,
        backup_rows,
        checks,
        model_counts,
        samples: sample_rows(conn, TableShape::Embedded, options.sample_size)?,
    })
}
