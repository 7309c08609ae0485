//! SQL text for every statement the engine issues.
//!
//! Table and column names come from operator configuration, never from the
//! view feed, so they are spliced into statement text. All identifier quoting
//! happens here. Feed-supplied values (layer ids, driving layer) are only ever
//! rendered for logging; the Postgres backend binds them as parameters.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{TimeRange, ViewRecord};

pub const VIEWS_TABLE: &str = "views";
pub const RUN_TABLE: &str = "pinning_run";

pub const TRY_ADVISORY_LOCK: &str = "SELECT pg_try_advisory_lock($1) AS ok";
pub const ADVISORY_UNLOCK: &str = "SELECT pg_advisory_unlock($1) AS ok";
pub const TRUNCATE_VIEWS: &str = "TRUNCATE TABLE views";

/// Quotes a possibly schema-qualified identifier: `public.msg` becomes
/// `"public"."msg"`. Embedded double quotes are doubled.
pub fn quote_identifier(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("\"{}\"", part.trim().replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn timestamp_literal(ts: DateTime<Utc>) -> String {
    format!(
        "'{}'::timestamptz",
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    )
}

pub fn text_array_literal<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    let items = items
        .into_iter()
        .map(|s| quote_literal(s))
        .collect::<Vec<_>>()
        .join(",");
    format!("ARRAY[{}]::text[]", items)
}

/// `UPDATE <table> SET pin = pin ± 1 WHERE <column> BETWEEN start AND end`.
///
/// Decrements only touch rows whose counter is still positive.
pub fn pin_shift(table: &str, column: &str, range: &TimeRange, add: bool) -> String {
    let column = quote_identifier(column);
    let (assignment, guard) = if add {
        ("pin = pin + 1", "")
    } else {
        ("pin = pin - 1", " AND pin > 0")
    };
    format!(
        "UPDATE {} SET {} WHERE {} BETWEEN {} AND {}{}",
        quote_identifier(table),
        assignment,
        column,
        timestamp_literal(range.start),
        timestamp_literal(range.end),
        guard
    )
}

pub fn pin_reset(table: &str) -> String {
    format!("UPDATE {} SET pin = 0 WHERE pin != 0", quote_identifier(table))
}

/// Nearest existing value of `column` to the instant bound as `$1`.
///
/// Ties go to the earlier timestamp, which keeps the lookup monotonic in its
/// argument.
pub fn nearest_timestamp(table: &str, column: &str) -> String {
    let table = quote_identifier(table);
    let column = quote_identifier(column);
    format!(
        "SELECT candidate::timestamptz AS nearest FROM (\
         (SELECT {col} AS candidate FROM {tbl} WHERE {col} <= $1 ORDER BY {col} DESC LIMIT 1) \
         UNION ALL \
         (SELECT {col} AS candidate FROM {tbl} WHERE {col} >= $1 ORDER BY {col} ASC LIMIT 1)\
         ) AS candidates \
         ORDER BY abs(extract(epoch FROM (candidate::timestamptz - $1))) ASC, candidate ASC \
         LIMIT 1",
        col = column,
        tbl = table
    )
}

fn optional_text(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(quote_literal)
        .unwrap_or_else(|| "NULL".to_string())
}

pub fn insert_view(record: &ViewRecord) -> String {
    format!(
        "INSERT INTO {} (view_id, time_original, time_main, layers_list, last_update, driving_layer) \
         VALUES ({}, {}, {}, {}, {}, {})",
        VIEWS_TABLE,
        record.id,
        timestamp_literal(record.time_original),
        timestamp_literal(record.time_main),
        text_array_literal(&record.layers),
        timestamp_literal(record.last_update),
        optional_text(&record.driving_layer)
    )
}

pub fn update_view(record: &ViewRecord) -> String {
    format!(
        "UPDATE {} SET time_original = {}, time_main = {}, layers_list = {}, last_update = {}, \
         driving_layer = {} WHERE view_id = {}",
        VIEWS_TABLE,
        timestamp_literal(record.time_original),
        timestamp_literal(record.time_main),
        text_array_literal(&record.layers),
        timestamp_literal(record.last_update),
        optional_text(&record.driving_layer),
        record.id
    )
}

pub fn delete_view(view_id: i64) -> String {
    format!("DELETE FROM {} WHERE view_id = {}", VIEWS_TABLE, view_id)
}
