// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

//! Validation and statement building for batch inserts.

use crate::error::{ConnectorError, ConnectorResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::postgres::PgConnection;
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;

/// Postgres accepts at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("Invalid identifier regex"));

/// Check that `identifier` is a plain SQL identifier.
///
/// Names are emitted unquoted, so Postgres folds them to lower case the same
/// way it does for hand-written SQL.
pub(crate) fn checked_identifier(identifier: &str) -> ConnectorResult<&str> {
    if !IDENTIFIER_RE.is_match(identifier) || identifier.len() > 63 {
        return Err(ConnectorError::InvalidArgument(format!(
            "'{}' is not a valid SQL identifier",
            identifier
        )));
    }
    Ok(identifier)
}

/// Check a `table` or `schema.table` name.
pub(crate) fn checked_table_name(table: &str) -> ConnectorResult<&str> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(ConnectorError::InvalidArgument(format!(
            "'{}' is not a valid table name",
            table
        )));
    }
    for part in parts {
        checked_identifier(part)?;
    }
    Ok(table)
}

pub(crate) const COLUMN_TYPES_SQL: &str = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = $1::regclass AND a.attnum > 0 AND NOT a.attisdropped";

/// Declared column types of `table`, keyed by column name.
pub(crate) async fn column_types(
    conn: &mut PgConnection,
    table: &str,
) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(COLUMN_TYPES_SQL)
        .bind(table)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Check that rows are flat and share one key set, returning the column names.
///
/// Columns follow the key order of the first row.
pub(crate) fn validate_rows(rows: &[Map<String, Value>]) -> ConnectorResult<Vec<String>> {
    let first = rows
        .first()
        .ok_or_else(|| ConnectorError::DataStructure("no rows to write".to_string()))?;
    if first.is_empty() {
        return Err(ConnectorError::DataStructure(
            "rows must have at least one column".to_string(),
        ));
    }
    let columns: Vec<String> = first.keys().cloned().collect();

    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() || !columns.iter().all(|column| row.contains_key(column)) {
            let mut keys: Vec<&String> = row.keys().collect();
            keys.sort();
            return Err(ConnectorError::DataStructure(format!(
                "row {} has columns {:?}, expected {:?}",
                index, keys, columns
            )));
        }
        if let Some((column, _)) = row
            .iter()
            .find(|(_, value)| matches!(value, Value::Array(_) | Value::Object(_)))
        {
            return Err(ConnectorError::DataStructure(format!(
                "row {} column '{}' holds a nested value",
                index, column
            )));
        }
    }
    Ok(columns)
}

/// Rows per statement, bounded by the bind parameter limit.
pub(crate) fn rows_per_statement(batch_size: usize, column_count: usize) -> ConnectorResult<usize> {
    if batch_size == 0 {
        return Err(ConnectorError::DataStructure(
            "batch size must be at least 1".to_string(),
        ));
    }
    Ok(batch_size.min(MAX_BIND_PARAMS / column_count.max(1)).max(1))
}

/// Bind `value` as text cast to the column type.
///
/// Postgres parses the text with the column's own input function, so strings
/// reach `TIMESTAMP`, `UUID` or `JSONB` columns unchanged. Null is a literal.
fn push_value(
    separated: &mut Separated<'_, '_, Postgres, &'static str>,
    value: &Value,
    column_type: Option<&str>,
) {
    let text = match value {
        Value::Null => {
            separated.push("NULL");
            return;
        }
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        // rejected by validate_rows
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    separated.push_bind(text);
    if let Some(column_type) = column_type {
        separated.push_unseparated(format!("::{}", column_type));
    }
}

/// Build a multi-row `INSERT` for `rows`.
///
/// `types` maps lower-case column names to their declared types; columns
/// missing from it are bound as plain text.
pub(crate) fn insert_statement<'args>(
    table: &str,
    columns: &[String],
    types: &HashMap<String, String>,
    rows: &'args [Map<String, Value>],
) -> ConnectorResult<QueryBuilder<'args, Postgres>> {
    let names = columns
        .iter()
        .map(|column| checked_identifier(column))
        .collect::<ConnectorResult<Vec<_>>>()?;
    let column_types: Vec<Option<&str>> = columns
        .iter()
        .map(|column| types.get(&column.to_lowercase()).map(String::as_str))
        .collect();

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, names.join(", ")));
    builder.push_values(rows, |mut separated, row| {
        for (column, column_type) in columns.iter().zip(&column_types) {
            push_value(
                &mut separated,
                row.get(column).unwrap_or(&Value::Null),
                *column_type,
            );
        }
    });
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use sqlx::Execute;

    fn rows(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_checked_table_name() {
        assert_eq!(checked_table_name("events").unwrap(), "events");
        assert_eq!(checked_table_name("analytics.events").unwrap(), "analytics.events");
        assert_eq!(checked_table_name("Cc_Mixed").unwrap(), "Cc_Mixed");
        for invalid in ["", "1abc", "a.b.c", "events; DROP TABLE x", "ev\"ents"] {
            let err = checked_table_name(invalid).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", invalid);
        }
    }

    #[test]
    fn test_validate_rows() {
        let data = rows(json!([
            {"id": 1, "name": "a", "score": 1.5},
            {"id": 2, "name": null, "score": 2}
        ]));
        let columns = validate_rows(&data).unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns.contains(&"name".to_string()));
    }

    #[test]
    fn test_validate_rows_rejects_empty_input() {
        let err = validate_rows(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataStructure);

        let err = validate_rows(&[Map::new()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataStructure);
    }

    #[test]
    fn test_validate_rows_rejects_key_mismatch() {
        let data = rows(json!([{"id": 1, "name": "a"}, {"id": 2, "other": "b"}]));
        let err = validate_rows(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataStructure);
        assert!(err.to_string().contains("row 1"));

        let data = rows(json!([{"id": 1}, {"id": 2, "extra": true}]));
        assert!(validate_rows(&data).is_err());
    }

    #[test]
    fn test_validate_rows_rejects_nested_values() {
        let data = rows(json!([{"id": 1, "tags": ["a", "b"]}]));
        let err = validate_rows(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataStructure);
        assert!(err.to_string().contains("tags"));

        let data = rows(json!([{"id": 1, "attrs": {"k": "v"}}]));
        assert!(validate_rows(&data).is_err());
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(100, 3).unwrap(), 100);
        assert_eq!(rows_per_statement(100_000, 10).unwrap(), 6553);
        let err = rows_per_statement(0, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataStructure);
    }

    fn types(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, ty)| (name.to_string(), ty.to_string()))
            .collect()
    }

    #[test]
    fn test_insert_statement_sql() {
        let data = rows(json!([
            {"id": 1, "name": "a"},
            {"id": 2, "name": "b"}
        ]));
        let columns = validate_rows(&data).unwrap();
        let types = types(&[("id", "integer"), ("name", "text")]);
        let mut builder = insert_statement("events", &columns, &types, &data).unwrap();
        let sql = builder.build().sql().to_string();

        assert_eq!(
            sql,
            "INSERT INTO events (id, name) VALUES ($1::integer, $2::text), ($3::integer, $4::text)"
        );
    }

    #[test]
    fn test_insert_statement_null_is_a_literal() {
        let data = rows(json!([
            {"id": 1, "seen_at": null},
            {"id": null, "seen_at": "2024-05-01 12:00:00"}
        ]));
        let columns = validate_rows(&data).unwrap();
        let types = types(&[("id", "integer"), ("seen_at", "timestamp without time zone")]);
        let mut builder = insert_statement("events", &columns, &types, &data).unwrap();
        let sql = builder.build().sql().to_string();

        assert!(sql.ends_with(
            "VALUES ($1::integer, NULL), (NULL, $2::timestamp without time zone)"
        ));
    }

    #[test]
    fn test_insert_statement_mixed_case_names() {
        let data = rows(json!([{"Id": 1}]));
        let columns = validate_rows(&data).unwrap();
        let types = types(&[("id", "integer")]);
        let mut builder = insert_statement("Cc_Mixed", &columns, &types, &data).unwrap();
        let sql = builder.build().sql().to_string();

        assert_eq!(sql, "INSERT INTO Cc_Mixed (Id) VALUES ($1::integer)");
    }

    #[test]
    fn test_insert_statement_unknown_type_is_uncast() {
        let data = rows(json!([{"flag": true, "note": "x"}]));
        let columns = validate_rows(&data).unwrap();
        let types = types(&[("flag", "boolean")]);
        let mut builder = insert_statement("events", &columns, &types, &data).unwrap();
        let sql = builder.build().sql().to_string();

        assert!(sql.ends_with("VALUES ($1::boolean, $2)"));
    }

    #[test]
    fn test_insert_statement_rejects_bad_column() {
        let data = rows(json!([{"bad column": 1}]));
        let columns = validate_rows(&data).unwrap();
        let err = insert_statement("events", &columns, &HashMap::new(), &data)
            .err()
            .expect("expected an error");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
