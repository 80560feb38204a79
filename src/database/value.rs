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

//! Conversion of Postgres row values into JSON values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

/// Result of a fetching query: column names and one value per column per row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Rows as column-name keyed records.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Decode the value at `index` according to its Postgres type.
///
/// Numeric values are returned as strings to keep their precision, byte
/// arrays as lowercase hex, timestamps as RFC 3339 strings.
pub(crate) fn decode_value(row: &PgRow, index: usize) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let type_name = row.column(index).type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "OID" => Value::from(row.try_get::<sqlx::postgres::types::Oid, _>(index)?.0),
        "FLOAT4" => float(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => float(row.try_get::<f64, _>(index)?),
        "NUMERIC" => Value::String(row.try_get::<BigDecimal, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" => {
            Value::String(row.try_get::<String, _>(index)?)
        }
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "UUID" => Value::String(row.try_get::<Uuid, _>(index)?.to_string()),
        "BYTEA" => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
        "TEXT[]" | "VARCHAR[]" => Value::from(row.try_get::<Vec<String>, _>(index)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(index)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(index)?),
        "BOOL[]" => Value::from(row.try_get::<Vec<bool>, _>(index)?),
        "FLOAT8[]" => Value::Array(
            row.try_get::<Vec<f64>, _>(index)?
                .into_iter()
                .map(float)
                .collect(),
        ),
        _ => return Err(sqlx::Error::TypeNotFound { type_name }),
    };
    Ok(value)
}

/// Decode every value of a row.
pub(crate) fn decode_row(row: &PgRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

/// Column names of a row, in select order.
pub(crate) fn column_names(row: &PgRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}
