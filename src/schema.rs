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

//! Declarative configuration schemas
//!
//! Every client receives its configuration as an untyped JSON mapping. Before
//! anything else happens the mapping is checked against a static [`Schema`]
//! table describing the accepted keys, their types and constraints. Only a
//! mapping that passes validation is deserialized into the typed settings the
//! client keeps, so a client never holds partially validated configuration.
//!
//! # Examples
//!
//! ```
//! use cloud_connectors::schema::{DefaultValue, FieldSpec, FieldType, Schema};
//! use serde_json::json;
//!
//! static SCHEMA: Schema = Schema {
//!     title: "example",
//!     allow_additional: false,
//!     fields: &[
//!         FieldSpec::new("name", FieldType::String).required(),
//!         FieldSpec::new("port", FieldType::Integer)
//!             .range(1, 65535)
//!             .default_value(DefaultValue::Int(5432)),
//!     ],
//! };
//!
//! let config = json!({"name": "db"});
//! SCHEMA.validate(config.as_object().unwrap()).unwrap();
//! let filled = SCHEMA.with_defaults(config.as_object().unwrap());
//! assert_eq!(filled["port"], 5432);
//! ```

use crate::error::{ConnectorError, ConnectorResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Accepted JSON type of a configuration field
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    String,
    Boolean,
    Integer,
    /// Any JSON number, integer or floating point
    Number,
    /// Either a boolean or a string (e.g. a TLS flag or a CA bundle path)
    StringOrBoolean,
    StringArray,
    /// Nested mapping validated against its own schema
    Object(&'static Schema),
}

impl FieldType {
    fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Boolean => "a boolean",
            FieldType::Integer => "an integer",
            FieldType::Number => "a number",
            FieldType::StringOrBoolean => "a string or a boolean",
            FieldType::StringArray => "an array of strings",
            FieldType::Object(_) => "an object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::StringOrBoolean => value.is_string() || value.is_boolean(),
            FieldType::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldType::Object(_) => value.is_object(),
        }
    }
}

/// Default applied to an absent optional field
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Str(&'static str),
    Bool(bool),
    Int(i64),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            DefaultValue::Str(s) => Value::String(s.to_string()),
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Int(i) => Value::from(i),
        }
    }
}

/// One row of a schema table
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub pattern: Option<&'static Lazy<Regex>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub allowed: &'static [&'static str],
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub default: Option<DefaultValue>,
    /// Human-readable summary of the option
    pub description: Option<&'static str>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            pattern: None,
            min_length: None,
            max_length: None,
            allowed: &[],
            minimum: None,
            maximum: None,
            default: None,
            description: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn pattern(mut self, pattern: &'static Lazy<Regex>) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub const fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub const fn at_least(mut self, minimum: i64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub const fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub const fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn description(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    fn check(&self, field: &str, value: &Value) -> ConnectorResult<()> {
        if !self.field_type.matches(value) {
            return Err(ConnectorError::config(
                field,
                format!("must be {}", self.field_type.describe()),
            ));
        }

        if let FieldType::Object(nested) = self.field_type {
            // `matches` guarantees an object here
            if let Some(map) = value.as_object() {
                return nested.validate_at(map, Some(field));
            }
        }

        if let Some(text) = value.as_str() {
            let len = text.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(ConnectorError::config(
                        field,
                        format!("must be at least {} characters long", min),
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(ConnectorError::config(
                        field,
                        format!("must be at most {} characters long", max),
                    ));
                }
            }
            if let Some(pattern) = self.pattern {
                if !pattern.is_match(text) {
                    return Err(ConnectorError::config(
                        field,
                        format!("must match pattern {}", pattern.as_str()),
                    ));
                }
            }
            if !self.allowed.is_empty() && !self.allowed.contains(&text) {
                return Err(ConnectorError::config(
                    field,
                    format!("must be one of [{}]", self.allowed.join(", ")),
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.minimum {
                if number < min as f64 {
                    return Err(ConnectorError::config(field, format!("must be >= {}", min)));
                }
            }
            if let Some(max) = self.maximum {
                if number > max as f64 {
                    return Err(ConnectorError::config(field, format!("must be <= {}", max)));
                }
            }
        }

        Ok(())
    }
}

/// A schema-description table for one configuration mapping
#[derive(Debug)]
pub struct Schema {
    pub title: &'static str,
    pub fields: &'static [FieldSpec],
    /// Whether keys not listed in `fields` are accepted
    pub allow_additional: bool,
}

impl Schema {
    /// Validate a configuration mapping against the schema.
    ///
    /// Unknown keys are reported first, then every missing required key
    /// (together, in table order), then the first per-field violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] naming the offending field,
    /// using a dotted path for fields of nested objects.
    pub fn validate(&self, config: &Map<String, Value>) -> ConnectorResult<()> {
        self.validate_at(config, None)
    }

    fn validate_at(&self, config: &Map<String, Value>, parent: Option<&str>) -> ConnectorResult<()> {
        let qualify = |name: &str| match parent {
            Some(p) => format!("{}.{}", p, name),
            None => name.to_string(),
        };

        if !self.allow_additional {
            if let Some(unknown) = config.keys().find(|key| self.field(key).is_none()) {
                return Err(ConnectorError::config(
                    qualify(unknown),
                    format!("is not allowed in {}", self.title),
                ));
            }
        }

        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|spec| spec.required && !config.contains_key(spec.name))
            .map(|spec| qualify(spec.name))
            .collect();
        if !missing.is_empty() {
            let rule = if missing.len() == 1 {
                "is required"
            } else {
                "are required"
            };
            return Err(ConnectorError::config(missing.join(", "), rule));
        }

        for spec in self.fields {
            if let Some(value) = config.get(spec.name) {
                spec.check(&qualify(spec.name), value)?;
            }
        }

        Ok(())
    }

    /// Copy of `config` with defaults filled in for absent optional fields.
    ///
    /// Nested objects are created when absent if their own schema carries
    /// defaults, so typed settings can rely on them being present.
    pub fn with_defaults(&self, config: &Map<String, Value>) -> Map<String, Value> {
        let mut filled = config.clone();
        for spec in self.fields {
            match (spec.field_type, filled.get_mut(spec.name)) {
                (FieldType::Object(nested), Some(Value::Object(inner))) => {
                    *inner = nested.with_defaults(inner);
                }
                (FieldType::Object(nested), None) => {
                    let defaults = nested.with_defaults(&Map::new());
                    if !defaults.is_empty() {
                        filled.insert(spec.name.to_string(), Value::Object(defaults));
                    }
                }
                (_, None) => {
                    if let Some(default) = spec.default {
                        filled.insert(spec.name.to_string(), default.to_value());
                    }
                }
                _ => {}
            }
        }
        filled
    }

    /// Validate, fill defaults and deserialize into a typed settings struct.
    ///
    /// A value the target type cannot hold, such as `300` for a `u8`, is
    /// reported against its dotted field path.
    pub fn parse<T: DeserializeOwned>(&self, config: &Map<String, Value>) -> ConnectorResult<T> {
        self.validate(config)?;
        let filled = Value::Object(self.with_defaults(config));
        // pretty-printed so the error line identifies the field
        let pretty = serde_json::to_string_pretty(&filled)
            .map_err(|e| ConnectorError::config(self.title, e.to_string()))?;
        serde_json::from_str(&pretty).map_err(|e| {
            let field = key_path_at_line(&pretty, e.line()).unwrap_or_else(|| self.title.to_string());
            ConnectorError::config(field, e.to_string())
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }
}

/// Dotted path of the key on `line` (1-based) of pretty-printed JSON.
///
/// Array elements resolve to the array's key. Closing brackets have no key.
fn key_path_at_line(pretty: &str, line: usize) -> Option<String> {
    let target = pretty.lines().nth(line.checked_sub(1)?)?.trim_start();
    if target.starts_with('}') || target.starts_with(']') {
        return None;
    }

    let mut stack: Vec<&str> = Vec::new();
    for text in pretty.lines().take(line) {
        let trimmed = text.trim_start();
        let Some(key) = trimmed
            .strip_prefix('"')
            .and_then(|rest| rest.find("\":").map(|end| &rest[..end]))
        else {
            continue;
        };
        let depth = (text.len() - trimmed.len()) / 2;
        stack.truncate(depth.saturating_sub(1));
        stack.push(key);
    }
    (!stack.is_empty()).then(|| stack.join("."))
}
