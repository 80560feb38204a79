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

//! Temporary AWS credentials through STS role assumption.
//!
//! The credentials returned by [`assume_role`] plug straight into an S3
//! storage configuration:
//!
//! ```rust,no_run
//! use cloud_connectors::storage::StorageConfig;
//! use cloud_connectors::sts::assume_role;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let role = json!({"role_arn": "arn:aws:iam::123456789012:role/reader"});
//! let credentials = assume_role(role.as_object().unwrap()).await?;
//! let config = StorageConfig::aws().with_options(credentials.into_storage_options());
//! # Ok(())
//! # }
//! ```

use crate::error::{ConnectorError, ConnectorResult};
use crate::schema::{DefaultValue, FieldSpec, FieldType, Schema};
use crate::storage::config::{
    ACCESS_KEY_ID_RE, AWS_REGIONS, DEFAULT_AWS_REGION, SECRET_ACCESS_KEY_RE,
};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use tracing::info;

pub const DEFAULT_SESSION_NAME: &str = "cloud-connectors";

static ROLE_ARN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^arn:aws:iam::[0-9]{12}:role/").expect("Invalid role ARN regex"));

static SESSION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w+=,.@-]+$").expect("Invalid session name regex"));

/// Schema of the role assumption configuration
pub static ROLE_ASSUMPTION_SCHEMA: Schema = Schema {
    title: "STS role assumption config",
    allow_additional: false,
    fields: &[
        FieldSpec::new("role_arn", FieldType::String)
            .required()
            .pattern(&ROLE_ARN_RE)
            .description("ARN of the role to assume"),
        FieldSpec::new("region", FieldType::String)
            .one_of(AWS_REGIONS)
            .default_value(DefaultValue::Str(DEFAULT_AWS_REGION)),
        FieldSpec::new("session_name", FieldType::String)
            .length(2, 64)
            .pattern(&SESSION_NAME_RE)
            .default_value(DefaultValue::Str(DEFAULT_SESSION_NAME)),
        FieldSpec::new("duration_seconds", FieldType::Integer)
            .range(900, 43200)
            .description("Lifetime of the temporary credentials"),
        FieldSpec::new("external_id", FieldType::String)
            .length(2, 1224)
            .description("External ID required by the role's trust policy"),
        FieldSpec::new("access_key_id", FieldType::String)
            .length(20, 20)
            .pattern(&ACCESS_KEY_ID_RE),
        FieldSpec::new("secret_access_key", FieldType::String)
            .length(40, 40)
            .pattern(&SECRET_ACCESS_KEY_RE),
        FieldSpec::new("session_token", FieldType::String),
    ],
};

/// Validated role assumption settings
#[derive(Clone, Deserialize)]
pub struct RoleAssumptionConfig {
    pub role_arn: String,
    pub region: String,
    pub session_name: String,
    pub duration_seconds: Option<i32>,
    pub external_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl RoleAssumptionConfig {
    /// Validate an options mapping against [`ROLE_ASSUMPTION_SCHEMA`].
    pub fn from_options(options: &Map<String, Value>) -> ConnectorResult<Self> {
        let config: RoleAssumptionConfig = ROLE_ASSUMPTION_SCHEMA.parse(options)?;
        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(ConnectorError::config(
                "secret_access_key",
                "must be given together with access_key_id",
            ));
        }
        Ok(config)
    }
}

impl Debug for RoleAssumptionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RoleAssumptionConfig")
            .field("role_arn", &self.role_arn)
            .field("region", &self.region)
            .field("session_name", &self.session_name)
            .field("duration_seconds", &self.duration_seconds)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Short-lived credentials returned by STS
#[derive(Clone)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl TemporaryCredentials {
    /// Options for an S3 [`StorageConfig`](crate::storage::StorageConfig).
    pub fn into_storage_options(self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("access_key_id".to_string(), Value::String(self.access_key_id));
        options.insert(
            "secret_access_key".to_string(),
            Value::String(self.secret_access_key),
        );
        options.insert("session_token".to_string(), Value::String(self.session_token));
        options
    }
}

impl Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Assume an IAM role and return its temporary credentials.
///
/// # Arguments
///
/// * `options` - Role assumption options, see [`ROLE_ASSUMPTION_SCHEMA`]
///
/// # Errors
///
/// This function will return an error if:
/// * The options violate the schema (`Configuration`)
/// * STS cannot be reached or refuses the request (`Connection`)
pub async fn assume_role(options: &Map<String, Value>) -> ConnectorResult<TemporaryCredentials> {
    let config = RoleAssumptionConfig::from_options(options)?;

    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::from_keys(
            access_key_id,
            secret_access_key,
            config.session_token.clone(),
        ));
    }
    let sdk_config = loader.load().await;
    let client = aws_sdk_sts::Client::new(&sdk_config);

    let output = client
        .assume_role()
        .role_arn(&config.role_arn)
        .role_session_name(&config.session_name)
        .set_duration_seconds(config.duration_seconds)
        .set_external_id(config.external_id.clone())
        .send()
        .await
        .map_err(|e| {
            ConnectorError::Connection(format!(
                "Failed to assume role {}: {}",
                config.role_arn,
                DisplayErrorContext(&e)
            ))
        })?;

    let credentials = output.credentials().ok_or_else(|| {
        ConnectorError::Connection(format!(
            "STS returned no credentials for role {}",
            config.role_arn
        ))
    })?;
    let expiration = credentials.expiration();

    info!(
        "Assumed role_arn={} session_name={}",
        config.role_arn, config.session_name
    );
    Ok(TemporaryCredentials {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: credentials.secret_access_key().to_string(),
        session_token: credentials.session_token().to_string(),
        expiration: DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos()),
    })
}
