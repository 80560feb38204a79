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

//! Error taxonomy shared by every client in the crate.
//!
//! Provider SDK errors never escape a client: each adapter translates them
//! into exactly one [`ConnectorError`] variant at the call boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Fieldless tag of a [`ConnectorError`], convenient for matching in callers
/// and tests without destructuring the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    BucketNotFound,
    ObjectNotFound,
    LocalFileNotFound,
    DestinationPath,
    DestinationPathPermissions,
    InvalidArgument,
    DataStructure,
    DatabaseConnection,
    Database,
    Unexpected,
}

/// Errors that can occur in storage, credential and database clients
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// A configuration mapping violated its schema.
    #[error("Configuration error: field '{field}' {rule}")]
    Configuration { field: String, rule: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bucket '{bucket}' not found")]
    BucketNotFound { bucket: String },

    #[error("Object '{path}' not found in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, path: String },

    /// The local source file of an upload does not exist.
    #[error("Local file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    #[error("Cannot download object to {}: {reason}", .path.display())]
    DestinationPath { path: PathBuf, reason: String },

    #[error("Cannot download object to {}: permission denied", .path.display())]
    DestinationPathPermissions { path: PathBuf },

    /// A call argument the provider would reject (empty key, malformed option).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Batch-write input is not a list of uniform flat rows.
    #[error("Data structure error: {0}")]
    DataStructure(String),

    #[error("Database connection error: {0}")]
    DatabaseConnection(#[source] sqlx::Error),

    #[error("Database error for query `{statement}`: {source}")]
    Database {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// Provider failure that does not map onto any other kind.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Result type for all connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Configuration { .. } => ErrorKind::Configuration,
            ConnectorError::Connection(_) => ErrorKind::Connection,
            ConnectorError::BucketNotFound { .. } => ErrorKind::BucketNotFound,
            ConnectorError::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            ConnectorError::LocalFileNotFound(_) => ErrorKind::LocalFileNotFound,
            ConnectorError::DestinationPath { .. } => ErrorKind::DestinationPath,
            ConnectorError::DestinationPathPermissions { .. } => {
                ErrorKind::DestinationPathPermissions
            }
            ConnectorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ConnectorError::DataStructure(_) => ErrorKind::DataStructure,
            ConnectorError::DatabaseConnection(_) => ErrorKind::DatabaseConnection,
            ConnectorError::Database { .. } => ErrorKind::Database,
            ConnectorError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn config(field: impl Into<String>, rule: impl Into<String>) -> Self {
        ConnectorError::Configuration {
            field: field.into(),
            rule: rule.into(),
        }
    }

    pub(crate) fn bucket_not_found(bucket: &str) -> Self {
        ConnectorError::BucketNotFound {
            bucket: bucket.to_string(),
        }
    }

    pub(crate) fn object_not_found(bucket: &str, path: &str) -> Self {
        ConnectorError::ObjectNotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        }
    }

    pub(crate) fn database(statement: impl Into<String>, source: sqlx::Error) -> Self {
        ConnectorError::Database {
            statement: statement.into(),
            source,
        }
    }

    /// Whether the error is a transient network failure worth retrying.
    pub fn is_transient(&self) -> bool {
        let message = match self {
            ConnectorError::Connection(msg) | ConnectorError::Unexpected(msg) => msg.as_str(),
            _ => return false,
        };
        let message = message.to_lowercase();
        [
            "connectionreset",
            "connection reset",
            "brokenpipe",
            "broken pipe",
            "interrupted",
            "timedout",
            "timed out",
        ]
        .iter()
        .any(|marker| message.contains(marker))
    }
}
