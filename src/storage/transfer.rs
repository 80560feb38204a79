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

use crate::error::ConnectorResult;
use crate::schema::{DefaultValue, FieldSpec, FieldType, Schema};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

const MIB: i64 = 1024 * 1024;

/// Schema of the upload/download tuning options
pub static TRANSFER_SCHEMA: Schema = Schema {
    title: "transfer config",
    allow_additional: false,
    fields: &[
        FieldSpec::new("multipart_threshold", FieldType::Integer)
            .at_least(5 * MIB)
            .default_value(DefaultValue::Int(8 * MIB)),
        FieldSpec::new("max_concurrency", FieldType::Integer)
            .at_least(1)
            .default_value(DefaultValue::Int(10)),
        FieldSpec::new("chunk_size", FieldType::Integer)
            .at_least(5 * MIB)
            .default_value(DefaultValue::Int(8 * MIB)),
        FieldSpec::new("download_attempt_count", FieldType::Integer)
            .at_least(1)
            .default_value(DefaultValue::Int(5)),
        FieldSpec::new("io_queue_depth", FieldType::Integer)
            .at_least(1)
            .default_value(DefaultValue::Int(100)),
        FieldSpec::new("io_chunk_size", FieldType::Integer)
            .at_least(1)
            .default_value(DefaultValue::Int(256 * 1024)),
        FieldSpec::new("use_threads", FieldType::Boolean).default_value(DefaultValue::Bool(true)),
    ],
};

/// Tuning for large uploads and downloads.
///
/// Objects at or above `multipart_threshold` bytes are sent in `chunk_size`
/// parts, at most [`TransferConfig::effective_concurrency`] at a time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferConfig {
    pub multipart_threshold: u64,
    pub max_concurrency: usize,
    pub chunk_size: u64,
    /// Attempts for a download whose body stream is interrupted
    pub download_attempt_count: usize,
    pub io_queue_depth: usize,
    /// Buffer size when reading local files and writing downloads
    pub io_chunk_size: usize,
    pub use_threads: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: 8 * MIB as u64,
            max_concurrency: 10,
            chunk_size: 8 * MIB as u64,
            download_attempt_count: 5,
            io_queue_depth: 100,
            io_chunk_size: 256 * 1024,
            use_threads: true,
        }
    }
}

impl TransferConfig {
    /// Validate an override mapping and fill the remaining fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the mapping violates [`TRANSFER_SCHEMA`].
    pub fn from_options(options: &Map<String, Value>) -> ConnectorResult<Self> {
        TRANSFER_SCHEMA.parse(options)
    }

    /// Number of parts in flight during a multipart transfer.
    pub fn effective_concurrency(&self) -> usize {
        if self.use_threads {
            self.max_concurrency.min(self.io_queue_depth).max(1)
        } else {
            1
        }
    }

    pub fn use_multipart(&self, size: u64) -> bool {
        size >= self.multipart_threshold
    }
}

/// Object attributes applied by [`write`](super::CloudStorage::write)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub content_language: Option<String>,
    /// User metadata stored alongside the object
    pub metadata: HashMap<String, String>,
}

impl WriteOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
