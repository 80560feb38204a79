// Copyright 2022 Adobe. All rights reserved.
// This file is licensed to you under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License. You may obtain a copy
// of the License at http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under
// the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR REPRESENTATIONS
// OF ANY KIND, either express or implied. See the License for the specific language
// governing permissions and limitations under the License.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;
use tracing::info;

use super::config::ProviderType;
use super::transfer::{TransferConfig, WriteOptions};
use crate::error::ConnectorResult;

/// Metadata about an object in a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key, relative to the bucket root
    pub path: String,

    /// Object size in bytes
    pub size: u64,

    /// Last modified timestamp (if available)
    pub last_modified: Option<DateTime<Utc>>,

    /// Content type, only populated by [`CloudStorage::head_object`]
    pub content_type: Option<String>,
}

/// A key that a bulk delete could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub path: String,
    pub reason: String,
}

/// Outcome of [`CloudStorage::delete_objects`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDelete>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uniform object storage operations implemented by every provider adapter.
///
/// Buckets and keys are plain strings; keys are used verbatim, without any
/// normalization. Every provider failure is translated into a
/// [`ConnectorError`](crate::error::ConnectorError) before it leaves the adapter.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// The provider this client talks to.
    fn provider(&self) -> ProviderType;

    /// Validate credentials and connectivity with a cheap read-only call.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the service cannot be reached or rejects the
    /// credentials.
    async fn validate_connection(&self) -> ConnectorResult<()>;

    /// List the names of all buckets visible to the credentials.
    async fn list_buckets(&self) -> ConnectorResult<Vec<String>>;

    /// List object keys starting with `prefix`.
    ///
    /// # Arguments
    ///
    /// * `bucket` - The bucket to list
    /// * `prefix` - Raw string prefix, `""` lists the whole bucket
    /// * `max_objects` - Upper bound on the number of keys returned, `None` for all
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    /// * `Ok(Vec<String>)` - Keys in the provider's listing order
    /// * `Err(ConnectorError)` - If listing fails
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The bucket does not exist (`BucketNotFound`)
    /// * Network or authentication errors occur (`Connection`)
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_objects: Option<usize>,
    ) -> ConnectorResult<Vec<String>> {
        let objects = self
            .list_objects_with_size(bucket, prefix, max_objects)
            .await?;
        Ok(objects.into_iter().map(|object| object.path).collect())
    }

    /// List objects starting with `prefix` together with their sizes.
    ///
    /// Same arguments and errors as [`CloudStorage::list_objects`].
    async fn list_objects_with_size(
        &self,
        bucket: &str,
        prefix: &str,
        max_objects: Option<usize>,
    ) -> ConnectorResult<Vec<ObjectInfo>>;

    /// Fetch the metadata of a single object, including its content type.
    async fn head_object(&self, bucket: &str, path: &str) -> ConnectorResult<ObjectInfo>;

    /// Read the full content of an object.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The bucket does not exist (`BucketNotFound`)
    /// * The object does not exist (`ObjectNotFound`)
    async fn read(&self, bucket: &str, path: &str) -> ConnectorResult<Bytes>;

    /// Write `data` to `path`, replacing any existing object.
    async fn write(
        &self,
        data: Bytes,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> ConnectorResult<()>;

    /// Upload a local file.
    ///
    /// # Arguments
    ///
    /// * `bucket` - Destination bucket
    /// * `local_path` - File to upload
    /// * `remote_path` - Destination key, defaults to `local_path` as a string
    /// * `transfer` - Multipart and concurrency tuning
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The local file does not exist (`LocalFileNotFound`)
    /// * The bucket does not exist (`BucketNotFound`)
    async fn upload(
        &self,
        bucket: &str,
        local_path: &Path,
        remote_path: Option<&str>,
        transfer: &TransferConfig,
    ) -> ConnectorResult<()>;

    /// Download an object into a local file.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The object or bucket does not exist (`ObjectNotFound`, `BucketNotFound`)
    /// * The parent directory of `local_path` is missing or not a directory (`DestinationPath`)
    /// * `local_path` cannot be created (`DestinationPathPermissions`)
    async fn download(
        &self,
        bucket: &str,
        remote_path: &str,
        local_path: &Path,
        transfer: &TransferConfig,
    ) -> ConnectorResult<()>;

    /// Copy an object, keeping its content type.
    ///
    /// `dst_path` defaults to `src_path`. Copying an object onto itself
    /// rewrites it in place instead of being a no-op.
    async fn copy(
        &self,
        src_bucket: &str,
        dst_bucket: &str,
        src_path: &str,
        dst_path: Option<&str>,
    ) -> ConnectorResult<()>;

    /// Move an object by copying it and deleting the source.
    ///
    /// Not atomic: if the delete fails after a successful copy, both objects
    /// exist and the delete error is returned.
    async fn move_object(
        &self,
        src_bucket: &str,
        dst_bucket: &str,
        src_path: &str,
        dst_path: Option<&str>,
    ) -> ConnectorResult<()> {
        let target = dst_path.unwrap_or(src_path);
        if src_bucket == dst_bucket && src_path == target {
            return Ok(());
        }
        self.copy(src_bucket, dst_bucket, src_path, Some(target))
            .await?;
        self.delete_object(src_bucket, src_path).await?;
        info!(
            "Moved object, src_bucket={}, src_path={}, dst_bucket={}, dst_path={}",
            src_bucket, src_path, dst_bucket, target
        );
        Ok(())
    }

    /// Delete a single object.
    async fn delete_object(&self, bucket: &str, path: &str) -> ConnectorResult<()>;

    /// Delete several objects, reporting keys that could not be removed.
    ///
    /// Every key is attempted. Invalid keys and failed requests end up in
    /// [`DeleteReport::failed`] with the reason.
    ///
    /// # Errors
    ///
    /// Only `BucketNotFound`, when the bucket name is empty or the bucket
    /// does not exist.
    async fn delete_objects(&self, bucket: &str, paths: &[String])
        -> ConnectorResult<DeleteReport>;
}

impl Debug for dyn CloudStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "CloudStorage(provider={})", self.provider().as_str())
    }
}

/// Key of an upload whose remote path was not given.
pub(crate) fn default_remote_path(local_path: &Path, remote_path: Option<&str>) -> String {
    remote_path
        .map(str::to_string)
        .unwrap_or_else(|| local_path.to_string_lossy().to_string())
}
