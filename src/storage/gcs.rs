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

use super::config::{GcsSettings, ProviderType, StorageConfig};
use super::local::{
    check_bucket, check_download_destination, check_object_path, check_upload_source,
    create_destination, destination_write_error, part_ranges, read_part,
};
use super::provider::{default_remote_path, CloudStorage, DeleteReport, FailedDelete, ObjectInfo};
use super::transfer::{TransferConfig, WriteOptions};
use crate::error::{ConnectorError, ConnectorResult};
use crate::util::retry::retry_transient;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, GetOptions, ObjectStore, PutOptions,
    PutPayload, RetryConfig, StaticCredentialProvider, WriteMultipart,
};
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";

/// Parallel single-object deletes issued by `delete_objects`
const DELETE_CONCURRENCY: usize = 10;

/// Builds the object store serving one bucket.
pub type StoreFactory =
    Arc<dyn Fn(&str) -> ConnectorResult<Arc<dyn ObjectStore>> + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketListPage {
    #[serde(default)]
    items: Vec<BucketResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketResource {
    name: String,
}

/// Object location for a key, kept byte for byte.
///
/// object_store cannot address keys with a leading or trailing `/`, empty
/// segments or control characters, so those are rejected rather than
/// silently renamed.
fn to_object_path(path: &str) -> ConnectorResult<ObjectPath> {
    match ObjectPath::parse(path) {
        Ok(location) if location.as_ref() == path => Ok(location),
        Ok(_) => Err(ConnectorError::InvalidArgument(format!(
            "GCS key '{}' cannot start or end with '/'",
            path
        ))),
        Err(e) => Err(ConnectorError::InvalidArgument(format!(
            "GCS key '{}' is not addressable: {}",
            path, e
        ))),
    }
}

/// Directory to list for a raw string prefix.
///
/// object_store prefixes match whole path segments, so `logs/2024` has to be
/// listed from `logs` and filtered afterwards.
fn listing_root(prefix: &str) -> Option<ObjectPath> {
    match prefix.rfind('/') {
        Some(idx) if idx > 0 => ObjectPath::parse(&prefix[..idx]).ok(),
        _ => None,
    }
}

fn is_missing_bucket(err: &object_store::Error) -> bool {
    match err {
        object_store::Error::NotFound { .. } => true,
        other => {
            let message = other.to_string();
            message.contains("404") || message.contains("Not Found")
        }
    }
}

/// Translate an object_store failure into a [`ConnectorError`].
///
/// A `NotFound` on an object call is reported as `ObjectNotFound`; callers
/// that need to tell a missing bucket apart use [`GcsClient::not_found`].
fn map_store_error(err: object_store::Error, bucket: &str, path: Option<&str>) -> ConnectorError {
    match err {
        object_store::Error::NotFound { .. } => match path {
            Some(path) => ConnectorError::object_not_found(bucket, path),
            None => ConnectorError::bucket_not_found(bucket),
        },
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
            ConnectorError::Connection(format!("GCS rejected the credentials: {}", err))
        }
        object_store::Error::InvalidPath { .. } => ConnectorError::InvalidArgument(err.to_string()),
        other => {
            let message = other.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("error sending request")
                || lowered.contains("connect")
                || lowered.contains("timed out")
            {
                ConnectorError::Connection(message)
            } else {
                ConnectorError::Unexpected(format!("GCS error: {}", message))
            }
        }
    }
}

fn write_attributes(options: &WriteOptions) -> Attributes {
    let mut attributes = Attributes::new();
    let fixed = [
        (Attribute::ContentType, &options.content_type),
        (Attribute::ContentEncoding, &options.content_encoding),
        (Attribute::ContentDisposition, &options.content_disposition),
        (Attribute::CacheControl, &options.cache_control),
        (Attribute::ContentLanguage, &options.content_language),
    ];
    for (attribute, value) in fixed {
        if let Some(value) = value {
            attributes.insert(attribute, AttributeValue::from(value.clone()));
        }
    }
    for (key, value) in &options.metadata {
        attributes.insert(
            Attribute::Metadata(key.clone().into()),
            AttributeValue::from(value.clone()),
        );
    }
    attributes
}

/// Build connection options from the advanced settings.
fn build_connection_options(settings: &GcsSettings) -> ClientOptions {
    let advanced = &settings.advanced;
    let mut client_options = ClientOptions::default()
        .with_pool_idle_timeout(Duration::from_secs(advanced.pool_idle_timeout))
        .with_pool_max_idle_per_host(advanced.pool_max_idle_per_host);
    client_options = if advanced.timeout == 0 {
        client_options.with_timeout_disabled()
    } else {
        client_options.with_timeout(Duration::from_secs(advanced.timeout))
    };
    if advanced.connect_timeout == 0 {
        client_options.with_connect_timeout_disabled()
    } else {
        client_options.with_connect_timeout(Duration::from_secs(advanced.connect_timeout))
    }
}

fn build_retry_options(settings: &GcsSettings) -> RetryConfig {
    RetryConfig {
        backoff: Default::default(),
        max_retries: settings.advanced.max_retries,
        retry_timeout: Duration::from_secs(settings.advanced.retry_timeout),
    }
}

/// Abort a multipart upload, logging rather than returning a failed abort.
async fn abort_upload(writer: WriteMultipart, location: &ObjectPath) {
    if let Err(e) = writer.abort().await {
        warn!("Failed to abort multipart upload to key={}: {}", location, e);
    }
}

/// Object store factory for real GCS buckets.
fn gcs_store_factory(settings: GcsSettings) -> StoreFactory {
    Arc::new(move |bucket: &str| {
        let mut builder = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_client_options(build_connection_options(&settings))
            .with_retry(build_retry_options(&settings));
        if let Some(path) = &settings.service_account_key_path {
            builder = builder.with_service_account_path(path);
        }
        if let Some(key) = &settings.service_account_key {
            builder = builder.with_service_account_key(key);
        }
        if let Some(path) = &settings.application_credentials_path {
            builder = builder.with_application_credentials(path);
        }
        if let Some(token) = &settings.token {
            builder = builder.with_credentials(Arc::new(StaticCredentialProvider::new(
                GcpCredential {
                    bearer: token.clone(),
                },
            )));
        }
        let store = builder.build().map_err(|e| {
            ConnectorError::config("service_account_key", format!("is unusable: {}", e))
        })?;
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    })
}

/// Storage client for Google Cloud Storage
///
/// object_store binds a store to a single bucket, so the client keeps one
/// store per bucket, created on first use.
pub struct GcsClient {
    settings: GcsSettings,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    factory: StoreFactory,
    http: reqwest::Client,
    api_base: String,
}

impl Debug for GcsClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GcsClient")
            .field("settings", &self.settings)
            .field("buckets", &self.stores.len())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GcsClient {
    /// Create a new GCS client from a storage configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options violate the GCS schema or
    /// the configuration is for another provider.
    pub fn new(config: &StorageConfig) -> ConnectorResult<Self> {
        if config.provider != ProviderType::Gcs {
            return Err(ConnectorError::config(
                "type",
                format!("must be gcs for a GCS client, got {}", config.provider.as_str()),
            ));
        }
        let settings = GcsSettings::from_options(&config.options)?;
        let factory = gcs_store_factory(settings.clone());
        Ok(Self::with_store_factory(settings, factory))
    }

    /// Create a client whose per-bucket stores come from `factory`.
    ///
    /// Useful to point the client at an emulator or an in-memory store.
    pub fn with_store_factory(settings: GcsSettings, factory: StoreFactory) -> Self {
        Self {
            settings,
            stores: DashMap::new(),
            factory,
            http: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Override the JSON API base URL used by [`CloudStorage::list_buckets`].
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn settings(&self) -> &GcsSettings {
        &self.settings
    }

    fn store(&self, bucket: &str) -> ConnectorResult<Arc<dyn ObjectStore>> {
        check_bucket(bucket)?;
        if let Some(store) = self.stores.get(bucket) {
            return Ok(Arc::clone(store.value()));
        }
        let store = (self.factory)(bucket)?;
        self.stores
            .insert(bucket.to_string(), Arc::clone(&store));
        debug!("Created GCS store for bucket={}", bucket);
        Ok(store)
    }

    /// Tell a missing bucket apart from a missing object.
    async fn not_found(&self, store: &dyn ObjectStore, bucket: &str, path: &str) -> ConnectorError {
        match store.list_with_delimiter(None).await {
            Ok(_) => ConnectorError::object_not_found(bucket, path),
            Err(e) if is_missing_bucket(&e) => ConnectorError::bucket_not_found(bucket),
            Err(e) => map_store_error(e, bucket, None),
        }
    }

    async fn object_error(
        &self,
        store: &dyn ObjectStore,
        err: object_store::Error,
        bucket: &str,
        path: &str,
    ) -> ConnectorError {
        match err {
            object_store::Error::NotFound { .. } => self.not_found(store, bucket, path).await,
            other => map_store_error(other, bucket, Some(path)),
        }
    }

    fn bucket_list_credentials(&self) -> ConnectorResult<(&str, &str)> {
        let project = self.settings.project.as_deref().ok_or_else(|| {
            ConnectorError::config("project", "is required to list buckets")
        })?;
        let token = self
            .settings
            .token
            .as_deref()
            .ok_or_else(|| ConnectorError::config("token", "is required to list buckets"))?;
        Ok((project, token))
    }

    async fn upload_multipart(
        &self,
        store: &dyn ObjectStore,
        location: &ObjectPath,
        local_path: &Path,
        size: u64,
        transfer: &TransferConfig,
    ) -> object_store::Result<()> {
        let upload = store.put_multipart(location).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, transfer.chunk_size as usize);
        let concurrency = transfer.effective_concurrency();

        for (_, offset, len) in part_ranges(size, transfer.io_chunk_size.max(1) as u64) {
            let data = match read_part(local_path, offset, len).await {
                Ok(data) => data,
                Err(e) => {
                    abort_upload(writer, location).await;
                    return Err(object_store::Error::Generic {
                        store: "GCS",
                        source: Box::new(e),
                    });
                }
            };
            if let Err(e) = writer.wait_for_capacity(concurrency).await {
                abort_upload(writer, location).await;
                return Err(e);
            }
            writer.write(&data);
        }
        writer.finish().await?;
        Ok(())
    }

    async fn download_once(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        remote_path: &str,
        local_path: &Path,
        transfer: &TransferConfig,
    ) -> ConnectorResult<u64> {
        let result = match store.get(&to_object_path(remote_path)?).await {
            Ok(result) => result,
            Err(e) => return Err(self.object_error(store, e, bucket, remote_path).await),
        };

        let mut body = result.into_stream();
        let mut writer = create_destination(local_path, transfer.io_chunk_size).await?;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| map_store_error(e, bucket, Some(remote_path)))?
        {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| destination_write_error(local_path, e))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| destination_write_error(local_path, e))?;
        Ok(written)
    }
}

#[async_trait]
impl CloudStorage for GcsClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Gcs
    }

    async fn validate_connection(&self) -> ConnectorResult<()> {
        self.list_buckets().await.map(|_| ()).map_err(|e| match e {
            ConnectorError::Configuration { .. } | ConnectorError::Connection(_) => e,
            other => ConnectorError::Connection(format!(
                "Failed to validate GCS connection: {}",
                other
            )),
        })
    }

    async fn list_buckets(&self) -> ConnectorResult<Vec<String>> {
        let (project, token) = self.bucket_list_credentials()?;
        let url = format!("{}/storage/v1/b", self.api_base);

        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[("project", project)]);
            if let Some(page_token) = &page_token {
                request = request.query(&[("pageToken", page_token.as_str())]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ConnectorError::Connection(format!("GCS request failed: {}", e)))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(ConnectorError::Connection(format!(
                    "GCS rejected the credentials with status {}",
                    status
                )));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectorError::Unexpected(format!(
                    "GCS bucket listing failed with status {}: {}",
                    status, body
                )));
            }

            let page: BucketListPage = response.json().await.map_err(|e| {
                ConnectorError::Unexpected(format!("Invalid GCS bucket listing: {}", e))
            })?;
            buckets.extend(page.items.into_iter().map(|bucket| bucket.name));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        info!("Listed count={} buckets in project={}", buckets.len(), project);
        Ok(buckets)
    }

    async fn list_objects_with_size(
        &self,
        bucket: &str,
        prefix: &str,
        max_objects: Option<usize>,
    ) -> ConnectorResult<Vec<ObjectInfo>> {
        let store = self.store(bucket)?;
        let limit = max_objects.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let root = listing_root(prefix);
        let objects: Vec<ObjectInfo> = store
            .list(root.as_ref())
            .map_err(|e| map_store_error(e, bucket, None))
            .try_filter_map(|meta| async move {
                let path = meta.location.to_string();
                if !path.starts_with(prefix) {
                    return Ok(None);
                }
                Ok(Some(ObjectInfo {
                    path,
                    size: meta.size as u64,
                    last_modified: Some(meta.last_modified),
                    content_type: None,
                }))
            })
            .take(limit)
            .try_collect()
            .await?;

        info!(
            "Listed count={} objects in bucket={} with prefix={}",
            objects.len(),
            bucket,
            prefix
        );
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, path: &str) -> ConnectorResult<ObjectInfo> {
        check_object_path(path)?;
        let store = self.store(bucket)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = match store.get_opts(&to_object_path(path)?, options).await {
            Ok(result) => result,
            Err(e) => return Err(self.object_error(store.as_ref(), e, bucket, path).await),
        };
        Ok(ObjectInfo {
            path: path.to_string(),
            size: result.meta.size as u64,
            last_modified: Some(result.meta.last_modified),
            content_type: result
                .attributes
                .get(&Attribute::ContentType)
                .map(|value| value.to_string()),
        })
    }

    async fn read(&self, bucket: &str, path: &str) -> ConnectorResult<Bytes> {
        check_object_path(path)?;
        let store = self.store(bucket)?;
        let result = match store.get(&to_object_path(path)?).await {
            Ok(result) => result,
            Err(e) => return Err(self.object_error(store.as_ref(), e, bucket, path).await),
        };
        result
            .bytes()
            .await
            .map_err(|e| map_store_error(e, bucket, Some(path)))
    }

    async fn write(
        &self,
        data: Bytes,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> ConnectorResult<()> {
        check_object_path(path)?;
        let store = self.store(bucket)?;
        let size = data.len();
        let put_options = PutOptions {
            attributes: write_attributes(options),
            ..Default::default()
        };
        if let Err(e) = store
            .put_opts(&to_object_path(path)?, PutPayload::from(data), put_options)
            .await
        {
            return Err(self.object_error(store.as_ref(), e, bucket, path).await);
        }
        debug!("Wrote size={} bytes to bucket={} key={}", size, bucket, path);
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        local_path: &Path,
        remote_path: Option<&str>,
        transfer: &TransferConfig,
    ) -> ConnectorResult<()> {
        check_bucket(bucket)?;
        let size = check_upload_source(local_path).await?;
        let mut key = default_remote_path(local_path, remote_path);
        if remote_path.is_none() {
            // absolute local paths would give an unaddressable key
            key = key.trim_start_matches('/').to_string();
        }
        check_object_path(&key)?;
        let store = self.store(bucket)?;
        let location = to_object_path(&key)?;

        let uploaded = if transfer.use_multipart(size) {
            info!(
                "Uploading file={} to bucket={} key={} in chunk_size={} parts",
                local_path.display(),
                bucket,
                key,
                transfer.chunk_size
            );
            self.upload_multipart(store.as_ref(), &location, local_path, size, transfer)
                .await
        } else {
            let data = tokio::fs::read(local_path).await.map_err(|e| {
                ConnectorError::Unexpected(format!(
                    "Failed to read '{}': {}",
                    local_path.display(),
                    e
                ))
            })?;
            store
                .put(&location, PutPayload::from(data))
                .await
                .map(|_| ())
        };
        if let Err(e) = uploaded {
            return Err(self.object_error(store.as_ref(), e, bucket, &key).await);
        }

        info!(
            "Uploaded file={} size={} to bucket={} key={}",
            local_path.display(),
            size,
            bucket,
            key
        );
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote_path: &str,
        local_path: &Path,
        transfer: &TransferConfig,
    ) -> ConnectorResult<()> {
        check_object_path(remote_path)?;
        let store = self.store(bucket)?;
        check_download_destination(local_path).await?;

        let size = retry_transient(
            transfer.download_attempt_count.saturating_sub(1),
            "gcs_download",
            || self.download_once(store.as_ref(), bucket, remote_path, local_path, transfer),
        )
        .await?;
        info!(
            "Downloaded bucket={} key={} size={} to file={}",
            bucket,
            remote_path,
            size,
            local_path.display()
        );
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        dst_bucket: &str,
        src_path: &str,
        dst_path: Option<&str>,
    ) -> ConnectorResult<()> {
        check_object_path(src_path)?;
        let target = dst_path.unwrap_or(src_path);
        check_object_path(target)?;
        let source_store = self.store(src_bucket)?;
        let destination_store = self.store(dst_bucket)?;
        let from = to_object_path(src_path)?;
        let to = to_object_path(target)?;

        if src_bucket == dst_bucket && src_path != target {
            if let Err(e) = source_store.copy(&from, &to).await {
                return Err(self
                    .object_error(source_store.as_ref(), e, src_bucket, src_path)
                    .await);
            }
        } else {
            let source = match source_store.get(&from).await {
                Ok(result) => result,
                Err(e) => {
                    return Err(self
                        .object_error(source_store.as_ref(), e, src_bucket, src_path)
                        .await)
                }
            };
            let attributes = source.attributes.clone();
            let data = source
                .bytes()
                .await
                .map_err(|e| map_store_error(e, src_bucket, Some(src_path)))?;
            let put_options = PutOptions {
                attributes,
                ..Default::default()
            };
            if let Err(e) = destination_store
                .put_opts(&to, PutPayload::from(data), put_options)
                .await
            {
                return Err(self
                    .object_error(destination_store.as_ref(), e, dst_bucket, target)
                    .await);
            }
        }

        debug!(
            "Copied gs://{}/{} to gs://{}/{}",
            src_bucket, src_path, dst_bucket, target
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> ConnectorResult<()> {
        check_object_path(path)?;
        let store = self.store(bucket)?;
        if let Err(e) = store.delete(&to_object_path(path)?).await {
            return Err(self.object_error(store.as_ref(), e, bucket, path).await);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, paths: &[String]) -> ConnectorResult<DeleteReport> {
        let store = self.store(bucket)?;

        let mut report = DeleteReport::default();
        let mut locations = Vec::with_capacity(paths.len());
        for path in paths {
            match check_object_path(path).and_then(|_| to_object_path(path)) {
                Ok(location) => locations.push((path.clone(), location)),
                Err(e) => report.failed.push(FailedDelete {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        let attempted = locations.len();

        let results: Vec<(String, object_store::Result<()>)> = stream::iter(locations)
            .map(|(path, location)| {
                let store = Arc::clone(&store);
                async move {
                    let result = store.delete(&location).await;
                    (path, result)
                }
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        for (path, result) in results {
            match result {
                Ok(()) => report.deleted.push(path),
                Err(e) => report.failed.push(FailedDelete {
                    path,
                    reason: e.to_string(),
                }),
            }
        }
        if !report.deleted.is_empty() || attempted == 0 {
            info!(
                "Deleted count={} objects from bucket={}, failed={}",
                report.deleted.len(),
                bucket,
                report.failed.len()
            );
            return Ok(report);
        }

        // Nothing could be deleted: surface a missing bucket as an error
        match store.list_with_delimiter(None).await {
            Err(e) if is_missing_bucket(&e) => Err(ConnectorError::bucket_not_found(bucket)),
            _ => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use object_store::memory::InMemory;
    use serde_json::{Map, Value};
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Client backed by in-memory buckets; any other bucket name is missing.
    fn memory_client(buckets: &[&str]) -> GcsClient {
        let stores: Arc<DashMap<String, Arc<dyn ObjectStore>>> = Arc::new(DashMap::new());
        for bucket in buckets {
            stores.insert(bucket.to_string(), Arc::new(InMemory::new()));
        }
        let factory: StoreFactory = Arc::new(move |bucket: &str| {
            stores
                .get(bucket)
                .map(|store| Arc::clone(store.value()))
                .ok_or_else(|| ConnectorError::bucket_not_found(bucket))
        });
        let settings = GcsSettings::from_options(&Map::new()).unwrap();
        GcsClient::with_store_factory(settings, factory)
    }

    async fn put(client: &GcsClient, bucket: &str, path: &str, data: &'static [u8]) {
        client
            .write(Bytes::from_static(data), bucket, path, &WriteOptions::default())
            .await
            .unwrap();
    }

    #[test]
    fn test_listing_root() {
        assert_eq!(listing_root(""), None);
        assert_eq!(listing_root("logs"), None);
        assert_eq!(listing_root("/logs"), None);
        assert_eq!(listing_root("logs/2024"), Some(ObjectPath::from("logs")));
        assert_eq!(listing_root("a/b/c"), Some(ObjectPath::from("a/b")));
    }

    #[test]
    fn test_map_store_error() {
        let not_found = || object_store::Error::NotFound {
            path: "k".to_string(),
            source: "missing".into(),
        };
        assert_eq!(
            map_store_error(not_found(), "b", Some("k")).kind(),
            ErrorKind::ObjectNotFound
        );
        assert_eq!(
            map_store_error(not_found(), "b", None).kind(),
            ErrorKind::BucketNotFound
        );

        let denied = object_store::Error::PermissionDenied {
            path: "k".to_string(),
            source: "forbidden".into(),
        };
        assert_eq!(map_store_error(denied, "b", Some("k")).kind(), ErrorKind::Connection);

        let generic = object_store::Error::Generic {
            store: "GCS",
            source: "quota exceeded".into(),
        };
        assert_eq!(map_store_error(generic, "b", Some("k")).kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_write_attributes() {
        let options = WriteOptions::default()
            .with_content_type("application/json")
            .with_metadata("owner", "etl");
        let attributes = write_attributes(&options);
        assert_eq!(attributes.len(), 2);
        assert_eq!(
            attributes
                .get(&Attribute::ContentType)
                .map(|v| v.to_string())
                .as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_new_rejects_other_provider() {
        let err = GcsClient::new(&StorageConfig::aws()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_scenario_write_read_list_delete() {
        let client = memory_client(&["b"]);
        let options = WriteOptions::default().with_content_type("application/json");
        client
            .write(Bytes::from_static(br#"{"x":1}"#), "b", "k", &options)
            .await
            .unwrap();

        assert_eq!(client.read("b", "k").await.unwrap(), Bytes::from_static(br#"{"x":1}"#));
        assert_eq!(client.list_objects("b", "", None).await.unwrap(), vec!["k".to_string()]);
        assert_eq!(
            client.head_object("b", "k").await.unwrap().content_type.as_deref(),
            Some("application/json")
        );

        client.delete_object("b", "k").await.unwrap();
        let err = client.read("b", "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
    }

    #[tokio::test]
    async fn test_list_objects_raw_prefix() {
        let client = memory_client(&["b"]);
        put(&client, "b", "logs/2024-01.txt", b"a").await;
        put(&client, "b", "logs/2024-02.txt", b"bb").await;
        put(&client, "b", "logs/2023-12.txt", b"c").await;
        put(&client, "b", "logs2/other.txt", b"d").await;
        put(&client, "b", "data/x.csv", b"e").await;

        let keys = client.list_objects("b", "logs/2024", None).await.unwrap();
        assert_eq!(
            keys,
            vec!["logs/2024-01.txt".to_string(), "logs/2024-02.txt".to_string()]
        );

        let keys: HashSet<String> = client
            .list_objects("b", "logs", None)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(!keys.contains("data/x.csv"));

        let sized = client
            .list_objects_with_size("b", "logs/2024-02", None)
            .await
            .unwrap();
        assert_eq!(sized.len(), 1);
        assert_eq!(sized[0].size, 2);
    }

    #[tokio::test]
    async fn test_list_objects_is_idempotent_and_bounded() {
        let client = memory_client(&["b"]);
        for path in ["p/1", "p/2", "p/3"] {
            put(&client, "b", path, b"x").await;
        }

        let first = client.list_objects("b", "p/", None).await.unwrap();
        let second = client.list_objects("b", "p/", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);

        assert_eq!(client.list_objects("b", "p/", Some(2)).await.unwrap().len(), 2);
        assert!(client.list_objects("b", "p/", Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_bucket_and_object() {
        let client = memory_client(&["b"]);

        let err = client.read("missing", "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);

        let err = client.read("b", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);

        let err = client.read("", "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);

        let err = client.read("b", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_copy_preserves_content_and_type() {
        let client = memory_client(&["src", "dst"]);
        let options = WriteOptions::default().with_content_type("text/csv");
        client
            .write(Bytes::from_static(b"a,b\n"), "src", "in.csv", &options)
            .await
            .unwrap();

        client.copy("src", "src", "in.csv", Some("copy.csv")).await.unwrap();
        client.copy("src", "dst", "in.csv", None).await.unwrap();

        for (bucket, path) in [("src", "copy.csv"), ("dst", "in.csv")] {
            assert_eq!(
                client.read(bucket, path).await.unwrap(),
                Bytes::from_static(b"a,b\n")
            );
            let info = client.head_object(bucket, path).await.unwrap();
            assert_eq!(info.content_type.as_deref(), Some("text/csv"));
        }
    }

    #[tokio::test]
    async fn test_copy_onto_itself() {
        let client = memory_client(&["b"]);
        let options = WriteOptions::default().with_content_type("text/plain");
        client
            .write(Bytes::from_static(b"same"), "b", "k", &options)
            .await
            .unwrap();

        client.copy("b", "b", "k", None).await.unwrap();
        assert_eq!(client.read("b", "k").await.unwrap(), Bytes::from_static(b"same"));
        assert_eq!(
            client.head_object("b", "k").await.unwrap().content_type.as_deref(),
            Some("text/plain")
        );
    }

    #[tokio::test]
    async fn test_copy_errors() {
        let client = memory_client(&["b"]);
        let err = client.copy("b", "b", "missing", Some("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);

        put(&client, "b", "k", b"x").await;
        let err = client.copy("b", "nope", "k", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
    }

    #[tokio::test]
    async fn test_move_object() {
        let client = memory_client(&["b"]);
        put(&client, "b", "old", b"payload").await;

        client.move_object("b", "b", "old", Some("new")).await.unwrap();

        assert_eq!(client.read("b", "new").await.unwrap(), Bytes::from_static(b"payload"));
        let err = client.read("b", "old").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
    }

    #[tokio::test]
    async fn test_delete_objects() {
        let client = memory_client(&["b"]);
        put(&client, "b", "a", b"1").await;
        put(&client, "b", "b", b"2").await;
        put(&client, "b", "c", b"3").await;

        let report = client
            .delete_objects("b", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(report.is_complete());
        let deleted: HashSet<String> = report.deleted.into_iter().collect();
        assert_eq!(deleted, HashSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(client.list_objects("b", "", None).await.unwrap(), vec!["c".to_string()]);

        let report = client
            .delete_objects("b", &["".to_string(), "/c".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(report.deleted, vec!["c".to_string()]);
        let failed: HashSet<String> = report.failed.into_iter().map(|f| f.path).collect();
        assert_eq!(failed, HashSet::from(["".to_string(), "/c".to_string()]));
        assert!(client.list_objects("b", "", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_objects_only_invalid_keys() {
        let client = memory_client(&["b"]);
        put(&client, "b", "keep", b"1").await;

        let report = client
            .delete_objects("b", &["a//b".to_string()])
            .await
            .unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "a//b");
        assert_eq!(client.list_objects("b", "", None).await.unwrap(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_are_stored_verbatim() {
        let client = memory_client(&["b"]);
        put(&client, "b", "report~v2.csv", b"1").await;
        put(&client, "b", "50%off.txt", b"2").await;
        put(&client, "b", "dir/na me+1.txt", b"3").await;

        let keys: HashSet<String> = client
            .list_objects("b", "", None)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            keys,
            HashSet::from([
                "report~v2.csv".to_string(),
                "50%off.txt".to_string(),
                "dir/na me+1.txt".to_string(),
            ])
        );
        assert_eq!(
            client.list_objects("b", "report~", None).await.unwrap(),
            vec!["report~v2.csv".to_string()]
        );
        assert_eq!(
            client.list_objects("b", "dir/na me", None).await.unwrap(),
            vec!["dir/na me+1.txt".to_string()]
        );
        assert_eq!(
            client.read("b", "50%off.txt").await.unwrap(),
            Bytes::from_static(b"2")
        );
        assert_eq!(client.head_object("b", "report~v2.csv").await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_unaddressable_keys_are_rejected() {
        let client = memory_client(&["b"]);
        for key in ["a//b.txt", "dir/", "/leading.txt", "a/../b", "."] {
            let err = client
                .write(Bytes::from_static(b"x"), "b", key, &WriteOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "key {:?}", key);
        }
        assert!(client.list_objects("b", "", None).await.unwrap().is_empty());

        let err = client.read("b", "a//b.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let client = memory_client(&["b"]);
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.txt");
        tokio::fs::write(&source, b"file contents").await.unwrap();

        client
            .upload("b", &source, Some("remote.txt"), &TransferConfig::default())
            .await
            .unwrap();
        assert_eq!(
            client.read("b", "remote.txt").await.unwrap(),
            Bytes::from_static(b"file contents")
        );

        let target = dir.path().join("target.txt");
        client
            .download("b", "remote.txt", &target, &TransferConfig::default())
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"file contents");
    }

    #[tokio::test]
    async fn test_upload_defaults_remote_path_to_local_path() {
        let client = memory_client(&["b"]);
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("data.csv");
        tokio::fs::write(&source, b"1,2").await.unwrap();

        client
            .upload("b", &source, None, &TransferConfig::default())
            .await
            .unwrap();

        let expected = source.to_string_lossy().trim_start_matches('/').to_string();
        assert_eq!(client.list_objects("b", "", None).await.unwrap(), vec![expected]);
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let client = memory_client(&["b"]);
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("large.bin");
        let data: Vec<u8> = (0..(12 * 1024 * 1024)).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&source, &data).await.unwrap();

        let transfer = TransferConfig {
            max_concurrency: 2,
            ..TransferConfig::default()
        };
        client
            .upload("b", &source, Some("large.bin"), &transfer)
            .await
            .unwrap();

        let read = client.read("b", "large.bin").await.unwrap();
        assert_eq!(read.len(), data.len());
        assert_eq!(&read[..], &data[..]);
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let client = memory_client(&["b"]);
        let dir = TempDir::new().unwrap();

        let err = client
            .upload("b", &dir.path().join("missing"), None, &TransferConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalFileNotFound);

        let source = dir.path().join("present");
        tokio::fs::write(&source, b"x").await.unwrap();
        let err = client
            .upload("missing", &source, Some("k"), &TransferConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
    }

    #[tokio::test]
    async fn test_download_errors() {
        let client = memory_client(&["b"]);
        put(&client, "b", "k", b"x").await;
        let dir = TempDir::new().unwrap();

        let err = client
            .download("b", "k", &dir.path().join("no/such/dir"), &TransferConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationPath);

        let err = client
            .download("b", "missing", &dir.path().join("out"), &TransferConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
    }

    #[tokio::test]
    async fn test_list_buckets_requires_project_and_token() {
        let client = memory_client(&["b"]);
        let err = client.list_buckets().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = client.validate_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_stores_are_cached_per_bucket() {
        let client = memory_client(&["a", "b"]);
        put(&client, "a", "k", b"1").await;
        put(&client, "b", "k", b"2").await;
        put(&client, "a", "k2", b"3").await;

        assert_eq!(client.stores.len(), 2);
        assert_eq!(client.read("a", "k").await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(client.read("b", "k").await.unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_bucket_list_page_deserialization() {
        let page: BucketListPage = serde_json::from_value(serde_json::json!({
            "kind": "storage#buckets",
            "items": [{"name": "one", "location": "EU"}, {"name": "two"}],
            "nextPageToken": "abc"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "one");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: BucketListPage = serde_json::from_value(Value::Object(Map::new())).unwrap();
        assert!(empty.items.is_empty());
    }
}
