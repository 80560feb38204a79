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

use super::config::{AddressingStyle, ProviderType, RetryMode, S3Settings, StorageConfig, TlsVerification};
use super::local::{
    check_bucket, check_download_destination, check_object_path, check_upload_source,
    create_destination, destination_write_error, part_ranges, read_part,
};
use super::provider::{default_remote_path, CloudStorage, DeleteReport, FailedDelete, ObjectInfo};
use super::transfer::{TransferConfig, WriteOptions};
use crate::error::{ConnectorError, ConnectorResult, ErrorKind};
use crate::util::retry::retry_transient;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{AppName, BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, MetadataDirective, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Maximum number of keys in a single `DeleteObjects` request
const DELETE_BATCH_SIZE: usize = 1000;

/// Maximum number of parts in a multipart upload
const MAX_UPLOAD_PARTS: u64 = 10_000;

/// How an S3 failure maps onto the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    BucketNotFound,
    ObjectNotFound,
    Connection,
    Unexpected,
}

fn classify(code: Option<&str>, status: Option<u16>) -> FailureClass {
    match code {
        Some("NoSuchBucket" | "InvalidBucketName") => FailureClass::BucketNotFound,
        Some("NoSuchKey" | "NotFound") => FailureClass::ObjectNotFound,
        Some(
            "InvalidAccessKeyId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "InvalidToken"
            | "AccessDenied",
        ) => FailureClass::Connection,
        _ if status == Some(404) => FailureClass::ObjectNotFound,
        _ => FailureClass::Unexpected,
    }
}

/// Translate an SDK failure into a [`ConnectorError`].
///
/// `path` is `None` for bucket-level calls, in which case a 404 means the
/// bucket itself is missing.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, bucket: &str, path: Option<&str>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) => {
            return ConnectorError::Connection(format!(
                "S3 request timed out: {}",
                DisplayErrorContext(&err)
            ))
        }
        SdkError::DispatchFailure(_) => {
            return ConnectorError::Connection(format!(
                "S3 request could not be dispatched: {}",
                DisplayErrorContext(&err)
            ))
        }
        _ => {}
    }

    let status = err.raw_response().map(|response| response.status().as_u16());
    match (classify(err.code(), status), path) {
        (FailureClass::BucketNotFound, _) | (FailureClass::ObjectNotFound, None) => {
            ConnectorError::bucket_not_found(bucket)
        }
        (FailureClass::ObjectNotFound, Some(path)) => ConnectorError::object_not_found(bucket, path),
        (FailureClass::Connection, _) => ConnectorError::Connection(format!(
            "S3 rejected the credentials: {}",
            DisplayErrorContext(&err)
        )),
        (FailureClass::Unexpected, _) => {
            ConnectorError::Unexpected(format!("S3 error: {}", DisplayErrorContext(&err)))
        }
    }
}

/// Bytes left unescaped in a copy source: RFC 3986 unreserved plus `/`
const COPY_SOURCE_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode `bucket/key` for the `x-amz-copy-source` header.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE_ENCODE))
}

/// Translate a `CopyObject` failure.
///
/// The source was checked before the copy, so a missing key still refers to
/// the source while a missing bucket is the destination.
fn map_copy_error<E>(
    err: SdkError<E, HttpResponse>,
    src_bucket: &str,
    src_path: &str,
    dst_bucket: &str,
) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    match classify(err.code(), status) {
        FailureClass::ObjectNotFound => ConnectorError::object_not_found(src_bucket, src_path),
        _ => map_sdk_error(err, dst_bucket, None),
    }
}

fn to_chrono(timestamp: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    timestamp.and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
}

/// Storage client for AWS S3 and S3-compatible endpoints
#[derive(Clone, Debug)]
pub struct S3Client {
    client: Client,
    settings: S3Settings,
}

impl S3Client {
    /// Create a new S3 client from a storage configuration.
    ///
    /// No request is sent: use [`CloudStorage::validate_connection`] to check
    /// credentials and connectivity.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options violate the S3 schema or
    /// the configuration is for another provider.
    pub async fn new(config: &StorageConfig) -> ConnectorResult<Self> {
        if config.provider != ProviderType::Aws {
            return Err(ConnectorError::config(
                "type",
                format!("must be aws for an S3 client, got {}", config.provider.as_str()),
            ));
        }
        let settings = S3Settings::from_options(&config.options)?;
        Self::from_settings(settings).await
    }

    /// Create a new S3 client from validated settings.
    pub async fn from_settings(settings: S3Settings) -> ConnectorResult<Self> {
        let advanced = &settings.advanced;

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs_f64(advanced.connect_timeout))
            .read_timeout(Duration::from_secs_f64(advanced.read_timeout))
            .build();
        let mut retry_config = match advanced.retries.mode {
            RetryMode::Adaptive => RetryConfig::adaptive(),
            RetryMode::Standard | RetryMode::Legacy => RetryConfig::standard(),
        };
        if let Some(max_attempts) = advanced.retries.max_attempts {
            retry_config = retry_config.with_max_attempts(max_attempts);
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .timeout_config(timeout_config)
            .retry_config(retry_config);
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::from_keys(
                access_key_id,
                secret_access_key,
                settings.session_token.clone(),
            ));
        }
        if let Some(extra) = &advanced.user_agent_extra {
            let app_name = AppName::new(extra.clone())
                .map_err(|e| ConnectorError::config("advanced.user_agent_extra", e.to_string()))?;
            loader = loader.app_name(app_name);
        }
        match &settings.verify_tls {
            TlsVerification::Enabled(true) => {}
            TlsVerification::Enabled(false) => {
                warn!("verify_tls=false is not supported, certificates are still verified")
            }
            TlsVerification::CaBundle(path) => warn!(
                "Custom CA bundle path={} is not supported, using the system trust store",
                path
            ),
        }
        let sdk_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(advanced.s3.addressing_style == AddressingStyle::Path)
            .accelerate(advanced.s3.use_accelerate_endpoint);
        if let Some(endpoint) = settings.endpoint_url() {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(s3_config_builder.build());

        debug!(
            "Created S3 client, region={}, endpoint={:?}",
            settings.region,
            settings.endpoint_url()
        );
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &S3Settings {
        &self.settings
    }

    /// The underlying SDK client, for calls outside the uniform contract.
    pub fn sdk_client(&self) -> &Client {
        &self.client
    }

    async fn ensure_bucket(&self, bucket: &str) -> ConnectorResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| map_sdk_error(e, bucket, None))
    }

    /// One quiet `DeleteObjects` request.
    async fn delete_chunk(
        &self,
        bucket: &str,
        chunk: &[(String, ObjectIdentifier)],
    ) -> ConnectorResult<DeleteObjectsOutput> {
        let delete = Delete::builder()
            .set_objects(Some(chunk.iter().map(|(_, id)| id.clone()).collect()))
            .quiet(true)
            .build()
            .map_err(|e| ConnectorError::InvalidArgument(e.to_string()))?;
        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, None))
    }

    /// `HeadObject`, telling a missing bucket apart from a missing key.
    async fn head_raw(&self, bucket: &str, path: &str) -> ConnectorResult<HeadObjectOutput> {
        match self.client.head_object().bucket(bucket).key(path).send().await {
            Ok(output) => Ok(output),
            Err(e) => {
                let error = map_sdk_error(e, bucket, Some(path));
                if error.kind() == ErrorKind::ObjectNotFound {
                    self.ensure_bucket(bucket).await?;
                }
                Err(error)
            }
        }
    }

    async fn upload_single(&self, bucket: &str, key: &str, local_path: &Path) -> ConnectorResult<()> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            ConnectorError::Unexpected(format!(
                "Failed to read '{}': {}",
                local_path.display(),
                DisplayErrorContext(&e)
            ))
        })?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))?;
        Ok(())
    }

    async fn upload_multipart(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        size: u64,
        transfer: &TransferConfig,
    ) -> ConnectorResult<()> {
        let chunk_size = transfer.chunk_size.max(size.div_ceil(MAX_UPLOAD_PARTS));
        let concurrency = transfer
            .effective_concurrency()
            .min(self.settings.advanced.max_pool_connections as usize)
            .max(1);

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ConnectorError::Unexpected("S3 returned no upload id".to_string()))?
            .to_string();

        let parts = part_ranges(size, chunk_size);
        info!(
            "Uploading file={} to bucket={} key={} in part_count={} parts, concurrency={}",
            local_path.display(),
            bucket,
            key,
            parts.len(),
            concurrency
        );

        let client = &self.client;
        let upload_id_ref = upload_id.as_str();
        let uploaded = stream::iter(parts)
            .map(|(number, offset, len)| async move {
                let body = read_part(local_path, offset, len).await?;
                let output = client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id_ref)
                    .part_number(number)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, bucket, Some(key)))?;
                Ok::<_, ConnectorError>(
                    CompletedPart::builder()
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .part_number(number)
                        .build(),
                )
            })
            .buffer_unordered(concurrency)
            .try_collect::<Vec<CompletedPart>>()
            .await;

        let completed = match uploaded {
            Ok(mut completed) => {
                completed.sort_by_key(|part| part.part_number());
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(completed))
                            .build(),
                    )
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| map_sdk_error(e, bucket, Some(key)))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = completed {
            warn!(
                "Aborting multipart upload to bucket={} key={}: {}",
                bucket, key, e
            );
            if let Err(abort_error) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    "Failed to abort multipart upload_id={}: {}",
                    upload_id,
                    DisplayErrorContext(&abort_error)
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn download_once(
        &self,
        bucket: &str,
        remote_path: &str,
        local_path: &Path,
        transfer: &TransferConfig,
    ) -> ConnectorResult<u64> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(remote_path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(remote_path)))?;

        let mut body = output.body;
        let mut writer = create_destination(local_path, transfer.io_chunk_size).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| {
            ConnectorError::Connection(format!(
                "Failed to stream s3://{}/{}: {}",
                bucket,
                remote_path,
                DisplayErrorContext(&e)
            ))
        })? {
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
impl CloudStorage for S3Client {
    fn provider(&self) -> ProviderType {
        ProviderType::Aws
    }

    async fn validate_connection(&self) -> ConnectorResult<()> {
        self.client.list_buckets().send().await.map_err(|e| {
            ConnectorError::Connection(format!(
                "Failed to validate S3 connection: {}",
                DisplayErrorContext(&e)
            ))
        })?;
        Ok(())
    }

    async fn list_buckets(&self) -> ConnectorResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "", None))?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    async fn list_objects_with_size(
        &self,
        bucket: &str,
        prefix: &str,
        max_objects: Option<usize>,
    ) -> ConnectorResult<Vec<ObjectInfo>> {
        check_bucket(bucket)?;
        let limit = max_objects.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix((!prefix.is_empty()).then(|| prefix.to_string()))
            .max_keys(limit.min(1000) as i32)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        'pages: while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_sdk_error(e, bucket, None))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectInfo {
                    path: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_chrono(object.last_modified()),
                    content_type: None,
                });
                if objects.len() >= limit {
                    break 'pages;
                }
            }
        }

        info!(
            "Listed count={} objects in bucket={} with prefix={}",
            objects.len(),
            bucket,
            prefix
        );
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, path: &str) -> ConnectorResult<ObjectInfo> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        let output = self.head_raw(bucket, path).await?;
        Ok(ObjectInfo {
            path: path.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_chrono(output.last_modified()),
            content_type: output.content_type().map(str::to_string),
        })
    }

    async fn read(&self, bucket: &str, path: &str) -> ConnectorResult<Bytes> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(path)))?;
        let data = output.body.collect().await.map_err(|e| {
            ConnectorError::Connection(format!(
                "Failed to read s3://{}/{}: {}",
                bucket,
                path,
                DisplayErrorContext(&e)
            ))
        })?;
        Ok(data.into_bytes())
    }

    async fn write(
        &self,
        data: Bytes,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> ConnectorResult<()> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        let size = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type.clone())
            .set_content_encoding(options.content_encoding.clone())
            .set_content_disposition(options.content_disposition.clone())
            .set_cache_control(options.cache_control.clone())
            .set_content_language(options.content_language.clone())
            .set_metadata((!options.metadata.is_empty()).then(|| options.metadata.clone()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(path)))?;
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
        let key = default_remote_path(local_path, remote_path);
        check_object_path(&key)?;

        if transfer.use_multipart(size) {
            self.upload_multipart(bucket, &key, local_path, size, transfer)
                .await?;
        } else {
            self.upload_single(bucket, &key, local_path).await?;
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
        check_bucket(bucket)?;
        check_object_path(remote_path)?;
        check_download_destination(local_path).await?;

        let size = retry_transient(
            transfer.download_attempt_count.saturating_sub(1),
            "s3_download",
            || self.download_once(bucket, remote_path, local_path, transfer),
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
        check_bucket(src_bucket)?;
        check_bucket(dst_bucket)?;
        check_object_path(src_path)?;
        let target = dst_path.unwrap_or(src_path);
        check_object_path(target)?;

        let source = self.head_raw(src_bucket, src_path).await?;
        let mut request = self
            .client
            .copy_object()
            .copy_source(copy_source(src_bucket, src_path))
            .bucket(dst_bucket)
            .key(target)
            .set_content_type(source.content_type().map(str::to_string));
        if src_bucket == dst_bucket && src_path == target {
            // S3 rejects a plain self-copy, replacing the metadata makes it a rewrite
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(source.metadata().cloned())
                .set_content_encoding(source.content_encoding().map(str::to_string))
                .set_content_disposition(source.content_disposition().map(str::to_string))
                .set_cache_control(source.cache_control().map(str::to_string))
                .set_content_language(source.content_language().map(str::to_string));
        }
        request
            .send()
            .await
            .map_err(|e| map_copy_error(e, src_bucket, src_path, dst_bucket))?;

        debug!(
            "Copied s3://{}/{} to s3://{}/{}",
            src_bucket, src_path, dst_bucket, target
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> ConnectorResult<()> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(path)))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, paths: &[String]) -> ConnectorResult<DeleteReport> {
        check_bucket(bucket)?;

        let mut report = DeleteReport::default();
        let mut identifiers = Vec::with_capacity(paths.len());
        for path in paths {
            let identifier = check_object_path(path).and_then(|_| {
                ObjectIdentifier::builder()
                    .key(path)
                    .build()
                    .map_err(|e| ConnectorError::InvalidArgument(e.to_string()))
            });
            match identifier {
                Ok(identifier) => identifiers.push((path.clone(), identifier)),
                Err(e) => report.failed.push(FailedDelete {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        for chunk in identifiers.chunks(DELETE_BATCH_SIZE) {
            let keys: Vec<&String> = chunk.iter().map(|(path, _)| path).collect();
            let output = match self.delete_chunk(bucket, chunk).await {
                Ok(output) => output,
                Err(e) if e.kind() == ErrorKind::BucketNotFound => return Err(e),
                Err(e) => {
                    warn!(
                        "Bulk delete of count={} keys in bucket={} failed: {}",
                        keys.len(),
                        bucket,
                        e
                    );
                    let reason = e.to_string();
                    report.failed.extend(keys.into_iter().map(|path| FailedDelete {
                        path: path.clone(),
                        reason: reason.clone(),
                    }));
                    continue;
                }
            };

            let failed: Vec<FailedDelete> = output
                .errors()
                .iter()
                .map(|error| FailedDelete {
                    path: error.key().unwrap_or_default().to_string(),
                    reason: format!(
                        "{}: {}",
                        error.code().unwrap_or("Unknown"),
                        error.message().unwrap_or_default()
                    ),
                })
                .collect();
            report.deleted.extend(
                keys.into_iter()
                    .filter(|path| !failed.iter().any(|f| &f.path == *path))
                    .cloned(),
            );
            report.failed.extend(failed);
        }

        info!(
            "Deleted count={} objects from bucket={}, failed={}",
            report.deleted.len(),
            bucket,
            report.failed.len()
        );
        Ok(report)
    }
}
