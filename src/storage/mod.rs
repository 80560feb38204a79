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

//! Cloud storage abstraction layer
//!
//! This module provides a uniform interface over object storage providers
//! (AWS S3 and S3-compatible endpoints, Google Cloud Storage).
//!
//! S3 goes through the AWS SDK, GCS through the `object_store` crate. Both
//! adapters validate their options against a schema before building a client
//! and translate provider failures into [`ConnectorError`](crate::error::ConnectorError).

pub mod config;
pub mod factory;
pub mod gcs;
mod local;
pub mod provider;
pub mod s3;
pub mod transfer;

// Public exports
pub use config::{GcsSettings, ProviderType, S3Settings, StorageConfig};
pub use factory::StorageClientFactory;
pub use gcs::GcsClient;
pub use provider::{CloudStorage, DeleteReport, FailedDelete, ObjectInfo};
pub use s3::S3Client;
pub use transfer::{TransferConfig, WriteOptions};
