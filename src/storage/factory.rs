use std::sync::Arc;

use super::config::{ProviderType, StorageConfig};
use super::gcs::GcsClient;
use super::provider::CloudStorage;
use super::s3::S3Client;
use crate::error::ConnectorResult;

/// Factory for creating storage clients
pub struct StorageClientFactory;

impl StorageClientFactory {
    /// Create a storage client from a configuration.
    ///
    /// The provider type selects the adapter: S3 for `aws`, object_store's
    /// GCS backend for `gcs`. No request is sent to the provider.
    ///
    /// # Arguments
    ///
    /// * `config` - The storage configuration specifying the provider type and options
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    /// * `Ok(Arc<dyn CloudStorage>)` - A thread-safe reference to the initialized client
    /// * `Err(ConnectorError)` - If the client cannot be created
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The options violate the provider's schema
    /// * Credentials options are inconsistent (e.g. an access key without its secret)
    pub async fn from_config(config: StorageConfig) -> ConnectorResult<Arc<dyn CloudStorage>> {
        match config.provider {
            ProviderType::Aws => Ok(Arc::new(S3Client::new(&config).await?)),
            ProviderType::Gcs => Ok(Arc::new(GcsClient::new(&config)?)),
        }
    }
}
