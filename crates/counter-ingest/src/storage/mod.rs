//! Object storage for raw reports that could not be loaded

use crate::error::ObjectStoreError;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

pub mod config;

pub use config::StorageConfig;

/// The two object store calls fallback persistence needs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Confirm the bucket exists and is accessible
    async fn head_bucket(&self) -> Result<(), ObjectStoreError>;

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing object store"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "counter-ingest",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        info!("Object store client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn head_bucket(&self) -> Result<(), ObjectStoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let status = err.raw_response().map(|response| response.status().as_u16());
                let not_found = err.as_service_error().is_some_and(|e| e.is_not_found());

                Err(match status {
                    Some(403) => ObjectStoreError::AccessDenied(self.bucket.clone()),
                    Some(404) => ObjectStoreError::BucketNotFound(self.bucket.clone()),
                    _ if not_found => ObjectStoreError::BucketNotFound(self.bucket.clone()),
                    _ => ObjectStoreError::Request(DisplayErrorContext(&err).to_string()),
                })
            }
        }
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ObjectStoreError> {
        let checksum = calculate_sha256(&body);
        debug!("Uploading {} bytes to s3://{}/{}", body.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Request(DisplayErrorContext(&err).to_string()))?;

        info!(checksum = %checksum, "Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

/// Hex-encoded SHA-256 of `data`
pub fn calculate_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
