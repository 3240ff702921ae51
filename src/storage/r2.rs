//! Cloudflare R2 blob store
//!
//! R2 is S3-compatible, so we use aws-sdk-s3 with custom endpoint configuration.
//!
//! ## Layout
//! ```text
//! {bucket}/
//! └── {key_prefix}/                   # "previews" by default
//!     └── {YYYY}/{MM}/{DD}/
//!         └── {uuid}.png | .jpg
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::SdkError,
    presigning::PresigningConfig,
    primitives::ByteStream,
};
use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::config::StorageSettings;
use super::{public_url, BlobStore, PresignedUpload, StorageError, StoredObject};

/// Cloudflare R2 bucket
#[derive(Clone)]
pub struct R2Store {
    client: S3Client,
    bucket: String,
    public_url_prefix: Option<String>,
    key_prefix: String,
    presign_expiry: Duration,
}

impl R2Store {
    /// Create a new R2 store from settings
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        if settings.account_id.is_empty() && settings.endpoint_url.is_none() {
            return Err(StorageError::NotConfigured);
        }
        if settings.bucket_name.is_empty() {
            return Err(StorageError::NotConfigured);
        }

        // R2 endpoint format: https://{account_id}.r2.cloudflarestorage.com
        let endpoint = settings
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", settings.account_id));

        debug!(endpoint = %endpoint, bucket = %settings.bucket_name, "Creating R2 client");

        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "r2-static-credentials",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new("auto")) // R2 uses "auto" region
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(config),
            bucket: settings.bucket_name.clone(),
            public_url_prefix: settings.public_url_prefix.clone(),
            key_prefix: settings.key_prefix.clone(),
            presign_expiry: Duration::from_secs(settings.presign_expiry_secs),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Prefix under which previews are published
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn public_url(&self, key: &str) -> Option<String> {
        public_url(self.public_url_prefix.as_deref(), key)
    }
}

#[async_trait]
impl BlobStore for R2Store {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(format!("{:?}", e)))?;

        info!(key = %key, size = size, "Uploaded to R2");

        Ok(StoredObject {
            key: key.to_string(),
            size,
            content_type: content_type.to_string(),
            public_url: self.public_url(key),
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found_error(&e) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Download(format!("{:?}", e))
                }
            })?;

        let data = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download(format!("Failed to read body: {:?}", e)))?
            .into_bytes();

        debug!(key = %key, size = data.len(), "Downloaded from R2");
        Ok(data)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(format!("{:?}", e)))?;

        info!(key = %key, "Deleted from R2");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn presign_put(&self, key: &str, content_type: &str) -> Result<PresignedUpload, StorageError> {
        let presigning = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(format!("{:?}", e)))?;

        debug!(key = %key, expires_in_secs = self.presign_expiry.as_secs(), "Pre-signed upload URL");

        Ok(PresignedUpload {
            url: request.uri().to_string(),
            key: key.to_string(),
            expires_in_secs: self.presign_expiry.as_secs(),
        })
    }
}

/// Helper to check if an SDK error is a "not found" error
fn is_not_found_error<E: fmt::Debug>(err: &SdkError<E>) -> bool {
    let debug_str = format!("{:?}", err);
    debug_str.contains("NoSuchKey") || debug_str.contains("NotFound") || debug_str.contains("404")
}
