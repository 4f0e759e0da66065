//! services/api/src/adapters/blob_s3.rs
//!
//! Stores receipt images in an S3-compatible bucket (AWS S3, Cloudflare R2,
//! MinIO) and mints presigned read URLs for the extraction service.
//! It implements the `BlobStore` port from the `core` crate.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use receipt_pipeline_core::ports::{BlobStore, PortError, PortResult};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Builds the S3 client from the service configuration. Static keys are used
    /// when both are configured; otherwise the default AWS provider chain applies.
    pub async fn from_config(config: &Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()));
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key), Some(secret)) = (&config.s3_access_key_id, &config.s3_secret_access_key) {
            let credentials = Credentials::new(key, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.s3_endpoint.is_some())
            .build();

        info!(bucket = %config.s3_bucket, "Blob store client ready");
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
        }
    }
}

/// `receipts/<owner>/<uuid>.<ext>`; the original filename is only used for its extension.
fn object_key(owner_id: &str, filename: &str) -> String {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    let owner: String = owner_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("receipts/{}/{}.{}", owner, Uuid::new_v4(), extension)
}

//=========================================================================================
// `BlobStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> PortResult<String> {
        let key = object_key(owner_id, filename);
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(Bytes::from(bytes)))
            .send()
            .await
            .map_err(|e| {
                error!(key = %key, error = ?e, "Image upload failed");
                PortError::Unexpected(format!("image upload failed: {}", e))
            })?;
        debug!(key = %key, size, "Image stored");
        Ok(key)
    }

    async fn read_url(&self, image_ref: &str, ttl: Duration) -> PortResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| PortError::Unexpected(format!("invalid presign ttl: {}", e)))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(image_ref)
            .presigned(presigning)
            .await
            .map_err(|e| PortError::Unexpected(format!("could not presign {}: {}", image_ref, e)))?;
        Ok(request.uri().to_string())
    }
}
