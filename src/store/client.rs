use super::ObjectStore;
use crate::models::ObjectStoreSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, Client as S3Client};

/// S3-compatible bucket (Aliyun OSS, R2, MinIO, AWS).
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(settings: &ObjectStoreSettings) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "promptstudio-sync",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()));
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Ok(Self {
            client: S3Client::new(&config),
            bucket: settings.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        tracing::debug!("Uploading {} ({} bytes)", key, data.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to upload {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    tracing::debug!("Object {} not found", key);
                    return Ok(None);
                }
                return Err(Error::ObjectStore(format!("Failed to read {}: {}", key, e)));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to read body of {}: {}", key, e)))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to delete {}: {}", key, e)))?;
        Ok(())
    }
}
