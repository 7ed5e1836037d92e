use super::{ObjectStore, StorageError};
use crate::config::settings::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
}

impl StorageService {
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.as_str(),
                secret_key.as_str(),
                None,
                None,
                "static",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            // MinIO and other S3-compatible stores need path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        info!("✅ S3 client ready (region {})", config.region);

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                _ => StorageError::Request {
                    operation: "get_object",
                    message: DisplayErrorContext(&e).to_string(),
                },
            })?;

        let mut reader = resp.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        debug!("Fetched {}/{} ({} bytes) to {}", bucket, key, written, dest.display());
        Ok(written)
    }

    async fn publish(&self, bucket: &str, key: &str, src: &Path) -> Result<(), StorageError> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        let content_type = mime_guess::from_path(src).first_or_octet_stream();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type.essence_str())
            .send()
            .await
            .map_err(|e| StorageError::Request {
                operation: "put_object",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("Published {} to {}/{}", src.display(), bucket, key);
        Ok(())
    }
}
