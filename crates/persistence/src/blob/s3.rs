//! AWS S3 blob engine.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{BlobApi, BlobError};

/// S3-backed implementation of [`BlobApi`], scoped to one bucket.
#[derive(Debug, Clone)]
pub struct S3Blob {
    client: Client,
    bucket: String,
}

impl S3Blob {
    /// Creates an engine over an already-loaded SDK config.
    pub fn from_sdk_config(config: &SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::new(config),
            bucket: bucket.into(),
        }
    }

    /// Loads the default SDK config, optionally pinning a region.
    pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        loader.load().await
    }
}

#[async_trait]
impl BlobApi for S3Blob {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => {
                let bytes = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| {
                        BlobError::Internal(format!("failed to collect object body: {e}"))
                    })?
                    .into_bytes()
                    .to_vec();
                Ok(Some(bytes))
            }
            Err(err) => {
                let mapped = map_sdk_error(err);
                if matches!(mapped, BlobError::NotFound { .. }) {
                    Ok(None)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError> {
        let mut removed = 0;
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let out = req.send().await.map_err(map_sdk_error)?;

            for item in out.contents() {
                if let Some(key) = item.key() {
                    self.client
                        .delete_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(map_sdk_error)?;
                    removed += 1;
                }
            }

            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(removed)
    }
}

fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> BlobError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let fallback = format!("{err:?}");

    match err {
        aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
            let code = service_err.err().code().unwrap_or("Unknown");
            let message = service_err
                .err()
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| fallback.clone());
            match code {
                "NoSuchKey" | "NotFound" | "NoSuchBucket" => BlobError::NotFound {
                    key: message,
                },
                "SlowDown" | "Throttling" | "ThrottlingException" => {
                    BlobError::Unavailable(message)
                }
                _ => BlobError::Internal(message),
            }
        }
        aws_sdk_s3::error::SdkError::TimeoutError(_) => BlobError::Unavailable(fallback),
        aws_sdk_s3::error::SdkError::DispatchFailure(_) => BlobError::Unavailable(fallback),
        _ => BlobError::Internal(fallback),
    }
}
