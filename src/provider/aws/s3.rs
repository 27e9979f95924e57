//! # S3 Object Store
//!
//! [`ObjectStore`] backed by Amazon S3.

use crate::provider::{ObjectStore, StoreError};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info_span, Instrument};

pub struct S3ObjectStore {
    client: S3Client,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore").finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: S3Client::new(sdk_config),
        }
    }
}

fn transport_error(
    operation: &'static str,
    bucket: &str,
    key: &str,
    err: &dyn std::error::Error,
) -> StoreError {
    StoreError::Transport {
        operation,
        bucket: bucket.to_string(),
        key: key.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let span = info_span!("aws.s3.get_object", bucket = %bucket, key = %key);
        async move {
            let output = match self.client.get_object().bucket(bucket).key(key).send().await {
                Ok(output) => output,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                    debug!("Object does not exist");
                    return Ok(None);
                }
                Err(e) => return Err(transport_error("GetObject", bucket, key, &e)),
            };

            let body = output.body.collect().await.map_err(|e| StoreError::Body {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;
            Ok(Some(body.into_bytes().to_vec()))
        }
        .instrument(span)
        .await
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| transport_error("PutObject", bucket, key, &e))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport_error("DeleteObject", bucket, key, &e))?;
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(transport_error("HeadObject", bucket, key, &e)),
        }
    }
}
