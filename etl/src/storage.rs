use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use common::{Error, Result};
use common::config::S3Settings;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    fn bucket(&self) -> &str;
}

// Implement for S3
pub struct S3Storage {
    bucket: String,
    client: S3Client,
}

impl S3Storage {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let body = Bytes::copy_from_slice(data);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) => Error::Storage(err.into_err().to_string()),
                _ => Error::Storage(e.to_string()),
            })?;

        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| match e {
                SdkError::ServiceError(err) => Error::Storage(err.into_err().to_string()),
                _ => Error::Storage(e.to_string()),
            })?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            continuation_token = response.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
