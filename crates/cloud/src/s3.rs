//! S3-compatible [`ObjectStore`] backed by `aws-sdk-s3`.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncRead;

use crate::store::{ObjectStore, StorageError};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (e.g. a MinIO server). `None` uses AWS defaults.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the default provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl S3Config {
    /// Load settings from environment variables.
    ///
    /// | Env Var               | Default      |
    /// |-----------------------|--------------|
    /// | `S3_ENDPOINT`         | (AWS)        |
    /// | `S3_REGION`           | `us-east-1`  |
    /// | `S3_ACCESS_KEY`       | (provider)   |
    /// | `S3_SECRET_KEY`       | (provider)   |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with variables read through
    /// `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            endpoint: var("S3_ENDPOINT"),
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            access_key: var("S3_ACCESS_KEY"),
            secret_key: var("S3_SECRET_KEY"),
        }
    }
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from [`S3Config`]. Custom endpoints use path-style
    /// addressing, which MinIO requires.
    pub async fn connect(config: &S3Config) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .region(Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if let (Some(access), Some(secret)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "asec-static",
            ));
        }

        tracing::info!(endpoint = ?config.endpoint, region = %config.region, "S3 client configured");
        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| get_error(bucket, key, e))?;

        let bytes = write_body(response.body.into_async_read(), dest).await?;

        tracing::debug!(bucket, key, bytes, dest = %dest.display(), "Object downloaded");
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<(), StorageError> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| request_error(bucket, key, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| request_error(bucket, key, DisplayErrorContext(&e)))?;

        tracing::debug!(bucket, key, source = %source.display(), "Object uploaded");
        Ok(())
    }
}

// ---- private helpers ----

/// A missing key is [`StorageError::NotFound`]; everything else is a
/// request failure carrying the full error chain.
fn get_error<R>(bucket: &str, key: &str, err: SdkError<GetObjectError, R>) -> StorageError
where
    R: Debug + 'static,
{
    match &err {
        SdkError::ServiceError(service) if service.err().is_no_such_key() => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => request_error(bucket, key, DisplayErrorContext(&err)),
    }
}

/// Stream `body` into `dest`. A partially written file is removed when
/// the stream breaks off.
async fn write_body(body: impl AsyncRead, dest: &Path) -> Result<u64, StorageError> {
    let mut body = std::pin::pin!(body);
    let mut file = tokio::fs::File::create(dest).await?;
    match tokio::io::copy(&mut body, &mut file).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(file);
            if let Err(remove) = tokio::fs::remove_file(dest).await {
                tracing::warn!(dest = %dest.display(), error = %remove, "Failed to remove partial download");
            }
            Err(e.into())
        }
    }
}

fn request_error(bucket: &str, key: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Request {
        bucket: bucket.to_string(),
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use assert_matches::assert_matches;
    use aws_sdk_s3::types::error::NoSuchKey;
    use tokio::io::{AsyncReadExt, ReadBuf};

    use super::*;

    /// Fails every read, like a connection reset mid-transfer.
    struct Reset;

    impl AsyncRead for Reset {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    fn offline_store() -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        S3ObjectStore::new(Client::from_conf(config))
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = S3Config::from_lookup(|_| None);
        assert_eq!(config.endpoint, None);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.access_key, None);

        let vars: HashMap<&str, &str> = [
            ("S3_ENDPOINT", "http://minio:9000"),
            ("S3_REGION", "eu-central-1"),
            ("S3_ACCESS_KEY", ""),
        ]
        .into_iter()
        .collect();
        let config = S3Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(config.region, "eu-central-1");
        assert_eq!(config.access_key, None);
    }

    #[test]
    fn missing_key_maps_to_not_found() {
        let err: SdkError<GetObjectError, ()> =
            SdkError::service_error(GetObjectError::NoSuchKey(NoSuchKey::builder().build()), ());
        assert_matches!(
            get_error("artefacts", "a/b.scp", err),
            StorageError::NotFound { bucket, key } if bucket == "artefacts" && key == "a/b.scp"
        );
    }

    #[test]
    fn other_failures_are_request_errors() {
        let err: SdkError<GetObjectError, ()> = SdkError::timeout_error("read timed out");
        assert_matches!(
            get_error("artefacts", "a/b.scp", err),
            StorageError::Request { message, .. } if message.contains("read timed out")
        );
    }

    #[tokio::test]
    async fn body_is_written_to_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("disk.scp");

        let bytes = write_body(&b"flux"[..], &dest).await.unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read(&dest).unwrap(), b"flux");
    }

    #[tokio::test]
    async fn broken_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("disk.scp");

        let result = write_body((&b"partial"[..]).chain(Reset), &dest).await;
        assert_matches!(result, Err(StorageError::Io(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.img");

        assert_matches!(
            offline_store().put_object("output", "disk.img", &missing).await,
            Err(StorageError::Request { key, .. }) if key == "disk.img"
        );
    }
}
