//! S3 driver for state storage

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use chrono::{DateTime, Utc};

use crate::driver::{StorageConfig, StorageDriver, StorageError, StorageResult, StorageVersion};

/// S3-compatible object storage driver
pub struct S3Driver {
    /// S3 client
    client: Client,
    /// Bucket name
    bucket: String,
    /// Prefix prepended to every key
    bucket_path: String,
    /// Server-side encryption algorithm (e.g., "AES256"), if any
    server_side_encryption: Option<String>,
}

impl S3Driver {
    /// Default region when none is configured
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Create a new S3Driver from configuration
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let bucket = config.require_string("bucket")?.to_string();
        let bucket_path = config.get_string("bucket_path").unwrap_or("").to_string();
        let region = config
            .get_string("region")
            .unwrap_or(Self::DEFAULT_REGION)
            .to_string();
        let endpoint = config.get_string("endpoint").map(normalize_endpoint);
        let server_side_encryption = config
            .get_string("server_side_encryption")
            .map(str::to_string);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region));

        match (
            config.get_string("access_key_id"),
            config.get_string("secret_access_key"),
        ) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(
                    access_key,
                    secret_key,
                    config.get_string("session_token").map(str::to_string),
                    None,
                    "terrace-source",
                );
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::configuration(
                    "access_key_id and secret_access_key must be set together",
                ));
            }
        }

        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            // minio and ceph default to path-style addressing
            let path_style = config.get_bool_or("use_path_style", true);
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(path_style);
        }

        Ok(Self {
            client: Client::from_conf(s3_config.build()),
            bucket,
            bucket_path,
            server_side_encryption,
        })
    }

    /// Full object key including the configured prefix
    fn object_key(&self, key: &str) -> String {
        join_key(&self.bucket_path, key)
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn upload(&self, key: &str, content: Vec<u8>) -> StorageResult<StorageVersion> {
        let object_key = self.object_key(key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(content))
            .content_type("application/json");

        if let Some(ref sse) = self.server_side_encryption {
            request = request.server_side_encryption(ServerSideEncryption::from(sse.as_str()));
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::write(&object_key, e))?;

        log::debug!("Uploaded s3://{}/{}", self.bucket, object_key);

        // Token must match what later probes return
        let version = self.version(key).await?;
        if version.is_zero() {
            return Err(StorageError::write(
                &object_key,
                "object missing immediately after upload",
            ));
        }
        Ok(version)
    }

    async fn download(&self, key: &str) -> StorageResult<(Vec<u8>, StorageVersion)> {
        let object_key = self.object_key(key);

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let version = object_version(
                    output.version_id(),
                    output.e_tag(),
                    output.last_modified().and_then(to_chrono),
                );
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::read(&object_key, e))?;
                Ok((body.into_bytes().to_vec(), version))
            }
            Err(err) => {
                if is_not_found_error(&err) {
                    Err(StorageError::not_found(object_key))
                } else {
                    Err(StorageError::read(&object_key, err))
                }
            }
        }
    }

    async fn version(&self, key: &str) -> StorageResult<StorageVersion> {
        let object_key = self.object_key(key);

        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(object_version(
                output.version_id(),
                output.e_tag(),
                output.last_modified().and_then(to_chrono),
            )),
            Err(err) => {
                if is_not_found_error(&err) {
                    Ok(StorageVersion::zero())
                } else {
                    Err(StorageError::read(&object_key, err))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let object_key = self.object_key(key);

        // S3 reports success when deleting a missing key
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::write(&object_key, e))?;

        Ok(())
    }
}

/// Build a version from object metadata.
///
/// Prefers the bucket's VersionId, then the ETag, then the modification time.
/// Unversioned buckets report the literal VersionId "null".
fn object_version(
    version_id: Option<&str>,
    e_tag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
) -> StorageVersion {
    let token = match (version_id, e_tag) {
        (Some(id), _) if !id.is_empty() && id != "null" => id.to_string(),
        (_, Some(tag)) if !tag.is_empty() => tag.trim_matches('"').to_string(),
        _ => last_modified.map(|t| t.to_rfc3339()).unwrap_or_default(),
    };
    StorageVersion::new(token, last_modified)
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

/// Join a bucket prefix and a key with exactly one separator
fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key.trim_start_matches('/'))
    }
}

/// Accept bare host names as endpoints, e.g. "minio.local:9000"
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Check if an S3 error is a "not found" error
fn is_not_found_error<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    // Check the raw HTTP response status
    if let Some(raw) = err.raw_response() {
        return raw.status().as_u16() == 404;
    }
    false
}
