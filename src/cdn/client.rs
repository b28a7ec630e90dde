use super::{CdnService, ObjectProperties};
use crate::models::{ContentSource, StorageConnection};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{MetadataDirective, PublicAccessBlockConfiguration};
use aws_sdk_s3::Client as S3Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, info};

/// Characters left as-is in the `x-amz-copy-source` header.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct CdnClient {
    client: S3Client,
    bucket: String,
}

impl CdnClient {
    /// Build a client for `bucket` from parsed connection settings.
    ///
    /// Explicit credentials are used when the connection string carries them,
    /// otherwise the ambient AWS credential chain is loaded. The SDK's own
    /// retries are disabled: a failed store call fails the sync job.
    pub async fn new(bucket: String, connection: &StorageConnection) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(Error::Config("Container name must not be empty".to_string()));
        }

        let region = Region::new(connection.region().to_string());

        let mut builder = match (&connection.access_key_id, &connection.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials = Credentials::new(
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    None,
                    None,
                    "media-cdn-sync",
                );
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region.clone())
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(Error::Config(
                    "Both access key id and secret access key are required".to_string(),
                ))
            }
        };

        builder = builder
            .region(region)
            .retry_config(RetryConfig::disabled())
            .force_path_style(connection.force_path_style);

        if let Some(endpoint) = &connection.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self::from_client(S3Client::from_conf(builder.build()), bucket))
    }

    pub fn from_client(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn copy_source(&self, key: &str) -> String {
        utf8_percent_encode(&format!("{}/{}", self.bucket, key), COPY_SOURCE_ENCODE_SET).to_string()
    }
}

fn has_status<E>(err: &SdkError<E>, status: u16) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == status)
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    has_status(err, 404)
}

fn storage_error<E>(action: &str, key: &str, err: SdkError<E>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Storage(format!("Failed to {} {}: {}", action, key, DisplayErrorContext(&err)))
}

/// Keeps ACLs blocked while allowing the bucket policy to grant public reads.
fn public_policy_access_block() -> PublicAccessBlockConfiguration {
    PublicAccessBlockConfiguration::builder()
        .block_public_acls(true)
        .ignore_public_acls(true)
        .block_public_policy(false)
        .restrict_public_buckets(false)
        .build()
}

/// Bucket policy granting anonymous reads of objects but not listing.
fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{}/*", bucket)]
        }]
    })
    .to_string()
}

#[async_trait]
impl CdnService for CdnClient {
    fn container(&self) -> &str {
        &self.bucket
    }

    async fn ensure_container(&self) -> Result<()> {
        let created = match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!("Container {} already exists", self.bucket);
                false
            }
            Err(e) if is_not_found(&e) => {
                match self.client.create_bucket().bucket(&self.bucket).send().await {
                    Ok(_) => {
                        info!("Created container {}", self.bucket);
                        true
                    }
                    Err(e)
                        if e.as_service_error()
                            .map(|se| se.is_bucket_already_owned_by_you())
                            .unwrap_or(false) =>
                    {
                        debug!("Container {} was created concurrently", self.bucket);
                        false
                    }
                    Err(e) => return Err(storage_error("create container", &self.bucket, e)),
                }
            }
            Err(e) => return Err(storage_error("inspect container", &self.bucket, e)),
        };

        // New AWS buckets block public policies until the access block is relaxed.
        if created {
            self.client
                .put_public_access_block()
                .bucket(&self.bucket)
                .public_access_block_configuration(public_policy_access_block())
                .send()
                .await
                .map_err(|e| storage_error("allow public policy on", &self.bucket, e))?;
        }

        self.client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(public_read_policy(&self.bucket))
            .send()
            .await
            .map_err(|e| storage_error("set access policy on", &self.bucket, e))?;

        Ok(())
    }

    async fn put_object(&self, key: &str, body: &ContentSource, content_type: &str) -> Result<()> {
        let stream = match body {
            ContentSource::Memory(data) => ByteStream::from(data.clone()),
            ContentSource::File(path) => ByteStream::from_path(path).await.map_err(|e| {
                Error::Storage(format!("Failed to open {}: {}", path.display(), e))
            })?,
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(stream)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_error("upload", key, e))?;

        Ok(())
    }

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        // S3 metadata is immutable; an in-place copy with REPLACE rewrites it.
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(self.copy_source(key))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(&properties.content_type)
            .cache_control(&properties.cache_control)
            .send()
            .await
            .map_err(|e| storage_error("set properties on", key, e))?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<bool> {
        // Without s3:ListBucket a missing key answers HEAD with 403 rather than 404.
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => return Ok(false),
            Err(e) if has_status(&e, 403) => {
                debug!("Cannot inspect {}, deleting unconditionally", key)
            }
            Err(e) => return Err(storage_error("inspect", key, e)),
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("delete", key, e))?;

        Ok(true)
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(storage_error("inspect", key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_public_read_policy_targets_objects_only() {
        let policy: serde_json::Value = serde_json::from_str(&public_read_policy("media")).unwrap();
        let statement = &policy["Statement"][0];

        assert_eq!(statement["Action"][0], "s3:GetObject");
        assert_eq!(statement["Resource"][0], "arn:aws:s3:::media/*");
        assert_eq!(statement["Principal"], "*");
    }

    #[tokio::test]
    async fn test_new_rejects_empty_bucket() {
        let connection = StorageConnection::parse("AccessKeyId=a;SecretAccessKey=b").unwrap();
        let result = CdnClient::new("  ".to_string(), &connection).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_copy_source_escapes_percent_in_keys() {
        let connection = StorageConnection::parse(
            "Endpoint=http://localhost:9000;AccessKeyId=a;SecretAccessKey=b;ForcePathStyle=true",
        )
        .unwrap();
        let client = CdnClient::new("media".to_string(), &connection).await.unwrap();

        assert_eq!(
            client.copy_source("images/my%20photo.jpg"),
            "media/images/my%2520photo.jpg"
        );
    }

    async fn client_for(server: &MockServer) -> CdnClient {
        let connection = StorageConnection::parse(&format!(
            "Endpoint={};Region=us-east-1;AccessKeyId=test;SecretAccessKey=test;ForcePathStyle=true",
            server.uri()
        ))
        .unwrap();
        CdnClient::new("media".to_string(), &connection).await.unwrap()
    }

    #[tokio::test]
    async fn test_object_exists_maps_404_to_false() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media/images/present.png"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/media/images/absent.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.object_exists("images/present.png").await.unwrap());
        assert!(!client.object_exists("images/absent.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_object_sends_content_type() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/media/images/logo.png"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .put_object(
                "images/logo.png",
                &ContentSource::Memory(vec![0x89, 0x50, 0x4E, 0x47]),
                "image/png",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_object_skips_delete_call() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media/images/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(!client.delete_object("images/gone.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_existing_object() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media/images/old.png"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/media/images/old.png"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.delete_object("images/old.png").await.unwrap());
    }

    async fn mount_bucket_setup(server: &MockServer, create: u64, access_block: u64) {
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param_is_missing("policy"))
            .and(query_param_is_missing("publicAccessBlock"))
            .respond_with(ResponseTemplate::new(200))
            .expect(create)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param("publicAccessBlock", ""))
            .respond_with(ResponseTemplate::new(200))
            .expect(access_block)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param("policy", ""))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_ensure_container_creates_bucket_and_allows_public_policy() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_bucket_setup(&server, 1, 1).await;

        client_for(&server).await.ensure_container().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_container_on_existing_bucket_only_sets_policy() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        mount_bucket_setup(&server, 0, 0).await;

        let client = client_for(&server).await;
        client.ensure_container().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_container_tolerates_concurrent_creation() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param_is_missing("policy"))
            .and(query_param_is_missing("publicAccessBlock"))
            .respond_with(
                ResponseTemplate::new(409)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(
                        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                         <Error><Code>BucketAlreadyOwnedByYou</Code>\
                         <Message>Your previous request to create the named bucket succeeded.</Message>\
                         <BucketName>media</BucketName><RequestId>1</RequestId></Error>",
                    ),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param("publicAccessBlock", ""))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param("policy", ""))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).await.ensure_container().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_container_surfaces_policy_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/media"))
            .and(query_param("policy", ""))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = client_for(&server).await.ensure_container().await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_delete_without_list_permission_still_deletes() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/media/images/hidden.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/media/images/hidden.png"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.delete_object("images/hidden.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/media/images/logo.png"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client
            .put_object("images/logo.png", &ContentSource::Memory(vec![1]), "image/png")
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
