//! Object store integration for the CDN-fronted media bucket
//!
//! Exposes the primitive operations the sync engine needs from an
//! S3-compatible store, with a real client and an in-memory stand-in.

pub mod client;
pub mod mock;

pub use client::CdnClient;
pub use mock::MockCdnClient;

use crate::models::ContentSource;
use crate::Result;
use async_trait::async_trait;

/// Metadata applied to an object after its body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperties {
    pub content_type: String,
    pub cache_control: String,
}

#[async_trait]
pub trait CdnService: Send + Sync {
    /// Name of the backing container (bucket).
    fn container(&self) -> &str;

    /// Create the container if absent and make its objects publicly readable.
    async fn ensure_container(&self) -> Result<()>;

    async fn put_object(&self, key: &str, body: &ContentSource, content_type: &str) -> Result<()>;

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()>;

    /// Delete the object at `key`, returning whether anything was removed.
    async fn delete_object(&self, key: &str) -> Result<bool>;

    async fn object_exists(&self, key: &str) -> Result<bool>;
}
