//! Storage sync operations
//!
//! Upload, replace and delete of media assets against the CDN store. Every
//! operation derives the object key from the asset itself, so repeating an
//! operation converges on the same final state.

use crate::cdn::{CdnService, ObjectProperties};
use crate::jobs::{JobHandle, JobManager, JobOptions, SecurityContext};
use crate::key::derive_key;
use crate::models::{MediaAsset, DEFAULT_CACHE_CONTROL};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SYNC_JOB_CATEGORY: &str = "CDN Upload";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Upload,
    Replace,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Upload => write!(f, "upload"),
            SyncOperation::Replace => write!(f, "replace"),
            SyncOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Arguments of one sync operation.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub asset: MediaAsset,
    pub extension: String,
    pub language: String,
}

/// One storage operation bound for the job manager.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub options: JobOptions,
    pub operation: SyncOperation,
    pub args: SyncArgs,
}

impl SyncJob {
    /// The job id is the asset id; jobs never run with elevated privileges.
    pub fn new(operation: SyncOperation, args: SyncArgs, site: &str, retention: Duration) -> Self {
        let options = JobOptions::new(args.asset.id.clone(), SYNC_JOB_CATEGORY, site)
            .with_retention(retention)
            .with_security(SecurityContext::Unelevated);

        Self {
            options,
            operation,
            args,
        }
    }

    pub fn submit(self, jobs: &JobManager, sync: Arc<StorageSync>) -> JobHandle {
        let SyncJob {
            options,
            operation,
            args,
        } = self;

        debug!(
            "Dispatching {} of {} ({}) on site {}",
            operation, args.asset.id, args.language, options.site
        );
        jobs.start(options, async move { sync.run(operation, &args).await })
    }
}

pub struct StorageSync {
    store: Arc<dyn CdnService>,
    cache_control: String,
}

impl StorageSync {
    /// Wrap `store` and make sure its container exists.
    pub async fn new(store: Arc<dyn CdnService>) -> Result<Self> {
        let sync = Self {
            store,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
        };
        sync.ensure_container().await?;
        Ok(sync)
    }

    pub fn with_cache_control(mut self, cache_control: String) -> Self {
        self.cache_control = cache_control;
        self
    }

    pub fn store(&self) -> &Arc<dyn CdnService> {
        &self.store
    }

    pub async fn ensure_container(&self) -> Result<()> {
        self.store.ensure_container().await?;
        debug!("Container {} is ready", self.store.container());
        Ok(())
    }

    pub async fn run(&self, operation: SyncOperation, args: &SyncArgs) -> Result<()> {
        match operation {
            SyncOperation::Upload => self.upload(&args.asset, &args.extension, &args.language).await,
            SyncOperation::Replace => self.replace(&args.asset, &args.extension, &args.language).await,
            SyncOperation::Delete => self.delete(&args.asset, &args.extension, &args.language).await,
        }
    }

    /// Write the asset's content under its key.
    ///
    /// Any object already at the key is removed first. Without content or
    /// without an extension the asset ends up absent from the store.
    pub async fn upload(&self, asset: &MediaAsset, extension: &str, language: &str) -> Result<()> {
        let key = derive_key(asset, extension);

        if let Err(e) = self.store.delete_object(&key).await {
            warn!("Could not remove stale object {} before upload: {}", key, e);
        }

        let content = match &asset.content {
            Some(content) if asset.has_content() && !extension.is_empty() => content,
            _ => {
                debug!(
                    "No content to upload for {} ({}), leaving {} absent",
                    asset.id, language, key
                );
                return Ok(());
            }
        };

        let content_type = if asset.mime_type.is_empty() {
            FALLBACK_CONTENT_TYPE
        } else {
            asset.mime_type.as_str()
        };

        self.store.put_object(&key, content, content_type).await?;
        self.store
            .set_properties(
                &key,
                &ObjectProperties {
                    content_type: content_type.to_string(),
                    cache_control: self.cache_control.clone(),
                },
            )
            .await?;

        info!("File Uploaded: {}", key);
        Ok(())
    }

    /// Delete then upload; a failed delete does not stop the upload.
    pub async fn replace(&self, asset: &MediaAsset, extension: &str, language: &str) -> Result<()> {
        if let Err(e) = self.delete(asset, extension, language).await {
            warn!(
                "Delete before replace failed for {} ({}): {}",
                asset.id, language, e
            );
        }

        self.upload(asset, extension, language).await
    }

    pub async fn delete(&self, asset: &MediaAsset, extension: &str, language: &str) -> Result<()> {
        let key = derive_key(asset, extension);

        if self.store.delete_object(&key).await? {
            info!("File Deleted: {}", key);
        } else {
            debug!("Nothing to delete at {} for {} ({})", key, asset.id, language);
        }

        Ok(())
    }
}
