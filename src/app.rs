//! Application wiring for replaying publish runs against the CDN store.

use crate::cdn::{CdnClient, CdnService, MockCdnClient};
use crate::jobs::{JobHandle, JobManager, JobOptions, JobState};
use crate::manifest::PublishManifest;
use crate::models::Config;
use crate::publisher::{MediaPublisher, PublishOutcome, PublisherConfig};
use crate::rewriter::MediaUrlRewriter;
use crate::sync::StorageSync;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const PUBLISH_JOB_CATEGORY: &str = "Publish";

/// Coordinates the store, the sync engine and the publisher.
pub struct App {
    sync: Arc<StorageSync>,
    publisher: MediaPublisher,
    rewriter: MediaUrlRewriter,
}

/// Totals of one replayed publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub skipped: usize,
    pub jobs_finished: usize,
    pub jobs_failed: usize,
    pub failures: Vec<String>,
}

impl ReplaySummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl App {
    /// Build an app around an already constructed store.
    ///
    /// This is primarily useful for integration tests that need to inject mocks.
    pub async fn with_store(config: &Config, store: Arc<dyn CdnService>) -> Result<Self> {
        let sync = Arc::new(
            StorageSync::new(store)
                .await?
                .with_cache_control(config.cache_control.clone()),
        );
        let jobs = JobManager::new(config.max_workers)?;
        let publisher = MediaPublisher::new(PublisherConfig::from(config), Arc::clone(&sync), jobs);

        Ok(Self {
            sync,
            publisher,
            rewriter: MediaUrlRewriter::from_config(config),
        })
    }

    /// Construct an app from configuration, talking to S3 unless `dry_run` is set.
    pub async fn new(config: &Config, dry_run: bool) -> Result<Self> {
        let store: Arc<dyn CdnService> = if dry_run {
            info!("Dry run enabled, using an in-memory store");
            Arc::new(MockCdnClient::new().with_container(config.container_name.clone()))
        } else {
            Arc::new(CdnClient::new(config.container_name.clone(), &config.connection).await?)
        };

        Self::with_store(config, store).await
    }

    pub fn sync(&self) -> &Arc<StorageSync> {
        &self.sync
    }

    pub fn publisher(&self) -> &MediaPublisher {
        &self.publisher
    }

    pub fn rewriter(&self) -> &MediaUrlRewriter {
        &self.rewriter
    }

    /// Feed every event of `manifest` through the publisher and wait for the
    /// resulting jobs.
    pub async fn replay(&self, manifest: &PublishManifest) -> ReplaySummary {
        let status = JobHandle::new(JobOptions::new(
            format!("publish-{}", Uuid::new_v4()),
            PUBLISH_JOB_CATEGORY,
            manifest.site.clone(),
        ));
        status.mark_running();

        let events = manifest.events();
        let mut summary = ReplaySummary {
            events: events.len(),
            ..ReplaySummary::default()
        };
        let mut dispatched = Vec::new();

        for event in &events {
            match self.publisher.handle(event, manifest, &status) {
                PublishOutcome::Dispatched { jobs, .. } => dispatched.extend(jobs),
                PublishOutcome::Disabled => {
                    warn!("CDN sync is disabled, skipping {}", event.item_id);
                    summary.skipped += 1;
                }
                PublishOutcome::Skipped(reason) => {
                    info!("Skipping {}: {:?}", event.item_id, reason);
                    summary.skipped += 1;
                }
                PublishOutcome::Failed(_) => {}
            }
        }

        for job in &dispatched {
            let result = job.wait().await;
            match result.state {
                JobState::Finished => summary.jobs_finished += 1,
                _ => {
                    summary.jobs_failed += 1;
                    summary.failures.extend(
                        result
                            .messages
                            .iter()
                            .map(|m| format!("{}: {}", job.options().job_id, m)),
                    );
                }
            }
        }

        status.finish();
        summary.failures.extend(status.status().messages);

        info!(
            "Replayed {} events: {} jobs finished, {} failed, {} skipped",
            summary.events, summary.jobs_finished, summary.jobs_failed, summary.skipped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StorageConnection;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(enabled: bool) -> Config {
        Config {
            enabled,
            container_name: "media".to_string(),
            connection: StorageConnection::default(),
            origin_prefix: Some("https://cdn.test/".to_string()),
            allowed_sites: vec!["website".to_string()],
            cache_control: "public, max-age=120".to_string(),
            job_retention: Duration::from_secs(60),
            max_workers: 2,
        }
    }

    const MANIFEST: &str = r#"{
        "site": "website",
        "languages": ["en"],
        "source": [
            {"id": "{A}", "name": "Banner", "path": "/Images/Banner", "language": "en",
             "extension": "gif", "mime_type": "image/gif", "file": "banner.gif"}
        ],
        "events": [
            {"item_id": "{A}", "action": "None"},
            {"item_id": "{missing}", "action": "None"}
        ]
    }"#;

    #[tokio::test]
    async fn test_replay_uploads_media_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("banner.gif"), b"GIF89a").unwrap();
        let manifest = PublishManifest::from_json(MANIFEST, dir.path().to_path_buf()).unwrap();

        let store = MockCdnClient::new();
        let app = App::with_store(&config(true), Arc::new(store.clone())).await.unwrap();

        let summary = app.replay(&manifest).await;
        assert_eq!(summary.events, 2);
        assert_eq!(summary.jobs_finished, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_success());

        let object = store.get_object("images/banner.gif").unwrap();
        assert_eq!(object.data, b"GIF89a".to_vec());
        assert_eq!(object.cache_control.as_deref(), Some("public, max-age=120"));
    }

    #[tokio::test]
    async fn test_replay_when_disabled_touches_nothing() {
        let manifest = PublishManifest::from_json(MANIFEST, PathBuf::new()).unwrap();
        let store = MockCdnClient::new();
        let app = App::with_store(&config(false), Arc::new(store.clone())).await.unwrap();

        let summary = app.replay(&manifest).await;
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.get_put_count(), 0);
        assert_eq!(store.get_delete_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_reports_failed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("banner.gif"), b"GIF89a").unwrap();
        let manifest = PublishManifest::from_json(MANIFEST, dir.path().to_path_buf()).unwrap();

        let store = MockCdnClient::new().with_failing_puts(true);
        let app = App::with_store(&config(true), Arc::new(store)).await.unwrap();

        let summary = app.replay(&manifest).await;
        assert_eq!(summary.jobs_failed, 1);
        assert!(!summary.is_success());
        assert!(summary.failures[0].starts_with("{A}: "));
    }

    #[tokio::test]
    async fn test_dry_run_app_uses_configured_container() {
        let app = App::new(&config(true), true).await.unwrap();
        assert_eq!(app.sync().store().container(), "media");
        assert!(app.rewriter().is_site_allowed("website"));
    }
}
