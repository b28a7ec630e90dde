//! Publish action classification and dispatch
//!
//! [`MediaPublisher`] is plugged into the host's publish pipeline and called
//! once per affected item. It works out whether the item is a media asset,
//! which storage operation the publish action calls for, and hands that
//! operation to the job manager. It never waits for storage I/O and never
//! returns an error to the pipeline: failures are logged and recorded on the
//! publish job's status instead.

use crate::jobs::{JobHandle, JobManager};
use crate::models::{Config, Item, MediaAsset, PublishAction, DEFAULT_JOB_RETENTION_SECS};
use crate::sync::{StorageSync, SyncArgs, SyncJob, SyncOperation};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// The host repository as seen from one publish run.
///
/// "Source" is the authoring store being published from, "target" the
/// delivery store being published to.
pub trait PublishHelper {
    fn source_item(&self, item_id: &str) -> Result<Option<Item>>;

    fn target_item(&self, item_id: &str) -> Result<Option<Item>>;

    fn target_item_in_language(&self, item_id: &str, language: &str) -> Result<Option<Item>>;

    /// Every language configured in the target store.
    fn target_languages(&self) -> Result<Vec<String>>;
}

/// Notification for one item affected by a publish run.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub item_id: String,
    pub action: PublishAction,
    pub version_to_publish: Option<Item>,
    pub site: String,
}

/// How a publish action turns into storage jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPlan {
    Single(SyncOperation),
    EveryLanguage(SyncOperation),
}

pub fn dispatch_plan(action: PublishAction) -> DispatchPlan {
    match action {
        PublishAction::None => DispatchPlan::Single(SyncOperation::Upload),
        PublishAction::PublishSharedFields | PublishAction::PublishVersion => {
            DispatchPlan::Single(SyncOperation::Replace)
        }
        PublishAction::DeleteTargetItem => DispatchPlan::EveryLanguage(SyncOperation::Delete),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotMedia,
    EmptyContent,
    NoVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageFailure {
    pub language: String,
    pub message: String,
}

#[derive(Debug)]
pub enum PublishOutcome {
    Disabled,
    Skipped(SkipReason),
    Dispatched {
        jobs: Vec<JobHandle>,
        failures: Vec<LanguageFailure>,
    },
    Failed(String),
}

impl PublishOutcome {
    pub fn jobs(&self) -> &[JobHandle] {
        match self {
            PublishOutcome::Dispatched { jobs, .. } => jobs,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub job_retention: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            job_retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
        }
    }
}

impl From<&Config> for PublisherConfig {
    fn from(config: &Config) -> Self {
        Self {
            enabled: config.enabled,
            job_retention: config.job_retention,
        }
    }
}

pub struct MediaPublisher {
    config: PublisherConfig,
    sync: Arc<StorageSync>,
    jobs: JobManager,
}

impl MediaPublisher {
    pub fn new(config: PublisherConfig, sync: Arc<StorageSync>, jobs: JobManager) -> Self {
        Self { config, sync, jobs }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Handle one publish event, recording failures on `status`.
    pub fn handle(
        &self,
        event: &PublishEvent,
        helper: &dyn PublishHelper,
        status: &JobHandle,
    ) -> PublishOutcome {
        if !self.config.enabled {
            return PublishOutcome::Disabled;
        }

        debug!("CDN sync examining {} ({:?})", event.item_id, event.action);

        let item = match resolve_media_item(&event.item_id, helper) {
            Ok(Some(item)) => item,
            Ok(None) => return PublishOutcome::Skipped(SkipReason::NotMedia),
            Err(e) => {
                let language = event
                    .version_to_publish
                    .as_ref()
                    .map(|v| v.language.as_str())
                    .unwrap_or_default();
                return self.record_failure(&event.item_id, &event.item_id, language, &e, status);
            }
        };

        let outcome = match item.as_media() {
            Some(asset) if asset.has_content() => self.classify(event, helper, &item, asset, status),
            Some(_) => return PublishOutcome::Skipped(SkipReason::EmptyContent),
            None => return PublishOutcome::Skipped(SkipReason::NotMedia),
        };

        match outcome {
            Ok(outcome) => {
                debug!("CDN synchronization dispatched for {}", item.id);
                outcome
            }
            Err(e) => {
                let language = event
                    .version_to_publish
                    .as_ref()
                    .unwrap_or(&item)
                    .language
                    .clone();
                self.record_failure(&item.name, &item.id, &language, &e, status)
            }
        }
    }

    fn classify(
        &self,
        event: &PublishEvent,
        helper: &dyn PublishHelper,
        item: &Item,
        asset: &MediaAsset,
        status: &JobHandle,
    ) -> Result<PublishOutcome> {
        let version = match &event.version_to_publish {
            Some(version) => Some(version.clone()),
            None => helper.target_item_in_language(&event.item_id, &item.language)?,
        };

        let Some(version) = version else {
            debug!(
                "No version of {} to publish in {}",
                event.item_id, item.language
            );
            return Ok(PublishOutcome::Skipped(SkipReason::NoVersion));
        };

        match dispatch_plan(event.action) {
            DispatchPlan::Single(operation) => {
                let args = SyncArgs {
                    asset: asset.clone(),
                    extension: asset.file_extension.clone(),
                    language: version.language.clone(),
                };
                Ok(PublishOutcome::Dispatched {
                    jobs: vec![self.dispatch(event, operation, args)],
                    failures: Vec::new(),
                })
            }
            DispatchPlan::EveryLanguage(operation) => {
                let languages = helper.target_languages()?;
                Ok(self.dispatch_every_language(event, helper, asset, operation, languages, status))
            }
        }
    }

    /// One isolated attempt per language: a failure resolving one language
    /// is recorded and the remaining languages are still processed.
    fn dispatch_every_language(
        &self,
        event: &PublishEvent,
        helper: &dyn PublishHelper,
        asset: &MediaAsset,
        operation: SyncOperation,
        languages: Vec<String>,
        status: &JobHandle,
    ) -> PublishOutcome {
        let mut jobs = Vec::new();
        let mut failures = Vec::new();

        for language in languages {
            match helper.target_item_in_language(&event.item_id, &language) {
                Ok(Some(target)) => {
                    let target_asset = target.media.unwrap_or_else(|| asset.clone());
                    let args = SyncArgs {
                        extension: target_asset.file_extension.clone(),
                        asset: target_asset,
                        language,
                    };
                    jobs.push(self.dispatch(event, operation, args));
                }
                Ok(None) => {
                    debug!("{} has no {} version in the target store", event.item_id, language);
                }
                Err(e) => {
                    let message = failure_message(&asset.name, &asset.id, &language, &e);
                    error!(
                        item_id = %asset.id,
                        name = %asset.name,
                        language = %language,
                        "{}",
                        message
                    );
                    status.fail(message.clone());
                    failures.push(LanguageFailure { language, message });
                }
            }
        }

        PublishOutcome::Dispatched { jobs, failures }
    }

    fn dispatch(&self, event: &PublishEvent, operation: SyncOperation, args: SyncArgs) -> JobHandle {
        SyncJob::new(operation, args, &event.site, self.config.job_retention)
            .submit(&self.jobs, Arc::clone(&self.sync))
    }

    fn record_failure(
        &self,
        name: &str,
        id: &str,
        language: &str,
        err: &Error,
        status: &JobHandle,
    ) -> PublishOutcome {
        let message = failure_message(name, id, language, err);
        error!(item_id = %id, name = %name, language = %language, "{}", message);
        status.fail(message.clone());
        PublishOutcome::Failed(message)
    }
}

/// Prefer the source item; fall back to the target item, which is all that
/// remains when the item is being deleted.
fn resolve_media_item(item_id: &str, helper: &dyn PublishHelper) -> Result<Option<Item>> {
    if let Some(source) = helper.source_item(item_id)? {
        if source.is_media_item() {
            return Ok(Some(source));
        }
    }

    Ok(helper.target_item(item_id)?.filter(Item::is_media_item))
}

fn failure_message(name: &str, id: &str, language: &str, err: &Error) -> String {
    format!(
        "CDN Processing failed for {} ({} version: {}). {}",
        name, id, language, err
    )
}
