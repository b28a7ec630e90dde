//! Asynchronous job execution
//!
//! A bounded worker pool for fire-and-forget sync jobs. Every submitted job
//! gets a [`JobHandle`] that exposes its state and accumulated messages and
//! stays queryable through the [`JobManager`] until its retention window has
//! elapsed after completion.

use crate::models::DEFAULT_JOB_RETENTION_SECS;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Initializing,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }

    fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Initializing, JobState::Running)
                | (JobState::Initializing, JobState::Failed)
                | (JobState::Running, JobState::Finished)
                | (JobState::Running, JobState::Failed)
        )
    }
}

/// Privilege level a job runs with.
///
/// Jobs never borrow the caller's elevation; they carry everything they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityContext {
    Unelevated,
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub job_id: String,
    pub category: String,
    pub site: String,
    /// How long the job stays queryable after reaching a terminal state.
    pub retention: Duration,
    pub security: SecurityContext,
}

impl JobOptions {
    pub fn new(job_id: impl Into<String>, category: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            category: category.into(),
            site: site.into(),
            retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
            security: SecurityContext::Unelevated,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    expires_at: Option<Instant>,
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        self.state == JobState::Failed
    }
}

/// Shared view of one job's status.
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    options: Arc<JobOptions>,
    status: Arc<watch::Sender<JobStatus>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("job_id", &self.options.job_id)
            .field("category", &self.options.category)
            .field("state", &self.state())
            .finish()
    }
}

impl JobHandle {
    /// A new handle in the `Initializing` state.
    pub fn new(options: JobOptions) -> Self {
        let (status, _) = watch::channel(JobStatus {
            state: JobState::Initializing,
            messages: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            expires_at: None,
        });

        Self {
            id: Uuid::new_v4(),
            options: Arc::new(options),
            status: Arc::new(status),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn state(&self) -> JobState {
        self.status.borrow().state
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Move to `Running`. Returns false if the job has already left `Initializing`.
    pub fn mark_running(&self) -> bool {
        self.transition(JobState::Running, None)
    }

    pub fn finish(&self) -> bool {
        self.transition(JobState::Finished, None)
    }

    /// Mark the job failed and record `message`.
    ///
    /// The message is kept even when the job is already terminal.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(JobState::Failed, Some(message.into()))
    }

    fn transition(&self, next: JobState, message: Option<String>) -> bool {
        let retention = self.options.retention;
        let mut applied = false;

        self.status.send_if_modified(|status| {
            let mut modified = false;
            if let Some(message) = message {
                status.messages.push(message);
                modified = true;
            }

            if status.state.can_transition_to(next) {
                status.state = next;
                if next.is_terminal() {
                    status.finished_at = Some(Utc::now());
                    status.expires_at = Some(Instant::now() + retention);
                }
                applied = true;
                modified = true;
            }
            modified
        });

        if !applied {
            debug!(
                "Ignoring transition of job {} to {:?} from {:?}",
                self.options.job_id,
                next,
                self.state()
            );
        }
        applied
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self) -> JobStatus {
        let mut receiver = self.status.subscribe();
        let status = match receiver.wait_for(|status| status.state.is_terminal()).await {
            Ok(status) => (*status).clone(),
            Err(_) => self.status(),
        };
        status
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.status.borrow().expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Bounded pool running jobs on the tokio runtime it was created on.
#[derive(Clone)]
pub struct JobManager {
    runtime: Handle,
    workers: Arc<Semaphore>,
    jobs: Arc<Mutex<Vec<JobHandle>>>,
}

impl JobManager {
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(Error::Config("Job pool needs at least one worker".to_string()));
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("Job manager requires a tokio runtime: {}", e)))?;

        Ok(Self {
            runtime,
            workers: Arc::new(Semaphore::new(max_workers)),
            jobs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Submit `work` and return immediately with its handle.
    pub fn start<F>(&self, options: JobOptions, work: F) -> JobHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.purge_expired();

        let handle = JobHandle::new(options);
        self.lock_jobs().push(handle.clone());

        let job = handle.clone();
        let workers = Arc::clone(&self.workers);
        self.runtime.spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    job.fail("Job pool is closed");
                    return;
                }
            };

            job.mark_running();
            debug!(
                "Job {} [{}] started on site {}",
                job.options().job_id,
                job.options().category,
                job.options().site
            );

            // A nested task turns a panic into a join error instead of a stuck job.
            match tokio::spawn(work).await {
                Ok(Ok(())) => {
                    job.finish();
                }
                Ok(Err(e)) => {
                    error!(
                        job_id = %job.options().job_id,
                        category = %job.options().category,
                        "Job failed: {}",
                        e
                    );
                    job.fail(e.to_string());
                }
                Err(e) => {
                    error!(job_id = %job.options().job_id, "Job aborted: {}", e);
                    job.fail(format!("Job aborted: {}", e));
                }
            }
        });

        handle
    }

    /// Live handles registered under `job_id`.
    pub fn jobs(&self, job_id: &str) -> Vec<JobHandle> {
        self.purge_expired();
        self.lock_jobs()
            .iter()
            .filter(|job| job.options().job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<JobHandle> {
        self.purge_expired();
        self.lock_jobs().iter().find(|job| job.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.purge_expired();
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.lock_jobs().retain(|job| !job.is_expired(now));
    }

    fn lock_jobs(&self) -> MutexGuard<'_, Vec<JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
