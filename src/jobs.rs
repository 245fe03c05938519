//! Background jobs for the HTTP entry points.
//!
//! The registry keeps job state in memory so clients can poll it, retaining
//! the most recent finished jobs only. Only one job may run at a time:
//! imports and deletes both mutate the CRM.

use crate::contacts::{AggregateReport, JobContext, ProgressSink};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    DeleteAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Snapshot of one job as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobState {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub percent: u8,
    pub message: String,
    pub report: Option<AggregateReport>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} is already running")]
    AlreadyRunning(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} has already finished")]
    Finished(String),
}

/// Finished jobs kept for polling; older ones are dropped when a job starts.
pub const RETAINED_FINISHED_JOBS: usize = 16;

struct JobEntry {
    seq: u64,
    state: JobState,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, JobEntry>,
    next_seq: u64,
}

impl Jobs {
    fn running(&self) -> Option<&JobEntry> {
        self.entries
            .values()
            .find(|entry| !entry.state.status.is_finished())
    }

    fn evict_finished(&mut self) {
        let mut finished: Vec<(u64, String)> = self
            .entries
            .values()
            .filter(|entry| entry.state.status.is_finished())
            .map(|entry| (entry.seq, entry.state.id.clone()))
            .collect();
        if finished.len() <= RETAINED_FINISHED_JOBS {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - RETAINED_FINISHED_JOBS;
        for (_, id) in finished.into_iter().take(excess) {
            self.entries.remove(&id);
        }
        debug!("evicted {} finished jobs", excess);
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<Jobs>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running job, refusing while another is still running.
    pub fn start(&self, kind: JobKind) -> Result<JobHandle, JobError> {
        let mut jobs = self.jobs.lock();
        if let Some(running) = jobs.running() {
            return Err(JobError::AlreadyRunning(running.state.id.clone()));
        }
        jobs.evict_finished();

        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.entries.insert(
            id.clone(),
            JobEntry {
                seq,
                state: JobState {
                    id: id.clone(),
                    kind,
                    status: JobStatus::Running,
                    percent: 0,
                    message: "queued".to_string(),
                    report: None,
                    error_message: None,
                    cancel_requested: false,
                    started_at: Utc::now(),
                    completed_at: None,
                },
                cancel: cancel.clone(),
            },
        );
        info!("job {} ({:?}) started", id, kind);

        Ok(JobHandle {
            id,
            registry: self.clone(),
            cancel,
        })
    }

    /// Start a job and run `work` on the tokio runtime.
    ///
    /// `work` gets a context wired to this job's progress and cancellation;
    /// its result becomes the job's final state.
    pub fn spawn<F, Fut>(&self, kind: JobKind, work: F) -> Result<String, JobError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<AggregateReport, String>> + Send + 'static,
    {
        let handle = self.start(kind)?;
        let id = handle.id().to_string();
        let context = handle.context();

        tokio::spawn(async move {
            match work(context).await {
                Ok(report) => handle.finish(report),
                Err(message) => handle.fail(message),
            }
        });

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<JobState> {
        self.jobs.lock().entries.get(id).map(|entry| entry.state.clone())
    }

    /// The job currently running, if any.
    pub fn running(&self) -> Option<JobState> {
        self.jobs.lock().running().map(|entry| entry.state.clone())
    }

    /// Ask a running job to stop. It finishes the chunk in flight, then
    /// reports itself as cancelled.
    pub fn cancel(&self, id: &str) -> Result<JobState, JobError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .entries
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if entry.state.status.is_finished() {
            return Err(JobError::Finished(id.to_string()));
        }

        entry.cancel.cancel();
        entry.state.cancel_requested = true;
        entry.state.message = "cancellation requested".to_string();
        info!("job {} cancellation requested", id);
        Ok(entry.state.clone())
    }

    fn update<F>(&self, id: &str, updater: F)
    where
        F: FnOnce(&mut JobState),
    {
        if let Some(entry) = self.jobs.lock().entries.get_mut(id) {
            updater(&mut entry.state);
        }
    }
}

/// Owner's side of a running job.
#[derive(Clone)]
pub struct JobHandle {
    id: String,
    registry: JobRegistry,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> JobContext {
        JobContext::new()
            .with_progress(Arc::new(self.clone()))
            .with_cancellation(self.cancel.clone())
    }

    pub fn finish(&self, report: AggregateReport) {
        let status = if report.cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        info!(
            "job {} {:?}: {} succeeded, {} failed of {}",
            self.id, status, report.success, report.failed, report.total
        );
        self.registry.update(&self.id, |state| {
            state.status = status;
            if status == JobStatus::Completed {
                state.percent = 100;
            }
            state.message = format!("{} succeeded, {} failed", report.success, report.failed);
            state.report = Some(report);
            state.completed_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, message: String) {
        error!("job {} failed: {}", self.id, message);
        self.registry.update(&self.id, |state| {
            state.status = JobStatus::Failed;
            state.message = "failed".to_string();
            state.error_message = Some(message);
            state.completed_at = Some(Utc::now());
        });
    }
}

impl ProgressSink for JobHandle {
    fn update(&self, percent: u8, message: &str) {
        self.registry.update(&self.id, |state| {
            state.percent = percent;
            if !state.cancel_requested {
                state.message = message.to_string();
            }
        });
    }
}
