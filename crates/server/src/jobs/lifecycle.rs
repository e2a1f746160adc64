// crates/server/src/jobs/lifecycle.rs
//! The single authority for job status transitions.
//!
//! Control-plane transitions (start/pause/resume/cancel) for one job are
//! serialized through a per-job async mutex. The coordinator's natural
//! `finish` instead uses the store's conditional UPDATE (`try_finish_job`)
//! so a draining executor can never deadlock against a control request
//! holding the job lock.
//!
//! Every successful transition publishes a `task_update` event before
//! returning, so an observer never sees a stale status after a successful
//! API call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::Mutex;

use docharvest_core::{JobId, JobOutcome, JobStatus};
use docharvest_db::{Database, DbError, JobRecord};

use crate::stream::{ProgressFrame, StreamEvent, StreamHub};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job already running: {0}")]
    AlreadyRunning(JobId),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub struct LifecycleMachine {
    db: Database,
    hub: Arc<StreamHub>,
    locks: StdMutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl LifecycleMachine {
    pub fn new(db: Database, hub: Arc<StreamHub>) -> Self {
        Self {
            db,
            hub,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The per-job transition mutex. Callers that need to compose a
    /// transition with executor bookkeeping (the supervisor) hold this
    /// across the whole composite operation.
    pub fn lock_for(&self, id: JobId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lifecycle lock map poisoned");
        Arc::clone(locks.entry(id).or_default())
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        self.db
            .get_job(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    /// Transition to `running`. Caller must hold the per-job lock.
    /// `started_at` is stamped on the first start only (the store's
    /// COALESCE), so pause/resume keeps the original start time.
    pub async fn start_locked(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        let record = self.get(id).await?;
        match record.status {
            JobStatus::Running => Err(LifecycleError::AlreadyRunning(id)),
            from if from.can_transition_to(JobStatus::Running) => {
                self.db.record_job_start(id).await?;
                let record = self.get(id).await?;
                tracing::info!(job_id = id, from = %from, "job started");
                self.emit(&record);
                Ok(record)
            }
            from => Err(LifecycleError::InvalidTransition {
                from,
                to: JobStatus::Running,
            }),
        }
    }

    /// Transition to `paused`. Caller must hold the per-job lock.
    /// Accumulated progress is untouched.
    pub async fn pause_locked(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        let record = self.get(id).await?;
        if !record.status.can_transition_to(JobStatus::Paused) {
            return Err(LifecycleError::InvalidTransition {
                from: record.status,
                to: JobStatus::Paused,
            });
        }
        self.db.update_job_status(id, JobStatus::Paused).await?;
        let record = self.get(id).await?;
        tracing::info!(job_id = id, "job paused");
        self.emit(&record);
        Ok(record)
    }

    /// Transition to `cancelled`. Caller must hold the per-job lock.
    /// Idempotent: cancelling an already-terminal job is a no-op, not an
    /// error. Returns whether a transition actually happened alongside the
    /// (possibly unchanged) record.
    pub async fn cancel_locked(
        &self,
        id: JobId,
    ) -> Result<(JobRecord, bool), LifecycleError> {
        let record = self.get(id).await?;
        if record.status.is_terminal() {
            return Ok((record, false));
        }
        if !record.status.can_transition_to(JobStatus::Cancelled) {
            return Err(LifecycleError::InvalidTransition {
                from: record.status,
                to: JobStatus::Cancelled,
            });
        }
        self.db
            .record_job_finish(id, JobStatus::Cancelled, None, None)
            .await?;
        let record = self.get(id).await?;
        tracing::info!(job_id = id, "job cancelled");
        self.emit(&record);
        Ok((record, true))
    }

    /// Coordinator-only: record the natural end of a job's work.
    ///
    /// Does not take the per-job lock; the conditional store write
    /// refuses unless the job is still `running`, so an operator
    /// pause/cancel that won the race stands. Returns `None` when the
    /// write was refused.
    pub async fn finish(
        &self,
        id: JobId,
        outcome: JobOutcome,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<Option<JobRecord>, LifecycleError> {
        let applied = self
            .db
            .try_finish_job(id, outcome.status(), error, result)
            .await?;
        if !applied {
            let status = self.get(id).await.map(|r| r.status).ok();
            tracing::debug!(job_id = id, ?status, "finish superseded by operator transition");
            return Ok(None);
        }
        let record = self.get(id).await?;
        tracing::info!(job_id = id, status = %record.status, "job finished");
        self.emit(&record);
        Ok(Some(record))
    }

    fn emit(&self, record: &JobRecord) {
        self.hub
            .publish(record.id, StreamEvent::TaskUpdate(ProgressFrame::from_record(record)));
    }
}
