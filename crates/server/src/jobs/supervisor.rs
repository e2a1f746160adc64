// crates/server/src/jobs/supervisor.rs
//! The explicit table of active executors.
//!
//! One tokio task per active job, tracked here together with its control
//! channel and (between pause and resume) its checkpoint. Composite
//! operations hold the lifecycle machine's per-job lock across both the
//! status transition and the executor bookkeeping, which is what makes
//! "at most one active execution per job" hold under concurrent requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use docharvest_core::{JobId, JobStatus};
use docharvest_db::{Database, JobRecord};

use crate::jobs::executor::{Checkpoint, ControlSignal, ExecEnd, Executor};
use crate::jobs::lifecycle::{LifecycleError, LifecycleMachine};
use crate::stream::StreamHub;
use crate::work::{BackupProvider, SourceFactory};

struct ExecHandle {
    control: watch::Sender<ControlSignal>,
    task: JoinHandle<()>,
}

type ActiveMap = Arc<StdMutex<HashMap<JobId, ExecHandle>>>;
type CheckpointMap = Arc<StdMutex<HashMap<JobId, Checkpoint>>>;

pub struct JobSupervisor {
    db: Database,
    hub: Arc<StreamHub>,
    lifecycle: Arc<LifecycleMachine>,
    sources: Arc<dyn SourceFactory>,
    backups: Arc<dyn BackupProvider>,
    active: ActiveMap,
    checkpoints: CheckpointMap,
}

impl JobSupervisor {
    pub fn new(
        db: Database,
        hub: Arc<StreamHub>,
        sources: Arc<dyn SourceFactory>,
        backups: Arc<dyn BackupProvider>,
    ) -> Arc<Self> {
        let lifecycle = Arc::new(LifecycleMachine::new(db.clone(), Arc::clone(&hub)));
        Arc::new(Self {
            db,
            hub,
            lifecycle,
            sources,
            backups,
            active: Arc::new(StdMutex::new(HashMap::new())),
            checkpoints: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleMachine> {
        &self.lifecycle
    }

    /// Start (or resume) a job: transition to `running` and spawn exactly
    /// one executor task. Duplicate starts fail with `AlreadyRunning`.
    pub async fn start(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        let lock = self.lifecycle.lock_for(id);
        let _guard = lock.lock().await;

        let record = self
            .db
            .get_job(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;
        if record.status == JobStatus::Running {
            return Err(LifecycleError::AlreadyRunning(id));
        }
        if !record.status.can_transition_to(JobStatus::Running) {
            return Err(LifecycleError::InvalidTransition {
                from: record.status,
                to: JobStatus::Running,
            });
        }

        // A paused executor may still be draining its in-flight item; wait
        // for it to park its checkpoint before the new run picks it up.
        let prev = self.active.lock().expect("active map poisoned").remove(&id);
        if let Some(prev) = prev {
            let _ = prev.task.await;
        }

        let record = self.lifecycle.start_locked(id).await?;
        let checkpoint = self
            .checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .remove(&id);

        let (ctl_tx, ctl_rx) = watch::channel(ControlSignal::Run);
        let executor = Executor::new(
            self.db.clone(),
            Arc::clone(&self.hub),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.sources),
            Arc::clone(&self.backups),
            record.clone(),
            ctl_rx,
        );

        let active = Arc::clone(&self.active);
        let checkpoints = Arc::clone(&self.checkpoints);
        let hub = Arc::clone(&self.hub);
        let task = tokio::spawn(async move {
            let end = executor.run(checkpoint).await;
            match end {
                ExecEnd::Paused(cp) => {
                    tracing::info!(job_id = id, "executor parked at checkpoint");
                    checkpoints
                        .lock()
                        .expect("checkpoint map poisoned")
                        .insert(id, cp);
                }
                ExecEnd::Completed | ExecEnd::Failed => {
                    checkpoints
                        .lock()
                        .expect("checkpoint map poisoned")
                        .remove(&id);
                    hub.remove(id);
                }
                ExecEnd::Cancelled => {
                    // The cancel path owns the terminal emit and channel
                    // teardown; only the checkpoint is released here.
                    checkpoints
                        .lock()
                        .expect("checkpoint map poisoned")
                        .remove(&id);
                }
            }
            active.lock().expect("active map poisoned").remove(&id);
        });

        self.active
            .lock()
            .expect("active map poisoned")
            .insert(id, ExecHandle { control: ctl_tx, task });

        Ok(record)
    }

    /// Pause a running job. The status flips immediately; the executor
    /// stops after its in-flight item and parks a checkpoint.
    pub async fn pause(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        let lock = self.lifecycle.lock_for(id);
        let _guard = lock.lock().await;

        let record = self.lifecycle.pause_locked(id).await?;
        if let Some(handle) = self.active.lock().expect("active map poisoned").get(&id) {
            let _ = handle.control.send(ControlSignal::Pause);
        } else {
            tracing::warn!(job_id = id, "paused job had no active executor");
        }
        Ok(record)
    }

    /// Cancel a job. The executor (if any) is signalled and awaited first
    /// so it can finalize its in-flight stage and flush the final
    /// snapshot; the terminal transition and its `task_update` follow.
    /// Idempotent on already-terminal jobs.
    pub async fn cancel(&self, id: JobId) -> Result<JobRecord, LifecycleError> {
        let lock = self.lifecycle.lock_for(id);
        let _guard = lock.lock().await;

        {
            let record = self
                .db
                .get_job(id)
                .await?
                .ok_or(LifecycleError::NotFound(id))?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if !record.status.can_transition_to(JobStatus::Cancelled) {
                return Err(LifecycleError::InvalidTransition {
                    from: record.status,
                    to: JobStatus::Cancelled,
                });
            }
        }

        let handle = self.active.lock().expect("active map poisoned").remove(&id);
        if let Some(handle) = handle {
            let _ = handle.control.send(ControlSignal::Cancel);
            let _ = handle.task.await;
        }

        let (record, transitioned) = self.lifecycle.cancel_locked(id).await?;
        if transitioned {
            self.hub.remove(id);
        }
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .remove(&id);
        Ok(record)
    }

    /// Delete a job record, cancelling it first when still active.
    pub async fn delete(&self, id: JobId) -> Result<(), LifecycleError> {
        let record = self
            .db
            .get_job(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;
        if !record.status.is_terminal() && record.status != JobStatus::Pending {
            self.cancel(id).await?;
        }
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .remove(&id);
        self.hub.remove(id);
        if !self.db.delete_job(id).await? {
            return Err(LifecycleError::NotFound(id));
        }
        tracing::info!(job_id = id, "job deleted");
        Ok(())
    }

    /// Whether a job currently has a live executor task (test hook).
    pub fn has_active_executor(&self, id: JobId) -> bool {
        self.active
            .lock()
            .expect("active map poisoned")
            .get(&id)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }
}
