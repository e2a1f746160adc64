// crates/server/src/jobs/executor.rs
//! The execution coordinator: drives one job's work plan.
//!
//! Collection jobs get one stage per configured source, in config order;
//! all of source N completes before source N+1 starts. Item failures are
//! recorded and skipped. Pause and cancel are cooperative flags checked
//! between items, so the response latency is bounded by one item's
//! processing time. Backup jobs run a single implicit stage and relay the
//! provider's percent callbacks into the same update path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use docharvest_core::{
    BackupConfig, CollectionConfig, CurrentItem, FailedItem, JobConfig, JobOutcome,
    ProgressTracker, StageStatus,
};
use docharvest_db::{Database, JobRecord};

use crate::jobs::emitter::ProgressEmitter;
use crate::jobs::lifecycle::LifecycleMachine;
use crate::stream::StreamHub;
use crate::work::{BackupProvider, ItemFilters, SourceFactory, WorkItem};

/// Cooperative control flag, delivered over a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Where an executor run ended.
#[derive(Debug)]
pub(crate) enum ExecEnd {
    Completed,
    Failed,
    Cancelled,
    Paused(Checkpoint),
}

/// Position within a work plan, retained (in memory only) across a
/// pause/resume cycle so resume never re-emits counted items.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    pub source_idx: usize,
    pub next_item: usize,
    pub items: Vec<WorkItem>,
    pub enumerated: bool,
    /// Backup jobs: provider already ran to completion.
    pub done: bool,
    pub summary: Option<serde_json::Value>,
    pub tracker: ProgressTracker,
}

impl Checkpoint {
    fn fresh() -> Self {
        Self {
            source_idx: 0,
            next_item: 0,
            items: Vec::new(),
            enumerated: false,
            done: false,
            summary: None,
            tracker: ProgressTracker::new(),
        }
    }

    fn advance_source(&mut self) {
        self.source_idx += 1;
        self.next_item = 0;
        self.items.clear();
        self.enumerated = false;
    }
}

pub(crate) struct Executor {
    db: Database,
    hub: Arc<StreamHub>,
    lifecycle: Arc<LifecycleMachine>,
    sources: Arc<dyn SourceFactory>,
    backups: Arc<dyn BackupProvider>,
    job: JobRecord,
    ctl: watch::Receiver<ControlSignal>,
}

impl Executor {
    pub fn new(
        db: Database,
        hub: Arc<StreamHub>,
        lifecycle: Arc<LifecycleMachine>,
        sources: Arc<dyn SourceFactory>,
        backups: Arc<dyn BackupProvider>,
        job: JobRecord,
        ctl: watch::Receiver<ControlSignal>,
    ) -> Self {
        Self {
            db,
            hub,
            lifecycle,
            sources,
            backups,
            job,
            ctl,
        }
    }

    pub async fn run(self, resume: Option<Checkpoint>) -> ExecEnd {
        match self.job.config.clone() {
            JobConfig::Collection(cfg) => self.run_collection(cfg, resume).await,
            JobConfig::Backup(cfg) => self.run_backup(cfg, resume).await,
        }
    }

    fn control(&self) -> ControlSignal {
        *self.ctl.borrow()
    }

    async fn log(&self, message: &str) {
        if let Err(e) = self.db.append_job_log(self.job.id, message).await {
            tracing::warn!(job_id = self.job.id, error = %e, "failed to append job log");
        }
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    async fn run_collection(
        self,
        cfg: CollectionConfig,
        resume: Option<Checkpoint>,
    ) -> ExecEnd {
        let mut emitter = ProgressEmitter::new(self.db.clone(), Arc::clone(&self.hub), self.job.id);
        let mut cp = resume.unwrap_or_else(Checkpoint::fresh);
        cp.tracker.start(Utc::now());

        let filters = ItemFilters::from(&cfg);
        let single_source = cfg.sources.len() == 1;

        while cp.source_idx < cfg.sources.len() {
            let source_cfg = &cfg.sources[cp.source_idx];
            let source = self.sources.build(source_cfg, &filters);

            if !cp.enumerated {
                let stage_idx = cp.tracker.push_stage(
                    source_cfg.name.clone(),
                    format!("Collect documents from {}", source_cfg.name),
                    Utc::now(),
                );
                self.log(&format!("enumerating source '{}'", source_cfg.name)).await;
                emitter.force(&cp.tracker).await;

                match source.enumerate().await {
                    Ok(items) => {
                        cp.tracker.set_stage_total(stage_idx, items.len() as u64);
                        self.log(&format!(
                            "source '{}': {} items",
                            source_cfg.name,
                            items.len()
                        ))
                        .await;
                        cp.items = items;
                        cp.next_item = 0;
                        cp.enumerated = true;
                        emitter.force(&cp.tracker).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            job_id = self.job.id,
                            source = %source_cfg.name,
                            error = %e,
                            "source enumeration failed"
                        );
                        cp.tracker.set_stage_message(stage_idx, e.to_string());
                        cp.tracker.finish_stage(stage_idx, StageStatus::Failed, Utc::now());
                        self.log(&format!("source '{}' unreachable: {e}", source_cfg.name))
                            .await;
                        if single_source {
                            let error = format!("source '{}' unreachable: {e}", source_cfg.name);
                            return self
                                .complete_collection(cp, emitter, JobOutcome::Failed, Some(error))
                                .await;
                        }
                        cp.advance_source();
                        continue;
                    }
                }
            }

            let stage_idx = cp.tracker.stages().len() - 1;
            while cp.next_item < cp.items.len() {
                match self.control() {
                    ControlSignal::Pause => {
                        emitter.force(&cp.tracker).await;
                        return ExecEnd::Paused(cp);
                    }
                    ControlSignal::Cancel => {
                        return self.cancelled(cp, emitter).await;
                    }
                    ControlSignal::Run => {}
                }

                let item = cp.items[cp.next_item].clone();
                cp.tracker.set_current_item(Some(CurrentItem {
                    id: item.id.clone(),
                    label: item.title.clone(),
                }));
                match source.process(&item).await {
                    Ok(()) => cp.tracker.record_success(stage_idx),
                    Err(e) => {
                        cp.tracker.record_failure(
                            stage_idx,
                            FailedItem {
                                id: item.id.clone(),
                                title: item.title.clone(),
                                reason: e.to_string(),
                            },
                        );
                        self.log(&format!("item '{}' failed: {e}", item.id)).await;
                    }
                }
                cp.next_item += 1;
                emitter.maybe_emit(&cp.tracker).await;
            }

            cp.tracker.finish_stage(stage_idx, StageStatus::Completed, Utc::now());
            self.log(&format!("source '{}' complete", source_cfg.name)).await;
            emitter.force(&cp.tracker).await;
            cp.advance_source();
        }

        // A pause/cancel that landed during the final item is still
        // honored before the job is declared done.
        match self.control() {
            ControlSignal::Pause => {
                emitter.force(&cp.tracker).await;
                return ExecEnd::Paused(cp);
            }
            ControlSignal::Cancel => {
                return self.cancelled(cp, emitter).await;
            }
            ControlSignal::Run => {}
        }

        let (outcome, error) = if cp.tracker.all_stages_failed() {
            (
                JobOutcome::Failed,
                Some("all configured sources unreachable".to_string()),
            )
        } else {
            (JobOutcome::Completed, None)
        };
        self.complete_collection(cp, emitter, outcome, error).await
    }

    async fn complete_collection(
        &self,
        mut cp: Checkpoint,
        mut emitter: ProgressEmitter,
        outcome: JobOutcome,
        error: Option<String>,
    ) -> ExecEnd {
        cp.tracker.finish(Utc::now());
        emitter.force(&cp.tracker).await;

        let snap = cp.tracker.snapshot(Utc::now());
        let result = json!({
            "total_count": snap.total_count,
            "completed_count": snap.completed_count,
            "failed_count": snap.failed_count,
            "success_rate": snap.success_rate,
            "failed_items": cp.tracker.failed_items(),
        });
        self.finish(cp, outcome, error, Some(result)).await
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    async fn run_backup(self, cfg: BackupConfig, resume: Option<Checkpoint>) -> ExecEnd {
        let mut emitter = ProgressEmitter::new(self.db.clone(), Arc::clone(&self.hub), self.job.id);
        let mut cp = resume.unwrap_or_else(Checkpoint::fresh);
        cp.tracker.start(Utc::now());

        if !cp.done {
            let stage_idx = if cp.tracker.stages().is_empty() {
                cp.tracker.push_stage(
                    "backup",
                    format!("{} database backup", cfg.kind.as_str()),
                    Utc::now(),
                )
            } else {
                cp.tracker.stages().len() - 1
            };
            emitter.force(&cp.tracker).await;

            match self.control() {
                ControlSignal::Pause => {
                    emitter.force(&cp.tracker).await;
                    return ExecEnd::Paused(cp);
                }
                ControlSignal::Cancel => {
                    return self.cancelled(cp, emitter).await;
                }
                ControlSignal::Run => {}
            }

            self.log("backup started").await;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let run = self.backups.run(cfg.kind, tx);
            tokio::pin!(run);
            let result = loop {
                tokio::select! {
                    res = &mut run => break res,
                    Some(pct) = rx.recv() => {
                        cp.tracker.set_stage_percent(stage_idx, pct);
                        emitter.maybe_emit(&cp.tracker).await;
                    }
                }
            };
            while let Ok(pct) = rx.try_recv() {
                cp.tracker.set_stage_percent(stage_idx, pct);
            }

            match result {
                Ok(summary) => {
                    cp.tracker.set_stage_percent(stage_idx, 100);
                    cp.tracker
                        .finish_stage(stage_idx, StageStatus::Completed, Utc::now());
                    self.log(&format!("backup written to {}", summary.path.display()))
                        .await;
                    cp.summary = serde_json::to_value(&summary).ok();
                    cp.done = true;
                }
                Err(e) => {
                    cp.tracker.set_stage_message(stage_idx, e.to_string());
                    cp.tracker
                        .finish_stage(stage_idx, StageStatus::Failed, Utc::now());
                    cp.tracker.finish(Utc::now());
                    emitter.force(&cp.tracker).await;
                    let error = format!("backup failed: {e}");
                    return self.finish(cp, JobOutcome::Failed, Some(error), None).await;
                }
            }
        }

        match self.control() {
            ControlSignal::Pause => {
                emitter.force(&cp.tracker).await;
                return ExecEnd::Paused(cp);
            }
            ControlSignal::Cancel => {
                return self.cancelled(cp, emitter).await;
            }
            ControlSignal::Run => {}
        }

        cp.tracker.finish(Utc::now());
        emitter.force(&cp.tracker).await;
        let result = cp.summary.clone();
        self.finish(cp, JobOutcome::Completed, None, result).await
    }

    // ------------------------------------------------------------------
    // Terminal paths
    // ------------------------------------------------------------------

    /// Cancel observed at a suspension point: finalize the in-flight stage
    /// with the synthetic `cancelled` marker and flush the final snapshot.
    /// The status transition itself is the supervisor's, which is awaiting
    /// this executor before it writes `cancelled` and emits the terminal
    /// event.
    async fn cancelled(&self, mut cp: Checkpoint, mut emitter: ProgressEmitter) -> ExecEnd {
        if let Some(idx) = cp
            .tracker
            .stages()
            .iter()
            .position(|s| !s.status.is_terminal())
        {
            cp.tracker
                .finish_stage(idx, StageStatus::Cancelled, Utc::now());
        }
        cp.tracker.finish(Utc::now());
        emitter.force(&cp.tracker).await;
        self.log("job cancelled").await;
        ExecEnd::Cancelled
    }

    /// Record the natural end of the run. When the conditional finish is
    /// refused (operator transition won the race), fall back to that
    /// transition's verdict.
    async fn finish(
        &self,
        cp: Checkpoint,
        outcome: JobOutcome,
        error: Option<String>,
        result: Option<serde_json::Value>,
    ) -> ExecEnd {
        match self
            .lifecycle
            .finish(self.job.id, outcome, error.as_deref(), result.as_ref())
            .await
        {
            Ok(Some(_)) => match outcome {
                JobOutcome::Completed => ExecEnd::Completed,
                JobOutcome::Failed => ExecEnd::Failed,
            },
            Ok(None) => match self.db.get_job(self.job.id).await {
                Ok(Some(r)) if r.status == docharvest_core::JobStatus::Paused => {
                    ExecEnd::Paused(cp)
                }
                _ => ExecEnd::Cancelled,
            },
            Err(e) => {
                tracing::error!(job_id = self.job.id, error = %e, "failed to record job finish");
                ExecEnd::Failed
            }
        }
    }
}
