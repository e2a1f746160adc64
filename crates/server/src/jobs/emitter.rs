// crates/server/src/jobs/emitter.rs
//! Coalesced snapshot emission.
//!
//! The coordinator produces a snapshot after every item; emitting each one
//! would saturate the store and the streaming gateway under a fast inner
//! loop. Writes are rate-limited to one per interval, with `force` used at
//! stage boundaries, pause, and termination so the snapshot observers
//! care about is never the one that got coalesced away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use docharvest_core::{JobId, ProgressTracker};
use docharvest_db::Database;

use crate::stream::{ProgressFrame, StreamEvent, StreamHub};

/// Minimum interval between coalesced snapshot emissions.
pub(crate) const EMIT_INTERVAL: Duration = Duration::from_millis(200);

pub(crate) struct ProgressEmitter {
    db: Database,
    hub: Arc<StreamHub>,
    job_id: JobId,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressEmitter {
    pub fn new(db: Database, hub: Arc<StreamHub>, job_id: JobId) -> Self {
        Self {
            db,
            hub,
            job_id,
            last_emit: None,
            interval: EMIT_INTERVAL,
        }
    }

    /// Emit unless one was emitted within the coalescing interval.
    pub async fn maybe_emit(&mut self, tracker: &ProgressTracker) {
        let due = self
            .last_emit
            .map(|t| t.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.emit(tracker).await;
        }
    }

    /// Emit unconditionally (stage boundaries, pause, terminal flush).
    pub async fn force(&mut self, tracker: &ProgressTracker) {
        self.emit(tracker).await;
    }

    async fn emit(&mut self, tracker: &ProgressTracker) {
        self.last_emit = Some(Instant::now());
        let snapshot = tracker.snapshot(Utc::now());
        if let Err(e) = self.db.save_job_progress(self.job_id, &snapshot).await {
            tracing::warn!(job_id = self.job_id, error = %e, "failed to persist snapshot");
            return;
        }
        // Status comes from the record so a drain-after-pause emission
        // carries `paused`, not a stale `running`.
        match self.db.get_job(self.job_id).await {
            Ok(Some(record)) => {
                self.hub.publish(
                    self.job_id,
                    StreamEvent::ProgressUpdate(ProgressFrame::from_record(&record)),
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = self.job_id, error = %e, "failed to read record for emit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docharvest_core::{BackupConfig, BackupKind, JobConfig};

    async fn setup() -> (Database, Arc<StreamHub>, JobId) {
        let db = Database::new_in_memory().await.unwrap();
        let hub = Arc::new(StreamHub::new());
        let job = db
            .insert_job(
                "b",
                &JobConfig::Backup(BackupConfig { kind: BackupKind::Full }),
            )
            .await
            .unwrap();
        (db, hub, job.id)
    }

    #[tokio::test]
    async fn test_coalesces_rapid_updates() {
        let (db, hub, id) = setup().await;
        let mut rx = hub.subscribe(id);
        let mut emitter = ProgressEmitter::new(db.clone(), Arc::clone(&hub), id);

        let mut tracker = ProgressTracker::new();
        let now = Utc::now();
        tracker.start(now);
        let idx = tracker.push_stage("s", "", now);
        tracker.set_stage_total(idx, 100);

        // A burst of updates inside one interval produces one emission.
        for _ in 0..10 {
            tracker.record_success(idx);
            emitter.maybe_emit(&tracker).await;
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn test_force_always_emits() {
        let (db, hub, id) = setup().await;
        let mut rx = hub.subscribe(id);
        let mut emitter = ProgressEmitter::new(db.clone(), Arc::clone(&hub), id);

        let mut tracker = ProgressTracker::new();
        let now = Utc::now();
        tracker.start(now);
        let idx = tracker.push_stage("s", "", now);
        tracker.set_stage_total(idx, 2);

        emitter.force(&tracker).await;
        tracker.record_success(idx);
        emitter.force(&tracker).await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);

        // The forced snapshot is also the persisted one.
        let record = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(record.progress.unwrap().completed_count, 1);
    }
}
