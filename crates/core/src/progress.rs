// crates/core/src/progress.rs
//! Progress accounting for multi-stage jobs.
//!
//! `ProgressTracker` accumulates raw counters while a job runs;
//! `ProgressSnapshot` is the derived, serializable view pushed to
//! observers and stored on the job record. Totals are `Option` throughout:
//! `None` means "not yet enumerated", which is distinct from an
//! enumerated-but-empty plan (`Some(0)`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cap on the per-job failed-items list.
const MAX_FAILED_ITEMS: usize = 50;

/// Lifecycle status of a single stage. Independent of the job's own
/// status; `Cancelled` is the synthetic marker applied when the job is
/// cancelled while the stage is mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Cancelled
        )
    }
}

/// One ordered phase of a job's work plan (e.g. one configured source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub description: String,
    pub total_count: Option<u64>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub progress_percent: Option<u8>,
    pub success_rate: f64,
    pub status: StageStatus,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Stage {
    fn new(name: impl Into<String>, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            total_count: None,
            completed_count: 0,
            failed_count: 0,
            progress_percent: None,
            success_rate: 0.0,
            status: StageStatus::Running,
            message: String::new(),
            started_at: Some(now),
            ended_at: None,
        }
    }

    fn recompute(&mut self) {
        let processed = self.completed_count + self.failed_count;
        self.progress_percent = self.total_count.map(|t| percent(processed, t));
        self.success_rate = success_rate(self.completed_count, self.failed_count);
    }
}

/// The in-flight work unit, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub id: String,
    pub label: String,
}

/// A work item that failed. Recorded and skipped; never aborts the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub title: String,
    pub reason: String,
}

/// Point-in-time progress summary derived from raw counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_count: Option<u64>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub success_rate: f64,
    pub progress_percent: Option<u8>,
    pub current_item: Option<CurrentItem>,
    pub elapsed_time: Option<f64>,
    pub stages: Vec<Stage>,
    pub current_stage_progress: Option<u8>,
}

/// Accumulates raw counters for one job run and derives snapshots.
///
/// Owned by the execution coordinator; every mutation keeps the per-stage
/// derived fields in sync so a snapshot is a cheap clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    total_count: Option<u64>,
    completed_count: u64,
    failed_count: u64,
    current_item: Option<CurrentItem>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failed_items: Vec<FailedItem>,
    stages: Vec<Stage>,
    current_stage: Option<usize>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total_count: None,
            completed_count: 0,
            failed_count: 0,
            current_item: None,
            started_at: None,
            ended_at: None,
            failed_items: Vec::new(),
            stages: Vec::new(),
            current_stage: None,
        }
    }

    /// Mark the start of the run. Idempotent; the first call wins.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started_at.get_or_insert(now);
    }

    /// Append a new stage in work-plan order and make it current.
    /// Returns the stage index.
    pub fn push_stage(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> usize {
        self.stages.push(Stage::new(name, description, now));
        let idx = self.stages.len() - 1;
        self.current_stage = Some(idx);
        idx
    }

    /// Record the enumerated item count for a stage. The job-level total
    /// grows as each stage's enumeration completes.
    pub fn set_stage_total(&mut self, idx: usize, total: u64) {
        if let Some(stage) = self.stages.get_mut(idx) {
            stage.total_count = Some(total);
            stage.recompute();
            self.total_count = Some(self.total_count.unwrap_or(0) + total);
        }
    }

    pub fn set_stage_message(&mut self, idx: usize, message: impl Into<String>) {
        if let Some(stage) = self.stages.get_mut(idx) {
            stage.message = message.into();
        }
    }

    pub fn set_current_item(&mut self, item: Option<CurrentItem>) {
        self.current_item = item;
    }

    /// One item processed successfully in the given stage.
    pub fn record_success(&mut self, idx: usize) {
        self.completed_count += 1;
        if let Some(stage) = self.stages.get_mut(idx) {
            stage.completed_count += 1;
            stage.recompute();
        }
    }

    /// One item failed in the given stage. The failed-items list is
    /// bounded; overflow is counted but not retained.
    pub fn record_failure(&mut self, idx: usize, item: FailedItem) {
        self.failed_count += 1;
        if let Some(stage) = self.stages.get_mut(idx) {
            stage.failed_count += 1;
            stage.recompute();
        }
        if self.failed_items.len() < MAX_FAILED_ITEMS {
            self.failed_items.push(item);
        }
    }

    /// Relay an externally-reported completion percentage into a stage
    /// (backup providers report begin/percent/end rather than item counts).
    /// The stage total is pinned to 100 and `completed` tracks the percent.
    pub fn set_stage_percent(&mut self, idx: usize, pct: u8) {
        if let Some(stage) = self.stages.get_mut(idx) {
            let pct = u64::from(pct.min(100));
            if stage.total_count != Some(100) {
                stage.total_count = Some(100);
                self.total_count = Some(self.total_count.unwrap_or(0) + 100);
            }
            self.completed_count += pct.saturating_sub(stage.completed_count);
            stage.completed_count = stage.completed_count.max(pct);
            stage.recompute();
        }
    }

    /// Finalize a stage. Counts freeze at their current values.
    pub fn finish_stage(&mut self, idx: usize, status: StageStatus, now: DateTime<Utc>) {
        if let Some(stage) = self.stages.get_mut(idx) {
            stage.status = status;
            stage.ended_at = Some(now);
        }
        if self.current_stage == Some(idx) {
            self.current_item = None;
        }
    }

    /// Mark the end of the run (freezes `elapsed_time`).
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now);
        self.current_item = None;
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn failed_items(&self) -> &[FailedItem] {
        &self.failed_items
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether every stage ended in failure (an all-sources-unreachable
    /// run is a failed job, not an empty completed one).
    pub fn all_stages_failed(&self) -> bool {
        !self.stages.is_empty()
            && self
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Failed)
    }

    /// Build the derived snapshot.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ProgressSnapshot {
        let processed = self.completed_count + self.failed_count;
        let elapsed_time = self.started_at.map(|start| {
            let end = self.ended_at.unwrap_or(now);
            (end - start).num_milliseconds() as f64 / 1000.0
        });
        ProgressSnapshot {
            total_count: self.total_count,
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            success_rate: success_rate(self.completed_count, self.failed_count),
            progress_percent: match self.total_count {
                Some(t) if t > 0 => Some(percent(processed, t)),
                Some(_) => Some(100),
                None => None,
            },
            current_item: self.current_item.clone(),
            elapsed_time,
            stages: self.stages.clone(),
            current_stage_progress: self
                .current_stage
                .and_then(|idx| self.stages.get(idx))
                .and_then(|s| s.progress_percent),
        }
    }
}

fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round() as u64;
    pct.min(100) as u8
}

fn success_rate(completed: u64, failed: u64) -> f64 {
    let processed = completed + failed;
    if processed == 0 {
        0.0
    } else {
        completed as f64 / processed as f64
    }
}
