// crates/server/src/scheduler.rs
//! The cron trigger: spawns job instances from schedule definitions.
//!
//! A fixed tick evaluates every enabled definition against the current
//! minute; each (definition, minute) pair fires at most once. Missed
//! ticks during downtime are not backfilled — only the next matching
//! minute after restart fires. Run outcomes are recorded on the
//! definition once the spawned job reaches a terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use tokio::task::JoinHandle;

use docharvest_core::{CronExpression, JobConfig, JobId};
use docharvest_db::{Database, ScheduleRecord};

use crate::jobs::JobSupervisor;

/// How often schedule definitions are evaluated.
const TICK_INTERVAL: Duration = Duration::from_secs(20);

/// How often a fired job is polled for its terminal status.
const OUTCOME_POLL_INTERVAL: Duration = Duration::from_millis(2000);

pub struct Scheduler {
    db: Database,
    supervisor: Arc<JobSupervisor>,
    outcome_poll: Duration,
    /// Last minute each definition fired in, for per-minute dedup.
    fired: StdMutex<HashMap<i64, NaiveDateTime>>,
}

impl Scheduler {
    pub fn new(db: Database, supervisor: Arc<JobSupervisor>) -> Arc<Self> {
        Self::with_outcome_poll(db, supervisor, OUTCOME_POLL_INTERVAL)
    }

    /// Test hook: shorten the outcome-poll interval.
    pub fn with_outcome_poll(
        db: Database,
        supervisor: Arc<JobSupervisor>,
        outcome_poll: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            supervisor,
            outcome_poll,
            fired: StdMutex::new(HashMap::new()),
        })
    }

    /// Run the tick loop until the process exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.evaluate(Utc::now().naive_utc()).await;
            }
        })
    }

    /// Evaluate all enabled definitions against one instant.
    pub async fn evaluate(&self, now: NaiveDateTime) {
        let minute = truncate_to_minute(now);
        let schedules = match self.db.list_enabled_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::error!(error = %e, "failed to load schedule definitions");
                return;
            }
        };

        for schedule in schedules {
            let expr: CronExpression = match schedule.cron_expression.parse() {
                Ok(expr) => expr,
                Err(e) => {
                    tracing::warn!(
                        schedule_id = schedule.id,
                        expression = %schedule.cron_expression,
                        error = %e,
                        "skipping schedule with invalid cron expression"
                    );
                    continue;
                }
            };
            if !expr.matches(minute) {
                continue;
            }
            {
                let mut fired = self.fired.lock().expect("fired map poisoned");
                if fired.get(&schedule.id) == Some(&minute) {
                    continue;
                }
                fired.insert(schedule.id, minute);
            }
            match self.fire(&schedule, &expr, minute).await {
                Ok(job_id) => {
                    tracing::info!(
                        schedule_id = schedule.id,
                        job_id,
                        minute = %minute,
                        "schedule fired"
                    );
                }
                Err(e) => {
                    tracing::error!(schedule_id = schedule.id, error = %e, "schedule fire failed");
                    let next = self.next_fire(&expr, minute);
                    if let Err(e) = self
                        .db
                        .record_schedule_run(schedule.id, to_utc(minute), "failed", next)
                        .await
                    {
                        tracing::error!(schedule_id = schedule.id, error = %e, "failed to record run");
                    }
                }
            }
        }
    }

    /// Instantiate a job from the template and start it; a watcher task
    /// records the outcome once the job goes terminal.
    async fn fire(
        &self,
        schedule: &ScheduleRecord,
        expr: &CronExpression,
        minute: NaiveDateTime,
    ) -> anyhow::Result<JobId> {
        let config = JobConfig::from_value(schedule.target_job_type, schedule.config.clone())?;
        let name = format!("{} @ {}", schedule.name, minute.format("%Y-%m-%d %H:%M"));
        let record = self.db.insert_job(&name, &config).await?;
        self.supervisor.start(record.id).await?;

        tokio::spawn(watch_outcome(
            self.db.clone(),
            schedule.id,
            record.id,
            to_utc(minute),
            self.next_fire(expr, minute),
            self.outcome_poll,
        ));
        Ok(record.id)
    }

    fn next_fire(&self, expr: &CronExpression, after: NaiveDateTime) -> Option<DateTime<Utc>> {
        expr.next_after(after).map(to_utc)
    }
}

/// Poll a fired job until it goes terminal, then record the outcome on
/// its definition. Success iff the job completed.
async fn watch_outcome(
    db: Database,
    schedule_id: i64,
    job_id: JobId,
    run_time: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
    poll: Duration,
) {
    let status = loop {
        tokio::time::sleep(poll).await;
        match db.get_job(job_id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                break if record.status == docharvest_core::JobStatus::Completed {
                    "success"
                } else {
                    "failed"
                };
            }
            Ok(Some(_)) => continue,
            Ok(None) => break "failed", // job deleted mid-run
            Err(e) => {
                tracing::warn!(job_id, error = %e, "outcome poll failed");
            }
        }
    };
    if let Err(e) = db
        .record_schedule_run(schedule_id, run_time, status, next_run)
        .await
    {
        tracing::error!(schedule_id, error = %e, "failed to record run outcome");
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn to_utc(t: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    use docharvest_core::{JobStatus, JobType};
    use docharvest_db::{JobFilter, NewSchedule};

    use crate::stream::StreamHub;
    use crate::work::testing::{items, MockBackupProvider, MockPlan, MockSourceFactory};

    const WAIT: Duration = Duration::from_secs(5);

    struct Rig {
        db: Database,
        scheduler: Arc<Scheduler>,
    }

    async fn rig() -> Rig {
        let db = Database::new_in_memory().await.unwrap();
        let hub = Arc::new(StreamHub::new());
        let factory = MockSourceFactory::new();
        factory.set_plan(
            "ministry",
            MockPlan {
                items: items(&["d1", "d2"]),
                ..Default::default()
            },
        );
        let supervisor = JobSupervisor::new(
            db.clone(),
            hub,
            factory,
            Arc::new(MockBackupProvider { fail: false }),
        );
        let scheduler =
            Scheduler::with_outcome_poll(db.clone(), supervisor, Duration::from_millis(20));
        Rig { db, scheduler }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn collection_template() -> serde_json::Value {
        json!({
            "sources": [{
                "name": "ministry",
                "base_url": "https://example.org",
                "search_api": "https://example.org/api/search",
            }],
        })
    }

    async fn insert_schedule(db: &Database, enabled: bool) -> i64 {
        let config = collection_template();
        db.insert_schedule(&NewSchedule {
            name: "nightly",
            target_job_type: JobType::Collection,
            cron_expression: "0 2 * * *",
            config: &config,
            is_enabled: enabled,
            next_run_time: None,
        })
        .await
        .unwrap()
        .id
    }

    async fn job_count(db: &Database) -> u64 {
        db.list_jobs(&JobFilter { page: 1, page_size: 100, ..Default::default() })
            .await
            .unwrap()
            .total
    }

    #[tokio::test]
    async fn test_disabled_schedule_does_not_fire() {
        let r = rig().await;
        insert_schedule(&r.db, false).await;
        r.scheduler.evaluate(at(2, 0)).await;
        assert_eq!(job_count(&r.db).await, 0);
    }

    #[tokio::test]
    async fn test_enabled_schedule_fires_once_per_minute() {
        let r = rig().await;
        let id = insert_schedule(&r.db, false).await;
        // Re-enabled before 02:00: the 02:00 tick fires exactly once.
        r.db.set_schedule_enabled(id, true).await.unwrap();

        r.scheduler.evaluate(at(1, 59)).await;
        assert_eq!(job_count(&r.db).await, 0);

        r.scheduler.evaluate(at(2, 0)).await;
        assert_eq!(job_count(&r.db).await, 1);

        // Two ticks can land in the same minute; still one instance.
        r.scheduler
            .evaluate(at(2, 0) + chrono::Duration::seconds(20))
            .await;
        assert_eq!(job_count(&r.db).await, 1);

        r.scheduler.evaluate(at(2, 1)).await;
        assert_eq!(job_count(&r.db).await, 1);
    }

    #[tokio::test]
    async fn test_run_outcome_recorded_on_completion() {
        let r = rig().await;
        let id = insert_schedule(&r.db, true).await;
        r.scheduler.evaluate(at(2, 0)).await;

        let record = tokio::time::timeout(WAIT, async {
            loop {
                let record = r.db.get_schedule(id).await.unwrap().unwrap();
                if record.last_run_status.is_some() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run outcome recorded");

        assert_eq!(record.last_run_status.as_deref(), Some("success"));
        assert_eq!(
            record.last_run_time.unwrap(),
            to_utc(at(2, 0))
        );
        // Next fire is tomorrow 02:00.
        assert_eq!(record.next_run_time.unwrap(), to_utc(at(2, 0)) + chrono::Duration::days(1));

        // The spawned job ran to completion with the template config.
        let jobs = r
            .db
            .list_jobs(&JobFilter { page: 1, page_size: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(jobs.items.len(), 1);
        assert_eq!(jobs.items[0].status, JobStatus::Completed);
        assert!(jobs.items[0].name.starts_with("nightly @ "));
    }

    #[tokio::test]
    async fn test_invalid_template_records_failed_run() {
        let r = rig().await;
        let bad_config = json!({ "sources": [] });
        let id = r
            .db
            .insert_schedule(&NewSchedule {
                name: "broken",
                target_job_type: JobType::Collection,
                cron_expression: "0 2 * * *",
                config: &bad_config,
                is_enabled: true,
                next_run_time: None,
            })
            .await
            .unwrap()
            .id;

        r.scheduler.evaluate(at(2, 0)).await;
        let record = r.db.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(record.last_run_status.as_deref(), Some("failed"));
        assert_eq!(job_count(&r.db).await, 0);
    }

    #[tokio::test]
    async fn test_nonmatching_minute_does_not_fire() {
        let r = rig().await;
        insert_schedule(&r.db, true).await;
        for minute in [at(1, 0), at(2, 1), at(3, 0), at(14, 30)] {
            r.scheduler.evaluate(minute).await;
        }
        assert_eq!(job_count(&r.db).await, 0);
    }
}
