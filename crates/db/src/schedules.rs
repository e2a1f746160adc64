// crates/db/src/schedules.rs
//! Schedule definition CRUD and run-outcome recording.
//!
//! Definitions are operator-edited; the scheduler trigger only ever writes
//! the `last_run_*`/`next_run_time` fields.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use docharvest_core::JobType;

use crate::{Database, DbError, DbResult};

/// A cron-triggered template that spawns new job instances.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRecord {
    pub id: i64,
    pub name: String,
    pub target_job_type: JobType,
    pub cron_expression: String,
    pub config: serde_json::Value,
    pub is_enabled: bool,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a definition.
#[derive(Debug, Clone)]
pub struct NewSchedule<'a> {
    pub name: &'a str,
    pub target_job_type: JobType,
    pub cron_expression: &'a str,
    pub config: &'a serde_json::Value,
    pub is_enabled: bool,
    pub next_run_time: Option<DateTime<Utc>>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate<'a> {
    pub name: Option<&'a str>,
    pub cron_expression: Option<&'a str>,
    pub config: Option<&'a serde_json::Value>,
    pub next_run_time: Option<Option<DateTime<Utc>>>,
}

type ScheduleRow = (
    i64,            // id
    String,         // name
    String,         // target_job_type
    String,         // cron_expression
    String,         // config
    i64,            // is_enabled
    Option<i64>,    // last_run_time
    Option<String>, // last_run_status
    Option<i64>,    // next_run_time
    i64,            // created_at
);

const SCHEDULE_COLUMNS: &str = "id, name, target_job_type, cron_expression, config, \
                                is_enabled, last_run_time, last_run_status, next_run_time, \
                                created_at";

fn record_from_row(row: ScheduleRow) -> DbResult<ScheduleRecord> {
    let target_job_type: JobType = row
        .2
        .parse()
        .map_err(|e| DbError::Corrupt(format!("schedule {} type: {e}", row.0)))?;
    let config = serde_json::from_str(&row.4)
        .map_err(|e| DbError::Corrupt(format!("schedule {} config: {e}", row.0)))?;
    Ok(ScheduleRecord {
        id: row.0,
        name: row.1,
        target_job_type,
        cron_expression: row.3,
        config,
        is_enabled: row.5 != 0,
        last_run_time: row.6.map(dt),
        last_run_status: row.7,
        next_run_time: row.8.map(dt),
        created_at: dt(row.9),
    })
}

fn dt(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_default()
}

impl Database {
    /// Insert a new schedule definition.
    pub async fn insert_schedule(&self, new: &NewSchedule<'_>) -> DbResult<ScheduleRecord> {
        let config_text = serde_json::to_string(new.config)
            .map_err(|e| DbError::Corrupt(format!("serialize schedule config: {e}")))?;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO schedules \
             (name, target_job_type, cron_expression, config, is_enabled, next_run_time, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(new.name)
        .bind(new.target_job_type.as_str())
        .bind(new.cron_expression)
        .bind(config_text)
        .bind(new.is_enabled as i64)
        .bind(new.next_run_time.map(|t| t.timestamp()))
        .bind(Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;

        self.get_schedule(row.0)
            .await?
            .ok_or_else(|| DbError::Corrupt(format!("schedule {} vanished after insert", row.0)))
    }

    pub async fn get_schedule(&self, id: i64) -> DbResult<Option<ScheduleRecord>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?");
        let row: Option<ScheduleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(record_from_row).transpose()
    }

    /// All definitions, oldest first.
    pub async fn list_schedules(&self) -> DbResult<Vec<ScheduleRecord>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY id");
        let rows: Vec<ScheduleRow> = sqlx::query_as(&sql).fetch_all(self.pool()).await?;
        rows.into_iter().map(record_from_row).collect()
    }

    /// Only enabled definitions (the scheduler's working set).
    pub async fn list_enabled_schedules(&self) -> DbResult<Vec<ScheduleRecord>> {
        let sql =
            format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE is_enabled = 1 ORDER BY id");
        let rows: Vec<ScheduleRow> = sqlx::query_as(&sql).fetch_all(self.pool()).await?;
        rows.into_iter().map(record_from_row).collect()
    }

    pub async fn schedule_name_exists(&self, name: &str) -> DbResult<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schedules WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0 > 0)
    }

    /// Apply a partial update. Returns the updated record, or `None` if
    /// the definition does not exist.
    pub async fn update_schedule(
        &self,
        id: i64,
        update: &ScheduleUpdate<'_>,
    ) -> DbResult<Option<ScheduleRecord>> {
        if let Some(name) = update.name {
            sqlx::query("UPDATE schedules SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        if let Some(expr) = update.cron_expression {
            sqlx::query("UPDATE schedules SET cron_expression = ? WHERE id = ?")
                .bind(expr)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        if let Some(config) = update.config {
            let text = serde_json::to_string(config)
                .map_err(|e| DbError::Corrupt(format!("serialize schedule config: {e}")))?;
            sqlx::query("UPDATE schedules SET config = ? WHERE id = ?")
                .bind(text)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        if let Some(next) = update.next_run_time {
            sqlx::query("UPDATE schedules SET next_run_time = ? WHERE id = ?")
                .bind(next.map(|t| t.timestamp()))
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        self.get_schedule(id).await
    }

    /// Enable or disable a definition. Returns the updated record.
    pub async fn set_schedule_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> DbResult<Option<ScheduleRecord>> {
        sqlx::query("UPDATE schedules SET is_enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_schedule(id).await
    }

    /// Record the outcome of a fired run and the next fire time.
    pub async fn record_schedule_run(
        &self,
        id: i64,
        run_time: DateTime<Utc>,
        status: &str,
        next_run_time: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE schedules SET last_run_time = ?, last_run_status = ?, next_run_time = ? \
             WHERE id = ?",
        )
        .bind(run_time.timestamp())
        .bind(status)
        .bind(next_run_time.map(|t| t.timestamp()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, id: i64) -> DbResult<bool> {
        let res = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
