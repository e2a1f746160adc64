// crates/db/src/jobs.rs
//! Job record CRUD and the write paths used by the lifecycle machine and
//! progress aggregator.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use docharvest_core::{JobConfig, JobId, JobStatus, JobType, ProgressSnapshot};

use crate::{Database, DbError, DbResult};

/// Bounded progress log: at most this many lines / bytes are retained.
const LOG_MAX_LINES: usize = 100;
const LOG_MAX_BYTES: usize = 8192;
const LOG_MAX_LINE_BYTES: usize = 500;

/// A full job record as stored.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: JobConfig,
    pub progress: Option<ProgressSnapshot>,
    pub progress_log: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Compact job view for list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Full job view: the record plus its latest progress snapshot. This is
/// the one shape served by both the polling endpoint and the SSE initial
/// event, so the two delivery paths cannot drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: serde_json::Value,
    pub progress_percent: Option<u8>,
    pub progress: Option<ProgressSnapshot>,
    pub progress_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobSummary {
    fn from(r: JobRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            job_type: r.job_type,
            status: r.status,
            progress_percent: r.progress.as_ref().and_then(|p| p.progress_percent),
            error: r.error,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
        }
    }
}

impl From<JobRecord> for JobDetail {
    fn from(r: JobRecord) -> Self {
        let config = serde_json::to_value(&r.config).unwrap_or(serde_json::Value::Null);
        Self {
            id: r.id,
            name: r.name,
            job_type: r.job_type,
            status: r.status,
            config,
            progress_percent: r.progress.as_ref().and_then(|p| p.progress_percent),
            progress: r.progress,
            progress_log: r.progress_log,
            result: r.result,
            error: r.error,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
        }
    }
}

/// Filters and pagination for job listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub page: u32,
    pub page_size: u32,
}

/// One page of job summaries plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<JobSummary>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

type JobRow = (
    i64,            // id
    String,         // name
    String,         // job_type
    String,         // status
    String,         // config
    Option<String>, // progress
    String,         // progress_log
    Option<String>, // result
    Option<String>, // error
    i64,            // created_at
    Option<i64>,    // started_at
    Option<i64>,    // completed_at
);

const JOB_COLUMNS: &str = "id, name, job_type, status, config, progress, progress_log, \
                           result, error, created_at, started_at, completed_at";

fn record_from_row(row: JobRow) -> DbResult<JobRecord> {
    let job_type: JobType = row
        .2
        .parse()
        .map_err(|e| DbError::Corrupt(format!("job {} type: {e}", row.0)))?;
    let status: JobStatus = row
        .3
        .parse()
        .map_err(|e| DbError::Corrupt(format!("job {} status: {e}", row.0)))?;
    let config_value: serde_json::Value = serde_json::from_str(&row.4)
        .map_err(|e| DbError::Corrupt(format!("job {} config: {e}", row.0)))?;
    let config = JobConfig::from_value(job_type, config_value)
        .map_err(|e| DbError::Corrupt(format!("job {} config: {e}", row.0)))?;
    let progress = match row.5 {
        Some(text) => Some(
            serde_json::from_str(&text)
                .map_err(|e| DbError::Corrupt(format!("job {} progress: {e}", row.0)))?,
        ),
        None => None,
    };
    let result = match row.7 {
        Some(text) => Some(
            serde_json::from_str(&text)
                .map_err(|e| DbError::Corrupt(format!("job {} result: {e}", row.0)))?,
        ),
        None => None,
    };
    Ok(JobRecord {
        id: row.0,
        name: row.1,
        job_type,
        status,
        config,
        progress,
        progress_log: row.6,
        result,
        error: row.8,
        created_at: dt(row.9),
        started_at: row.10.map(dt),
        completed_at: row.11.map(dt),
    })
}

fn dt(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_default()
}

impl Database {
    /// Insert a new job in `pending` status.
    pub async fn insert_job(&self, name: &str, config: &JobConfig) -> DbResult<JobRecord> {
        let config_text = serde_json::to_string(config)
            .map_err(|e| DbError::Corrupt(format!("serialize config: {e}")))?;
        let now = Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO jobs (name, job_type, status, config, created_at) \
             VALUES (?, ?, 'pending', ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(config.job_type().as_str())
        .bind(config_text)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        self.get_job(row.0)
            .await?
            .ok_or_else(|| DbError::Corrupt(format!("job {} vanished after insert", row.0)))
    }

    /// Fetch one job record.
    pub async fn get_job(&self, id: JobId) -> DbResult<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(record_from_row).transpose()
    }

    /// List jobs, newest first, filtered and paginated.
    pub async fn list_jobs(&self, filter: &JobFilter) -> DbResult<JobPage> {
        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);

        let mut where_clauses = Vec::new();
        if filter.job_type.is_some() {
            where_clauses.push("job_type = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs{where_sql}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(t) = filter.job_type {
            count_query = count_query.bind(t.as_str());
        }
        if let Some(s) = filter.status {
            count_query = count_query.bind(s.as_str());
        }
        let total = count_query.fetch_one(self.pool()).await?.0 as u64;

        let list_sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs{where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, JobRow>(&list_sql);
        if let Some(t) = filter.job_type {
            list_query = list_query.bind(t.as_str());
        }
        if let Some(s) = filter.status {
            list_query = list_query.bind(s.as_str());
        }
        let rows = list_query
            .bind(page_size as i64)
            .bind(((page - 1) * page_size) as i64)
            .fetch_all(self.pool())
            .await?;

        let items = rows
            .into_iter()
            .map(|r| record_from_row(r).map(JobSummary::from))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(JobPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Write a bare status change (pause/cancel paths).
    pub async fn update_job_status(&self, id: JobId, status: JobStatus) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Transition to `running`, stamping `started_at` on the first start
    /// only.
    pub async fn record_job_start(&self, id: JobId) -> DbResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'running', \
             started_at = COALESCE(started_at, ?) WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Write a terminal status with `completed_at`, optional error, and
    /// optional result summary. Partial progress is left untouched.
    pub async fn record_job_finish(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> DbResult<()> {
        let result_text = match result {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| DbError::Corrupt(format!("serialize result: {e}")))?,
            ),
            None => None,
        };
        sqlx::query(
            "UPDATE jobs SET status = ?, error = ?, result = ?, completed_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(result_text)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Atomically finish a job that is still `running`.
    ///
    /// Returns `false` without writing anything when the status is no
    /// longer `running` (an operator cancelled or paused it between the
    /// executor's last control check and its natural end).
    pub async fn try_finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> DbResult<bool> {
        let result_text = match result {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| DbError::Corrupt(format!("serialize result: {e}")))?,
            ),
            None => None,
        };
        let res = sqlx::query(
            "UPDATE jobs SET status = ?, error = ?, result = ?, completed_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(result_text)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Persist the latest progress snapshot (the record keeps no history).
    pub async fn save_job_progress(
        &self,
        id: JobId,
        snapshot: &ProgressSnapshot,
    ) -> DbResult<()> {
        let text = serde_json::to_string(snapshot)
            .map_err(|e| DbError::Corrupt(format!("serialize progress: {e}")))?;
        sqlx::query("UPDATE jobs SET progress = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Append a timestamped line to the bounded progress log.
    pub async fn append_job_log(&self, id: JobId, message: &str) -> DbResult<()> {
        let current: Option<(String,)> =
            sqlx::query_as("SELECT progress_log FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        let Some((log,)) = current else {
            return Ok(());
        };

        let mut message = message.replace('\n', " ");
        if message.len() > LOG_MAX_LINE_BYTES {
            message = truncate_utf8(&message, LOG_MAX_LINE_BYTES).to_string() + "...";
        }
        let stamp = Utc::now().format("%H:%M:%S");
        let mut lines: Vec<&str> = log.lines().collect();
        let new_line = format!("[{stamp}] {message}");
        lines.push(&new_line);
        if lines.len() > LOG_MAX_LINES {
            lines.drain(..lines.len() - LOG_MAX_LINES);
        }
        let mut joined = lines.join("\n");
        if joined.len() > LOG_MAX_BYTES {
            let mut cut = joined.len() - LOG_MAX_BYTES;
            while !joined.is_char_boundary(cut) {
                cut += 1;
            }
            joined = joined[cut..].to_string();
        }

        sqlx::query("UPDATE jobs SET progress_log = ? WHERE id = ?")
            .bind(joined)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete a job record. Returns whether a row was removed.
    pub async fn delete_job(&self, id: JobId) -> DbResult<bool> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Startup drain: records left `running` or `paused` by a dead process
    /// are failed (checkpoints are memory-only and did not survive).
    /// Returns the number of records drained.
    pub async fn fail_interrupted_jobs(&self, note: &str) -> DbResult<u64> {
        let res = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, completed_at = ? \
             WHERE status IN ('running', 'paused')",
        )
        .bind(note)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(res.rows_affected())
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
