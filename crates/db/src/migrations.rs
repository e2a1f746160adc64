/// Inline SQL migrations for the docharvest job store.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    config TEXT NOT NULL,
    progress TEXT,
    progress_log TEXT NOT NULL DEFAULT '',
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER
);
"#,
    // Migration 2: jobs indexes
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_type ON jobs(job_type);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);
"#,
    // Migration 3: schedules table
    r#"
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    target_job_type TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    config TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 0,
    last_run_time INTEGER,
    last_run_status TEXT,
    next_run_time INTEGER,
    created_at INTEGER NOT NULL
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_schedules_enabled ON schedules(is_enabled);
"#,
];
