// crates/server/src/state.rs
//! Application state for the Axum server.
//!
//! Owns the global tables (active executor table, subscriber map) and
//! injects them into handlers; lifetime tied to the process.

use std::sync::Arc;
use std::time::Instant;

use docharvest_db::Database;

use crate::jobs::JobSupervisor;
use crate::stream::StreamHub;
use crate::work::{BackupProvider, SourceFactory};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job and schedule record store.
    pub db: Database,
    /// Per-job streaming fan-out.
    pub hub: Arc<StreamHub>,
    /// Active executor table + lifecycle machine.
    pub supervisor: Arc<JobSupervisor>,
}

impl AppState {
    /// Create application state wrapped in an `Arc` for sharing. The
    /// work-source and backup boundaries are injected so tests can swap
    /// in fakes.
    pub fn new(
        db: Database,
        sources: Arc<dyn SourceFactory>,
        backups: Arc<dyn BackupProvider>,
    ) -> Arc<Self> {
        let hub = Arc::new(StreamHub::new());
        let supervisor = JobSupervisor::new(db.clone(), Arc::clone(&hub), sources, backups);
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            hub,
            supervisor,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
