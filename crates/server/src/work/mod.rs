// crates/server/src/work/mod.rs
//! Boundary traits for the collaborators the orchestration core drives.
//!
//! The execution coordinator only ever sees these traits: a `WorkSource`
//! enumerates and processes items, a `SourceFactory` builds one per
//! configured source, and a `BackupProvider` runs a backup while
//! reporting percent progress. The bundled implementations
//! (`HttpSourceFactory`, `SqliteBackupProvider`) are thin adapters;
//! scraping, rendering, and document storage stay outside this system.

pub mod backup;
pub mod http;

pub use backup::SqliteBackupProvider;
pub use http::HttpSourceFactory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use docharvest_core::{BackupKind, CollectionConfig, SourceConfig};
use docharvest_db::DbError;

/// One unit of work enumerated from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// A whole source is unreachable (enumeration failed).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    BadResponse(String),

    #[error("{0}")]
    Unavailable(String),
}

/// A single item failed; recorded and skipped.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

/// Filters applied by a source when enumerating its work items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilters {
    pub keywords: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub max_pages: Option<u32>,
}

impl From<&CollectionConfig> for ItemFilters {
    fn from(cfg: &CollectionConfig) -> Self {
        Self {
            keywords: cfg.keywords.clone(),
            start_date: cfg.start_date.clone(),
            end_date: cfg.end_date.clone(),
            max_pages: cfg.max_pages,
        }
    }
}

/// One configured work source: enumerate the plan, then process items one
/// at a time. The coordinator owns ordering, retry-on-item-failure, and
/// pause/cancel; implementations own their I/O and its timeouts.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError>;
    async fn process(&self, item: &WorkItem) -> Result<(), ItemError>;
}

/// Builds a `WorkSource` for one source config plus the job's filters.
pub trait SourceFactory: Send + Sync {
    fn build(&self, config: &SourceConfig, filters: &ItemFilters) -> Box<dyn WorkSource>;
}

/// Result summary of a completed backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub kind: BackupKind,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one backup, reporting completion percent (0..=100) through the
/// channel as it goes. Dropping the receiver must not fail the backup.
#[async_trait]
pub trait BackupProvider: Send + Sync {
    async fn run(
        &self,
        kind: BackupKind,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<BackupSummary, BackupError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fakes for coordinator and route tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Scripted behavior for one mock source, keyed by source name.
    #[derive(Default)]
    pub struct MockPlan {
        pub items: Vec<WorkItem>,
        /// Item ids whose `process` call fails.
        pub fail_ids: Vec<String>,
        /// Whether `enumerate` itself fails.
        pub enumerate_error: bool,
        /// When present, each `process` call first acquires a permit, so
        /// tests can step the executor item by item.
        pub gate: Option<Arc<Semaphore>>,
    }

    #[derive(Default)]
    pub struct MockSourceFactory {
        plans: Mutex<HashMap<String, Arc<MockPlan>>>,
        /// Every processed item id, across all sources, in order.
        processed: Arc<Mutex<Vec<String>>>,
    }

    impl MockSourceFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_plan(&self, source_name: &str, plan: MockPlan) {
            self.plans
                .lock()
                .unwrap()
                .insert(source_name.to_string(), Arc::new(plan));
        }

        pub fn processed(&self) -> Vec<String> {
            self.processed.lock().unwrap().clone()
        }
    }

    impl SourceFactory for MockSourceFactory {
        fn build(&self, config: &SourceConfig, _filters: &ItemFilters) -> Box<dyn WorkSource> {
            let plan = self
                .plans
                .lock()
                .unwrap()
                .get(&config.name)
                .cloned()
                .unwrap_or_default();
            Box::new(MockSource {
                plan,
                processed: Arc::clone(&self.processed),
            })
        }
    }

    struct MockSource {
        plan: Arc<MockPlan>,
        processed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WorkSource for MockSource {
        async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError> {
            if self.plan.enumerate_error {
                return Err(SourceError::Unavailable("connection refused".into()));
            }
            Ok(self.plan.items.clone())
        }

        async fn process(&self, item: &WorkItem) -> Result<(), ItemError> {
            if let Some(gate) = &self.plan.gate {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }
            self.processed.lock().unwrap().push(item.id.clone());
            if self.plan.fail_ids.contains(&item.id) {
                return Err(ItemError::Other("simulated failure".into()));
            }
            Ok(())
        }
    }

    pub fn items(ids: &[&str]) -> Vec<WorkItem> {
        ids.iter()
            .map(|id| WorkItem {
                id: id.to_string(),
                title: format!("Document {id}"),
                url: format!("https://example.org/docs/{id}"),
            })
            .collect()
    }

    /// Mock backup provider reporting begin/mid/end percents.
    pub struct MockBackupProvider {
        pub fail: bool,
    }

    #[async_trait]
    impl BackupProvider for MockBackupProvider {
        async fn run(
            &self,
            kind: BackupKind,
            progress: mpsc::UnboundedSender<u8>,
        ) -> Result<BackupSummary, BackupError> {
            let _ = progress.send(0);
            let _ = progress.send(50);
            if self.fail {
                return Err(BackupError::Io(std::io::Error::other("disk full")));
            }
            let _ = progress.send(100);
            Ok(BackupSummary {
                kind,
                path: PathBuf::from("/tmp/mock-backup.db"),
                size_bytes: 1024,
            })
        }
    }
}
