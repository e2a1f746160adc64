// crates/server/src/work/backup.rs
//! Backup provider for the job store's own SQLite database.
//!
//! `VACUUM INTO` produces a consistent standalone snapshot without
//! blocking writers. SQLite has no native incremental mode, so an
//! `incremental` request also takes a full snapshot; the kind is kept in
//! the filename and result summary so retention tooling can tell them
//! apart.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use docharvest_core::BackupKind;
use docharvest_db::Database;

use super::{BackupError, BackupProvider, BackupSummary};

pub struct SqliteBackupProvider {
    db: Database,
    backup_dir: PathBuf,
}

impl SqliteBackupProvider {
    pub fn new(db: Database, backup_dir: PathBuf) -> Self {
        Self { db, backup_dir }
    }
}

#[async_trait]
impl BackupProvider for SqliteBackupProvider {
    async fn run(
        &self,
        kind: BackupKind,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<BackupSummary, BackupError> {
        let _ = progress.send(0);
        std::fs::create_dir_all(&self.backup_dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self
            .backup_dir
            .join(format!("docharvest_{}_{stamp}.db", kind.as_str()));

        let _ = progress.send(10);
        self.db.vacuum_into(&path).await?;
        let _ = progress.send(90);

        let size_bytes = std::fs::metadata(&path)?.len();
        let _ = progress.send(100);
        tracing::info!(path = %path.display(), size_bytes, "backup snapshot written");

        Ok(BackupSummary {
            kind,
            path,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backup_writes_snapshot_and_reports_percent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("store.db")).await.unwrap();
        let provider = SqliteBackupProvider::new(db, dir.path().join("backups"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = provider.run(BackupKind::Full, tx).await.unwrap();

        assert!(summary.path.exists());
        assert!(summary.size_bytes > 0);
        assert!(summary
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("docharvest_full_"));

        let mut percents = Vec::new();
        while let Ok(pct) = rx.try_recv() {
            percents.push(pct);
        }
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_incremental_kind_in_filename() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("store.db")).await.unwrap();
        let provider = SqliteBackupProvider::new(db, dir.path().join("backups"));

        let (tx, _rx) = mpsc::unbounded_channel();
        let summary = provider.run(BackupKind::Incremental, tx).await.unwrap();
        assert!(summary
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("incremental"));
    }
}
