// crates/core/src/config.rs
//! Typed per-job-type configuration.
//!
//! The config payload on the wire is an opaque JSON object; here it becomes
//! a tagged union keyed by the job's type, validated once at creation time
//! so the execution coordinator never sees an invalid config.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::JobType;

/// One configured work source for a collection job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Display name, also used as the stage name.
    pub name: String,
    /// Base URL of the source site.
    pub base_url: String,
    /// Paged search/list endpoint.
    pub search_api: String,
    /// Optional per-item detail endpoint; falls back to the item URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_api: Option<String>,
}

/// Config for a document-collection job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Ordered work sources. Order is a user contract: all work for source
    /// N completes before source N+1 starts.
    pub sources: Vec<SourceConfig>,
    /// Search keywords; empty means an unfiltered run.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Inclusive date-range filter, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Cap on pages enumerated per source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

/// What kind of backup to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        }
    }
}

/// Config for a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub kind: BackupKind,
}

/// Tagged union of per-job-type configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobConfig {
    Collection(CollectionConfig),
    Backup(BackupConfig),
}

impl JobConfig {
    /// Parse and validate a raw config payload against the declared job
    /// type. Blank keywords and empty date strings are dropped during
    /// normalization, matching what operators actually submit.
    pub fn from_value(
        job_type: JobType,
        value: serde_json::Value,
    ) -> Result<Self, ConfigError> {
        let config = match job_type {
            JobType::Collection => {
                let mut cfg: CollectionConfig = serde_json::from_value(value)?;
                cfg.normalize();
                JobConfig::Collection(cfg)
            }
            JobType::Backup => {
                let cfg: BackupConfig = serde_json::from_value(value)?;
                JobConfig::Backup(cfg)
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobConfig::Collection(_) => JobType::Collection,
            JobConfig::Backup(_) => JobType::Backup,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            JobConfig::Collection(cfg) => cfg.validate(),
            JobConfig::Backup(_) => Ok(()),
        }
    }
}

impl CollectionConfig {
    fn normalize(&mut self) {
        self.keywords.retain(|k| !k.trim().is_empty());
        for kw in &mut self.keywords {
            *kw = kw.trim().to_string();
        }
        if self.start_date.as_deref().is_some_and(|d| d.trim().is_empty()) {
            self.start_date = None;
        }
        if self.end_date.as_deref().is_some_and(|d| d.trim().is_empty()) {
            self.end_date = None;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::MissingSources);
        }
        if self.sources.len() > 2 {
            return Err(ConfigError::TooManySources(self.sources.len()));
        }
        for source in &self.sources {
            for (field, value) in [
                ("name", &source.name),
                ("base_url", &source.base_url),
                ("search_api", &source.search_api),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField {
                        source_name: source.name.clone(),
                        field,
                    });
                }
            }
        }
        for (field, date) in [
            ("start_date", &self.start_date),
            ("end_date", &self.end_date),
        ] {
            if let Some(d) = date {
                if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
                    return Err(ConfigError::InvalidDate {
                        field,
                        value: d.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
