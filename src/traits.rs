//! Collaborator interfaces at the pipeline boundary
//!
//! The reconciliation core never talks to a database directly: chart lookups,
//! rules and every output go through these traits so any backend (SQLite,
//! in-memory, a remote service) can be plugged in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::orchestrator::{JobStatus, JobSummary, SourceIssue};
use crate::reconciliation::Divergence;
use crate::rules::ValidationRule;
use crate::validation::ValidationResult;

/// Result of a chart-of-accounts lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLookup {
    pub found: bool,
    pub display_name: Option<String>,
}

impl AccountLookup {
    pub fn found(display_name: impl Into<String>) -> Self {
        AccountLookup {
            found: true,
            display_name: Some(display_name.into()),
        }
    }

    pub fn missing() -> Self {
        AccountLookup::default()
    }
}

/// Chart of accounts scoped by source identifier
#[async_trait]
pub trait ChartOfAccounts: Send + Sync {
    /// Only active accounts count as found
    async fn exists(&self, code: &str, source: &str) -> Result<AccountLookup>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_enabled_rules(&self) -> Result<Vec<ValidationRule>>;
}

/// Destination for everything a job produces.
///
/// Each `persist_*` call replaces whatever was stored for the job before, so an
/// empty slice clears it.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn persist_divergences(&self, job_id: &str, divergences: &[Divergence]) -> Result<()>;

    async fn persist_validation_results(&self, job_id: &str, results: &[ValidationResult]) -> Result<()>;

    /// Called on success and on failure
    async fn persist_parsing_issues(&self, job_id: &str, issues: &[SourceIssue]) -> Result<()>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        summary: Option<&JobSummary>,
    ) -> Result<()>;
}
