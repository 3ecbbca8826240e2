//! In-memory store for tests, the CLI and embedding

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ChartAccount, JobRecord};
use crate::error::{ReconcileError, Result};
use crate::orchestrator::{JobStatus, JobSummary, SourceIssue};
use crate::reconciliation::Divergence;
use crate::rules::ValidationRule;
use crate::traits::{AccountLookup, ChartOfAccounts, OutputSink, RuleStore};
use crate::validation::ValidationResult;

type Shared<T> = Arc<RwLock<T>>;

/// Chart, rules and job outputs held in memory; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Keyed by (source, code)
    accounts: Shared<HashMap<(String, String), ChartAccount>>,
    rules: Shared<Vec<ValidationRule>>,
    jobs: Shared<HashMap<String, JobRecord>>,
    divergences: Shared<HashMap<String, Vec<Divergence>>>,
    validation_results: Shared<HashMap<String, Vec<ValidationResult>>>,
    parsing_issues: Shared<HashMap<String, Vec<SourceIssue>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ReconcileError::Store("memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ReconcileError::Store("memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(self, accounts: impl IntoIterator<Item = ChartAccount>) -> Result<Self> {
        self.add_accounts(accounts)?;
        Ok(self)
    }

    pub fn with_rules(self, rules: impl IntoIterator<Item = ValidationRule>) -> Result<Self> {
        write(&self.rules)?.extend(rules);
        Ok(self)
    }

    pub fn add_accounts(&self, accounts: impl IntoIterator<Item = ChartAccount>) -> Result<()> {
        let mut map = write(&self.accounts)?;
        for account in accounts {
            map.insert((account.source.clone(), account.code.clone()), account);
        }
        Ok(())
    }

    pub fn job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(read(&self.jobs)?.get(job_id).cloned())
    }

    pub fn divergences(&self, job_id: &str) -> Result<Vec<Divergence>> {
        Ok(read(&self.divergences)?.get(job_id).cloned().unwrap_or_default())
    }

    pub fn validation_results(&self, job_id: &str) -> Result<Vec<ValidationResult>> {
        Ok(read(&self.validation_results)?.get(job_id).cloned().unwrap_or_default())
    }

    pub fn parsing_issues(&self, job_id: &str) -> Result<Vec<SourceIssue>> {
        Ok(read(&self.parsing_issues)?.get(job_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ChartOfAccounts for MemoryStore {
    async fn exists(&self, code: &str, source: &str) -> Result<AccountLookup> {
        let accounts = read(&self.accounts)?;
        Ok(match accounts.get(&(source.to_string(), code.trim().to_string())) {
            Some(account) if account.active => AccountLookup::found(account.name.clone()),
            _ => AccountLookup::missing(),
        })
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_enabled_rules(&self) -> Result<Vec<ValidationRule>> {
        Ok(read(&self.rules)?.iter().filter(|r| r.enabled).cloned().collect())
    }
}

#[async_trait]
impl OutputSink for MemoryStore {
    async fn persist_divergences(&self, job_id: &str, divergences: &[Divergence]) -> Result<()> {
        write(&self.divergences)?.insert(job_id.to_string(), divergences.to_vec());
        Ok(())
    }

    async fn persist_validation_results(&self, job_id: &str, results: &[ValidationResult]) -> Result<()> {
        write(&self.validation_results)?.insert(job_id.to_string(), results.to_vec());
        Ok(())
    }

    async fn persist_parsing_issues(&self, job_id: &str, issues: &[SourceIssue]) -> Result<()> {
        write(&self.parsing_issues)?.insert(job_id.to_string(), issues.to_vec());
        Ok(())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        summary: Option<&JobSummary>,
    ) -> Result<()> {
        let mut jobs = write(&self.jobs)?;
        let record = jobs.entry(job_id.to_string()).or_insert_with(|| JobRecord::new(job_id));
        record.status = status;
        record.error = error.map(str::to_string);
        if let Some(summary) = summary {
            record.summary = Some(summary.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchField;

    #[tokio::test]
    async fn test_chart_lookup_is_scoped_and_active_only() {
        let store = MemoryStore::new()
            .with_accounts(vec![
                ChartAccount::new("2.1.1.01", "Fornecedores", "default"),
                ChartAccount::new("1.1.1.01", "Caixa", "default").inactive(),
                ChartAccount::new("3.1.1.01", "Receitas", "filial"),
            ])
            .unwrap();

        let found = store.exists(" 2.1.1.01 ", "default").await.unwrap();
        assert!(found.found);
        assert_eq!(found.display_name.as_deref(), Some("Fornecedores"));
        assert!(!store.exists("1.1.1.01", "default").await.unwrap().found);
        assert!(!store.exists("3.1.1.01", "default").await.unwrap().found);
        assert!(store.exists("3.1.1.01", "filial").await.unwrap().found);
    }

    #[tokio::test]
    async fn test_only_enabled_rules_are_listed() {
        let mut disabled = ValidationRule::new("off", MatchField::Category, "x");
        disabled.enabled = false;
        let store = MemoryStore::new()
            .with_rules(vec![ValidationRule::new("on", MatchField::Category, "x"), disabled])
            .unwrap();

        let rules = store.list_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "on");
    }

    #[tokio::test]
    async fn test_job_status_updates_keep_summary() {
        let store = MemoryStore::new();
        store.update_job_status("j1", JobStatus::Processing, None, None).await.unwrap();
        store
            .update_job_status("j1", JobStatus::Failed, Some("boom"), None)
            .await
            .unwrap();

        let job = store.job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.summary.is_none());
    }
}
