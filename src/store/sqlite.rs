// 🗃️ SQLite store - chart of accounts, rules and job outputs
// WAL journal; job outputs are replaced per job inside one SQL transaction.
// Async trait calls hop onto the blocking pool; the inherent helpers are synchronous.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ChartAccount, JobRecord};
use crate::error::{ReconcileError, Result};
use crate::orchestrator::{JobStatus, JobSummary, SourceIssue};
use crate::reconciliation::Divergence;
use crate::rules::ValidationRule;
use crate::traits::{AccountLookup, ChartOfAccounts, OutputSink, RuleStore};
use crate::transaction::{format_money, ParsingIssue};
use crate::validation::ValidationResult;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chart_accounts (
            source TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (source, code)
        )",
        [],
    )?;

    // Rules are stored whole as JSON; enabled/priority are columns for filtering
    conn.execute(
        "CREATE TABLE IF NOT EXISTS validation_rules (
            id TEXT PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            definition TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            error TEXT,
            summary TEXT,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS divergences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            difference TEXT,
            payload TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS validation_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            transaction_key TEXT NOT NULL,
            account_code TEXT,
            status TEXT NOT NULL,
            reason_code TEXT NOT NULL,
            message TEXT NOT NULL,
            payload TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parsing_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            source TEXT NOT NULL,
            location TEXT NOT NULL,
            message TEXT NOT NULL
        )",
        [],
    )?;

    for (index, table) in [
        ("idx_divergences_job", "divergences"),
        ("idx_validation_results_job", "validation_results"),
        ("idx_parsing_issues_job", "parsing_issues"),
    ] {
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS {} ON {}(job_id)", index, table),
            [],
        )?;
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock_connection(&self.conn)
    }

    /// Trait calls run here, on tokio's blocking pool, so a slow disk never stalls a runtime worker.
    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_connection(&conn)?;
            work(&mut *guard)
        })
        .await
        .map_err(|e| ReconcileError::Store(format!("sqlite task failed: {}", e)))?
    }

    /// Insert or replace chart entries; returns how many were written
    pub fn insert_accounts(&self, accounts: &[ChartAccount]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for account in accounts {
            tx.execute(
                "INSERT OR REPLACE INTO chart_accounts (source, code, name, active)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account.source, account.code.trim(), account.name, account.active],
            )?;
        }
        tx.commit()?;
        Ok(accounts.len())
    }

    pub fn insert_rules(&self, rules: &[ValidationRule]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for rule in rules {
            tx.execute(
                "INSERT OR REPLACE INTO validation_rules (id, enabled, priority, definition)
                 VALUES (?1, ?2, ?3, ?4)",
                params![rule.id, rule.enabled, rule.priority, serde_json::to_string(rule)?],
            )?;
        }
        tx.commit()?;
        Ok(rules.len())
    }

    pub fn job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT status, error, summary FROM jobs WHERE job_id = ?1",
                [job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, error, summary)) = row else {
            return Ok(None);
        };
        let status = JobStatus::from_code(&status)
            .ok_or_else(|| ReconcileError::Store(format!("unknown job status '{}'", status)))?;
        let summary = summary.map(|json| serde_json::from_str(&json)).transpose()?;
        Ok(Some(JobRecord {
            job_id: job_id.to_string(),
            status,
            error,
            summary,
        }))
    }

    pub fn divergences(&self, job_id: &str) -> Result<Vec<Divergence>> {
        self.payloads("SELECT payload FROM divergences WHERE job_id = ?1 ORDER BY id", job_id)
    }

    pub fn validation_results(&self, job_id: &str) -> Result<Vec<ValidationResult>> {
        self.payloads(
            "SELECT payload FROM validation_results WHERE job_id = ?1 ORDER BY id",
            job_id,
        )
    }

    pub fn parsing_issues(&self, job_id: &str) -> Result<Vec<SourceIssue>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source, location, message FROM parsing_issues WHERE job_id = ?1 ORDER BY id",
        )?;
        let issues = stmt
            .query_map([job_id], |row| {
                Ok(SourceIssue {
                    source: row.get(0)?,
                    issue: ParsingIssue {
                        location: row.get(1)?,
                        message: row.get(2)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    fn payloads<T: serde::de::DeserializeOwned>(&self, sql: &str, job_id: &str) -> Result<Vec<T>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([job_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(ReconcileError::from))
            .collect()
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| ReconcileError::Store("sqlite connection lock poisoned".to_string()))
}

#[async_trait]
impl ChartOfAccounts for SqliteStore {
    async fn exists(&self, code: &str, source: &str) -> Result<AccountLookup> {
        let (code, source) = (code.trim().to_string(), source.to_string());
        self.with_connection(move |conn| {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM chart_accounts WHERE source = ?1 AND code = ?2 AND active = 1",
                    params![source, code],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name.map(AccountLookup::found).unwrap_or_else(AccountLookup::missing))
        })
        .await
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_enabled_rules(&self) -> Result<Vec<ValidationRule>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT definition FROM validation_rules WHERE enabled = 1 ORDER BY priority DESC, rowid",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut rules: Vec<ValidationRule> = Vec::with_capacity(rows.len());
            for json in rows {
                rules.push(serde_json::from_str(&json)?);
            }
            Ok(rules)
        })
        .await
    }
}

fn replace_divergences(conn: &mut Connection, job_id: &str, divergences: &[Divergence]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM divergences WHERE job_id = ?1", [job_id])?;
    for divergence in divergences {
        tx.execute(
            "INSERT INTO divergences (job_id, kind, description, difference, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id,
                divergence.kind.code(),
                divergence.description,
                divergence.difference.map(format_money),
                serde_json::to_string(divergence)?,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn replace_validation_results(conn: &mut Connection, job_id: &str, results: &[ValidationResult]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM validation_results WHERE job_id = ?1", [job_id])?;
    for result in results {
        tx.execute(
            "INSERT INTO validation_results (
                job_id, transaction_key, account_code, status, reason_code, message, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id,
                result.transaction_key,
                result.account_code,
                result.status.code(),
                result.reason_code.code(),
                result.message,
                serde_json::to_string(result)?,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn replace_parsing_issues(conn: &mut Connection, job_id: &str, issues: &[SourceIssue]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM parsing_issues WHERE job_id = ?1", [job_id])?;
    for issue in issues {
        tx.execute(
            "INSERT INTO parsing_issues (job_id, source, location, message) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, issue.source, issue.issue.location, issue.issue.message],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl OutputSink for SqliteStore {
    async fn persist_divergences(&self, job_id: &str, divergences: &[Divergence]) -> Result<()> {
        let (job_id, divergences) = (job_id.to_string(), divergences.to_vec());
        self.with_connection(move |conn| replace_divergences(conn, &job_id, &divergences))
            .await
    }

    async fn persist_validation_results(&self, job_id: &str, results: &[ValidationResult]) -> Result<()> {
        let (job_id, results) = (job_id.to_string(), results.to_vec());
        self.with_connection(move |conn| replace_validation_results(conn, &job_id, &results))
            .await
    }

    async fn persist_parsing_issues(&self, job_id: &str, issues: &[SourceIssue]) -> Result<()> {
        let (job_id, issues) = (job_id.to_string(), issues.to_vec());
        self.with_connection(move |conn| replace_parsing_issues(conn, &job_id, &issues))
            .await
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        summary: Option<&JobSummary>,
    ) -> Result<()> {
        let summary_json = summary.map(serde_json::to_string).transpose()?;
        let (id, error) = (job_id.to_string(), error.map(str::to_string));
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, status, error, summary) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job_id) DO UPDATE SET
                    status = excluded.status,
                    error = excluded.error,
                    summary = COALESCE(excluded.summary, jobs.summary),
                    updated_at = CURRENT_TIMESTAMP",
                params![id, status.code(), error, summary_json],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(job_id, status = %status, "job status stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::DivergenceKind;
    use crate::rules::MatchField;
    use crate::transaction::Transaction;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_chart_and_rules_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[
                ChartAccount::new("2.1.1.01", "Fornecedores", "default"),
                ChartAccount::new("1.1.1.01", "Caixa", "default").inactive(),
            ])
            .unwrap();

        let lookup = store.exists("2.1.1.01", "default").await.unwrap();
        assert_eq!(lookup, AccountLookup::found("Fornecedores"));
        assert!(!store.exists("1.1.1.01", "default").await.unwrap().found);
        assert!(!store.exists("2.1.1.01", "filial").await.unwrap().found);

        let mut disabled = ValidationRule::new("off", MatchField::EventType, "payable");
        disabled.enabled = false;
        store
            .insert_rules(&[
                ValidationRule::new("low", MatchField::EventType, "payable"),
                ValidationRule::new("high", MatchField::EventType, "payable").with_priority(9),
                disabled,
            ])
            .unwrap();
        let ids: Vec<String> = store.list_enabled_rules().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_outputs_are_replaced_per_job() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = Transaction::statement(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), "PIX", Decimal::new(1000, 2));
        let divergence = Divergence::missing_in_ledger(&tx);

        store.persist_divergences("j1", &[divergence.clone(), divergence.clone()]).await.unwrap();
        store.persist_divergences("j1", &[divergence.clone()]).await.unwrap();

        let stored = store.divergences("j1").unwrap();
        assert_eq!(stored, vec![divergence]);
        assert_eq!(stored[0].kind, DivergenceKind::MissingInLedger);
        assert!(store.divergences("j2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_status_keeps_last_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.job("j1").unwrap().is_none());

        let summary = JobSummary {
            matched_pairs: 3,
            ..JobSummary::default()
        };
        store.update_job_status("j1", JobStatus::Processing, None, None).await.unwrap();
        store
            .update_job_status("j1", JobStatus::Completed, None, Some(&summary))
            .await
            .unwrap();

        let job = store.job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.summary, Some(summary));

        store
            .persist_parsing_issues(
                "j1",
                &[SourceIssue {
                    source: "razao.txt".to_string(),
                    issue: ParsingIssue {
                        location: "line 4".to_string(),
                        message: "no amount".to_string(),
                    },
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.parsing_issues("j1").unwrap()[0].issue.location, "line 4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_jobs_share_one_store() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tx = Transaction::statement(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), "PIX", Decimal::new(1000, 2));

        let mut handles = Vec::new();
        for n in 0..4 {
            let store = Arc::clone(&store);
            let divergence = Divergence::missing_in_ledger(&tx);
            handles.push(tokio::spawn(async move {
                let job_id = format!("job-{}", n);
                store.update_job_status(&job_id, JobStatus::Processing, None, None).await?;
                store.persist_divergences(&job_id, &[divergence]).await?;
                store.update_job_status(&job_id, JobStatus::Completed, None, None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for n in 0..4 {
            let job_id = format!("job-{}", n);
            assert_eq!(store.job(&job_id).unwrap().unwrap().status, JobStatus::Completed);
            assert_eq!(store.divergences(&job_id).unwrap().len(), 1);
        }
    }
}
