// 🗄️ Stores - chart of accounts, rules and job outputs
// In-memory and SQLite adapters for the collaborator traits.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::orchestrator::{JobStatus, JobSummary};

/// Last recorded state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub summary: Option<JobSummary>,
}

impl JobRecord {
    pub fn new(job_id: &str) -> Self {
        JobRecord {
            job_id: job_id.to_string(),
            status: JobStatus::Pending,
            error: None,
            summary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartAccount {
    pub code: String,
    pub name: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_active", deserialize_with = "flexible_bool")]
    pub active: bool,
}

fn default_source() -> String {
    "default".to_string()
}

fn default_active() -> bool {
    true
}

/// Accepts true/false, 1/0, yes/no, sim/nao; blank means active
fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "y" | "sim" | "s" => Ok(true),
        "false" | "0" | "no" | "n" | "nao" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid active flag '{}'", other))),
    }
}

impl ChartAccount {
    pub fn new(code: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        ChartAccount {
            code: code.into().trim().to_string(),
            name: name.into(),
            source: source.into(),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Read a `code,name,source,active` CSV (header row required)
pub fn load_chart_csv(path: &Path) -> Result<Vec<ChartAccount>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut accounts = Vec::new();
    for record in reader.deserialize() {
        let mut account: ChartAccount = record?;
        account.code = account.code.trim().to_string();
        if account.source.is_empty() {
            account.source = default_source();
        }
        if !account.code.is_empty() {
            accounts.push(account);
        }
    }
    tracing::info!(path = %path.display(), accounts = accounts.len(), "chart of accounts loaded");
    Ok(accounts)
}
