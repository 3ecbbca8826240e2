// 🧭 Reconciliation Orchestrator
// pending → processing → {completed | failed}
//
// parse ledgers → sign hints → de-duplicate → parse statement → fuzzy match
// → validate accounts → persist outputs → final status

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::deduplication::DeduplicationEngine;
use crate::error::{ReconcileError, Result};
use crate::normalize::fold;
use crate::parser::{detect_format, get_parser, PdfStatementParser, SourceFormat, SourceParser};
use crate::reconciliation::{match_fuzzy, Divergence, DivergenceKind, FuzzyParams};
use crate::rules::RuleSet;
use crate::traits::{ChartOfAccounts, OutputSink, RuleStore};
use crate::transaction::{ParseOutput, ParsingIssue, Transaction};
use crate::validation::{AccountValidator, ValidationResult, ValidationStatus};

// ============================================================================
// JOB STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn code(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// INPUTS
// ============================================================================

/// Sign convention forced on a ledger source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignHint {
    Payable,
    Receivable,
}

const PAYABLE_MARKERS: [&str; 3] = ["pagar", "payable", "fornecedor"];
const RECEIVABLE_MARKERS: [&str; 3] = ["receber", "receivable", "cliente"];

impl SignHint {
    pub fn from_source_name(name: &str) -> Option<Self> {
        let folded = fold(name);
        if PAYABLE_MARKERS.iter().any(|m| folded.contains(m)) {
            Some(SignHint::Payable)
        } else if RECEIVABLE_MARKERS.iter().any(|m| folded.contains(m)) {
            Some(SignHint::Receivable)
        } else {
            None
        }
    }

    pub fn apply(&self, amount: Decimal) -> Decimal {
        match self {
            SignHint::Payable => -amount.abs(),
            SignHint::Receivable => amount.abs(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SignHint::Payable => "payable",
            SignHint::Receivable => "receivable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Declared format; detected from name and content when absent
    pub format: Option<SourceFormat>,
    pub sign_hint: Option<SignHint>,
}

impl SourceInput {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        SourceInput {
            name: name.into(),
            bytes: bytes.into(),
            format: None,
            sign_hint: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(SourceInput::new(name, bytes))
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_sign_hint(mut self, hint: SignHint) -> Self {
        self.sign_hint = Some(hint);
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

/// SHA-256 of the raw input, hex encoded
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub amount_tolerance: Decimal,
    pub date_window_days: i64,
    pub min_similarity: f64,
    pub allow_many_to_one: bool,
    pub strict: bool,
    pub chart_source: String,
    pub pdf_timeout_secs: u64,
}

impl Default for JobParams {
    fn default() -> Self {
        JobParams {
            amount_tolerance: Decimal::new(1, 2),
            date_window_days: 3,
            min_similarity: 0.3,
            allow_many_to_one: false,
            strict: false,
            chart_source: "default".to_string(),
            pdf_timeout_secs: 60,
        }
    }
}

impl JobParams {
    pub fn fuzzy_params(&self) -> FuzzyParams {
        FuzzyParams {
            date_window_days: self.date_window_days,
            amount_tolerance: self.amount_tolerance,
            min_similarity: self.min_similarity,
            allow_many_to_one: self.allow_many_to_one,
        }
    }
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// A parsing issue tagged with the input it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIssue {
    pub source: String,
    pub issue: ParsingIssue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub format: SourceFormat,
    pub fingerprint: String,
    pub transactions: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub ledger_transactions: usize,
    pub statement_transactions: usize,
    pub duplicates_removed: usize,
    pub matched_pairs: usize,
    /// Keyed by divergence type code
    pub divergences: BTreeMap<String, usize>,
    /// Keyed by validation status code
    pub validation: BTreeMap<String, usize>,
    pub parsing_issues: usize,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub summary: Option<JobSummary>,
    pub divergences: Vec<Divergence>,
    pub validation_results: Vec<ValidationResult>,
    pub issues: Vec<SourceIssue>,
}

struct Artifacts {
    divergences: Vec<Divergence>,
    validation_results: Vec<ValidationResult>,
    summary: JobSummary,
}

// ============================================================================
// JOB
// ============================================================================

pub struct ReconciliationJob {
    id: String,
    status: JobStatus,
    params: JobParams,
    chart: Arc<dyn ChartOfAccounts>,
    rules: Arc<dyn RuleStore>,
    sink: Arc<dyn OutputSink>,
}

impl ReconciliationJob {
    pub fn new(
        params: JobParams,
        chart: Arc<dyn ChartOfAccounts>,
        rules: Arc<dyn RuleStore>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        ReconciliationJob {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            params,
            chart,
            rules,
            sink,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Run the whole pipeline once.
    ///
    /// Stage failures end in a `failed` outcome with the error message kept
    /// verbatim; `Err` is returned only when the job cannot record its own state.
    #[instrument(skip_all, fields(job_id = %self.id))]
    pub async fn run(&mut self, ledgers: Vec<SourceInput>, statement: Option<SourceInput>) -> Result<JobOutcome> {
        self.transition(JobStatus::Processing, None, None).await?;

        let mut issues = Vec::new();
        let processed = self.process(ledgers, statement, &mut issues).await;
        let mut persisted = match processed {
            Ok(artifacts) => self.persist(artifacts).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.sink.persist_parsing_issues(&self.id, &issues).await {
            if persisted.is_ok() {
                self.discard_outputs().await;
                persisted = Err(e);
            } else {
                tracing::warn!(error = %e, "parsing issues could not be persisted");
            }
        }

        let mut artifacts = match persisted {
            Ok(artifacts) => artifacts,
            Err(e) => return self.fail(e, issues).await,
        };
        artifacts.summary.parsing_issues = issues.len();
        if let Err(e) = self.transition(JobStatus::Completed, None, Some(&artifacts.summary)).await {
            self.discard_outputs().await;
            return self.fail(e, issues).await;
        }

        Ok(JobOutcome {
            job_id: self.id.clone(),
            status: JobStatus::Completed,
            error: None,
            summary: Some(artifacts.summary),
            divergences: artifacts.divergences,
            validation_results: artifacts.validation_results,
            issues,
        })
    }

    /// Record the failure. If even that cannot be stored the job still ends
    /// `failed` locally and the sink error is returned.
    async fn fail(&mut self, error: ReconcileError, issues: Vec<SourceIssue>) -> Result<JobOutcome> {
        let message = error.to_string();
        tracing::warn!(error = %message, issues = issues.len(), "reconciliation job failed");
        if let Err(sink_error) = self.transition(JobStatus::Failed, Some(&message), None).await {
            self.status = JobStatus::Failed;
            return Err(sink_error);
        }
        Ok(JobOutcome {
            job_id: self.id.clone(),
            status: JobStatus::Failed,
            error: Some(message),
            summary: None,
            divergences: Vec::new(),
            validation_results: Vec::new(),
            issues,
        })
    }

    async fn transition(&mut self, next: JobStatus, error: Option<&str>, summary: Option<&JobSummary>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ReconcileError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.sink.update_job_status(&self.id, next, error, summary).await?;
        tracing::info!(from = %self.status, to = %next, "job status changed");
        self.status = next;
        Ok(())
    }

    async fn process(
        &self,
        ledgers: Vec<SourceInput>,
        statement: Option<SourceInput>,
        issues: &mut Vec<SourceIssue>,
    ) -> Result<Artifacts> {
        if ledgers.is_empty() {
            return Err(ReconcileError::MissingInput("at least one ledger file".to_string()));
        }
        let statement = statement.ok_or_else(|| ReconcileError::MissingInput("bank statement file".to_string()))?;
        let mut summary = JobSummary::default();

        // Ledgers
        let mut batches = Vec::with_capacity(ledgers.len());
        for input in ledgers {
            let format = input.format.unwrap_or(SourceFormat::LedgerText);
            if format != SourceFormat::LedgerText {
                return Err(ReconcileError::UnsupportedFormat(format!(
                    "{} declared for ledger input {}",
                    format.code(),
                    input.name
                )));
            }
            let output = get_parser(format).parse(&input.bytes, self.params.strict)?;
            let hint = input.sign_hint.or_else(|| SignHint::from_source_name(&input.name));
            let transactions = apply_sign_hint(output.transactions, hint);

            summary.sources.push(report(&input, format, transactions.len(), output.issues.len()));
            collect_issues(issues, &input.name, output.issues);
            batches.push((input.name, transactions));
        }

        let dedup = DeduplicationEngine::new().deduplicate(batches);
        summary.duplicates_removed = dedup.duplicates.len();
        let ledger = dedup.kept;

        // Statement
        let format = match statement.format {
            Some(format) => format,
            None => detect_format(&statement.name, &statement.bytes),
        };
        if !format.is_statement() {
            return Err(ReconcileError::UnsupportedFormat(format!(
                "{} is not a bank statement format ({})",
                format.code(),
                statement.name
            )));
        }
        let output = self.parse_statement(format, &statement.bytes).await?;
        summary.sources.push(report(&statement, format, output.transactions.len(), output.issues.len()));
        collect_issues(issues, &statement.name, output.issues);
        let bank = output.transactions;

        // Match and validate
        let fuzzy = match_fuzzy(&bank, &ledger, &self.params.fuzzy_params());
        let rules = RuleSet::from_rules(self.rules.list_enabled_rules().await?);
        let validation_results = AccountValidator::new(rules)
            .validate(&ledger, &self.params.chart_source, self.chart.as_ref())
            .await?;

        summary.ledger_transactions = ledger.len();
        summary.statement_transactions = bank.len();
        summary.matched_pairs = fuzzy.pairs.len();
        for kind in DivergenceKind::all() {
            let count = fuzzy.count(kind);
            if count > 0 {
                summary.divergences.insert(kind.code().to_string(), count);
            }
        }
        for status in [ValidationStatus::Ok, ValidationStatus::Invalid, ValidationStatus::Unknown] {
            let count = validation_results.iter().filter(|r| r.status == status).count();
            if count > 0 {
                summary.validation.insert(status.code().to_string(), count);
            }
        }

        Ok(Artifacts {
            divergences: fuzzy.divergences,
            validation_results,
            summary,
        })
    }

    /// PDF extraction runs on the blocking pool under the job's time limit.
    async fn parse_statement(&self, format: SourceFormat, bytes: &[u8]) -> Result<ParseOutput> {
        let strict = self.params.strict;
        if format != SourceFormat::StatementPdf {
            return get_parser(format).parse(bytes, strict);
        }
        let raw = bytes.to_vec();
        run_blocking_with_timeout(self.params.pdf_timeout_secs, move || {
            PdfStatementParser::new().parse(&raw, strict)
        })
        .await
    }

    /// Both outputs are written or neither stays behind.
    async fn persist(&self, artifacts: Artifacts) -> Result<Artifacts> {
        self.sink.persist_divergences(&self.id, &artifacts.divergences).await?;
        if let Err(e) = self
            .sink
            .persist_validation_results(&self.id, &artifacts.validation_results)
            .await
        {
            self.discard_outputs().await;
            return Err(e);
        }
        Ok(artifacts)
    }

    /// Sinks replace a job's rows on every write, so empty writes clear them.
    async fn discard_outputs(&self) {
        if let Err(e) = self.sink.persist_divergences(&self.id, &[]).await {
            tracing::warn!(error = %e, "failed to discard persisted divergences");
        }
        if let Err(e) = self.sink.persist_validation_results(&self.id, &[]).await {
            tracing::warn!(error = %e, "failed to discard persisted validation results");
        }
    }
}

async fn run_blocking_with_timeout<T, F>(secs: u64, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(Duration::from_secs(secs), task).await {
        Err(_) => Err(ReconcileError::Timeout(secs)),
        Ok(Err(join_error)) => Err(ReconcileError::PdfUnsupported(format!(
            "extraction task aborted: {}",
            join_error
        ))),
        Ok(Ok(parsed)) => parsed,
    }
}

fn apply_sign_hint(transactions: Vec<Transaction>, hint: Option<SignHint>) -> Vec<Transaction> {
    let Some(hint) = hint else {
        return transactions;
    };
    transactions
        .into_iter()
        .map(|mut tx| {
            tx.amount = hint.apply(tx.amount);
            if tx.event_type.is_none() {
                tx.event_type = Some(hint.event_type().to_string());
            }
            tx
        })
        .collect()
}

fn report(input: &SourceInput, format: SourceFormat, transactions: usize, issues: usize) -> SourceReport {
    SourceReport {
        name: input.name.clone(),
        format,
        fingerprint: input.fingerprint(),
        transactions,
        issues,
    }
}

fn collect_issues(target: &mut Vec<SourceIssue>, source: &str, issues: Vec<ParsingIssue>) {
    target.extend(issues.into_iter().map(|issue| SourceIssue {
        source: source.to_string(),
        issue,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_sign_hint_from_name() {
        assert_eq!(SignHint::from_source_name("Contas_a_Pagar_2024.txt"), Some(SignHint::Payable));
        assert_eq!(SignHint::from_source_name("receivable-march.txt"), Some(SignHint::Receivable));
        assert_eq!(SignHint::from_source_name("razao.txt"), None);
    }

    #[test]
    fn test_sign_hint_forces_sign_and_event_type() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let txns = vec![
            Transaction::ledger(date, "Fornecedor", Decimal::new(15000, 2)),
            Transaction::ledger(date, "Imposto", Decimal::new(-300, 2)).with_event_type("tax"),
        ];
        let hinted = apply_sign_hint(txns, Some(SignHint::Payable));

        assert_eq!(hinted[0].amount, Decimal::new(-15000, 2));
        assert_eq!(hinted[0].event_type.as_deref(), Some("payable"));
        assert_eq!(hinted[1].amount, Decimal::new(-300, 2));
        assert_eq!(hinted[1].event_type.as_deref(), Some("tax"));
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_blocking_work_past_the_limit_times_out() {
        let slow = run_blocking_with_timeout(0, || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(1)
        })
        .await;
        assert!(matches!(slow, Err(ReconcileError::Timeout(0))));

        let fast = run_blocking_with_timeout(5, || Ok(7)).await;
        assert_eq!(fast.unwrap(), 7);

        let failing: Result<()> = run_blocking_with_timeout(5, || Err(ReconcileError::PdfNoText)).await;
        assert!(matches!(failing, Err(ReconcileError::PdfNoText)));
    }
}
