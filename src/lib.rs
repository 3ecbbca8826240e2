// Ledger Reconciliation - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod deduplication;
pub mod error;
pub mod locale;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod reconciliation;
pub mod rules;
pub mod similarity;
pub mod store;
pub mod traits;
pub mod transaction;
pub mod validation;

// Re-export commonly used types
pub use config::ReconcileConfig;
pub use deduplication::{DedupOutcome, DeduplicationEngine, DuplicateMatch};
pub use error::{ReconcileError, Result};
pub use locale::{parse_amount, parse_date, AmountError};
pub use orchestrator::{
    JobOutcome, JobParams, JobStatus, JobSummary, ReconciliationJob, SignHint, SourceInput, SourceIssue,
};
pub use parser::{
    detect_format, get_parser, CsvStatementParser, LedgerTextParser, OfxParser, PdfStatementParser, SourceFormat,
    SourceParser,
};
pub use reconciliation::{
    match_fuzzy, reconcile, suspicious_classifications, Divergence, DivergenceKind, FuzzyMatch, FuzzyParams,
    FuzzyReport, MatchedPair, ReconciliationEngine, ReconciliationReport,
};
pub use rules::{MatchField, RuleSet, Severity, ValidationRule};
pub use similarity::description_similarity;
pub use store::{load_chart_csv, ChartAccount, JobRecord, MemoryStore, SqliteStore};
pub use traits::{AccountLookup, ChartOfAccounts, OutputSink, RuleStore};
pub use transaction::{Origin, ParseOutput, ParsingIssue, Transaction, TransactionSnapshot};
pub use validation::{AccountValidator, ReasonCode, ValidationResult, ValidationStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
