// 🚨 Error taxonomy
// Recoverable issues live in ParseOutput; everything here aborts the current input or job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A recoverable issue promoted to a failure by strict mode
    #[error("strict parsing failed at {location}: {message}")]
    StrictParse { location: String, message: String },

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("PDF contains no extractable text")]
    PdfNoText,

    #[error("unsupported or corrupt PDF: {0}")]
    PdfUnsupported(String),

    #[error("parsing exceeded the {0}s time limit")]
    Timeout(u64),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
