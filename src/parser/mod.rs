// 🏗️ Parser Framework
// One trait, four source formats, a detector and a factory.

pub mod csv_statement;
pub mod ledger_text;
pub mod ofx;
pub mod pdf;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{ReconcileError, Result};
use crate::locale::parse_date;
use crate::transaction::ParseOutput;

pub use csv_statement::CsvStatementParser;
pub use ledger_text::LedgerTextParser;
pub use ofx::OfxParser;
pub use pdf::PdfStatementParser;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceFormat - which parser handles an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    LedgerText,
    StatementCsv,
    StatementOfx,
    StatementPdf,
}

impl SourceFormat {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::LedgerText => "Ledger text export",
            SourceFormat::StatementCsv => "Bank statement CSV",
            SourceFormat::StatementOfx => "Bank statement OFX",
            SourceFormat::StatementPdf => "Bank statement PDF",
        }
    }

    /// Short code, also accepted by `from_tag`
    pub fn code(&self) -> &str {
        match self {
            SourceFormat::LedgerText => "txt",
            SourceFormat::StatementCsv => "csv",
            SourceFormat::StatementOfx => "ofx",
            SourceFormat::StatementPdf => "pdf",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" | "ledger" => Ok(SourceFormat::LedgerText),
            "csv" => Ok(SourceFormat::StatementCsv),
            "ofx" => Ok(SourceFormat::StatementOfx),
            "pdf" => Ok(SourceFormat::StatementPdf),
            other => Err(ReconcileError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn is_statement(&self) -> bool {
        !matches!(self, SourceFormat::LedgerText)
    }
}

/// SourceParser - core trait every format implements
///
/// `parse` returns recoverable problems inside `ParseOutput::issues`; an `Err`
/// means the whole input is unusable (or strict mode hit its first issue).
pub trait SourceParser: Send + Sync {
    fn parse(&self, raw: &[u8], strict: bool) -> Result<ParseOutput>;

    fn format(&self) -> SourceFormat;

    /// Parser version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Detect the format of an input from its content, then its name.
///
/// 1. `%PDF` magic → PDF
/// 2. OFX markers in the first kilobytes → OFX
/// 3. `.csv` extension, or a delimited first line that is not a dated entry → CSV
/// 4. anything else → ledger text
pub fn detect_format(file_name: &str, bytes: &[u8]) -> SourceFormat {
    if bytes.starts_with(b"%PDF") {
        return SourceFormat::StatementPdf;
    }

    let head = decode_text(&bytes[..bytes.len().min(4096)]);
    let head_upper = head.to_ascii_uppercase();
    if head_upper.contains("<OFX") || head_upper.contains("<STMTTRN>") || head_upper.contains("OFXHEADER") {
        return SourceFormat::StatementOfx;
    }

    let name = file_name.to_ascii_lowercase();
    if name.ends_with(".pdf") {
        return SourceFormat::StatementPdf;
    }
    if name.ends_with(".ofx") {
        return SourceFormat::StatementOfx;
    }
    if name.ends_with(".csv") {
        return SourceFormat::StatementCsv;
    }

    let first_line = head.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let delimiters = first_line.matches(';').count().max(first_line.matches(',').count());
    let first_token = first_line.split([';', ',', '|', '\t']).next().unwrap_or("");
    if delimiters >= 2 && !first_line.contains('|') && parse_date(first_token.trim()).is_none() {
        return SourceFormat::StatementCsv;
    }

    SourceFormat::LedgerText
}

/// Get the parser for a format
///
/// Factory pattern: Returns Box<dyn SourceParser> for polymorphism
pub fn get_parser(format: SourceFormat) -> Box<dyn SourceParser> {
    match format {
        SourceFormat::LedgerText => Box::new(LedgerTextParser::new()),
        SourceFormat::StatementCsv => Box::new(CsvStatementParser::new()),
        SourceFormat::StatementOfx => Box::new(OfxParser::new()),
        SourceFormat::StatementPdf => Box::new(PdfStatementParser::new()),
    }
}

/// UTF-8 with the BOM stripped; legacy exports that are not valid UTF-8 are read as Latin-1.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format_by_content() {
        assert_eq!(detect_format("x.bin", b"%PDF-1.7\n..."), SourceFormat::StatementPdf);
        assert_eq!(
            detect_format("extrato.txt", b"OFXHEADER:100\n<OFX><BANKTRANLIST>"),
            SourceFormat::StatementOfx
        );
        assert_eq!(
            detect_format("extrato", b"Data;Historico;Valor\n01/03/2024;Tarifa;-10,00"),
            SourceFormat::StatementCsv
        );
        assert_eq!(
            detect_format("razao.txt", b"01/03/2024 | Tarifa | 3.1.2 | NF1 | -10,00"),
            SourceFormat::LedgerText
        );
    }

    #[test]
    fn test_detect_format_by_extension() {
        assert_eq!(detect_format("EXTRATO.CSV", b"a,b\n"), SourceFormat::StatementCsv);
        assert_eq!(detect_format("statement.ofx", b""), SourceFormat::StatementOfx);
    }

    #[test]
    fn test_from_tag_and_factory() {
        assert_eq!(SourceFormat::from_tag("OFX").unwrap(), SourceFormat::StatementOfx);
        assert!(matches!(
            SourceFormat::from_tag("xlsx"),
            Err(ReconcileError::UnsupportedFormat(_))
        ));
        for format in [
            SourceFormat::LedgerText,
            SourceFormat::StatementCsv,
            SourceFormat::StatementOfx,
            SourceFormat::StatementPdf,
        ] {
            assert_eq!(get_parser(format).format(), format);
            assert_eq!(SourceFormat::from_tag(format.code()).unwrap(), format);
        }
    }

    #[test]
    fn test_decode_text_latin1_fallback() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFData"), "Data");
        assert_eq!(decode_text(b"Hist\xf3rico"), "Histórico");
    }
}
