// 📄 PDF bank statements
// lopdf text extraction → issuer detection → issuer-specific line heuristics

pub mod candidates;
pub mod nubank;
pub mod sicoob;

use chrono::{Datelike, Local, NaiveDate};
use lopdf::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::{SourceFormat, SourceParser};
use crate::error::{ReconcileError, Result};
use crate::locale::parse_date;
use crate::normalize::fold;
use crate::transaction::{IssueLog, ParseOutput, ParsingIssue, Transaction};

/// Share of U+FFFD characters above which the text layer is considered unreadable.
const MAX_REPLACEMENT_RATIO: f64 = 0.3;

const NUBANK_KEYWORDS: [&str; 2] = ["nubank", "nu pagamentos"];
const SICOOB_KEYWORDS: [&str; 4] = [
    "sicoob",
    "sisbr",
    "sistema de cooperativas",
    "cooperativa de credito",
];

/// Output of one issuer heuristic before strict-mode handling.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub transactions: Vec<Transaction>,
    pub issues: Vec<ParsingIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Issuer {
    Nubank,
    Sicoob,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuerDetection {
    pub issuer: Issuer,
    /// Keyword hits for the winning issuer (0 when unknown)
    pub keyword_hits: usize,
}

/// What to do when the issuer cannot be identified with enough confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IssuerPolicy {
    /// Run every heuristic and keep the one that extracted more transactions.
    #[default]
    KeepLargest,
    /// Require at least this many keyword hits; otherwise fail as unsupported.
    RequireConfidence(usize),
}

pub fn detect_issuer(text: &str) -> IssuerDetection {
    let folded = fold(text);
    let count = |keywords: &[&str]| keywords.iter().map(|k| folded.matches(k).count()).sum::<usize>();
    let nubank = count(&NUBANK_KEYWORDS);
    let sicoob = count(&SICOOB_KEYWORDS);

    if nubank > sicoob {
        IssuerDetection { issuer: Issuer::Nubank, keyword_hits: nubank }
    } else if sicoob > nubank {
        IssuerDetection { issuer: Issuer::Sicoob, keyword_hits: sicoob }
    } else {
        IssuerDetection { issuer: Issuer::Unknown, keyword_hits: 0 }
    }
}

fn period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)per[ií]odo\s*:?\s*(?:de\s+)?(\d{2}/\d{2}/\d{4})\s*(?:-|–|a|até|ate)\s*(\d{2}/\d{2}/\d{4})")
            .unwrap()
    })
}

/// How day/month dates printed without a year are completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearReference {
    /// Statement period found in the text; each date takes the year that places it inside.
    Period { start: NaiveDate, end: NaiveDate },
    /// No period printed: every date takes this year.
    Year(i32),
}

impl YearReference {
    pub fn from_text(text: &str) -> Self {
        match statement_period(text) {
            Some((start, end)) => YearReference::Period { start, end },
            None => YearReference::Year(Local::now().year()),
        }
    }

    pub fn resolve(&self, month: u32, day: u32) -> Option<NaiveDate> {
        match *self {
            YearReference::Year(year) => NaiveDate::from_ymd_opt(year, month, day),
            YearReference::Period { start, end } => {
                let inside = (start.year()..=end.year())
                    .rev()
                    .filter_map(|year| NaiveDate::from_ymd_opt(year, month, day))
                    .find(|date| *date >= start && *date <= end);
                inside.or_else(|| match NaiveDate::from_ymd_opt(end.year(), month, day) {
                    Some(date) if date > end => NaiveDate::from_ymd_opt(start.year(), month, day),
                    other => other,
                })
            }
        }
    }

    /// Year reported in logs (period end year when a period is known)
    pub fn year(&self) -> i32 {
        match *self {
            YearReference::Period { end, .. } => end.year(),
            YearReference::Year(year) => year,
        }
    }
}

/// First and last day of the printed statement period, in chronological order.
pub fn statement_period(text: &str) -> Option<(NaiveDate, NaiveDate)> {
    let caps = period_regex().captures(text)?;
    let first = parse_date(&caps[1])?;
    let second = parse_date(&caps[2])?;
    Some((first.min(second), first.max(second)))
}

// ============================================================================
// PARSER
// ============================================================================

#[derive(Default)]
pub struct PdfStatementParser {
    policy: IssuerPolicy,
}

impl PdfStatementParser {
    pub fn new() -> Self {
        PdfStatementParser::default()
    }

    pub fn with_policy(policy: IssuerPolicy) -> Self {
        PdfStatementParser { policy }
    }

    /// Text of every page, in page order.
    pub fn extract_pages(&self, raw: &[u8]) -> Result<Vec<String>> {
        if !raw.starts_with(b"%PDF") {
            return Err(ReconcileError::PdfUnsupported("missing %PDF header".to_string()));
        }
        let document = Document::load_mem(raw)
            .map_err(|e| ReconcileError::PdfUnsupported(format!("failed to open PDF document: {}", e)))?;
        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(ReconcileError::PdfUnsupported("document is encrypted".to_string()));
        }

        let mut pages = Vec::new();
        for (page_number, _object_id) in document.get_pages() {
            let text = document.extract_text(&[page_number]).map_err(|e| {
                ReconcileError::PdfUnsupported(format!("failed to read text from page {}: {}", page_number, e))
            })?;
            pages.push(text);
        }

        check_text_layer(&pages)?;
        Ok(pages)
    }

    /// Run issuer detection and the matching heuristic over already extracted pages.
    pub fn parse_pages(&self, pages: &[String], strict: bool) -> Result<ParseOutput> {
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(ReconcileError::PdfNoText);
        }
        let text = pages.join("\n");
        let detection = detect_issuer(&text);
        let reference = YearReference::from_text(&text);

        let extraction = match (detection.issuer, self.policy) {
            (Issuer::Nubank, IssuerPolicy::RequireConfidence(min)) if detection.keyword_hits < min => {
                return Err(low_confidence(detection));
            }
            (Issuer::Sicoob, IssuerPolicy::RequireConfidence(min)) if detection.keyword_hits < min => {
                return Err(low_confidence(detection));
            }
            (Issuer::Unknown, IssuerPolicy::RequireConfidence(_)) => return Err(low_confidence(detection)),
            (Issuer::Nubank, _) => nubank::extract(pages, reference),
            (Issuer::Sicoob, _) => sicoob::extract(pages, reference),
            (Issuer::Unknown, IssuerPolicy::KeepLargest) => {
                let a = nubank::extract(pages, reference);
                let b = sicoob::extract(pages, reference);
                if a.transactions.len() > b.transactions.len() {
                    a
                } else {
                    b
                }
            }
        };

        tracing::info!(
            issuer = ?detection.issuer,
            keyword_hits = detection.keyword_hits,
            reference_year = reference.year(),
            transactions = extraction.transactions.len(),
            "pdf statement parsed"
        );

        let mut issues = IssueLog::new(strict);
        for issue in extraction.issues {
            issues.record(issue.location, issue.message)?;
        }
        Ok(issues.finish(extraction.transactions))
    }
}

/// Fail when the pages carry no text, or text dominated by unmapped glyphs.
pub fn check_text_layer(pages: &[String]) -> Result<()> {
    let total: usize = pages.iter().map(|p| p.trim().chars().count()).sum();
    if total == 0 {
        return Err(ReconcileError::PdfNoText);
    }
    let replacement: usize = pages.iter().map(|p| p.matches('\u{fffd}').count()).sum();
    if replacement as f64 / total as f64 > MAX_REPLACEMENT_RATIO {
        return Err(ReconcileError::PdfUnsupported(
            "text layer uses an unmapped font encoding".to_string(),
        ));
    }
    Ok(())
}

fn low_confidence(detection: IssuerDetection) -> ReconcileError {
    ReconcileError::PdfUnsupported(format!(
        "statement issuer not identified with enough confidence ({:?}, {} keyword hits)",
        detection.issuer, detection.keyword_hits
    ))
}

impl SourceParser for PdfStatementParser {
    fn parse(&self, raw: &[u8], strict: bool) -> Result<ParseOutput> {
        let pages = self.extract_pages(raw)?;
        self.parse_pages(&pages, strict)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::StatementPdf
    }
}
