// 🎯 Amount candidate extraction for positional statement lines
//
// Each extractor proposes scored (date, amount) candidates for a line; `select_best`
// is the single reducer that decides. Extractors never see each other's output.

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::ops::Range;
use std::sync::OnceLock;

use super::YearReference;
use crate::locale::{parse_amount, parse_date};
use crate::normalize::fold;

/// Candidates scoring below this are never selected.
pub const MIN_SCORE: i32 = 1;

/// Words that precede account, agency or slip numbers rather than amounts.
const IDENTIFIER_CONTEXT: [&str; 9] = [
    "conta", "agencia", "ag", "cc", "boleto", "ted", "doc", "account", "slip",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AmountCandidate {
    pub date: NaiveDate,
    pub amount: Decimal,
    /// Byte range of the date token in the line
    pub date_span: Range<usize>,
    /// Byte range of the amount token (marker included)
    pub amount_span: Range<usize>,
    pub score: i32,
    pub extractor: &'static str,
}

impl AmountCandidate {
    /// The line with the date and amount tokens removed.
    pub fn description(&self, line: &str) -> String {
        let mut spans = [self.date_span.clone(), self.amount_span.clone()];
        spans.sort_by_key(|s| s.start);
        let mut out = String::new();
        let mut cursor = 0;
        for span in spans {
            if span.start >= cursor {
                out.push_str(&line[cursor..span.start]);
                out.push(' ');
                cursor = span.end;
            }
        }
        out.push_str(&line[cursor.min(line.len())..]);
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

pub trait CandidateExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, line: &str, reference: YearReference) -> Vec<AmountCandidate>;
}

/// Highest score wins; among equal scores the right-most amount wins.
pub fn select_best(candidates: Vec<AmountCandidate>) -> Option<AmountCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.score >= MIN_SCORE)
        .fold(None, |best: Option<AmountCandidate>, candidate| match best {
            Some(b) if (b.score, b.amount_span.start) >= (candidate.score, candidate.amount_span.start) => Some(b),
            _ => Some(candidate),
        })
}

/// The ordered extractor list used for cooperative-bank statements.
pub fn default_extractors() -> Vec<Box<dyn CandidateExtractor>> {
    vec![
        Box::new(DateAmountDesc),
        Box::new(AmountDateDesc),
        Box::new(DateDescAmount),
    ]
}

// ============================================================================
// TOKENS
// ============================================================================

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{2}/\d{2}(?:/\d{4}|/\d{2})?)\b").unwrap())
}

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(?-?(?:R\$\s*)?\d[\d.,]*\)?(?:\s*[DCdc]\b|-)?").unwrap())
}

fn decimal_tail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.,]\d{2}\)?$").unwrap())
}

/// `dd/mm/yyyy`, `dd/mm/yy` or `dd/mm` completed from the statement's year reference.
pub fn statement_date(token: &str, reference: YearReference) -> Option<NaiveDate> {
    let token = token.trim();
    if let Some(date) = parse_date(token) {
        return Some(date);
    }
    let (day, month) = token.split_once('/')?;
    reference.resolve(month.parse().ok()?, day.parse().ok()?)
}

fn leading_date(line: &str, reference: YearReference) -> Option<(NaiveDate, Range<usize>)> {
    let caps = date_regex().captures(line)?;
    let m = caps.get(1)?;
    Some((statement_date(m.as_str(), reference)?, m.range()))
}

/// Score an amount token found at `start`; None disqualifies it.
pub fn score_token(line: &str, token: &str, start: usize) -> Option<(i32, Decimal)> {
    let trimmed = token.trim();
    let core = trimmed.trim_end_matches(['D', 'C', 'd', 'c', '-']).trim();
    let digits: String = core.chars().filter(char::is_ascii_digit).collect();
    let has_decimal = decimal_tail_regex().is_match(core);
    let has_marker = trimmed.len() != core.len();

    let before = fold(&line[..start]);
    let near_identifier = before
        .split_whitespace()
        .rev()
        .take(2)
        .any(|w| IDENTIFIER_CONTEXT.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())));

    if !has_decimal && (digits.len() == 5 || near_identifier) {
        return None;
    }

    let amount = parse_amount(trimmed).ok()?;
    let mut score = 0;
    if has_decimal {
        score += 3;
    } else if digits.len() >= 4 {
        score -= 1;
    }
    if has_marker {
        score += 2;
    }
    if near_identifier {
        score -= 2;
    }
    Some((score, amount))
}

fn candidate_at(
    line: &str,
    date: NaiveDate,
    date_span: Range<usize>,
    amount_span: Range<usize>,
    extractor: &'static str,
) -> Option<AmountCandidate> {
    let token = &line[amount_span.clone()];
    let (score, amount) = score_token(line, token, amount_span.start)?;
    Some(AmountCandidate {
        date,
        amount,
        date_span,
        amount_span,
        score,
        extractor,
    })
}

// ============================================================================
// EXTRACTORS
// ============================================================================

/// `01/03/2024 150,00 D PAGAMENTO ...`
pub struct DateAmountDesc;

impl CandidateExtractor for DateAmountDesc {
    fn name(&self) -> &'static str {
        "date-amount-description"
    }

    fn extract(&self, line: &str, reference: YearReference) -> Vec<AmountCandidate> {
        let Some((date, date_span)) = leading_date(line, reference) else {
            return Vec::new();
        };
        let rest = &line[date_span.end..];
        let offset = date_span.end + (rest.len() - rest.trim_start().len());
        amount_regex()
            .find(&line[offset..])
            .filter(|m| m.start() == 0)
            .and_then(|m| candidate_at(line, date, date_span, offset..offset + m.end(), self.name()))
            .into_iter()
            .collect()
    }
}

/// `150,00 D 01/03/2024 PAGAMENTO ...`
pub struct AmountDateDesc;

impl CandidateExtractor for AmountDateDesc {
    fn name(&self) -> &'static str {
        "amount-date-description"
    }

    fn extract(&self, line: &str, reference: YearReference) -> Vec<AmountCandidate> {
        let offset = line.len() - line.trim_start().len();
        let Some(m) = amount_regex().find(&line[offset..]).filter(|m| m.start() == 0) else {
            return Vec::new();
        };
        let amount_span = offset..offset + m.end();
        let Some((date, date_span)) = leading_date(&line[amount_span.end..], reference) else {
            return Vec::new();
        };
        let date_span = date_span.start + amount_span.end..date_span.end + amount_span.end;
        candidate_at(line, date, date_span, amount_span, self.name())
            .into_iter()
            .collect()
    }
}

/// `01/03/2024 PIX RECEBIDO FULANO 1.234,56 C`: every amount-shaped token after the date competes.
pub struct DateDescAmount;

impl CandidateExtractor for DateDescAmount {
    fn name(&self) -> &'static str {
        "date-description-amount"
    }

    fn extract(&self, line: &str, reference: YearReference) -> Vec<AmountCandidate> {
        let Some((date, date_span)) = leading_date(line, reference) else {
            return Vec::new();
        };
        let offset = date_span.end;
        amount_regex()
            .find_iter(&line[offset..])
            .filter(|m| is_token_boundary(line, offset + m.start(), offset + m.end()))
            .filter_map(|m| {
                candidate_at(line, date, date_span.clone(), offset + m.start()..offset + m.end(), self.name())
            })
            .collect()
    }
}

/// Amounts embedded in words ("NF123", "2X") are not tokens.
fn is_token_boundary(line: &str, start: usize, end: usize) -> bool {
    let before = line[..start].chars().next_back();
    let after = line[end..].chars().next();
    !before.is_some_and(|c| c.is_alphanumeric() || c == '/')
        && !after.is_some_and(|c| c.is_alphanumeric() || c == '/')
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn best(line: &str) -> Option<AmountCandidate> {
        let candidates = default_extractors()
            .iter()
            .flat_map(|e| e.extract(line, YearReference::Year(2024)))
            .collect();
        select_best(candidates)
    }

    #[test]
    fn test_date_description_amount() {
        let line = "05/03 PIX RECEBIDO FULANO 1.234,56 C";
        let c = best(line).unwrap();
        assert_eq!(c.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(c.amount, d("1234.56"));
        assert_eq!(c.description(line), "PIX RECEBIDO FULANO");
    }

    #[test]
    fn test_account_number_is_disqualified() {
        let line = "06/03/2024 TED CONTA 12345 ENVIADA 300,00 D";
        let c = best(line).unwrap();
        assert_eq!(c.amount, d("-300.00"));
        assert_eq!(c.description(line), "TED CONTA 12345 ENVIADA");
    }

    #[test]
    fn test_amount_first_layout() {
        let line = "89,90 D 07/03/2024 TARIFA PACOTE";
        let c = best(line).unwrap();
        assert_eq!(c.amount, d("-89.90"));
        assert_eq!(c.extractor, "amount-date-description");
        assert_eq!(c.description(line), "TARIFA PACOTE");
    }

    #[test]
    fn test_select_best_prefers_right_most_on_ties() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let make = |start: usize, score: i32| AmountCandidate {
            date,
            amount: Decimal::ONE,
            date_span: 0..5,
            amount_span: start..start + 4,
            score,
            extractor: "test",
        };
        let chosen = select_best(vec![make(10, 3), make(30, 3), make(20, 2)]).unwrap();
        assert_eq!(chosen.amount_span.start, 30);

        let chosen = select_best(vec![make(10, 5), make(30, 3)]).unwrap();
        assert_eq!(chosen.amount_span.start, 10);

        assert!(select_best(vec![make(10, 0)]).is_none());
    }

    #[test]
    fn test_line_without_decimal_amount_yields_nothing() {
        assert!(best("08/03/2024 AGENCIA 3001 CONTA 55555").is_none());
    }
}
