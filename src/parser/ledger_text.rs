// 📒 Ledger text exports
// Delimited (`|`, `;`, tab) or free-form lines → ledger transactions

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::OnceLock;

use super::{decode_text, SourceFormat, SourceParser};
use crate::error::Result;
use crate::locale::{parse_amount, parse_date};
use crate::normalize::fold;
use crate::transaction::{IssueLog, ParseOutput, Transaction};

const DELIMITERS: [char; 3] = ['|', ';', '\t'];

const HEADER_KEYWORDS: [&str; 14] = [
    "data", "date", "historico", "descricao", "description", "valor", "amount", "conta",
    "account", "documento", "document", "lancamento", "categoria", "saldo",
];

/// Fixed 7-column layout: date, description, account, document, amount, category, entity type
const FIXED_COLUMNS: usize = 7;

fn account_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+){2,}$").unwrap())
}

fn document_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]+[-/]?\d+$").unwrap())
}

fn positional_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}-\d{2}-\d{2})\s+(.+?)\s+(\(?-?(?:R\$\s*)?-?[\d.,]*\d\)?-?)\s*([DCdc])?\s*$",
        )
        .unwrap()
    })
}

pub fn is_account_code(token: &str) -> bool {
    account_code_regex().is_match(token.trim())
}

pub fn is_document_number(token: &str) -> bool {
    document_regex().is_match(token.trim())
}

/// Numeric token with a separator that is not shaped like an account code.
fn amount_token(token: &str) -> Option<Decimal> {
    let token = token.trim();
    if !(token.contains('.') || token.contains(',')) || is_account_code(token) {
        return None;
    }
    parse_amount(token).ok()
}

fn is_sign_marker(token: &str) -> Option<char> {
    match token.trim() {
        "D" | "d" => Some('D'),
        "C" | "c" => Some('C'),
        _ => None,
    }
}

// ============================================================================
// LINE CLASSIFICATION
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct LedgerFields {
    date: Option<NaiveDate>,
    description: String,
    amount: Option<Decimal>,
    account_code: Option<String>,
    document: Option<String>,
    category: Option<String>,
    entity_type: Option<String>,
}

#[derive(Debug, PartialEq)]
enum LineOutcome {
    Entry(LedgerFields),
    Skip,
    Issue(String),
}

fn is_header(line: &str, tokens: &[&str]) -> bool {
    let folded = fold(line);
    let has_keyword = folded
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| HEADER_KEYWORDS.contains(&word));
    has_keyword && !tokens.iter().any(|t| parse_date(t).is_some())
}

fn split_tokens(line: &str, delimiter: char) -> Vec<&str> {
    let mut tokens: Vec<&str> = line.split(delimiter).map(str::trim).collect();
    // "| a | b |" borders
    if tokens.first().is_some_and(|t| t.is_empty()) {
        tokens.remove(0);
    }
    if tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    tokens
}

fn classify_line(line: &str) -> LineOutcome {
    if !line.chars().any(char::is_alphanumeric) {
        return LineOutcome::Skip;
    }

    match DELIMITERS.iter().find(|d| line.contains(**d)) {
        Some(&delimiter) => {
            let tokens = split_tokens(line, delimiter);
            if is_header(line, &tokens) {
                return LineOutcome::Skip;
            }
            if tokens.len() == FIXED_COLUMNS && parse_date(tokens[0]).is_some() {
                fixed_layout(&tokens)
            } else {
                heuristic_layout(&tokens)
            }
        }
        None => {
            if is_header(line, &line.split_whitespace().collect::<Vec<_>>()) {
                return LineOutcome::Skip;
            }
            positional_layout(line)
        }
    }
}

fn fixed_layout(tokens: &[&str]) -> LineOutcome {
    let amount = match parse_amount(tokens[4]) {
        Ok(amount) => amount,
        Err(e) => return LineOutcome::Issue(format!("no usable amount: {}", e)),
    };
    LineOutcome::Entry(LedgerFields {
        date: parse_date(tokens[0]),
        description: tokens[1].to_string(),
        amount: Some(amount),
        account_code: Some(tokens[2].to_string()),
        document: Some(tokens[3].to_string()),
        category: Some(tokens[5].to_string()),
        entity_type: Some(tokens[6].to_string()),
    })
}

fn heuristic_layout(tokens: &[&str]) -> LineOutcome {
    let Some(date_index) = (0..tokens.len().min(3)).find(|&i| parse_date(tokens[i]).is_some()) else {
        return LineOutcome::Issue("no date found in the first three columns".to_string());
    };

    let mut fields = LedgerFields {
        date: parse_date(tokens[date_index]),
        ..LedgerFields::default()
    };
    let mut marker = None;
    let mut words = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if i == date_index || token.is_empty() {
            continue;
        }
        if fields.account_code.is_none() && is_account_code(token) {
            fields.account_code = Some(token.to_string());
        } else if let Some(amount) = amount_token(token).filter(|_| fields.amount.is_none()) {
            fields.amount = Some(amount);
        } else if fields.document.is_none() && is_document_number(token) {
            fields.document = Some(token.to_string());
        } else if let Some(m) = is_sign_marker(token) {
            marker = Some(m);
        } else if token.chars().any(char::is_alphabetic) {
            words.push(*token);
        }
    }

    let Some(amount) = fields.amount else {
        return LineOutcome::Issue("no usable amount".to_string());
    };
    fields.amount = Some(apply_marker(amount, marker));
    fields.description = words.join(" ");
    LineOutcome::Entry(fields)
}

fn positional_layout(line: &str) -> LineOutcome {
    let Some(caps) = positional_regex().captures(line) else {
        return LineOutcome::Issue("line does not match date, text, amount layout".to_string());
    };

    let amount = match parse_amount(&caps[3]) {
        Ok(amount) => amount,
        Err(e) => return LineOutcome::Issue(format!("no usable amount: {}", e)),
    };
    let marker = caps.get(4).and_then(|m| is_sign_marker(m.as_str()));

    let mut fields = LedgerFields {
        date: parse_date(&caps[1]),
        amount: Some(apply_marker(amount, marker)),
        ..LedgerFields::default()
    };

    let mut words = Vec::new();
    for word in caps[2].split_whitespace() {
        if fields.account_code.is_none() && is_account_code(word) {
            fields.account_code = Some(word.to_string());
        } else if fields.document.is_none() && is_document_number(word) {
            fields.document = Some(word.to_string());
        } else {
            words.push(word);
        }
    }
    fields.description = words.join(" ");
    LineOutcome::Entry(fields)
}

fn apply_marker(amount: Decimal, marker: Option<char>) -> Decimal {
    match marker {
        Some('D') => -amount.abs(),
        _ => amount,
    }
}

// ============================================================================
// PARSER
// ============================================================================

pub struct LedgerTextParser;

impl LedgerTextParser {
    pub fn new() -> Self {
        LedgerTextParser
    }

    pub fn parse_text(&self, text: &str, strict: bool) -> Result<ParseOutput> {
        let mut issues = IssueLog::new(strict);
        let mut transactions = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let location = format!("line {}", line_number);

            let fields = match classify_line(line) {
                LineOutcome::Skip => continue,
                LineOutcome::Issue(message) => {
                    issues.record(location, message)?;
                    continue;
                }
                LineOutcome::Entry(fields) => fields,
            };

            let (Some(date), Some(amount)) = (fields.date, fields.amount) else {
                issues.record(location, "missing date or amount")?;
                continue;
            };
            if amount.is_zero() {
                continue;
            }
            if fields.description.trim().is_empty() {
                issues.record(location, "missing description")?;
                continue;
            }

            let mut tx = Transaction::ledger(date, fields.description.trim(), amount).at_line(line_number);
            if let Some(code) = fields.account_code {
                tx = tx.with_account_code(code);
            }
            if let Some(document) = fields.document {
                tx = tx.with_document(document);
            }
            if let Some(category) = fields.category {
                tx = tx.with_category(category);
            }
            if let Some(entity_type) = fields.entity_type {
                tx = tx.with_entity_type(entity_type);
            }
            transactions.push(tx);
        }

        tracing::debug!(
            transactions = transactions.len(),
            issues = issues.len(),
            "ledger text parsed"
        );
        Ok(issues.finish(transactions))
    }
}

impl Default for LedgerTextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for LedgerTextParser {
    fn parse(&self, raw: &[u8], strict: bool) -> Result<ParseOutput> {
        self.parse_text(&decode_text(raw), strict)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::LedgerText
    }
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

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_fixed_seven_column_layout() {
        let text = "Data|Historico|Conta|Documento|Valor|Categoria|Tipo\n\
                    01/03/2024|Pagamento fornecedor|2.1.1.01|NF100|-150,00|fornecedores|payable\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();

        assert!(out.issues.is_empty());
        assert_eq!(out.transactions.len(), 1);
        let tx = &out.transactions[0];
        assert_eq!(tx.date, date(2024, 3, 1));
        assert_eq!(tx.description, "Pagamento fornecedor");
        assert_eq!(tx.account_code.as_deref(), Some("2.1.1.01"));
        assert_eq!(tx.document_number.as_deref(), Some("NF100"));
        assert_eq!(tx.amount, d("-150.00"));
        assert_eq!(tx.category.as_deref(), Some("fornecedores"));
        assert_eq!(tx.entity_type.as_deref(), Some("payable"));
        assert_eq!(tx.source_line, 2);
    }

    #[test]
    fn test_heuristic_layout_finds_fields_in_any_order() {
        let text = "| NF-220 | 05/03/2024 | Tarifa bancaria | 3.1.2 | 12,50 | D |\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();

        assert_eq!(out.transactions.len(), 1);
        let tx = &out.transactions[0];
        assert_eq!(tx.date, date(2024, 3, 5));
        assert_eq!(tx.amount, d("-12.50"));
        assert_eq!(tx.account_code.as_deref(), Some("3.1.2"));
        assert_eq!(tx.document_number.as_deref(), Some("NF-220"));
        assert_eq!(tx.description, "Tarifa bancaria");
    }

    #[test]
    fn test_semicolon_and_tab_delimiters() {
        let text = "2024-03-01;Recebimento cliente;1.234,56\n02/03/2024\tJuros\t1.1.9\t0,35 D\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();

        assert_eq!(out.transactions.len(), 2);
        assert_eq!(out.transactions[0].amount, d("1234.56"));
        assert_eq!(out.transactions[1].amount, d("-0.35"));
        assert_eq!(out.transactions[1].account_code.as_deref(), Some("1.1.9"));
    }

    #[test]
    fn test_positional_layout() {
        let text = "10/03/2024 Aluguel 4.1.1 REC55 2.500,00 D\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();

        assert_eq!(out.transactions.len(), 1);
        let tx = &out.transactions[0];
        assert_eq!(tx.amount, d("-2500.00"));
        assert_eq!(tx.account_code.as_deref(), Some("4.1.1"));
        assert_eq!(tx.document_number.as_deref(), Some("REC55"));
        assert_eq!(tx.description, "Aluguel");
    }

    #[test]
    fn test_missing_amount_is_an_issue_and_zero_is_dropped() {
        let text = "01/03/2024|Sem valor|3.1.2\n01/03/2024|Estorno|0,00\n01/03/2024|Ok|10,00\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();

        assert_eq!(out.transactions.len(), 1);
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].location, "line 1");
    }

    #[test]
    fn test_strict_mode_aborts_on_first_issue() {
        let text = "01/03/2024|Ok|10,00\nlinha quebrada\n";
        let result = LedgerTextParser::new().parse_text(text, true);
        assert!(result.is_err());
    }

    #[test]
    fn test_header_with_date_is_not_skipped() {
        // "Saldo" is a header keyword but the line carries a date
        let text = "31/03/2024|Saldo aplicacao|100,00\n";
        let out = LedgerTextParser::new().parse_text(text, false).unwrap();
        assert_eq!(out.transactions.len(), 1);
    }
}
