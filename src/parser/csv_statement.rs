// 🧾 Bank statement CSV
// Column roles come from fuzzy header matching, so each bank's export works unchanged.

use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;

use super::{decode_text, SourceFormat, SourceParser};
use crate::error::{ReconcileError, Result};
use crate::locale::{parse_amount, parse_date};
use crate::normalize::normalize_header;
use crate::transaction::{IssueLog, ParseOutput, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Date,
    Balance,
    Debit,
    Credit,
    Document,
    Amount,
    Description,
}

impl ColumnRole {
    fn candidates(&self) -> &'static [&'static str] {
        match self {
            ColumnRole::Date => &["data", "date", "dt lancamento", "data movimento"],
            ColumnRole::Balance => &["saldo", "balance"],
            ColumnRole::Debit => &["debito", "debit", "saida", "saidas", "withdrawal"],
            ColumnRole::Credit => &["credito", "credit", "entrada", "entradas", "deposit"],
            ColumnRole::Document => &["documento", "doc", "num doc", "referencia", "reference", "check number"],
            ColumnRole::Amount => &["valor", "amount", "value", "quantia", "montante"],
            ColumnRole::Description => &[
                "descricao", "historico", "description", "memo", "lancamento", "detalhe", "details",
            ],
        }
    }
}

/// Resolution order: each role only sees columns not claimed by an earlier one.
const RESOLUTION_ORDER: [ColumnRole; 7] = [
    ColumnRole::Date,
    ColumnRole::Balance,
    ColumnRole::Debit,
    ColumnRole::Credit,
    ColumnRole::Document,
    ColumnRole::Amount,
    ColumnRole::Description,
];

#[derive(Debug, Default, PartialEq)]
struct ColumnMap {
    date: Option<usize>,
    description: Option<usize>,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
    document: Option<usize>,
    balance: Option<usize>,
}

fn header_matches(header: &str, candidate: &str) -> bool {
    !header.is_empty() && (header.contains(candidate) || candidate.contains(header))
}

fn resolve_columns(headers: &[String]) -> Result<ColumnMap> {
    let mut used = vec![false; headers.len()];
    let mut map = ColumnMap::default();

    for role in RESOLUTION_ORDER {
        let found = headers.iter().enumerate().position(|(i, header)| {
            !used[i] && role.candidates().iter().any(|c| header_matches(header, c))
        });
        if let Some(index) = found {
            used[index] = true;
        }
        let slot = match role {
            ColumnRole::Date => &mut map.date,
            ColumnRole::Balance => &mut map.balance,
            ColumnRole::Debit => &mut map.debit,
            ColumnRole::Credit => &mut map.credit,
            ColumnRole::Document => &mut map.document,
            ColumnRole::Amount => &mut map.amount,
            ColumnRole::Description => &mut map.description,
        };
        *slot = found;
    }

    if map.date.is_none() {
        return Err(ReconcileError::MissingColumn("date".to_string()));
    }
    if map.description.is_none() {
        return Err(ReconcileError::MissingColumn("description".to_string()));
    }
    if map.amount.is_none() && map.debit.is_none() && map.credit.is_none() {
        return Err(ReconcileError::MissingColumn("amount (or debit/credit)".to_string()));
    }
    Ok(map)
}

fn detect_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semicolons == 0 && commas == 0 && header_line.contains('\t') {
        b'\t'
    } else if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn cell<'a>(record: &'a StringRecord, index: Option<usize>) -> &'a str {
    index.and_then(|i| record.get(i)).map(str::trim).unwrap_or("")
}

// ============================================================================
// PARSER
// ============================================================================

pub struct CsvStatementParser;

impl CsvStatementParser {
    pub fn new() -> Self {
        CsvStatementParser
    }

    pub fn parse_text(&self, text: &str, strict: bool) -> Result<ParseOutput> {
        let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let mut reader = ReaderBuilder::new()
            .delimiter(detect_delimiter(header_line))
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let headers: Vec<String> = loop {
            match records.next() {
                Some(record) => {
                    let record = record?;
                    if record.iter().any(|c| !c.trim().is_empty()) {
                        break record.iter().map(normalize_header).collect();
                    }
                }
                None => return Err(ReconcileError::MissingColumn("header row".to_string())),
            }
        };
        let columns = resolve_columns(&headers)?;

        let mut issues = IssueLog::new(strict);
        let mut transactions = Vec::new();

        for record in records {
            let record = record?;
            let row = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let location = format!("row {}", row);

            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }

            let date_text = cell(&record, columns.date);
            let Some(date) = parse_date(date_text) else {
                issues.record(location, format!("missing or unparsable date '{}'", date_text))?;
                continue;
            };

            let description = cell(&record, columns.description);
            if description.is_empty() {
                issues.record(location, "missing description")?;
                continue;
            }

            let amount = match self.row_amount(&record, &columns) {
                Ok(amount) => amount,
                Err(message) => {
                    issues.record(location, message)?;
                    continue;
                }
            };
            if amount.is_zero() {
                continue;
            }

            let mut tx = Transaction::statement(date, description, amount)
                .with_document(cell(&record, columns.document))
                .at_line(row);
            if let Ok(balance) = parse_amount(cell(&record, columns.balance)) {
                tx = tx.with_balance(balance);
            }
            transactions.push(tx);
        }

        tracing::debug!(
            transactions = transactions.len(),
            issues = issues.len(),
            "statement csv parsed"
        );
        Ok(issues.finish(transactions))
    }

    /// Single amount column, or debit (negative) / credit (positive) pair.
    fn row_amount(&self, record: &StringRecord, columns: &ColumnMap) -> std::result::Result<Decimal, String> {
        if columns.amount.is_some() {
            let text = cell(record, columns.amount);
            return parse_amount(text).map_err(|e| format!("missing or invalid amount: {}", e));
        }

        let debit = cell(record, columns.debit);
        let credit = cell(record, columns.credit);
        if debit.is_empty() && credit.is_empty() {
            return Err("missing debit and credit values".to_string());
        }

        let mut amount = Decimal::ZERO;
        if !debit.is_empty() {
            amount -= parse_amount(debit).map_err(|e| format!("invalid debit: {}", e))?.abs();
        }
        if !credit.is_empty() {
            amount += parse_amount(credit).map_err(|e| format!("invalid credit: {}", e))?.abs();
        }
        Ok(amount)
    }
}

impl Default for CsvStatementParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for CsvStatementParser {
    fn parse(&self, raw: &[u8], strict: bool) -> Result<ParseOutput> {
        self.parse_text(&decode_text(raw), strict)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::StatementCsv
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

    #[test]
    fn test_semicolon_export_with_single_amount() {
        let text = "Data Lançamento;Histórico;Documento;Valor;Saldo\n\
                    01/03/2024;PIX RECEBIDO CLIENTE;D123;1.500,00;2.500,00\n\
                    02/03/2024;TARIFA PACOTE;;-35,90;2.464,10\n";
        let out = CsvStatementParser::new().parse_text(text, false).unwrap();

        assert!(out.issues.is_empty());
        assert_eq!(out.transactions.len(), 2);
        let first = &out.transactions[0];
        assert_eq!(first.amount, d("1500.00"));
        assert_eq!(first.document_number.as_deref(), Some("D123"));
        assert_eq!(first.running_balance, Some(d("2500.00")));
        assert_eq!(first.source_line, 2);
        assert_eq!(out.transactions[1].amount, d("-35.90"));
        assert_eq!(out.transactions[1].document_number, None);
    }

    #[test]
    fn test_debit_credit_pair() {
        let text = "Date,Description,Debit,Credit\n\
                    2024-03-01,Supplier payment,\"1,200.00\",\n\
                    2024-03-02,Customer receipt,,300.00\n";
        let out = CsvStatementParser::new().parse_text(text, false).unwrap();

        assert_eq!(out.transactions.len(), 2);
        assert_eq!(out.transactions[0].amount, d("-1200.00"));
        assert_eq!(out.transactions[1].amount, d("300.00"));
    }

    #[test]
    fn test_blank_rows_skipped_bad_rows_reported() {
        let text = "Data;Descricao;Valor\n;;\n99/99/2024;Bad date;10,00\n03/03/2024;;10,00\n04/03/2024;Zero;0,00\n";
        let out = CsvStatementParser::new().parse_text(text, false).unwrap();

        assert!(out.transactions.is_empty());
        assert_eq!(out.issues.len(), 2);
        assert_eq!(out.issues[0].location, "row 3");
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let text = "Data;Valor\n01/03/2024;10,00\n";
        let err = CsvStatementParser::new().parse_text(text, false).unwrap_err();
        assert!(matches!(err, ReconcileError::MissingColumn(ref c) if c == "description"));
    }

    #[test]
    fn test_header_resolution_order() {
        let headers: Vec<String> = ["Data", "Histórico", "Saída", "Entrada", "Saldo"]
            .iter()
            .map(|h| normalize_header(h))
            .collect();
        let map = resolve_columns(&headers).unwrap();
        assert_eq!(map.date, Some(0));
        assert_eq!(map.description, Some(1));
        assert_eq!(map.debit, Some(2));
        assert_eq!(map.credit, Some(3));
        assert_eq!(map.balance, Some(4));
        assert_eq!(map.amount, None);
    }
}
