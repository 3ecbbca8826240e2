// Cooperative-bank (Sicoob/Sisbr) statement lines: positional layouts that vary
// between account types, resolved through the candidate extractors.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;

use super::candidates::{default_extractors, select_best, CandidateExtractor};
use super::{PageExtraction, YearReference};
use crate::normalize::{fold, normalize_description};
use crate::transaction::{cents, ParsingIssue, Transaction};

const DEDUP_DESCRIPTION_CHARS: usize = 20;

const DEBIT_KEYWORDS: [&str; 8] = [
    "pagamento", "pagto", "debito", "tarifa", "saque", "enviad", "compra", "juros",
];

fn starts_with_date(line: &str) -> bool {
    let bytes = line.trim_start().as_bytes();
    bytes.len() >= 5
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'/'
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_digit()
}

fn has_explicit_sign(token: &str) -> bool {
    let token = token.trim();
    token.starts_with('-')
        || token.starts_with('(')
        || token.ends_with('-')
        || token.ends_with(['D', 'd', 'C', 'c'])
}

pub fn extract(pages: &[String], reference: YearReference) -> PageExtraction {
    let extractors = default_extractors();
    let mut seen: HashSet<(NaiveDate, String, i64)> = HashSet::new();
    let mut out = PageExtraction::default();

    for (page_index, page) in pages.iter().enumerate() {
        for (line_index, line) in page.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let location = format!("page {} line {}", page_index + 1, line_index + 1);
            let folded = fold(line);
            let candidate = select_best(
                extractors
                    .iter()
                    .flat_map(|e: &Box<dyn CandidateExtractor>| e.extract(line, reference))
                    .collect(),
            );

            if folded.contains("saldo") {
                // Balance lines annotate the last transaction of that day
                if let Some(c) = candidate {
                    if let Some(last) = out.transactions.iter_mut().rev().find(|t| t.date == c.date) {
                        last.running_balance = Some(c.amount);
                    }
                }
                continue;
            }

            let Some(candidate) = candidate else {
                if starts_with_date(line) {
                    out.issues.push(ParsingIssue {
                        location,
                        message: "dated line without a usable amount".to_string(),
                    });
                }
                continue;
            };

            let description = candidate.description(line);
            let token = &line[candidate.amount_span.clone()];
            let mut amount = candidate.amount;
            if !has_explicit_sign(token) && DEBIT_KEYWORDS.iter().any(|k| folded.contains(k)) {
                amount = -amount.abs();
            }
            if amount == Decimal::ZERO {
                continue;
            }

            let key_description: String = normalize_description(&description)
                .chars()
                .take(DEDUP_DESCRIPTION_CHARS)
                .collect();
            if !seen.insert((candidate.date, key_description, cents(amount))) {
                continue;
            }

            let description = if description.is_empty() {
                "Sem descricao".to_string()
            } else {
                description
            };
            out.transactions.push(
                Transaction::statement(candidate.date, description, amount)
                    .on_page(page_index + 1)
                    .at_line(line_index + 1),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_extract_cooperative_statement() {
        let page = "SICOOB - Sistema de Cooperativas de Crédito do Brasil\n\
                    Período: 01/03/2024 a 31/03/2024\n\
                    01/03 SALDO ANTERIOR 1.000,00 C\n\
                    04/03 PIX RECEBIDO FULANO 500,00 C\n\
                    04/03 SALDO DO DIA 1.500,00 C\n\
                    05/03 TARIFA PACOTE SERVICOS 35,90\n\
                    06/03 TED CONTA 12345 ENVIADA 300,00 D\n\
                    07/03 DOC AGENCIA 3001\n"
            .to_string();
        let out = extract(&[page], YearReference::Year(2024));

        assert_eq!(out.transactions.len(), 3);
        let pix = &out.transactions[0];
        assert_eq!(pix.amount, d("500.00"));
        assert_eq!(pix.running_balance, Some(d("1500.00")));
        assert_eq!(out.transactions[1].amount, d("-35.90"));
        assert_eq!(out.transactions[2].amount, d("-300.00"));
        assert_eq!(out.transactions[2].description, "TED CONTA 12345 ENVIADA");

        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].location, "page 1 line 8");
    }

    #[test]
    fn test_overlapping_pages_do_not_duplicate() {
        let page = "10/03 PIX RECEBIDO CICLANO 80,00 C\n".to_string();
        let out = extract(&[page.clone(), page], YearReference::Year(2024));
        assert_eq!(out.transactions.len(), 1);
    }

    #[test]
    fn test_transactions_remember_their_page() {
        let first = "10/03 PIX RECEBIDO CICLANO 80,00 C\n".to_string();
        let second = "11/03 TARIFA PACOTE 12,00 D\n".to_string();
        let out = extract(&[first, second], YearReference::Year(2024));

        assert_eq!(out.transactions.len(), 2);
        assert_eq!(out.transactions[0].source_line, out.transactions[1].source_line);
        assert_eq!(out.transactions[0].source_page, Some(1));
        assert_eq!(out.transactions[1].source_page, Some(2));
    }
}
