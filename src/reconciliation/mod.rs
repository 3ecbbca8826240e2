// ⚖️ Reconciliation Engine - statement vs ledger
//
// Strict mode, five passes over index bitmaps (no string keys):
//   1. value mismatch   (date + document, then date + description)
//   2. pairing          (date + cents, then same date within tolerance)
//   3. missing          (whatever is left on either side)
//   4. balance          (first/last running balances)
//   5. suspicious       (fee/interest/tax entries on generic accounts)
//
// Fuzzy bank-vs-ledger matching lives in `fuzzy`.

pub mod fuzzy;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::normalize::normalize_description;
use crate::transaction::{format_money, Transaction, TransactionSnapshot};

pub use fuzzy::{match_fuzzy, FuzzyMatch, FuzzyParams, FuzzyReport};

/// Description-keyed mismatches below this are treated as rounding noise.
pub const DESCRIPTION_MISMATCH_MIN: Decimal = Decimal::ONE;

const SUSPICIOUS_KEYWORDS: [&str; 9] = [
    "tarifa", "juros", "iof", "imposto", "taxa", "multa", "fee", "interest", "tax",
];
const GENERIC_ACCOUNT_CODES: [&str; 6] = ["0", "00", "000", "999", "9999", "99999"];
const MIN_ACCOUNT_DIGITS: usize = 3;

// ============================================================================
// DIVERGENCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceKind {
    ValueMismatch,
    MissingInLedger,
    MissingInStatement,
    BalanceMismatch,
    SuspiciousClassification,
}

impl DivergenceKind {
    pub fn code(&self) -> &'static str {
        match self {
            DivergenceKind::ValueMismatch => "VALUE_MISMATCH",
            DivergenceKind::MissingInLedger => "MISSING_IN_LEDGER",
            DivergenceKind::MissingInStatement => "MISSING_IN_STATEMENT",
            DivergenceKind::BalanceMismatch => "BALANCE_MISMATCH",
            DivergenceKind::SuspiciousClassification => "SUSPICIOUS_CLASSIFICATION",
        }
    }

    pub fn all() -> [DivergenceKind; 5] {
        [
            DivergenceKind::ValueMismatch,
            DivergenceKind::MissingInLedger,
            DivergenceKind::MissingInStatement,
            DivergenceKind::BalanceMismatch,
            DivergenceKind::SuspiciousClassification,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    #[serde(rename = "type")]
    pub kind: DivergenceKind,
    pub description: String,
    pub statement: Option<TransactionSnapshot>,
    pub ledger: Option<TransactionSnapshot>,
    /// Absolute amount or balance difference, when one applies
    pub difference: Option<Decimal>,
}

impl Divergence {
    pub fn value_mismatch(statement: &Transaction, ledger: &Transaction, key: &str) -> Self {
        let difference = (statement.amount - ledger.amount).abs();
        Divergence {
            kind: DivergenceKind::ValueMismatch,
            description: format!(
                "Amount differs by {} for {} on {} (statement {}, ledger {})",
                format_money(difference),
                key,
                statement.date,
                format_money(statement.amount),
                format_money(ledger.amount)
            ),
            statement: Some(statement.into()),
            ledger: Some(ledger.into()),
            difference: Some(difference),
        }
    }

    pub fn missing_in_ledger(statement: &Transaction) -> Self {
        Divergence {
            kind: DivergenceKind::MissingInLedger,
            description: format!(
                "Statement entry not found in ledger: {} {} '{}'",
                statement.date,
                format_money(statement.amount),
                statement.description
            ),
            statement: Some(statement.into()),
            ledger: None,
            difference: Some(statement.amount.abs()),
        }
    }

    pub fn missing_in_statement(ledger: &Transaction) -> Self {
        Divergence {
            kind: DivergenceKind::MissingInStatement,
            description: format!(
                "Ledger entry not found in statement: {} {} '{}'",
                ledger.date,
                format_money(ledger.amount),
                ledger.description
            ),
            statement: None,
            ledger: Some(ledger.into()),
            difference: Some(ledger.amount.abs()),
        }
    }

    fn suspicious(ledger: &Transaction, keyword: &str) -> Self {
        Divergence {
            kind: DivergenceKind::SuspiciousClassification,
            description: format!(
                "'{}' looks like a {} charge but is posted to {}",
                ledger.description,
                keyword,
                ledger.account_code.as_deref().unwrap_or("no account")
            ),
            statement: None,
            ledger: Some(ledger.into()),
            difference: None,
        }
    }
}

/// Index pair of a statement and a ledger transaction considered the same movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub statement: usize,
    pub ledger: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub divergences: Vec<Divergence>,
    pub matched: Vec<MatchedPair>,
}

impl ReconciliationReport {
    pub fn count(&self, kind: DivergenceKind) -> usize {
        self.divergences.iter().filter(|d| d.kind == kind).count()
    }

    pub fn summary(&self) -> String {
        let counts: Vec<String> = DivergenceKind::all()
            .iter()
            .filter(|k| self.count(**k) > 0)
            .map(|k| format!("{}={}", k.code(), self.count(*k)))
            .collect();
        format!(
            "{} matched, {} divergences [{}]",
            self.matched.len(),
            self.divergences.len(),
            counts.join(", ")
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

/// Consumed flags over both index spaces; local to one reconciliation call.
struct Consumed {
    statement: Vec<bool>,
    ledger: Vec<bool>,
}

impl Consumed {
    fn new(statement_len: usize, ledger_len: usize) -> Self {
        Consumed {
            statement: vec![false; statement_len],
            ledger: vec![false; ledger_len],
        }
    }

    fn take(&mut self, statement: usize, ledger: usize) {
        self.statement[statement] = true;
        self.ledger[ledger] = true;
    }
}

type DayIndex<K> = HashMap<(NaiveDate, K), Vec<usize>>;

pub struct ReconciliationEngine {
    /// Maximum amount difference for two records to be the same movement (default: 0.01)
    pub amount_tolerance: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            amount_tolerance: Decimal::new(1, 2),
        }
    }

    pub fn with_tolerance(amount_tolerance: Decimal) -> Self {
        ReconciliationEngine {
            amount_tolerance: amount_tolerance.abs(),
        }
    }

    pub fn reconcile(&self, statement: &[Transaction], ledger: &[Transaction]) -> ReconciliationReport {
        let mut consumed = Consumed::new(statement.len(), ledger.len());
        let mut report = ReconciliationReport::default();

        self.value_mismatch_pass(statement, ledger, &mut consumed, &mut report);
        self.pairing_pass(statement, ledger, &mut consumed, &mut report);

        for (i, tx) in statement.iter().enumerate() {
            if !consumed.statement[i] {
                report.divergences.push(Divergence::missing_in_ledger(tx));
            }
        }
        for (j, tx) in ledger.iter().enumerate() {
            if !consumed.ledger[j] {
                report.divergences.push(Divergence::missing_in_statement(tx));
            }
        }

        if let Some(divergence) = self.balance_check(statement, ledger) {
            report.divergences.push(divergence);
        }
        report.divergences.extend(suspicious_classifications(ledger));

        tracing::info!(
            statement = statement.len(),
            ledger = ledger.len(),
            summary = %report.summary(),
            "strict reconciliation finished"
        );
        report
    }

    /// Pass 1: same reference, different amount
    fn value_mismatch_pass(
        &self,
        statement: &[Transaction],
        ledger: &[Transaction],
        consumed: &mut Consumed,
        report: &mut ReconciliationReport,
    ) {
        let mut by_document: DayIndex<String> = HashMap::new();
        let mut by_description: DayIndex<String> = HashMap::new();
        for (j, tx) in ledger.iter().enumerate() {
            if let Some(doc) = &tx.document_number {
                by_document.entry((tx.date, document_key(doc))).or_default().push(j);
            }
            by_description
                .entry((tx.date, normalize_description(&tx.description)))
                .or_default()
                .push(j);
        }

        let description_threshold = self.amount_tolerance.max(DESCRIPTION_MISMATCH_MIN);

        for (i, st) in statement.iter().enumerate() {
            let document_bucket = st
                .document_number
                .as_ref()
                .and_then(|doc| by_document.get(&(st.date, document_key(doc))))
                .filter(|bucket| bucket.iter().any(|&j| !consumed.ledger[j]));

            let (bucket, threshold, key) = match (document_bucket, &st.document_number) {
                (Some(bucket), Some(doc)) => (bucket, self.amount_tolerance, format!("document {}", doc)),
                _ => match by_description.get(&(st.date, normalize_description(&st.description))) {
                    Some(bucket) => (bucket, description_threshold, format!("'{}'", st.description)),
                    None => continue,
                },
            };

            let open: Vec<usize> = bucket.iter().copied().filter(|&j| !consumed.ledger[j]).collect();
            // A candidate within tolerance is left for the pairing pass
            if open.is_empty() || open.iter().any(|&j| (st.amount - ledger[j].amount).abs() <= threshold) {
                continue;
            }
            let j = open[0];
            if (st.amount - ledger[j].amount).abs() > threshold {
                report.divergences.push(Divergence::value_mismatch(st, &ledger[j], &key));
                consumed.take(i, j);
            }
        }
    }

    /// Pass 2: exact (date, cents) key first, then same date within tolerance
    fn pairing_pass(
        &self,
        statement: &[Transaction],
        ledger: &[Transaction],
        consumed: &mut Consumed,
        report: &mut ReconciliationReport,
    ) {
        let mut by_amount: DayIndex<i64> = HashMap::new();
        for (j, tx) in ledger.iter().enumerate() {
            if !consumed.ledger[j] {
                by_amount.entry((tx.date, tx.cents())).or_default().push(j);
            }
        }

        for (i, st) in statement.iter().enumerate() {
            if consumed.statement[i] {
                continue;
            }
            let exact = by_amount
                .get(&(st.date, st.cents()))
                .and_then(|bucket| bucket.iter().copied().find(|&j| !consumed.ledger[j]));
            let found = exact.or_else(|| {
                (0..ledger.len()).find(|&j| {
                    !consumed.ledger[j]
                        && ledger[j].date == st.date
                        && (st.amount - ledger[j].amount).abs() <= self.amount_tolerance
                })
            });

            if let Some(j) = found {
                consumed.take(i, j);
                report.matched.push(MatchedPair { statement: i, ledger: j });
            }
        }
    }

    /// Pass 4: first-vs-first and last-vs-last running balances, one divergence at most
    fn balance_check(&self, statement: &[Transaction], ledger: &[Transaction]) -> Option<Divergence> {
        let statement_balances: Vec<(&Transaction, Decimal)> = statement
            .iter()
            .filter_map(|t| t.running_balance.map(|b| (t, b)))
            .collect();
        let ledger_balances: Vec<(&Transaction, Decimal)> = ledger
            .iter()
            .filter_map(|t| t.running_balance.map(|b| (t, b)))
            .collect();

        let (first_s, last_s) = (statement_balances.first()?, statement_balances.last()?);
        let (first_l, last_l) = (ledger_balances.first()?, ledger_balances.last()?);

        let mut failures = Vec::new();
        for (label, s, l) in [("opening", first_s, first_l), ("closing", last_s, last_l)] {
            let difference = (s.1 - l.1).abs();
            if difference > self.amount_tolerance {
                failures.push((label, *s, *l, difference));
            }
        }
        let (_, s, l, _) = *failures.first()?;
        let difference = failures.iter().map(|f| f.3).max().unwrap_or_default();
        let description = failures
            .iter()
            .map(|(label, s, l, d)| {
                format!(
                    "{} balance differs by {} (statement {}, ledger {})",
                    label,
                    format_money(*d),
                    format_money(s.1),
                    format_money(l.1)
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        Some(Divergence {
            kind: DivergenceKind::BalanceMismatch,
            description,
            statement: Some(s.0.into()),
            ledger: Some(l.0.into()),
            difference: Some(difference),
        })
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict reconciliation with the given amount tolerance.
pub fn reconcile(statement: &[Transaction], ledger: &[Transaction], amount_tolerance: Decimal) -> ReconciliationReport {
    ReconciliationEngine::with_tolerance(amount_tolerance).reconcile(statement, ledger)
}

fn document_key(document: &str) -> String {
    document.trim().to_uppercase()
}

/// Pass 5: fee/interest/tax descriptions posted without a specific account
pub fn suspicious_classifications(ledger: &[Transaction]) -> Vec<Divergence> {
    ledger
        .iter()
        .filter(|tx| generic_account(tx.account_code.as_deref()))
        .filter_map(|tx| {
            let normalized = normalize_description(&tx.description);
            normalized
                .split_whitespace()
                .find_map(|word| {
                    SUSPICIOUS_KEYWORDS
                        .iter()
                        .find(|k| word == **k || word.strip_suffix('s') == Some(**k))
                })
                .map(|keyword| Divergence::suspicious(tx, keyword))
        })
        .collect()
}

fn generic_account(code: Option<&str>) -> bool {
    match code.map(str::trim) {
        None | Some("") => true,
        Some(code) => {
            code.chars().filter(char::is_ascii_digit).count() < MIN_ACCOUNT_DIGITS
                || GENERIC_ACCOUNT_CODES.contains(&code)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, n).unwrap()
    }

    fn st(n: u32, desc: &str, amount: &str) -> Transaction {
        Transaction::statement(day(n), desc, d(amount))
    }

    fn lg(n: u32, desc: &str, amount: &str) -> Transaction {
        Transaction::ledger(day(n), desc, d(amount)).with_account_code("1.1.1")
    }

    #[test]
    fn test_value_mismatch_by_document() {
        let statement = vec![st(1, "PAGTO FORNECEDOR", "-155.00").with_document("NF100")];
        let ledger = vec![lg(1, "Fornecedor ACME", "-150.00").with_document("NF100")];

        let report = reconcile(&statement, &ledger, d("0.01"));

        assert_eq!(report.divergences.len(), 1);
        let divergence = &report.divergences[0];
        assert_eq!(divergence.kind, DivergenceKind::ValueMismatch);
        assert_eq!(divergence.difference, Some(d("5.00")));
        assert!(divergence.description.contains("5.00"));
        assert_eq!(report.count(DivergenceKind::MissingInLedger), 0);
        assert_eq!(report.count(DivergenceKind::MissingInStatement), 0);
    }

    #[test]
    fn test_description_fallback_ignores_rounding_noise() {
        let statement = vec![st(2, "Energia", "-100.40"), st(3, "Agua", "-80.00")];
        let ledger = vec![lg(2, "ENERGIA", "-100.00"), lg(3, "água", "-95.00")];

        let report = reconcile(&statement, &ledger, d("0.01"));

        // 0.40 apart: below the 1.00 floor, so nothing pairs and both sides are missing
        assert_eq!(report.count(DivergenceKind::MissingInLedger), 1);
        assert_eq!(report.count(DivergenceKind::MissingInStatement), 1);
        assert_eq!(report.count(DivergenceKind::ValueMismatch), 1);
        assert_eq!(report.divergences.iter().find(|d| d.kind == DivergenceKind::ValueMismatch).unwrap().difference, Some(d("15.00")));
    }

    #[test]
    fn test_exact_and_tolerant_pairing_in_list_order() {
        let statement = vec![st(4, "A", "10.00"), st(4, "B", "10.00"), st(5, "C", "20.005")];
        let ledger = vec![lg(4, "x", "10.00"), lg(4, "y", "10.00"), lg(5, "z", "20.00")];

        let report = reconcile(&statement, &ledger, d("0.01"));

        assert!(report.divergences.is_empty());
        assert_eq!(
            report.matched,
            vec![
                MatchedPair { statement: 0, ledger: 0 },
                MatchedPair { statement: 1, ledger: 1 },
                MatchedPair { statement: 2, ledger: 2 },
            ]
        );
    }

    #[test]
    fn test_missing_on_both_sides() {
        let statement = vec![st(6, "Deposito", "300.00")];
        let ledger = vec![lg(7, "Recebimento", "300.00")];

        let report = reconcile(&statement, &ledger, d("0.01"));
        assert_eq!(report.count(DivergenceKind::MissingInLedger), 1);
        assert_eq!(report.count(DivergenceKind::MissingInStatement), 1);
        assert!(report.matched.is_empty());
    }

    #[test]
    fn test_balance_mismatch_reported_once() {
        let statement = vec![
            st(1, "A", "10.00").with_balance(d("110.00")),
            st(2, "B", "10.00").with_balance(d("120.00")),
        ];
        let ledger = vec![
            lg(1, "A", "10.00").with_balance(d("100.00")),
            lg(2, "B", "10.00").with_balance(d("125.00")),
        ];

        let report = reconcile(&statement, &ledger, d("0.01"));
        assert_eq!(report.count(DivergenceKind::BalanceMismatch), 1);
        let balance = report.divergences.iter().find(|d| d.kind == DivergenceKind::BalanceMismatch).unwrap();
        assert_eq!(balance.difference, Some(d("10.00")));
        assert!(balance.description.contains("opening"));
        assert!(balance.description.contains("closing"));
    }

    #[test]
    fn test_suspicious_classification() {
        let ledger = vec![
            Transaction::ledger(day(8), "Tarifa bancária", d("-12.00")),
            Transaction::ledger(day(8), "Juros cheque especial", d("-3.00")).with_account_code("999"),
            Transaction::ledger(day(8), "IOF", d("-1.00")).with_account_code("12"),
            Transaction::ledger(day(8), "Tarifas", d("-1.00")).with_account_code("3.1.2.04"),
            Transaction::ledger(day(8), "Taxista", d("-1.00")),
        ];
        let divergences = suspicious_classifications(&ledger);
        assert_eq!(divergences.len(), 3);
        assert!(divergences.iter().all(|d| d.kind == DivergenceKind::SuspiciousClassification));
    }

    #[test]
    fn test_reconcile_is_idempotent_and_inputs_untouched() {
        let statement = vec![st(1, "A", "10.00"), st(2, "B", "-5.00").with_document("X1"), st(3, "C", "7.00")];
        let ledger = vec![lg(1, "A", "10.00"), lg(2, "B", "-6.00").with_document("X1"), lg(9, "D", "1.00")];
        let before = (statement.clone(), ledger.clone());

        let first = reconcile(&statement, &ledger, d("0.01"));
        let second = reconcile(&statement, &ledger, d("0.01"));

        assert_eq!(first, second);
        assert_eq!((statement, ledger), before);
    }

    #[test]
    fn test_paired_transactions_are_never_reported_missing() {
        let statement = vec![
            st(1, "A", "10.00"),
            st(1, "B", "-20.00").with_document("D9"),
            st(2, "C", "30.00"),
            st(3, "E", "40.00"),
        ];
        let ledger = vec![
            lg(1, "A", "10.00"),
            lg(1, "B", "-25.00").with_document("D9"),
            lg(2, "C", "30.01"),
            lg(4, "F", "50.00"),
        ];
        let report = reconcile(&statement, &ledger, d("0.01"));

        let mut statement_seen = HashSet::new();
        for pair in &report.matched {
            assert!(statement_seen.insert(pair.statement));
        }
        for divergence in report.divergences.iter().filter(|d| {
            matches!(
                d.kind,
                DivergenceKind::ValueMismatch | DivergenceKind::MissingInLedger | DivergenceKind::MissingInStatement
            )
        }) {
            if let Some(s) = &divergence.statement {
                let index = statement.iter().position(|t| TransactionSnapshot::from(t) == *s).unwrap();
                assert!(statement_seen.insert(index), "statement {} reported twice", index);
            }
        }
        assert_eq!(statement_seen.len(), statement.len());
    }
}
