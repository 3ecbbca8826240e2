// 🔍 Deduplication Engine - Cross-file ledger duplicates
// Key: date | truncated normalized description | amount in cents

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::normalize::normalize_description;
use crate::transaction::{format_money, Transaction};

/// Characters of the normalized description that take part in the key
pub const DESCRIPTION_KEY_LEN: usize = 30;

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub key: String,

    /// Source that contributed the surviving transaction
    pub kept_source: String,

    /// Index of the survivor in `DedupOutcome::kept`
    pub kept_index: usize,

    pub dropped_source: String,
    pub dropped_line: usize,

    /// Human-readable reason
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<Transaction>,
    pub duplicates: Vec<DuplicateMatch>,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    description_key_len: usize,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            description_key_len: DESCRIPTION_KEY_LEN,
        }
    }

    pub fn with_description_key_len(mut self, len: usize) -> Self {
        self.description_key_len = len;
        self
    }

    pub fn key(&self, tx: &Transaction) -> String {
        let description: String = normalize_description(&tx.description)
            .chars()
            .take(self.description_key_len)
            .collect();
        format!("{}|{}|{}", tx.date, description, tx.cents())
    }

    /// Concatenate per-source batches in order, dropping a transaction when an
    /// earlier transaction with the same key came from a different source.
    ///
    /// Repeated keys inside one source are kept: a single export listing two
    /// identical payments is not a duplicate.
    pub fn deduplicate(&self, batches: Vec<(String, Vec<Transaction>)>) -> DedupOutcome {
        let mut first_seen: HashMap<String, (String, usize)> = HashMap::new();
        let mut outcome = DedupOutcome::default();

        for (source, transactions) in batches {
            for tx in transactions {
                let key = self.key(&tx);
                match first_seen.get(&key) {
                    Some((kept_source, kept_index)) if *kept_source != source => {
                        outcome.duplicates.push(DuplicateMatch {
                            reason: format!(
                                "Duplicate of {} entry: {} | {} | {}",
                                kept_source,
                                tx.date,
                                format_money(tx.amount),
                                tx.description
                            ),
                            key,
                            kept_source: kept_source.clone(),
                            kept_index: *kept_index,
                            dropped_source: source.clone(),
                            dropped_line: tx.source_line,
                        });
                    }
                    Some(_) => outcome.kept.push(tx),
                    None => {
                        first_seen.insert(key, (source.clone(), outcome.kept.len()));
                        outcome.kept.push(tx);
                    }
                }
            }
        }

        if !outcome.duplicates.is_empty() {
            tracing::info!(
                kept = outcome.kept.len(),
                removed = outcome.duplicates.len(),
                "cross-file duplicates removed"
            );
        }
        outcome
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn tx(day: u32, description: &str, amount: &str) -> Transaction {
        Transaction::ledger(
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            description,
            Decimal::from_str(amount).unwrap(),
        )
    }

    #[test]
    fn test_key_truncates_and_normalizes() {
        let engine = DeduplicationEngine::new();
        let a = tx(1, "Pagamento Fornecedor ACME Comércio de Peças LTDA - matriz", "-10.00");
        let b = tx(1, "PAGAMENTO FORNECEDOR ACME COMERCIO DE PECAS filial", "-10.001");
        assert_eq!(engine.key(&a), engine.key(&b));
        assert_eq!(engine.key(&a), "2024-03-01|pagamento fornecedor acme come|-1000");
    }

    #[test]
    fn test_drops_only_cross_source_duplicates() {
        let engine = DeduplicationEngine::new();
        let payables = vec![tx(1, "Aluguel", "-1000.00"), tx(1, "Aluguel", "-1000.00")];
        let general = vec![tx(1, "ALUGUEL", "-1000.00"), tx(2, "Energia", "-90.00")];

        let outcome = engine.deduplicate(vec![
            ("contas_a_pagar.txt".to_string(), payables),
            ("razao.txt".to_string(), general),
        ]);

        assert_eq!(outcome.kept.len(), 3);
        assert_eq!(outcome.duplicates.len(), 1);
        let dup = &outcome.duplicates[0];
        assert_eq!(dup.kept_source, "contas_a_pagar.txt");
        assert_eq!(dup.dropped_source, "razao.txt");
        assert_eq!(dup.kept_index, 0);
    }

    #[test]
    fn test_different_amounts_are_kept() {
        let engine = DeduplicationEngine::new();
        let outcome = engine.deduplicate(vec![
            ("a".to_string(), vec![tx(1, "Aluguel", "-1000.00")]),
            ("b".to_string(), vec![tx(1, "Aluguel", "-1000.50")]),
        ]);
        assert_eq!(outcome.kept.len(), 2);
        assert!(outcome.duplicates.is_empty());
    }
}
