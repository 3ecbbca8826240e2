// 🔍 Fuzzy bank-vs-ledger matching
// Windowed date/amount filter, description similarity gate, composite score.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Divergence, DivergenceKind};
use crate::similarity::description_similarity;
use crate::transaction::Transaction;

const SIMILARITY_WEIGHT: f64 = 0.7;
const DATE_WEIGHT: f64 = 0.2;
const AMOUNT_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyParams {
    pub date_window_days: i64,
    pub amount_tolerance: Decimal,
    pub min_similarity: f64,
    /// Let one ledger transaction satisfy several bank transactions
    pub allow_many_to_one: bool,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        FuzzyParams {
            date_window_days: 3,
            amount_tolerance: Decimal::new(1, 2),
            min_similarity: 0.3,
            allow_many_to_one: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub bank: usize,
    pub ledger: usize,
    pub similarity: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuzzyReport {
    pub pairs: Vec<FuzzyMatch>,
    pub divergences: Vec<Divergence>,
}

impl FuzzyReport {
    pub fn count(&self, kind: DivergenceKind) -> usize {
        self.divergences.iter().filter(|d| d.kind == kind).count()
    }
}

/// 0.7·similarity + 0.2·date closeness + 0.1·amount closeness
pub fn composite_score(similarity: f64, date_distance: i64, window: i64, amount_distance: Decimal, amount: Decimal) -> f64 {
    let date_term = if window <= 0 {
        1.0
    } else {
        1.0 - date_distance as f64 / window as f64
    };
    let amount_term = if amount.is_zero() {
        1.0
    } else {
        1.0 - (amount_distance / amount.abs()).to_f64().unwrap_or(0.0)
    };
    SIMILARITY_WEIGHT * similarity + DATE_WEIGHT * date_term + AMOUNT_WEIGHT * amount_term
}

/// Match bank transactions to ledger transactions in bank-list order.
///
/// A candidate must lie within the date window and amount tolerance and reach
/// `min_similarity`; the highest composite score wins (first one on ties).
pub fn match_fuzzy(bank: &[Transaction], ledger: &[Transaction], params: &FuzzyParams) -> FuzzyReport {
    let tolerance = params.amount_tolerance.abs();
    let window = params.date_window_days.max(0);
    let mut ledger_used = vec![false; ledger.len()];
    let mut report = FuzzyReport::default();

    for (i, b) in bank.iter().enumerate() {
        let mut best: Option<FuzzyMatch> = None;

        for (j, l) in ledger.iter().enumerate() {
            if ledger_used[j] && !params.allow_many_to_one {
                continue;
            }
            let date_distance = (b.date - l.date).num_days().abs();
            if date_distance > window {
                continue;
            }
            let amount_distance = (b.amount - l.amount).abs();
            if amount_distance > tolerance {
                continue;
            }
            let similarity = description_similarity(&b.description, &l.description);
            if similarity < params.min_similarity {
                continue;
            }

            let score = composite_score(similarity, date_distance, window, amount_distance, b.amount);
            if best.as_ref().map_or(true, |m| score > m.score) {
                best = Some(FuzzyMatch { bank: i, ledger: j, similarity, score });
            }
        }

        match best {
            Some(m) => {
                ledger_used[m.ledger] = true;
                report.pairs.push(m);
            }
            None => report.divergences.push(Divergence::missing_in_ledger(b)),
        }
    }

    for (j, l) in ledger.iter().enumerate() {
        if !ledger_used[j] {
            report.divergences.push(Divergence::missing_in_statement(l));
        }
    }

    tracing::info!(
        bank = bank.len(),
        ledger = ledger.len(),
        pairs = report.pairs.len(),
        divergences = report.divergences.len(),
        "fuzzy matching finished"
    );
    report
}
