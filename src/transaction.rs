// 💳 Canonical transaction shape
// Every parser emits these; matcher, validator and orchestrator only ever read them.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

// ============================================================================
// TRANSACTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    Ledger,
    Statement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    pub document_number: Option<String>,
    /// Signed: debit negative, credit positive. Never zero after parsing.
    pub amount: Decimal,
    pub running_balance: Option<Decimal>,
    pub origin: Origin,
    pub account_code: Option<String>,
    pub event_type: Option<String>,
    pub category: Option<String>,
    pub entity_type: Option<String>,

    /// 1-based line/record the transaction was read from
    #[serde(default)]
    pub source_line: usize,
    /// 1-based page, for paginated sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page: Option<usize>,
}

impl Transaction {
    pub fn new(origin: Origin, date: NaiveDate, description: impl Into<String>, amount: Decimal) -> Self {
        Transaction {
            date,
            description: description.into(),
            document_number: None,
            amount,
            running_balance: None,
            origin,
            account_code: None,
            event_type: None,
            category: None,
            entity_type: None,
            source_line: 0,
            source_page: None,
        }
    }

    pub fn ledger(date: NaiveDate, description: impl Into<String>, amount: Decimal) -> Self {
        Self::new(Origin::Ledger, date, description, amount)
    }

    pub fn statement(date: NaiveDate, description: impl Into<String>, amount: Decimal) -> Self {
        Self::new(Origin::Statement, date, description, amount)
    }

    /// Builder pattern: external reference id (blank values are ignored)
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document_number = non_blank(document.into());
        self
    }

    pub fn with_account_code(mut self, code: impl Into<String>) -> Self {
        self.account_code = non_blank(code.into());
        self
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.running_balance = Some(balance);
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = non_blank(event_type.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = non_blank(category.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = non_blank(entity_type.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.source_line = line;
        self
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.source_page = Some(page);
        self
    }

    /// Amount rounded to whole cents, used as an index key
    pub fn cents(&self) -> i64 {
        cents(self.amount)
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn cents(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(i64::MAX)
}

/// Two-decimal rendering for messages and keys ("5.00", "-150.00")
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

// ============================================================================
// SNAPSHOTS (value copies referenced by divergences)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub date: NaiveDate,
    pub description: String,
    pub document_number: Option<String>,
    pub amount: Decimal,
    pub running_balance: Option<Decimal>,
    pub account_code: Option<String>,
}

impl From<&Transaction> for TransactionSnapshot {
    fn from(tx: &Transaction) -> Self {
        TransactionSnapshot {
            date: tx.date,
            description: tx.description.clone(),
            document_number: tx.document_number.clone(),
            amount: tx.amount,
            running_balance: tx.running_balance,
            account_code: tx.account_code.clone(),
        }
    }
}

// ============================================================================
// PARSING ISSUES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingIssue {
    /// "line 4", "row 12", "block 2", "page 1 line 30"
    pub location: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOutput {
    pub transactions: Vec<Transaction>,
    pub issues: Vec<ParsingIssue>,
}

/// Accumulates issues; in strict mode the first one becomes an error instead.
#[derive(Debug)]
pub struct IssueLog {
    strict: bool,
    issues: Vec<ParsingIssue>,
}

impl IssueLog {
    pub fn new(strict: bool) -> Self {
        IssueLog {
            strict,
            issues: Vec::new(),
        }
    }

    pub fn record(&mut self, location: impl Into<String>, message: impl Into<String>) -> Result<()> {
        let location = location.into();
        let message = message.into();
        if self.strict {
            return Err(ReconcileError::StrictParse { location, message });
        }
        tracing::debug!(%location, %message, "parsing issue recorded");
        self.issues.push(ParsingIssue { location, message });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn finish(self, transactions: Vec<Transaction>) -> ParseOutput {
        ParseOutput {
            transactions,
            issues: self.issues,
        }
    }
}
