// ✅ Account Validator
// Per-entry classification of ledger account codes against the chart of accounts
// and the enabled validation rules.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rules::{RuleCheck, RuleSet, Severity, ValidationRule};
use crate::traits::ChartOfAccounts;
use crate::transaction::{format_money, Origin, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Invalid,
    Unknown,
}

impl ValidationStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationStatus::Ok => "ok",
            ValidationStatus::Invalid => "invalid",
            ValidationStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingAccountCode,
    AccountNotFound,
    NoRuleMatch,
    RuleViolation,
    Valid,
}

impl ReasonCode {
    pub fn code(&self) -> &'static str {
        match self {
            ReasonCode::MissingAccountCode => "MISSING_ACCOUNT_CODE",
            ReasonCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ReasonCode::NoRuleMatch => "NO_RULE_MATCH",
            ReasonCode::RuleViolation => "RULE_VIOLATION",
            ReasonCode::Valid => "VALID",
        }
    }
}

/// Allow/block sets that were checked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedConstraints {
    pub allowed_account_prefixes: Vec<String>,
    pub allowed_account_codes: Vec<String>,
    pub blocked_account_prefixes: Vec<String>,
    pub blocked_account_codes: Vec<String>,
}

impl ExpectedConstraints {
    fn merge(&mut self, rule: &ValidationRule) {
        extend_unique(&mut self.allowed_account_prefixes, &rule.allowed_account_prefixes);
        extend_unique(&mut self.allowed_account_codes, &rule.allowed_account_codes);
        extend_unique(&mut self.blocked_account_prefixes, &rule.blocked_account_prefixes);
        extend_unique(&mut self.blocked_account_codes, &rule.blocked_account_codes);
    }

    fn of(rule: &ValidationRule) -> Self {
        let mut constraints = ExpectedConstraints::default();
        constraints.merge(rule);
        constraints
    }
}

fn extend_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub rule_ids: Vec<String>,
    pub rule_name: Option<String>,
    pub severity: Option<Severity>,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `date|amount|ordinal`
    pub transaction_key: String,
    pub account_code: Option<String>,
    pub status: ValidationStatus,
    pub reason_code: ReasonCode,
    pub message: String,
    pub expected_constraints: Option<ExpectedConstraints>,
    pub metadata: Option<ResultMetadata>,
}

pub fn transaction_key(tx: &Transaction, ordinal: usize) -> String {
    format!("{}|{}|{}", tx.date, format_money(tx.amount), ordinal)
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct AccountValidator {
    rules: RuleSet,
}

impl AccountValidator {
    pub fn new(rules: RuleSet) -> Self {
        AccountValidator { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// One result per ledger transaction, in input order. Statement entries are skipped.
    pub async fn validate(
        &self,
        transactions: &[Transaction],
        chart_source: &str,
        chart: &dyn ChartOfAccounts,
    ) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::new();

        for (ordinal, tx) in transactions.iter().enumerate() {
            if tx.origin != Origin::Ledger {
                continue;
            }
            let key = transaction_key(tx, ordinal);

            let Some(code) = tx.account_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
                results.push(ValidationResult {
                    transaction_key: key,
                    account_code: None,
                    status: ValidationStatus::Unknown,
                    reason_code: ReasonCode::MissingAccountCode,
                    message: "Ledger entry has no account code".to_string(),
                    expected_constraints: None,
                    metadata: None,
                });
                continue;
            };

            let lookup = chart.exists(code, chart_source).await?;
            if !lookup.found {
                results.push(ValidationResult {
                    transaction_key: key,
                    account_code: Some(code.to_string()),
                    status: ValidationStatus::Invalid,
                    reason_code: ReasonCode::AccountNotFound,
                    message: format!("Account {} not found in chart '{}'", code, chart_source),
                    expected_constraints: None,
                    metadata: None,
                });
                continue;
            }

            results.push(self.apply_rules(tx, code, key, lookup.display_name));
        }

        let invalid = results.iter().filter(|r| r.status == ValidationStatus::Invalid).count();
        tracing::info!(
            validated = results.len(),
            invalid,
            rules = self.rules.rule_count(),
            chart_source,
            "account validation finished"
        );
        Ok(results)
    }

    /// Conjunction over every matching rule: any violation makes the entry invalid.
    fn apply_rules(&self, tx: &Transaction, code: &str, key: String, account_name: Option<String>) -> ValidationResult {
        let matching: Vec<&ValidationRule> = self.rules.matching(tx).collect();
        let rule_ids: Vec<String> = matching.iter().map(|r| r.id.clone()).collect();

        if matching.is_empty() {
            return ValidationResult {
                transaction_key: key,
                account_code: Some(code.to_string()),
                status: ValidationStatus::Unknown,
                reason_code: ReasonCode::NoRuleMatch,
                message: "No validation rule applies to this entry".to_string(),
                expected_constraints: None,
                metadata: Some(ResultMetadata {
                    account_name,
                    ..ResultMetadata::default()
                }),
            };
        }

        // Rules are already in priority order; the first one that fails is cited
        let violation = matching
            .iter()
            .map(|rule| (*rule, rule.check(code)))
            .find(|(_, check)| *check != RuleCheck::Passed);

        if let Some((rule, check)) = violation {
            let detail = match &check {
                RuleCheck::Blocked(entry) => format!("account {} is blocked by {}", code, entry),
                _ => format!("account {} is not in the allowed list", code),
            };
            let message = match &rule.message {
                Some(custom) => format!("{} ({})", custom, detail),
                None => format!("Rule '{}' violated: {}", rule.name, detail),
            };
            return ValidationResult {
                transaction_key: key,
                account_code: Some(code.to_string()),
                status: ValidationStatus::Invalid,
                reason_code: ReasonCode::RuleViolation,
                message,
                expected_constraints: Some(ExpectedConstraints::of(rule)),
                metadata: Some(ResultMetadata {
                    rule_ids,
                    rule_name: Some(rule.name.clone()),
                    severity: Some(rule.severity),
                    account_name,
                }),
            };
        }

        let mut constraints = ExpectedConstraints::default();
        for rule in &matching {
            constraints.merge(rule);
        }
        ValidationResult {
            transaction_key: key,
            account_code: Some(code.to_string()),
            status: ValidationStatus::Ok,
            reason_code: ReasonCode::Valid,
            message: format!("Account {} satisfies {} rule(s)", code, matching.len()),
            expected_constraints: Some(constraints),
            metadata: Some(ResultMetadata {
                rule_name: Some(matching[0].name.clone()),
                severity: Some(matching[0].severity),
                rule_ids,
                account_name,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchField;
    use crate::traits::AccountLookup;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    struct FixedChart(Vec<&'static str>);

    #[async_trait]
    impl ChartOfAccounts for FixedChart {
        async fn exists(&self, code: &str, source: &str) -> Result<AccountLookup> {
            if source == "default" && self.0.iter().any(|c| *c == code) {
                Ok(AccountLookup::found(format!("Conta {}", code)))
            } else {
                Ok(AccountLookup::missing())
            }
        }
    }

    fn entry(code: &str, event_type: &str) -> Transaction {
        Transaction::ledger(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), "Fornecedor", Decimal::new(-15000, 2))
            .with_account_code(code)
            .with_event_type(event_type)
    }

    fn chart() -> FixedChart {
        FixedChart(vec!["2.1.1.01", "2.1.9.99", "3.1.1.01"])
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid() {
        let validator = AccountValidator::new(RuleSet::new());
        let results = validator
            .validate(&[entry("9.9.9", "payable")], "default", &chart())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ValidationStatus::Invalid);
        assert_eq!(results[0].reason_code, ReasonCode::AccountNotFound);
        assert_eq!(results[0].transaction_key, "2024-03-01|-150.00|0");
    }

    #[tokio::test]
    async fn test_missing_code_and_no_rule() {
        let validator = AccountValidator::new(RuleSet::new());
        let txns = vec![
            entry("  ", "payable"),
            entry("2.1.1.01", "payable"),
            Transaction::statement(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), "PIX", Decimal::ONE),
        ];
        let results = validator.validate(&txns, "default", &chart()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].reason_code, ReasonCode::MissingAccountCode);
        assert_eq!(results[0].status, ValidationStatus::Unknown);
        assert_eq!(results[1].reason_code, ReasonCode::NoRuleMatch);
        assert_eq!(
            results[1].metadata.as_ref().unwrap().account_name.as_deref(),
            Some("Conta 2.1.1.01")
        );
    }

    #[tokio::test]
    async fn test_all_matching_rules_must_pass() {
        let liabilities = ValidationRule::new("liabilities", MatchField::EventType, "payable").allow_prefix("2.1");
        let no_suspense = ValidationRule::new("no-suspense", MatchField::EventType, "payable")
            .block_prefix("2.1.9")
            .with_message("Suspense accounts are not allowed");
        let validator = AccountValidator::new(RuleSet::from_rules(vec![liabilities, no_suspense]));

        let txns = vec![entry("2.1.1.01", "PAYABLE"), entry("2.1.9.99", "payable"), entry("3.1.1.01", "payable")];
        let results = validator.validate(&txns, "default", &chart()).await.unwrap();

        assert_eq!(results[0].status, ValidationStatus::Ok);
        assert_eq!(results[0].reason_code, ReasonCode::Valid);
        assert_eq!(results[0].metadata.as_ref().unwrap().rule_ids, vec!["liabilities", "no-suspense"]);

        // satisfies "liabilities" but violates "no-suspense"
        assert_eq!(results[1].status, ValidationStatus::Invalid);
        assert_eq!(results[1].reason_code, ReasonCode::RuleViolation);
        assert_eq!(
            results[1].metadata.as_ref().unwrap().rule_name.as_deref(),
            Some("no-suspense")
        );
        assert!(results[1].message.starts_with("Suspense accounts"));

        assert_eq!(results[2].status, ValidationStatus::Invalid);
        assert_eq!(
            results[2].expected_constraints.as_ref().unwrap().allowed_account_prefixes,
            vec!["2.1"]
        );
    }

    #[tokio::test]
    async fn test_first_failing_rule_in_priority_order_is_cited() {
        let no_suspense = ValidationRule::new("no-suspense", MatchField::EventType, "payable").block_prefix("2.1.9");
        let assets_only = ValidationRule::new("assets-only", MatchField::EventType, "payable")
            .allow_prefix("1.1")
            .with_priority(10);
        let validator = AccountValidator::new(RuleSet::from_rules(vec![no_suspense, assets_only]));

        let results = validator
            .validate(&[entry("2.1.9.99", "payable")], "default", &chart())
            .await
            .unwrap();

        assert_eq!(results[0].status, ValidationStatus::Invalid);
        let metadata = results[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.rule_name.as_deref(), Some("assets-only"));
        assert_eq!(metadata.rule_ids, vec!["assets-only", "no-suspense"]);
        assert!(results[0].message.contains("not in the allowed list"));
    }
}
