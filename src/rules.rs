// 🏷️ Validation Rules - Rules as Data
// Which account codes are acceptable for ledger entries with given attributes

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::normalize::fold;
use crate::transaction::Transaction;

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// Transaction attribute a rule selects on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    #[serde(alias = "eventType")]
    EventType,
    Category,
    #[serde(alias = "entityType")]
    EntityType,
    #[serde(alias = "documentNumber")]
    DocumentNumber,
    Description,
    #[serde(alias = "accountCode")]
    AccountCode,
}

impl MatchField {
    pub fn value_of<'a>(&self, tx: &'a Transaction) -> Option<&'a str> {
        match self {
            MatchField::EventType => tx.event_type.as_deref(),
            MatchField::Category => tx.category.as_deref(),
            MatchField::EntityType => tx.entity_type.as_deref(),
            MatchField::DocumentNumber => tx.document_number.as_deref(),
            MatchField::Description => Some(tx.description.as_str()),
            MatchField::AccountCode => tx.account_code.as_deref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MatchField::EventType => "event_type",
            MatchField::Category => "category",
            MatchField::EntityType => "entity_type",
            MatchField::DocumentNumber => "document_number",
            MatchField::Description => "description",
            MatchField::AccountCode => "account_code",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Rule ID for tracking
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub match_field: MatchField,
    pub match_value: String,

    #[serde(default)]
    pub allowed_account_prefixes: Vec<String>,
    #[serde(default)]
    pub allowed_account_codes: Vec<String>,
    #[serde(default)]
    pub blocked_account_prefixes: Vec<String>,
    #[serde(default)]
    pub blocked_account_codes: Vec<String>,

    #[serde(default)]
    pub severity: Severity,

    /// Shown when the rule is violated
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Priority (higher = evaluated first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    0
}

/// Outcome of checking one account code against one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCheck {
    Passed,
    Blocked(String),
    NotAllowed,
}

impl ValidationRule {
    pub fn new(id: impl Into<String>, match_field: MatchField, match_value: impl Into<String>) -> Self {
        let id = id.into();
        ValidationRule {
            name: id.clone(),
            id,
            match_field,
            match_value: match_value.into(),
            allowed_account_prefixes: Vec::new(),
            allowed_account_codes: Vec::new(),
            blocked_account_prefixes: Vec::new(),
            blocked_account_codes: Vec::new(),
            severity: Severity::default(),
            message: None,
            enabled: true,
            priority: 0,
        }
    }

    pub fn allow_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_account_prefixes.push(prefix.into());
        self
    }

    pub fn allow_code(mut self, code: impl Into<String>) -> Self {
        self.allowed_account_codes.push(code.into());
        self
    }

    pub fn block_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.blocked_account_prefixes.push(prefix.into());
        self
    }

    pub fn block_code(mut self, code: impl Into<String>) -> Self {
        self.blocked_account_codes.push(code.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Case- and accent-insensitive equality on the selected field
    pub fn applies_to(&self, tx: &Transaction) -> bool {
        self.match_field
            .value_of(tx)
            .map(|value| fold(value.trim()) == fold(self.match_value.trim()))
            .unwrap_or(false)
    }

    /// Blocked lists win over allowed lists.
    ///
    /// A rule with both allowed lists empty accepts every code it does not block;
    /// it never reports `NotAllowed`, unlike a literal "must be in the allowed list" reading.
    pub fn check(&self, code: &str) -> RuleCheck {
        if self.blocked_account_codes.iter().any(|c| c.trim() == code) {
            return RuleCheck::Blocked(code.to_string());
        }
        if let Some(prefix) = self
            .blocked_account_prefixes
            .iter()
            .find(|p| !p.trim().is_empty() && code.starts_with(p.trim()))
        {
            return RuleCheck::Blocked(prefix.trim().to_string());
        }

        if self.allowed_account_codes.is_empty() && self.allowed_account_prefixes.is_empty() {
            return RuleCheck::Passed;
        }
        let allowed = self.allowed_account_codes.iter().any(|c| c.trim() == code)
            || self
                .allowed_account_prefixes
                .iter()
                .any(|p| !p.trim().is_empty() && code.starts_with(p.trim()));
        if allowed {
            RuleCheck::Passed
        } else {
            RuleCheck::NotAllowed
        }
    }
}

// ============================================================================
// RULE SET
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ValidationRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<ValidationRule> = serde_json::from_str(&content)
            .context("Failed to parse rules JSON")?;

        Ok(RuleSet::from_rules(rules))
    }

    /// Keeps enabled rules, highest priority first (stable for equal priorities)
    pub fn from_rules(rules: Vec<ValidationRule>) -> Self {
        let mut rules: Vec<ValidationRule> = rules.into_iter().filter(|r| r.enabled).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleSet { rules }
    }

    pub fn add_rule(&mut self, rule: ValidationRule) {
        if rule.enabled {
            self.rules.push(rule);
            self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }

    pub fn matching<'a>(&'a self, tx: &'a Transaction) -> impl Iterator<Item = &'a ValidationRule> + 'a {
        self.rules.iter().filter(move |r| r.applies_to(tx))
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<ValidationRule> {
        self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
