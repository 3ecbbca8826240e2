// ⚙️ Configuration
// JSON file (optional) → RECONCILE_* environment overrides → JobParams

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::orchestrator::JobParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub amount_tolerance: Decimal,
    pub date_window_days: i64,
    pub min_similarity: f64,
    pub allow_many_to_one: bool,
    pub strict: bool,
    pub chart_source: String,
    pub pdf_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let params = JobParams::default();
        ReconcileConfig {
            amount_tolerance: params.amount_tolerance,
            date_window_days: params.date_window_days,
            min_similarity: params.min_similarity,
            allow_many_to_one: params.allow_many_to_one,
            strict: params.strict,
            chart_source: params.chart_source,
            pdf_timeout_secs: params.pdf_timeout_secs,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ReconcileConfig {
    /// Defaults, then the JSON file when given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_json::from_str(&content).context("Failed to parse config JSON")?
            }
            None => ReconcileConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_value::<Decimal>("RECONCILE_AMOUNT_TOLERANCE")? {
            self.amount_tolerance = value;
        }
        if let Some(value) = env_value::<i64>("RECONCILE_DATE_WINDOW_DAYS")? {
            self.date_window_days = value;
        }
        if let Some(value) = env_value::<bool>("RECONCILE_STRICT")? {
            self.strict = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount_tolerance.is_sign_negative() {
            return Err(anyhow!("amount_tolerance must not be negative"));
        }
        if self.date_window_days < 0 {
            return Err(anyhow!("date_window_days must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(anyhow!("min_similarity must be between 0 and 1"));
        }
        Ok(())
    }

    pub fn job_params(&self) -> JobParams {
        JobParams {
            amount_tolerance: self.amount_tolerance,
            date_window_days: self.date_window_days,
            min_similarity: self.min_similarity,
            allow_many_to_one: self.allow_many_to_one,
            strict: self.strict,
            chart_source: self.chart_source.clone(),
            pdf_timeout_secs: self.pdf_timeout_secs,
        }
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_values_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_similarity": 0.5, "chart_source": "filial", "amount_tolerance": "0.05"}}"#).unwrap();

        let config = ReconcileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.min_similarity, 0.5);
        assert_eq!(config.chart_source, "filial");
        assert_eq!(config.pdf_timeout_secs, 60);

        let params = config.job_params();
        assert_eq!(params.chart_source, "filial");
        assert_eq!(params.fuzzy_params().min_similarity, 0.5);
    }

    #[test]
    fn test_rejects_out_of_range_similarity() {
        let config = ReconcileConfig {
            min_similarity: 1.5,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        env::set_var("RECONCILE_TEST_WINDOW", " 5 ");
        assert_eq!(env_value::<i64>("RECONCILE_TEST_WINDOW").unwrap(), Some(5));
        env::set_var("RECONCILE_TEST_WINDOW", "five");
        assert!(env_value::<i64>("RECONCILE_TEST_WINDOW").is_err());
        env::remove_var("RECONCILE_TEST_WINDOW");
        assert_eq!(env_value::<i64>("RECONCILE_TEST_WINDOW").unwrap(), None);
    }
}
