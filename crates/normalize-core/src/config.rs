//! Engine configuration.
//!
//! [`EngineConfig`] is an explicit, immutable configuration object passed
//! into the engine's constructors. There is no process-wide singleton, so
//! parallel runs (and parallel tests) can use different rule sets without
//! global state.

use serde::{Deserialize, Serialize};

use crate::error::{NormalizeError, Result};

/// Weights for the quality score's sub-components. Must sum to 1.0.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Required-concept coverage.
    pub concept_coverage: f64,
    /// Balance-equation accuracy.
    pub balance_accuracy: f64,
    /// Duplicate penalty.
    pub duplicate_penalty: f64,
    /// Resolved-metric ratio.
    pub resolved_ratio: f64,
    /// Dimensional complexity bonus.
    pub dimensional_bonus: f64,
}

impl ScoreWeights {
    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.concept_coverage
            + self.balance_accuracy
            + self.duplicate_penalty
            + self.resolved_ratio
            + self.dimensional_bonus
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            concept_coverage: 0.30,
            balance_accuracy: 0.25,
            duplicate_penalty: 0.15,
            resolved_ratio: 0.15,
            dimensional_bonus: 0.15,
        }
    }
}

/// Immutable configuration for the normalization and quality engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quality score weights.
    pub weights: ScoreWeights,
    /// Concepts a complete annual filing is expected to tag.
    pub required_concepts: Vec<String>,
    /// Expected number of annual filings per company (filing-cadence check).
    pub expected_annual_filings: u32,
    /// Completeness below this fraction raises a warning.
    pub completeness_warn_threshold: f64,
    /// Completeness below this fraction raises an error.
    pub completeness_error_floor: f64,
    /// Relative tolerance when comparing duplicate fact values.
    pub duplicate_tolerance: f64,
    /// Confidence multiplier applied to values sourced from a conflicted
    /// dedup class.
    pub conflict_confidence_penalty: f64,
    /// Relative balance-equation error at which the balance sub-score
    /// decays to zero.
    pub balance_error_cutoff: f64,
    /// Fraction of segment-level facts at which the dimensional bonus
    /// saturates at 1.0.
    pub dimensional_bonus_saturation: f64,
    /// Metric id carrying total assets (balance-equation check).
    pub assets_metric: String,
    /// Metric id carrying total liabilities.
    pub liabilities_metric: String,
    /// Metric id carrying stockholders' equity.
    pub equity_metric: String,
    /// Maximum filings normalized concurrently by the batch runner.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            required_concepts: vec![
                "us-gaap:Assets".to_string(),
                "us-gaap:Revenues".to_string(),
                "us-gaap:NetIncomeLoss".to_string(),
                "us-gaap:Liabilities".to_string(),
                "us-gaap:StockholdersEquity".to_string(),
                "us-gaap:CashAndCashEquivalentsAtCarryingValue".to_string(),
            ],
            expected_annual_filings: 10,
            completeness_warn_threshold: 0.5,
            completeness_error_floor: 0.1,
            duplicate_tolerance: 1e-6,
            conflict_confidence_penalty: 0.5,
            balance_error_cutoff: 0.05,
            dimensional_bonus_saturation: 0.25,
            assets_metric: "total_assets".to_string(),
            liabilities_metric: "total_liabilities".to_string(),
            equity_metric: "stockholders_equity".to_string(),
            max_concurrency: 8,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`NormalizeError::Config`] if weights do not sum to 1.0,
    /// thresholds are out of order, or tolerances are non-positive.
    /// Configuration errors are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(NormalizeError::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        for (name, w) in [
            ("concept_coverage", self.weights.concept_coverage),
            ("balance_accuracy", self.weights.balance_accuracy),
            ("duplicate_penalty", self.weights.duplicate_penalty),
            ("resolved_ratio", self.weights.resolved_ratio),
            ("dimensional_bonus", self.weights.dimensional_bonus),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(NormalizeError::Config(format!(
                    "weight {name} must be in [0, 1], got {w}"
                )));
            }
        }
        if self.completeness_error_floor > self.completeness_warn_threshold {
            return Err(NormalizeError::Config(format!(
                "completeness error floor {} exceeds warn threshold {}",
                self.completeness_error_floor, self.completeness_warn_threshold
            )));
        }
        if self.duplicate_tolerance <= 0.0 {
            return Err(NormalizeError::Config(
                "duplicate tolerance must be positive".to_string(),
            ));
        }
        if self.balance_error_cutoff <= 0.0 {
            return Err(NormalizeError::Config(
                "balance error cutoff must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(NormalizeError::Config(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
