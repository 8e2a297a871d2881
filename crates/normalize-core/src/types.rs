//! Core data types for fact normalization.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Ticker`] - Company ticker symbol
//! - [`RawFact`] - One tagged value extracted from a filing
//! - [`CanonicalFact`] - Deduplicated representative of a fact group
//! - [`StandardizedMetric`] / [`ConceptMapping`] - The mapping catalog
//! - [`NormalizedFinancial`] - One resolved, cross-company-comparable value
//! - [`QualityIssue`] / [`QualityScore`] - Reconciliation and scoring output

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A company ticker symbol.
///
/// Tickers are automatically uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    /// Creates a new ticker from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    /// Returns the ticker as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ticker {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Ticker {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Ticker {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Whether a fact measures a point in time or a span of time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    /// Point-in-time measurement (balance sheet items).
    Instant,
    /// Span-of-time measurement (income and cash flow items).
    #[default]
    Duration,
}

/// A fiscal reporting period: a year plus an optional quarter.
///
/// `quarter = None` means an annual period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiscalPeriod {
    /// Fiscal year.
    pub year: i32,
    /// Fiscal quarter (1-4), or `None` for annual.
    pub quarter: Option<u8>,
}

impl FiscalPeriod {
    /// Creates an annual fiscal period.
    #[must_use]
    pub const fn annual(year: i32) -> Self {
        Self {
            year,
            quarter: None,
        }
    }

    /// Creates a quarterly fiscal period.
    #[must_use]
    pub const fn quarterly(year: i32, quarter: u8) -> Self {
        Self {
            year,
            quarter: Some(quarter),
        }
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quarter {
            Some(q) => write!(f, "FY{}Q{}", self.year, q),
            None => write!(f, "FY{}", self.year),
        }
    }
}

/// Segment dimensions attached to a fact: an ordered axis -> member mapping.
///
/// An empty mapping means the fact is the company-wide total. Non-empty
/// dimensions mark the fact as a breakdown (e.g. by geography or product
/// line), which is excluded from top-line normalization. The ordering is
/// deterministic (`BTreeMap`) so dimensions can participate in dedup keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dimensions(BTreeMap<String, String>);

impl Dimensions {
    /// Creates an empty (company-wide total) dimension set.
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeMap::new())
    }

    /// Creates dimensions from axis/member pairs.
    #[must_use]
    pub fn from_pairs<I, A, M>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, M)>,
        A: Into<String>,
        M: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(a, m)| (a.into(), m.into()))
                .collect(),
        )
    }

    /// Returns true if there are no dimensions (company-wide total).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of axes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over axis/member pairs in axis order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(a, m)| (a.as_str(), m.as_str()))
    }
}

/// One tagged value extracted from one filing.
///
/// Raw facts are immutable once extracted; the engine treats them as
/// read-only input. Within one filing the tuple
/// (concept, period end, dimensions) is the natural key; facts sharing it
/// are candidates for deduplication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFact {
    /// Internal id, unique within the store. Used as the final dedup
    /// tie-break, so selection stays deterministic across runs.
    pub fact_id: i64,
    /// Accession number of the filing this fact came from.
    pub accession_number: String,
    /// Namespaced taxonomy concept, e.g. `us-gaap:Assets`.
    pub concept_name: String,
    /// Numeric value, if the fact is numeric.
    pub value: Option<f64>,
    /// Textual value, for non-numeric facts.
    pub text_value: Option<String>,
    /// Unit of measure, e.g. "USD" or "shares".
    pub unit: Option<String>,
    /// Instant or duration measurement.
    pub period_type: PeriodType,
    /// Start of the reporting period (duration facts only).
    pub period_start: Option<NaiveDate>,
    /// End of the reporting period.
    pub period_end: NaiveDate,
    /// Segment dimensions; empty = company-wide total.
    pub dimensions: Dimensions,
    /// Precision indicator from the source document (higher = more precise).
    pub decimals: Option<i32>,
    /// True for company-specific extension concepts.
    pub is_custom: bool,
}

impl RawFact {
    /// Creates a numeric fact with required fields.
    #[must_use]
    pub fn numeric(
        fact_id: i64,
        accession_number: impl Into<String>,
        concept_name: impl Into<String>,
        value: f64,
        period_end: NaiveDate,
    ) -> Self {
        Self {
            fact_id,
            accession_number: accession_number.into(),
            concept_name: concept_name.into(),
            value: Some(value),
            text_value: None,
            unit: None,
            period_type: PeriodType::Duration,
            period_start: None,
            period_end,
            dimensions: Dimensions::none(),
            decimals: None,
            is_custom: false,
        }
    }

    /// Sets the unit of measure.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the period type.
    #[must_use]
    pub const fn with_period_type(mut self, period_type: PeriodType) -> Self {
        self.period_type = period_type;
        self
    }

    /// Sets the segment dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Sets the precision indicator.
    #[must_use]
    pub const fn with_decimals(mut self, decimals: i32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    /// Returns true if this fact carries the company-wide total
    /// (no segment dimensions).
    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// The output of deduplication: one raw fact chosen to represent its
/// equivalence class.
///
/// Canonical facts are recomputed per normalization run and never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFact {
    /// The selected representative fact.
    pub fact: RawFact,
    /// Ids of the facts this one absorbed (empty for singleton classes).
    pub absorbed: Vec<i64>,
    /// True if the class contained numerically conflicting values. The
    /// resolver halves the confidence of anything sourced from a conflicted
    /// class.
    pub conflicted: bool,
}

impl CanonicalFact {
    /// Wraps a fact that had no duplicates.
    #[must_use]
    pub const fn single(fact: RawFact) -> Self {
        Self {
            fact,
            absorbed: Vec::new(),
            conflicted: false,
        }
    }
}

/// Category of a standardized metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricCategory {
    /// Balance sheet items.
    BalanceSheet,
    /// Income statement items.
    IncomeStatement,
    /// Cash flow statement items.
    CashFlow,
    /// Ratios derived from other metrics.
    Ratio,
    /// Anything else (per-share data, share counts, ...).
    Other,
}

/// Data type of a standardized metric's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricDataType {
    /// Monetary amount.
    Monetary,
    /// Share count.
    Shares,
    /// Dimensionless ratio.
    Ratio,
    /// Percentage.
    Percentage,
}

/// A named target concept in the canonical schema.
///
/// Metrics are configuration, created once at startup and read-only to the
/// resolver. A metric with a `calculation_rule` is derived from other
/// metrics instead of being directly tagged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardizedMetric {
    /// Stable identifier, e.g. "revenue".
    pub metric_id: String,
    /// Human-readable label, e.g. "Total Revenue".
    pub display_label: String,
    /// Statement category.
    pub category: MetricCategory,
    /// Value data type.
    pub data_type: MetricDataType,
    /// Formula over other metric ids, for derived metrics.
    pub calculation_rule: Option<String>,
}

impl StandardizedMetric {
    /// Creates a directly-tagged metric.
    #[must_use]
    pub fn new(
        metric_id: impl Into<String>,
        display_label: impl Into<String>,
        category: MetricCategory,
        data_type: MetricDataType,
    ) -> Self {
        Self {
            metric_id: metric_id.into(),
            display_label: display_label.into(),
            category,
            data_type,
            calculation_rule: None,
        }
    }

    /// Sets the calculation rule, making this a derived metric.
    #[must_use]
    pub fn with_calculation_rule(mut self, rule: impl Into<String>) -> Self {
        self.calculation_rule = Some(rule.into());
        self
    }

    /// Returns true if this metric is computed from other metrics.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        self.calculation_rule.is_some()
    }
}

/// One concept mapping rule: ties a taxonomy concept to a standardized
/// metric with a priority and an authoring confidence.
///
/// Lower priority numbers are tried first. A rule with
/// `applies_to_industry` set only applies to companies whose SIC code
/// starts with that prefix; at equal priority an industry-specific rule
/// beats a universal one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapping {
    /// Target standardized metric id.
    pub metric_id: String,
    /// Taxonomy concept this rule matches, e.g. `us-gaap:Revenues`.
    pub concept_name: String,
    /// Priority; lower is tried first.
    pub priority: u32,
    /// Rule-authoring confidence in [0, 1].
    pub confidence_score: f64,
    /// Optional SIC code prefix this rule is restricted to.
    pub applies_to_industry: Option<String>,
}

impl ConceptMapping {
    /// Creates a universal mapping rule.
    #[must_use]
    pub fn new(
        metric_id: impl Into<String>,
        concept_name: impl Into<String>,
        priority: u32,
        confidence_score: f64,
    ) -> Self {
        Self {
            metric_id: metric_id.into(),
            concept_name: concept_name.into(),
            priority,
            confidence_score,
            applies_to_industry: None,
        }
    }

    /// Restricts this rule to companies whose SIC code starts with `sic`.
    #[must_use]
    pub fn with_industry(mut self, sic: impl Into<String>) -> Self {
        self.applies_to_industry = Some(sic.into());
        self
    }

    /// Returns true if this rule applies to a company with the given SIC code.
    #[must_use]
    pub fn applies_to(&self, sic_code: Option<&str>) -> bool {
        match (&self.applies_to_industry, sic_code) {
            (None, _) => true,
            (Some(prefix), Some(sic)) => sic.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

/// One resolved, cross-company-comparable metric value.
///
/// At most one row exists per (ticker, fiscal year, fiscal quarter,
/// metric); re-running normalization upserts, never duplicates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFinancial {
    /// Company ticker.
    pub company_ticker: Ticker,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Fiscal quarter (1-4), or `None` for annual.
    pub fiscal_quarter: Option<u8>,
    /// Standardized metric id.
    pub metric_id: String,
    /// Resolved value.
    pub metric_value: f64,
    /// The taxonomy concept (or formula) the value came from.
    pub source_concept: String,
    /// Accession number of the filing the value came from.
    pub source_accession: String,
    /// Combined confidence in [0, 1].
    pub confidence_score: f64,
}

impl NormalizedFinancial {
    /// Returns the fiscal period of this row.
    #[must_use]
    pub const fn period(&self) -> FiscalPeriod {
        FiscalPeriod {
            year: self.fiscal_year,
            quarter: self.fiscal_quarter,
        }
    }

    /// Returns the uniqueness key: (ticker, year, quarter, metric).
    #[must_use]
    pub fn key(&self) -> (Ticker, i32, Option<u8>, String) {
        (
            self.company_ticker.clone(),
            self.fiscal_year,
            self.fiscal_quarter,
            self.metric_id.clone(),
        )
    }
}

/// Severity of a quality issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational only.
    Info,
    /// Worth a look; data remains usable.
    Warning,
    /// Data is wrong or untraceable.
    Error,
    /// Signals silent data loss or corruption.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The fixed set of issue kinds the engine can report.
///
/// Each reconciliation check and the deduplicator emit tagged variants
/// rather than free-form strings, so issues stay independently testable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    /// A company is missing expected filings for its cadence.
    MissingFilings,
    /// A filing marked processed has zero extracted facts.
    FilingWithoutFacts,
    /// A normalized row's source concept has no matching raw fact.
    DanglingSource,
    /// Duplicate fact groups present after normalization ran.
    DuplicateFacts,
    /// Duplicate facts carried numerically conflicting values.
    ConflictingValues,
    /// A company/period resolved too few standardized metrics.
    LowCompleteness,
    /// A fact or normalized row references a filing that does not exist.
    OrphanedRecord,
    /// A reconciliation check itself failed to run.
    CheckFailed,
    /// A normalization worker failed while processing one filing.
    WorkerFailed,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingFilings => "missing_filings",
            Self::FilingWithoutFacts => "filing_without_facts",
            Self::DanglingSource => "dangling_source",
            Self::DuplicateFacts => "duplicate_facts",
            Self::ConflictingValues => "conflicting_values",
            Self::LowCompleteness => "low_completeness",
            Self::OrphanedRecord => "orphaned_record",
            Self::CheckFailed => "check_failed",
            Self::WorkerFailed => "worker_failed",
        };
        write!(f, "{s}")
    }
}

/// One quality issue emitted by the deduplicator, the batch runner, or a
/// reconciliation check.
///
/// Issues are an append-only audit trail: never mutated, only superseded by
/// newer runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// How bad it is.
    pub severity: Severity,
    /// Which check produced it.
    pub kind: IssueKind,
    /// Accession number or other scope identifier (ticker, period).
    pub scope: String,
    /// Human-readable description.
    pub message: String,
    /// Number of records affected.
    pub affected_record_count: u64,
}

impl QualityIssue {
    /// Creates a new issue.
    #[must_use]
    pub fn new(
        severity: Severity,
        kind: IssueKind,
        scope: impl Into<String>,
        message: impl Into<String>,
        affected_record_count: u64,
    ) -> Self {
        Self {
            severity,
            kind,
            scope: scope.into(),
            message: message.into(),
            affected_record_count,
        }
    }
}

/// Letter grade for a quality score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    /// Score >= 90.
    A,
    /// Score >= 80.
    B,
    /// Score >= 70.
    C,
    /// Score >= 60.
    D,
    /// Score < 60.
    F,
}

impl Grade {
    /// Maps a 0-100 score to a letter grade.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::A
        } else if score >= 80.0 {
            Self::B
        } else if score >= 70.0 {
            Self::C
        } else if score >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        write!(f, "{s}")
    }
}

/// Sub-score breakdown backing a [`QualityScore`], each component in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Fraction of the required concept set present as raw facts.
    pub concept_coverage: f64,
    /// Balance equation accuracy after linear decay.
    pub balance_accuracy: f64,
    /// 1 minus the fraction of dedup classes that conflicted.
    pub duplicate_penalty: f64,
    /// Fraction of applicable standardized metrics that resolved.
    pub resolved_ratio: f64,
    /// Segment disclosure richness, capped at 1.
    pub dimensional_bonus: f64,
}

/// Composite quality score for one filing.
///
/// Recomputed per run; the latest value is authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Accession number of the scored filing.
    pub accession_number: String,
    /// Composite score in [0, 100].
    pub score: f64,
    /// Letter grade derived from the score.
    pub grade: Grade,
    /// Weighted sub-scores.
    pub breakdown: ScoreBreakdown,
}

/// Company-level quality aggregate across all scored filings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompanyQuality {
    /// Company ticker.
    pub ticker: Ticker,
    /// Number of scored filings.
    pub filing_count: usize,
    /// Mean score.
    pub average_score: f64,
    /// Lowest filing score.
    pub min_score: f64,
    /// Highest filing score.
    pub max_score: f64,
    /// Count of filings per grade.
    pub grade_distribution: BTreeMap<Grade, usize>,
}

/// Metadata for one filing, as held by the fact store's filing index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilingMetadata {
    /// SEC accession number, the filing's identity.
    pub accession_number: String,
    /// Company ticker.
    pub company_ticker: Ticker,
    /// SIC industry code, when known.
    pub sic_code: Option<String>,
    /// Form type, e.g. "10-K" or "10-K/A".
    pub form_type: String,
    /// Date the filing was submitted.
    pub filing_date: NaiveDate,
    /// Fiscal year covered.
    pub fiscal_year: i32,
    /// Fiscal quarter covered, `None` for annual filings.
    pub fiscal_quarter: Option<u8>,
    /// True once fact extraction has run for this filing.
    pub processed: bool,
}

impl FilingMetadata {
    /// Returns the fiscal period this filing reports on.
    #[must_use]
    pub const fn period(&self) -> FiscalPeriod {
        FiscalPeriod {
            year: self.fiscal_year,
            quarter: self.fiscal_quarter,
        }
    }

    /// Returns true for amended filings (form type ends in "/A").
    ///
    /// Amendments supersede the original filing for the same period.
    #[must_use]
    pub fn is_amendment(&self) -> bool {
        self.form_type.ends_with("/A")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_uppercases() {
        assert_eq!(Ticker::new("aapl").as_str(), "AAPL");
        assert_eq!(Ticker::from("msft"), Ticker::new("MSFT"));
    }

    #[test]
    fn dimensions_ordering_is_deterministic() {
        let a = Dimensions::from_pairs([("geo", "US"), ("product", "iPhone")]);
        let b = Dimensions::from_pairs([("product", "iPhone"), ("geo", "US")]);
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(Dimensions::none().is_empty());
    }

    #[test]
    fn mapping_industry_filter() {
        let universal = ConceptMapping::new("revenue", "us-gaap:Revenues", 1, 0.9);
        let banking = ConceptMapping::new("revenue", "us-gaap:InterestAndDividendIncomeOperating", 1, 0.9)
            .with_industry("60");

        assert!(universal.applies_to(None));
        assert!(universal.applies_to(Some("6021")));
        assert!(banking.applies_to(Some("6021")));
        assert!(!banking.applies_to(Some("3674")));
        assert!(!banking.applies_to(None));
    }

    #[test]
    fn grade_thresholds() {
        assert_eq!(Grade::from_score(95.0), Grade::A);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(89.9), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.9), Grade::F);
    }

    #[test]
    fn amendment_detection() {
        let mut meta = FilingMetadata {
            accession_number: "0000320193-24-000123".to_string(),
            company_ticker: Ticker::new("AAPL"),
            sic_code: Some("3571".to_string()),
            form_type: "10-K".to_string(),
            filing_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            fiscal_year: 2024,
            fiscal_quarter: None,
            processed: true,
        };
        assert!(!meta.is_amendment());
        meta.form_type = "10-K/A".to_string();
        assert!(meta.is_amendment());
        assert_eq!(meta.period(), FiscalPeriod::annual(2024));
    }
}
