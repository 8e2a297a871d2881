//! Composite quality scoring.
//!
//! One filing's score is a weighted sum of five sub-scores, each in [0, 1],
//! scaled to 0-100 and mapped to a letter grade. The breakdown is stored
//! alongside the score so a low grade is always explainable.

use std::collections::BTreeMap;

use tracing::debug;

use normalize_core::{
    CompanyQuality, EngineConfig, Grade, NormalizedFinancial, QualityScore, ScoreBreakdown,
    Ticker,
};

use crate::resolver::{FilingContext, ResolutionOutcome};

/// Scores one filing from its resolution outcome and dedup statistics.
#[derive(Debug)]
pub struct QualityScorer<'a> {
    config: &'a EngineConfig,
}

impl<'a> QualityScorer<'a> {
    /// Creates a scorer over a validated config.
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Computes the composite score for one filing.
    #[must_use]
    pub fn score_filing(&self, ctx: &FilingContext, outcome: &ResolutionOutcome) -> QualityScore {
        let breakdown = ScoreBreakdown {
            concept_coverage: self.concept_coverage(ctx),
            balance_accuracy: self.balance_accuracy(&outcome.rows),
            duplicate_penalty: duplicate_penalty(ctx),
            resolved_ratio: resolved_ratio(outcome),
            dimensional_bonus: self.dimensional_bonus(ctx),
        };
        let weights = &self.config.weights;
        let weighted = weights.concept_coverage * breakdown.concept_coverage
            + weights.balance_accuracy * breakdown.balance_accuracy
            + weights.duplicate_penalty * breakdown.duplicate_penalty
            + weights.resolved_ratio * breakdown.resolved_ratio
            + weights.dimensional_bonus * breakdown.dimensional_bonus;
        let score = (100.0 * weighted).round().clamp(0.0, 100.0);
        let grade = Grade::from_score(score);
        debug!(
            accession = %ctx.meta.accession_number,
            score,
            grade = %grade,
            "Scored filing"
        );
        QualityScore {
            accession_number: ctx.meta.accession_number.clone(),
            score,
            grade,
            breakdown,
        }
    }

    /// Fraction of the required concept set tagged anywhere in the filing.
    fn concept_coverage(&self, ctx: &FilingContext) -> f64 {
        if self.config.required_concepts.is_empty() {
            return 1.0;
        }
        let present = self
            .config
            .required_concepts
            .iter()
            .filter(|c| ctx.concepts.contains(c.as_str()))
            .count();
        present as f64 / self.config.required_concepts.len() as f64
    }

    /// Balance-equation accuracy: relative error of A = L + E with linear
    /// decay to zero at the configured cutoff. Scores 0.0 when any of the
    /// three metrics is unresolved; an unverifiable balance sheet earns no
    /// credit.
    fn balance_accuracy(&self, rows: &[NormalizedFinancial]) -> f64 {
        let value = |metric: &str| {
            rows.iter()
                .find(|r| r.metric_id == metric)
                .map(|r| r.metric_value)
        };
        let (Some(assets), Some(liabilities), Some(equity)) = (
            value(&self.config.assets_metric),
            value(&self.config.liabilities_metric),
            value(&self.config.equity_metric),
        ) else {
            return 0.0;
        };
        let error = (assets - (liabilities + equity)).abs() / assets.abs().max(1.0);
        (1.0 - error / self.config.balance_error_cutoff).clamp(0.0, 1.0)
    }

    /// Segment disclosure richness: the dimensional fact fraction scaled by
    /// the saturation point and capped at 1.0.
    fn dimensional_bonus(&self, ctx: &FilingContext) -> f64 {
        if ctx.total_facts == 0 {
            return 0.0;
        }
        let fraction = ctx.dimensional_facts as f64 / ctx.total_facts as f64;
        (fraction / self.config.dimensional_bonus_saturation).min(1.0)
    }
}

/// One minus the fraction of dedup classes that carried conflicting values.
fn duplicate_penalty(ctx: &FilingContext) -> f64 {
    if ctx.dedup_stats.total_classes == 0 {
        return 1.0;
    }
    1.0 - ctx.dedup_stats.conflicted_classes as f64 / ctx.dedup_stats.total_classes as f64
}

/// Fraction of standardized metrics that resolved for this filing.
fn resolved_ratio(outcome: &ResolutionOutcome) -> f64 {
    let total = outcome.resolved + outcome.unresolved;
    if total == 0 {
        return 0.0;
    }
    outcome.resolved as f64 / total as f64
}

/// Aggregates per-filing scores into a company-level summary.
///
/// Returns `None` when the company has no scored filings.
#[must_use]
pub fn aggregate_company(ticker: Ticker, scores: &[QualityScore]) -> Option<CompanyQuality> {
    if scores.is_empty() {
        return None;
    }
    let mut grade_distribution: BTreeMap<Grade, usize> = BTreeMap::new();
    let mut sum = 0.0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for score in scores {
        sum += score.score;
        min = min.min(score.score);
        max = max.max(score.score);
        *grade_distribution.entry(score.grade).or_default() += 1;
    }
    Some(CompanyQuality {
        ticker,
        filing_count: scores.len(),
        average_score: sum / scores.len() as f64,
        min_score: min,
        max_score: max,
        grade_distribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::dedup_facts;
    use crate::mapping::MappingTable;
    use crate::resolver::Resolver;
    use chrono::NaiveDate;
    use normalize_core::{FilingMetadata, RawFact};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn meta() -> FilingMetadata {
        FilingMetadata {
            accession_number: "0001018724-24-000050".to_string(),
            company_ticker: Ticker::new("AMZN"),
            sic_code: Some("5961".to_string()),
            form_type: "10-K".to_string(),
            filing_date: date(2024, 2, 2),
            fiscal_year: 2023,
            fiscal_quarter: None,
            processed: true,
        }
    }

    fn fact(id: i64, concept: &str, value: f64) -> RawFact {
        RawFact::numeric(id, "0001018724-24-000050", concept, value, date(2023, 12, 31))
    }

    fn score(facts: Vec<RawFact>, config: &EngineConfig) -> QualityScore {
        let table = MappingTable::builtin();
        let outcome = dedup_facts(facts, config.duplicate_tolerance);
        let ctx = FilingContext::new(meta(), outcome.facts, outcome.stats);
        let resolution = Resolver::new(&table, config).resolve_filing(&ctx);
        QualityScorer::new(config).score_filing(&ctx, &resolution)
    }

    #[test]
    fn exact_balance_scores_full_balance_subscore() {
        let config = EngineConfig::default();
        let result = score(
            vec![
                fact(1, "us-gaap:Assets", 1000.0),
                fact(2, "us-gaap:Liabilities", 600.0),
                fact(3, "us-gaap:StockholdersEquity", 400.0),
            ],
            &config,
        );
        assert!((result.breakdown.balance_accuracy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn balance_error_beyond_cutoff_scores_zero() {
        let config = EngineConfig::default();
        // 10% relative error against a 5% cutoff.
        let result = score(
            vec![
                fact(1, "us-gaap:Assets", 1000.0),
                fact(2, "us-gaap:Liabilities", 600.0),
                fact(3, "us-gaap:StockholdersEquity", 300.0),
            ],
            &config,
        );
        assert_eq!(result.breakdown.balance_accuracy, 0.0);
    }

    #[test]
    fn unresolved_balance_metrics_score_zero_balance() {
        let config = EngineConfig::default();
        let result = score(vec![fact(1, "us-gaap:Revenues", 500.0)], &config);
        assert_eq!(result.breakdown.balance_accuracy, 0.0);
    }

    #[test]
    fn concept_coverage_is_the_present_fraction() {
        let config = EngineConfig::default();
        // 3 of the 6 required concepts.
        let result = score(
            vec![
                fact(1, "us-gaap:Assets", 1000.0),
                fact(2, "us-gaap:Revenues", 500.0),
                fact(3, "us-gaap:NetIncomeLoss", 50.0),
            ],
            &config,
        );
        assert!((result.breakdown.concept_coverage - 0.5).abs() < 1e-12);
    }

    #[test]
    fn conflicted_classes_lower_duplicate_subscore() {
        let config = EngineConfig::default();
        let result = score(
            vec![
                fact(1, "us-gaap:Revenues", 500.0),
                fact(2, "us-gaap:Revenues", 700.0),
                fact(3, "us-gaap:Assets", 1000.0),
            ],
            &config,
        );
        // One conflicted class out of two.
        assert!((result.breakdown.duplicate_penalty - 0.5).abs() < 1e-12);
    }

    #[test]
    fn dimensional_bonus_saturates() {
        let config = EngineConfig::default();
        let mut facts = vec![fact(1, "us-gaap:Revenues", 1000.0)];
        for i in 0..3 {
            facts.push(
                fact(10 + i, "us-gaap:Revenues", 300.0).with_dimensions(
                    normalize_core::Dimensions::from_pairs([(
                        "srt:StatementGeographicalAxis",
                        format!("country:X{i}").as_str(),
                    )]),
                ),
            );
        }
        // 3 of 4 facts dimensional, far past the 25% saturation point.
        let result = score(facts, &config);
        assert!((result.breakdown.dimensional_bonus - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_filing_scores_at_the_bottom() {
        let config = EngineConfig::default();
        let result = score(vec![], &config);
        assert_eq!(result.breakdown.concept_coverage, 0.0);
        assert_eq!(result.breakdown.resolved_ratio, 0.0);
        assert_eq!(result.breakdown.dimensional_bonus, 0.0);
        // No classes at all means no duplication.
        assert_eq!(result.breakdown.duplicate_penalty, 1.0);
        assert_eq!(result.grade, Grade::F);
    }

    #[test]
    fn company_aggregation_tracks_distribution() {
        let make = |score: f64| QualityScore {
            accession_number: format!("acc-{score}"),
            score,
            grade: Grade::from_score(score),
            breakdown: ScoreBreakdown {
                concept_coverage: 1.0,
                balance_accuracy: 1.0,
                duplicate_penalty: 1.0,
                resolved_ratio: 1.0,
                dimensional_bonus: 1.0,
            },
        };
        let scores = vec![make(95.0), make(85.0), make(92.0)];
        let agg = aggregate_company(Ticker::new("AMZN"), &scores).unwrap();
        assert_eq!(agg.filing_count, 3);
        assert_eq!(agg.min_score, 85.0);
        assert_eq!(agg.max_score, 95.0);
        assert!((agg.average_score - 90.666).abs() < 0.01);
        assert_eq!(agg.grade_distribution[&Grade::A], 2);
        assert_eq!(agg.grade_distribution[&Grade::B], 1);
    }

    #[test]
    fn no_filings_aggregates_to_none() {
        assert!(aggregate_company(Ticker::new("AMZN"), &[]).is_none());
    }
}
