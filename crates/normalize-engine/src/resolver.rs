//! Priority/fallback resolution of standardized metrics.
//!
//! The [`Resolver`] walks a metric's mapping rules in priority order and
//! picks the first canonical fact that matches the rule's concept at the
//! filing's reporting period with **empty dimensions** — segment facts are
//! a breakdown, not the total, and are never promoted to a top-line value.
//! Derived metrics are evaluated afterwards from the resolved values.
//!
//! Resolution is pure and synchronous: everything it reads was fetched
//! before it runs, and a gap is represented as absence, not an error.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::debug;

use normalize_core::{
    CanonicalFact, EngineConfig, FilingMetadata, NormalizedFinancial,
};

use crate::dedup::DedupStats;
use crate::mapping::MappingTable;

/// Prefix marking a derived row's source as a formula, not a taxonomy
/// concept. The traceability check skips these.
pub const CALCULATED_SOURCE_PREFIX: &str = "calc:";

/// One filing's deduplicated facts, indexed for resolution.
#[derive(Debug)]
pub struct FilingContext {
    /// Filing metadata from the store's index.
    pub meta: FilingMetadata,
    /// The filing's reporting period end: the latest period end across its
    /// facts. `None` when the filing has no facts at all.
    pub period_end: Option<NaiveDate>,
    /// Dedup summary, consumed by the quality scorer.
    pub dedup_stats: DedupStats,
    /// Distinct concept names present (any dimensions).
    pub concepts: HashSet<String>,
    /// Canonical fact count.
    pub total_facts: usize,
    /// Canonical facts carrying segment dimensions.
    pub dimensional_facts: usize,
    facts_by_concept: HashMap<String, Vec<CanonicalFact>>,
}

impl FilingContext {
    /// Indexes one filing's canonical facts.
    #[must_use]
    pub fn new(meta: FilingMetadata, facts: Vec<CanonicalFact>, dedup_stats: DedupStats) -> Self {
        let period_end = facts.iter().map(|c| c.fact.period_end).max();
        let total_facts = facts.len();
        let dimensional_facts = facts
            .iter()
            .filter(|c| !c.fact.dimensions.is_empty())
            .count();
        let mut concepts = HashSet::new();
        let mut facts_by_concept: HashMap<String, Vec<CanonicalFact>> = HashMap::new();
        for canonical in facts {
            concepts.insert(canonical.fact.concept_name.clone());
            facts_by_concept
                .entry(canonical.fact.concept_name.clone())
                .or_default()
                .push(canonical);
        }
        Self {
            meta,
            period_end,
            dedup_stats,
            concepts,
            total_facts,
            dimensional_facts,
            facts_by_concept,
        }
    }

    /// Finds the consolidated (dimension-free) numeric fact for a concept at
    /// the filing's reporting period, if any.
    #[must_use]
    pub fn consolidated_fact(&self, concept_name: &str) -> Option<&CanonicalFact> {
        let period_end = self.period_end?;
        self.facts_by_concept.get(concept_name)?.iter().find(|c| {
            c.fact.dimensions.is_empty()
                && c.fact.value.is_some()
                && c.fact.period_end == period_end
        })
    }
}

/// The result of resolving one filing.
#[derive(Clone, Debug)]
pub struct ResolutionOutcome {
    /// One row per resolved metric. Nothing is written for unresolved
    /// metrics: absence, not zero, is the correct signal.
    pub rows: Vec<NormalizedFinancial>,
    /// Metrics that resolved.
    pub resolved: usize,
    /// Metrics with no matching fact or incomplete formula inputs.
    pub unresolved: usize,
}

/// Maps canonical facts to standardized metrics using the mapping table.
#[derive(Debug)]
pub struct Resolver<'a> {
    table: &'a MappingTable,
    config: &'a EngineConfig,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over an already-validated table and config.
    #[must_use]
    pub const fn new(table: &'a MappingTable, config: &'a EngineConfig) -> Self {
        Self { table, config }
    }

    /// Resolves every standardized metric for one filing.
    ///
    /// Direct metrics resolve first; derived metrics evaluate afterwards in
    /// dependency order, so a derived metric can read other derived metrics.
    #[must_use]
    pub fn resolve_filing(&self, ctx: &FilingContext) -> ResolutionOutcome {
        let mut rows = Vec::new();
        // metric id -> (value, confidence), feeding derived evaluation.
        let mut resolved: HashMap<String, (f64, f64)> = HashMap::new();

        for metric_id in self.table.direct_metric_ids() {
            if let Some((value, source_concept, confidence)) = self.resolve_direct(ctx, metric_id) {
                resolved.insert(metric_id.to_string(), (value, confidence));
                rows.push(self.row(ctx, metric_id, value, source_concept, confidence));
            } else {
                debug!(
                    accession = %ctx.meta.accession_number,
                    metric = metric_id,
                    "No mapping matched"
                );
            }
        }

        for metric_id in self.table.derived_order() {
            let formula = self
                .table
                .formula(metric_id)
                .expect("derived order only contains derived metrics");
            let values: HashMap<String, f64> = resolved
                .iter()
                .map(|(id, (v, _))| (id.clone(), *v))
                .collect();
            let Some(value) = formula.eval(&values) else {
                debug!(
                    accession = %ctx.meta.accession_number,
                    metric = %metric_id,
                    "Derived metric unresolved"
                );
                continue;
            };
            // Confidence of a derived metric is the weakest of its inputs.
            let confidence = formula
                .inputs()
                .iter()
                .filter_map(|input| resolved.get(input).map(|(_, c)| *c))
                .fold(1.0_f64, f64::min);
            resolved.insert(metric_id.clone(), (value, confidence));
            rows.push(self.row(
                ctx,
                metric_id,
                value,
                format!("{CALCULATED_SOURCE_PREFIX}{}", formula.text()),
                confidence,
            ));
        }

        let resolved_count = rows.len();
        ResolutionOutcome {
            rows,
            resolved: resolved_count,
            unresolved: self.table.metric_count() - resolved_count,
        }
    }

    /// Walks a direct metric's rules in priority order; first match wins.
    fn resolve_direct(&self, ctx: &FilingContext, metric_id: &str) -> Option<(f64, String, f64)> {
        let sic = ctx.meta.sic_code.as_deref();
        for rule in self.table.rules_for(metric_id, sic) {
            if let Some(canonical) = ctx.consolidated_fact(&rule.concept_name) {
                let value = canonical.fact.value?;
                let mut confidence = rule.confidence_score;
                if canonical.conflicted {
                    confidence *= self.config.conflict_confidence_penalty;
                }
                return Some((value, rule.concept_name.clone(), confidence));
            }
        }
        None
    }

    fn row(
        &self,
        ctx: &FilingContext,
        metric_id: &str,
        value: f64,
        source_concept: String,
        confidence: f64,
    ) -> NormalizedFinancial {
        NormalizedFinancial {
            company_ticker: ctx.meta.company_ticker.clone(),
            fiscal_year: ctx.meta.fiscal_year,
            fiscal_quarter: ctx.meta.fiscal_quarter,
            metric_id: metric_id.to_string(),
            metric_value: value,
            source_concept,
            source_accession: ctx.meta.accession_number.clone(),
            confidence_score: confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::dedup_facts;
    use normalize_core::{ConceptMapping, Dimensions, MetricCategory, MetricDataType,
        RawFact, StandardizedMetric, Ticker};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn meta() -> FilingMetadata {
        FilingMetadata {
            accession_number: "0000320193-24-000123".to_string(),
            company_ticker: Ticker::new("AAPL"),
            sic_code: Some("3571".to_string()),
            form_type: "10-K".to_string(),
            filing_date: date(2024, 11, 1),
            fiscal_year: 2024,
            fiscal_quarter: None,
            processed: true,
        }
    }

    fn context(facts: Vec<RawFact>) -> FilingContext {
        let outcome = dedup_facts(facts, 1e-6);
        FilingContext::new(meta(), outcome.facts, outcome.stats)
    }

    fn fact(id: i64, concept: &str, value: f64) -> RawFact {
        RawFact::numeric(id, "0000320193-24-000123", concept, value, date(2024, 9, 28))
    }

    fn revenue_table() -> MappingTable {
        MappingTable::new(
            vec![StandardizedMetric::new(
                "revenue",
                "Total Revenue",
                MetricCategory::IncomeStatement,
                MetricDataType::Monetary,
            )],
            vec![
                ConceptMapping::new("revenue", "us-gaap:Revenues", 1, 0.9),
                ConceptMapping::new("revenue", "us-gaap:SalesRevenueNet", 2, 0.7),
            ],
        )
        .unwrap()
    }

    #[test]
    fn priority_is_respected() {
        let table = revenue_table();
        let config = EngineConfig::default();
        let ctx = context(vec![
            fact(1, "us-gaap:Revenues", 9000.0),
            fact(2, "us-gaap:SalesRevenueNet", 5000.0),
        ]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].metric_value, 9000.0);
        assert_eq!(outcome.rows[0].source_concept, "us-gaap:Revenues");
        assert!((outcome.rows[0].confidence_score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn fallback_concept_resolves_with_its_confidence() {
        let table = revenue_table();
        let config = EngineConfig::default();
        let ctx = context(vec![fact(1, "us-gaap:SalesRevenueNet", 5000.0)]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].metric_value, 5000.0);
        assert_eq!(outcome.rows[0].source_concept, "us-gaap:SalesRevenueNet");
        assert!((outcome.rows[0].confidence_score - 0.7).abs() < 1e-12);
        assert_eq!(outcome.resolved, 1);
        assert_eq!(outcome.unresolved, 0);
    }

    #[test]
    fn segment_facts_are_never_selected() {
        let table = revenue_table();
        let config = EngineConfig::default();
        // The only matching fact is a segment breakdown.
        let segment = fact(1, "us-gaap:Revenues", 3000.0).with_dimensions(
            Dimensions::from_pairs([("srt:StatementGeographicalAxis", "country:US")]),
        );
        let ctx = context(vec![segment]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.unresolved, 1);
    }

    #[test]
    fn conflicted_class_halves_confidence() {
        let table = revenue_table();
        let config = EngineConfig::default();
        let ctx = context(vec![
            fact(1, "us-gaap:Revenues", 9000.0),
            fact(2, "us-gaap:Revenues", 9100.0),
        ]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert_eq!(outcome.rows.len(), 1);
        assert!((outcome.rows[0].confidence_score - 0.45).abs() < 1e-12);
    }

    #[test]
    fn stale_period_facts_are_ignored() {
        let table = revenue_table();
        let config = EngineConfig::default();
        // Prior-year comparative alongside the current-year figure.
        let mut prior = fact(1, "us-gaap:Revenues", 8000.0);
        prior.period_end = date(2023, 9, 30);
        let current = fact(2, "us-gaap:Revenues", 9000.0);
        let ctx = context(vec![prior, current]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].metric_value, 9000.0);
    }

    #[test]
    fn derived_metrics_evaluate_from_resolved_inputs() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        let ctx = context(vec![
            fact(1, "us-gaap:Revenues", 1000.0),
            fact(2, "us-gaap:CostOfRevenue", 600.0),
        ]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        let margin = outcome
            .rows
            .iter()
            .find(|r| r.metric_id == "gross_margin")
            .unwrap();
        assert!((margin.metric_value - 0.4).abs() < 1e-12);
        assert!(margin.source_concept.starts_with(CALCULATED_SOURCE_PREFIX));
        // Weakest input: revenue via us-gaap:Revenues at 0.90, cost at 0.95.
        assert!((margin.confidence_score - 0.90).abs() < 1e-12);
    }

    #[test]
    fn unresolved_input_propagates_to_derived() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        // No revenue fact: every margin dividing by revenue must stay
        // unresolved rather than emit zero or infinity.
        let ctx = context(vec![fact(1, "us-gaap:NetIncomeLoss", 250.0)]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert!(outcome.rows.iter().all(|r| r.metric_id != "net_margin"));
        assert!(outcome.rows.iter().all(|r| r.metric_id != "gross_margin"));
    }

    #[test]
    fn zero_divisor_leaves_derived_unresolved() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        let ctx = context(vec![
            fact(1, "us-gaap:Revenues", 0.0),
            fact(2, "us-gaap:NetIncomeLoss", 250.0),
        ]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert!(outcome.rows.iter().all(|r| r.metric_id != "net_margin"));
        assert!(
            outcome
                .rows
                .iter()
                .all(|r| r.metric_value.is_finite()),
        );
    }

    #[test]
    fn industry_override_wins_for_matching_sic() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        let mut bank_meta = meta();
        bank_meta.sic_code = Some("6021".to_string());
        let outcome = dedup_facts(
            vec![
                fact(1, "us-gaap:InterestAndDividendIncomeOperating", 7000.0),
                fact(2, "us-gaap:Revenues", 100.0),
            ],
            1e-6,
        );
        let ctx = FilingContext::new(bank_meta, outcome.facts, outcome.stats);
        let rows = Resolver::new(&table, &config).resolve_filing(&ctx).rows;
        let revenue = rows.iter().find(|r| r.metric_id == "revenue").unwrap();
        assert_eq!(revenue.metric_value, 7000.0);
        assert_eq!(
            revenue.source_concept,
            "us-gaap:InterestAndDividendIncomeOperating"
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        let facts = vec![
            fact(1, "us-gaap:Revenues", 1000.0),
            fact(2, "us-gaap:CostOfRevenue", 600.0),
            fact(3, "us-gaap:Assets", 5000.0),
            fact(4, "us-gaap:Revenues", 1001.0),
        ];
        let run = |facts: Vec<RawFact>| {
            let outcome = dedup_facts(facts, 1e-6);
            let ctx = FilingContext::new(meta(), outcome.facts, outcome.stats);
            Resolver::new(&table, &config).resolve_filing(&ctx).rows
        };
        assert_eq!(run(facts.clone()), run(facts));
    }

    #[test]
    fn empty_filing_resolves_nothing() {
        let table = MappingTable::builtin();
        let config = EngineConfig::default();
        let ctx = context(vec![]);
        let outcome = Resolver::new(&table, &config).resolve_filing(&ctx);
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.unresolved, table.metric_count());
    }
}
