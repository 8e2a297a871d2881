//! Read-only consistency checks across stores.
//!
//! The [`ReconciliationEngine`] runs six independent checks over the fact
//! store and everything previously written to it. Checks only ever report:
//! they never mutate data, and a check that itself fails is recorded as an
//! issue while the remaining checks still run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use normalize_core::{
    Dimensions, EngineConfig, FactStore, FiscalPeriod, IssueKind, QualityIssue, Result, Severity,
    Ticker,
};

use crate::mapping::MappingTable;
use crate::resolver::CALCULATED_SOURCE_PREFIX;

/// Outcome of one reconciliation run.
#[derive(Clone, Debug, Default)]
pub struct ReconciliationReport {
    /// Everything the checks found, in check order.
    pub issues: Vec<QualityIssue>,
    /// Number of checks that ran to completion.
    pub checks_passed: usize,
    /// Number of checks that themselves failed.
    pub checks_failed: usize,
}

impl ReconciliationReport {
    /// Issue counts per severity.
    #[must_use]
    pub fn severity_tallies(&self) -> BTreeMap<Severity, usize> {
        let mut tallies = BTreeMap::new();
        for issue in &self.issues {
            *tallies.entry(issue.severity).or_default() += 1;
        }
        tallies
    }

    /// True when no check reported anything at error severity or above.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.iter().all(|i| i.severity < Severity::Error)
    }
}

/// Runs cross-store consistency checks.
pub struct ReconciliationEngine<'a> {
    store: &'a dyn FactStore,
    table: &'a MappingTable,
    config: &'a EngineConfig,
}

impl std::fmt::Debug for ReconciliationEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("metrics", &self.table.metric_count())
            .finish_non_exhaustive()
    }
}

impl<'a> ReconciliationEngine<'a> {
    /// Creates an engine over a store and a validated mapping table.
    #[must_use]
    pub const fn new(
        store: &'a dyn FactStore,
        table: &'a MappingTable,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            table,
            config,
        }
    }

    /// Runs all checks and collects their findings.
    ///
    /// # Errors
    /// Only fails when the filing index itself cannot be read; every other
    /// store failure is contained as a `CheckFailed` issue.
    pub async fn run_all(&self) -> Result<ReconciliationReport> {
        let filings = self.store.filings().await?;
        let mut report = ReconciliationReport::default();

        let checks: [(&str, Result<Vec<QualityIssue>>); 6] = [
            ("filing_cadence", self.check_filing_cadence(&filings)),
            ("empty_filings", self.check_empty_filings(&filings).await),
            ("traceability", self.check_traceability().await),
            ("duplicates", self.check_duplicates(&filings).await),
            ("completeness", self.check_completeness(&filings).await),
            (
                "referential_integrity",
                self.check_referential_integrity(&filings).await,
            ),
        ];

        for (name, outcome) in checks {
            match outcome {
                Ok(issues) => {
                    debug!(check = name, findings = issues.len(), "Check complete");
                    report.issues.extend(issues);
                    report.checks_passed += 1;
                }
                Err(err) => {
                    warn!(check = name, error = %err, "Check failed");
                    report.issues.push(QualityIssue::new(
                        Severity::Error,
                        IssueKind::CheckFailed,
                        name,
                        format!("check could not run: {err}"),
                        0,
                    ));
                    report.checks_failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Companies with fewer filings than the expected cadence.
    fn check_filing_cadence(
        &self,
        filings: &[normalize_core::FilingMetadata],
    ) -> Result<Vec<QualityIssue>> {
        let mut per_company: BTreeMap<String, usize> = BTreeMap::new();
        for filing in filings {
            *per_company
                .entry(filing.company_ticker.to_string())
                .or_default() += 1;
        }
        let expected = self.config.expected_annual_filings as usize;
        Ok(per_company
            .into_iter()
            .filter(|(_, count)| *count < expected)
            .map(|(ticker, count)| {
                QualityIssue::new(
                    Severity::Warning,
                    IssueKind::MissingFilings,
                    ticker.clone(),
                    format!("{ticker} has {count} filings, expected at least {expected}"),
                    (expected - count) as u64,
                )
            })
            .collect())
    }

    /// Processed filings that extracted zero facts. Critical: the filing was
    /// marked done but its data silently went missing.
    async fn check_empty_filings(
        &self,
        filings: &[normalize_core::FilingMetadata],
    ) -> Result<Vec<QualityIssue>> {
        let mut issues = Vec::new();
        for filing in filings.iter().filter(|f| f.processed) {
            let facts = self.store.raw_facts(&filing.accession_number).await?;
            if facts.is_empty() {
                issues.push(QualityIssue::new(
                    Severity::Critical,
                    IssueKind::FilingWithoutFacts,
                    filing.accession_number.clone(),
                    format!(
                        "filing {} is marked processed but has no extracted facts",
                        filing.accession_number
                    ),
                    1,
                ));
            }
        }
        Ok(issues)
    }

    /// Normalized rows whose source concept no longer exists among the
    /// source filing's raw facts. Calculated rows have no single source
    /// concept and are skipped.
    async fn check_traceability(&self) -> Result<Vec<QualityIssue>> {
        let rows = self.store.normalized_rows().await?;
        let mut concepts_by_accession: HashMap<String, HashSet<String>> = HashMap::new();
        let mut issues = Vec::new();
        for row in rows {
            if row.source_concept.starts_with(CALCULATED_SOURCE_PREFIX) {
                continue;
            }
            if !concepts_by_accession.contains_key(&row.source_accession) {
                let concepts = self
                    .store
                    .raw_facts(&row.source_accession)
                    .await?
                    .into_iter()
                    .map(|f| f.concept_name)
                    .collect();
                concepts_by_accession.insert(row.source_accession.clone(), concepts);
            }
            let known = &concepts_by_accession[&row.source_accession];
            if !known.contains(&row.source_concept) {
                issues.push(QualityIssue::new(
                    Severity::Error,
                    IssueKind::DanglingSource,
                    row.source_accession.clone(),
                    format!(
                        "normalized {} for {} {} traces to concept {} absent from filing {}",
                        row.metric_id,
                        row.company_ticker,
                        row.period(),
                        row.source_concept,
                        row.source_accession
                    ),
                    1,
                ));
            }
        }
        Ok(issues)
    }

    /// Duplicate raw facts and duplicate normalized rows.
    ///
    /// Raw facts sharing a (concept, period end, dimensions) class within
    /// one filing are collapsed at normalization time but remain in the
    /// store, so the class is re-scanned here to catch duplicates loaded
    /// after the last run. Normalized rows sharing a
    /// (ticker, year, quarter, metric) key are impossible through the
    /// sink's upsert; a finding there means the store was written around.
    async fn check_duplicates(
        &self,
        filings: &[normalize_core::FilingMetadata],
    ) -> Result<Vec<QualityIssue>> {
        let mut issues = Vec::new();
        for filing in filings.iter().filter(|f| f.processed) {
            let facts = self.store.raw_facts(&filing.accession_number).await?;
            let mut classes: BTreeMap<(String, NaiveDate, Dimensions), u64> = BTreeMap::new();
            for fact in facts {
                let key = (fact.concept_name, fact.period_end, fact.dimensions);
                *classes.entry(key).or_default() += 1;
            }
            for ((concept, period_end, _), count) in classes {
                if count > 1 {
                    issues.push(QualityIssue::new(
                        Severity::Warning,
                        IssueKind::DuplicateFacts,
                        filing.accession_number.clone(),
                        format!(
                            "filing {} carries {count} raw facts for {concept} at {period_end}",
                            filing.accession_number
                        ),
                        count,
                    ));
                }
            }
        }

        let rows = self.store.normalized_rows().await?;
        let mut groups: BTreeMap<_, usize> = BTreeMap::new();
        for row in &rows {
            *groups.entry(row.key()).or_default() += 1;
        }
        issues.extend(
            groups
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|((ticker, year, quarter, metric), count)| {
                    let period = match quarter {
                        Some(q) => format!("FY{year}Q{q}"),
                        None => format!("FY{year}"),
                    };
                    QualityIssue::new(
                        Severity::Warning,
                        IssueKind::DuplicateFacts,
                        format!("{ticker}/{period}/{metric}"),
                        format!("{count} normalized rows share the key {ticker} {period} {metric}"),
                        count as u64,
                    )
                }),
        );
        Ok(issues)
    }

    /// Per company and fiscal period metric completeness against the
    /// configured thresholds. Measured per period rather than per filing:
    /// a superseded original whose rows were replaced by its amendment's
    /// is covered by the amendment and not flagged.
    async fn check_completeness(
        &self,
        filings: &[normalize_core::FilingMetadata],
    ) -> Result<Vec<QualityIssue>> {
        let rows = self.store.normalized_rows().await?;
        let mut metrics_per_period: HashMap<(Ticker, FiscalPeriod), HashSet<&str>> =
            HashMap::new();
        for row in &rows {
            metrics_per_period
                .entry((row.company_ticker.clone(), row.period()))
                .or_default()
                .insert(row.metric_id.as_str());
        }
        let periods: BTreeSet<(Ticker, FiscalPeriod)> = filings
            .iter()
            .filter(|f| f.processed)
            .map(|f| (f.company_ticker.clone(), f.period()))
            .collect();
        let total = self.table.metric_count();
        let mut issues = Vec::new();
        for (ticker, period) in periods {
            let resolved = metrics_per_period
                .get(&(ticker.clone(), period))
                .map_or(0, HashSet::len);
            let completeness = resolved as f64 / total as f64;
            let severity = if completeness < self.config.completeness_error_floor {
                Severity::Error
            } else if completeness < self.config.completeness_warn_threshold {
                Severity::Warning
            } else {
                continue;
            };
            issues.push(QualityIssue::new(
                severity,
                IssueKind::LowCompleteness,
                format!("{ticker}/{period}"),
                format!(
                    "{ticker} {period} resolved {resolved} of {total} metrics ({:.0}%)",
                    completeness * 100.0
                ),
                (total - resolved) as u64,
            ));
        }
        Ok(issues)
    }

    /// Facts and normalized rows referencing a filing absent from the
    /// filing index.
    async fn check_referential_integrity(
        &self,
        filings: &[normalize_core::FilingMetadata],
    ) -> Result<Vec<QualityIssue>> {
        let known: HashSet<&str> = filings.iter().map(|f| f.accession_number.as_str()).collect();
        let mut issues = Vec::new();

        let mut orphaned_fact_accessions: Vec<String> = self
            .store
            .fact_accessions()
            .await?
            .into_iter()
            .filter(|acc| !known.contains(acc.as_str()))
            .collect();
        orphaned_fact_accessions.sort();
        for accession in orphaned_fact_accessions {
            issues.push(QualityIssue::new(
                Severity::Error,
                IssueKind::OrphanedRecord,
                accession.clone(),
                format!("facts reference filing {accession} which is not in the filing index"),
                1,
            ));
        }

        let mut orphaned_rows: BTreeMap<String, u64> = BTreeMap::new();
        for row in self.store.normalized_rows().await? {
            if !known.contains(row.source_accession.as_str()) {
                *orphaned_rows.entry(row.source_accession).or_default() += 1;
            }
        }
        for (accession, count) in orphaned_rows {
            issues.push(QualityIssue::new(
                Severity::Error,
                IssueKind::OrphanedRecord,
                accession.clone(),
                format!(
                    "{count} normalized rows reference filing {accession} which is not in the filing index"
                ),
                count,
            ));
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use normalize_core::{
        FilingMetadata, NormalizeError, NormalizedFinancial, QualityScore, RawFact, Ticker,
    };

    /// Fixed-content store for exercising individual checks.
    #[derive(Default)]
    struct StubStore {
        filings: Vec<FilingMetadata>,
        facts: HashMap<String, Vec<RawFact>>,
        rows: Vec<NormalizedFinancial>,
        fail_facts: bool,
    }

    #[async_trait]
    impl FactStore for StubStore {
        async fn filings(&self) -> Result<Vec<FilingMetadata>> {
            Ok(self.filings.clone())
        }

        async fn filing(&self, accession_number: &str) -> Result<Option<FilingMetadata>> {
            Ok(self
                .filings
                .iter()
                .find(|f| f.accession_number == accession_number)
                .cloned())
        }

        async fn raw_facts(&self, accession_number: &str) -> Result<Vec<RawFact>> {
            if self.fail_facts {
                return Err(NormalizeError::Store("fact table unavailable".to_string()));
            }
            Ok(self.facts.get(accession_number).cloned().unwrap_or_default())
        }

        async fn fact_accessions(&self) -> Result<Vec<String>> {
            if self.fail_facts {
                return Err(NormalizeError::Store("fact table unavailable".to_string()));
            }
            Ok(self.facts.keys().cloned().collect())
        }

        async fn normalized_rows(&self) -> Result<Vec<NormalizedFinancial>> {
            Ok(self.rows.clone())
        }

        async fn issues(&self) -> Result<Vec<QualityIssue>> {
            Ok(vec![])
        }

        async fn scores(&self) -> Result<Vec<QualityScore>> {
            Ok(vec![])
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn filing(accession: &str, ticker: &str, year: i32) -> FilingMetadata {
        FilingMetadata {
            accession_number: accession.to_string(),
            company_ticker: Ticker::new(ticker),
            sic_code: None,
            form_type: "10-K".to_string(),
            filing_date: date(year + 1, 2, 1),
            fiscal_year: year,
            fiscal_quarter: None,
            processed: true,
        }
    }

    fn row(accession: &str, ticker: &str, year: i32, metric: &str, concept: &str) -> NormalizedFinancial {
        NormalizedFinancial {
            company_ticker: Ticker::new(ticker),
            fiscal_year: year,
            fiscal_quarter: None,
            metric_id: metric.to_string(),
            metric_value: 1.0,
            source_concept: concept.to_string(),
            source_accession: accession.to_string(),
            confidence_score: 1.0,
        }
    }

    fn fact(accession: &str, concept: &str) -> RawFact {
        RawFact::numeric(1, accession, concept, 100.0, date(2023, 12, 31))
    }

    async fn run(store: &StubStore, config: &EngineConfig) -> ReconciliationReport {
        let table = MappingTable::builtin();
        ReconciliationEngine::new(store, &table, config)
            .run_all()
            .await
            .unwrap()
    }

    fn relaxed_config() -> EngineConfig {
        // Cadence and completeness quiet by default so single-check tests
        // see only their own findings.
        EngineConfig {
            expected_annual_filings: 1,
            completeness_warn_threshold: 0.0,
            completeness_error_floor: 0.0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_processed_filing_is_critical() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        let critical: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::FilingWithoutFacts)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn sparse_filing_history_is_a_warning() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([("acc-1".to_string(), vec![fact("acc-1", "us-gaap:Assets")])]),
            ..StubStore::default()
        };
        let config = EngineConfig {
            expected_annual_filings: 10,
            completeness_warn_threshold: 0.0,
            completeness_error_floor: 0.0,
            ..EngineConfig::default()
        };
        let report = run(&store, &config).await;
        let cadence: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingFilings)
            .collect();
        assert_eq!(cadence.len(), 1);
        assert_eq!(cadence[0].severity, Severity::Warning);
        assert!(cadence[0].message.contains("AAPL"));
    }

    #[tokio::test]
    async fn dangling_source_concept_is_an_error() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([("acc-1".to_string(), vec![fact("acc-1", "us-gaap:Assets")])]),
            rows: vec![row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues")],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        let dangling: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DanglingSource)
            .collect();
        assert_eq!(dangling.len(), 1);
        assert!(dangling[0].message.contains("us-gaap:Revenues"));
    }

    #[tokio::test]
    async fn calculated_rows_are_exempt_from_traceability() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([("acc-1".to_string(), vec![fact("acc-1", "us-gaap:Assets")])]),
            rows: vec![row(
                "acc-1",
                "AAPL",
                2023,
                "net_margin",
                "calc:net_income / revenue",
            )],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        assert!(report.issues.iter().all(|i| i.kind != IssueKind::DanglingSource));
    }

    #[tokio::test]
    async fn duplicate_normalized_keys_are_flagged() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([(
                "acc-1".to_string(),
                vec![fact("acc-1", "us-gaap:Revenues")],
            )]),
            rows: vec![
                row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues"),
                row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues"),
            ],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        let duplicates: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DuplicateFacts)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].affected_record_count, 2);
    }

    #[tokio::test]
    async fn duplicate_raw_facts_in_a_filing_warn() {
        let period_end = date(2023, 12, 31);
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([(
                "acc-1".to_string(),
                vec![
                    RawFact::numeric(1, "acc-1", "us-gaap:Revenues", 100.0, period_end),
                    RawFact::numeric(2, "acc-1", "us-gaap:Revenues", 100.0, period_end),
                ],
            )]),
            rows: vec![row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues")],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        let duplicates: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DuplicateFacts)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].severity, Severity::Warning);
        assert_eq!(duplicates[0].affected_record_count, 2);
        assert!(duplicates[0].message.contains("us-gaap:Revenues"));
    }

    #[tokio::test]
    async fn amended_period_is_measured_once_for_completeness() {
        let mut amendment = filing("acc-amend", "AAPL", 2023);
        amendment.form_type = "10-K/A".to_string();
        let store = StubStore {
            filings: vec![filing("acc-orig", "AAPL", 2023), amendment],
            facts: HashMap::from([
                (
                    "acc-orig".to_string(),
                    vec![fact("acc-orig", "us-gaap:Revenues")],
                ),
                (
                    "acc-amend".to_string(),
                    vec![fact("acc-amend", "us-gaap:Revenues")],
                ),
            ]),
            // The amendment superseded the original, so only its rows
            // survive in the store.
            rows: vec![row("acc-amend", "AAPL", 2023, "revenue", "us-gaap:Revenues")],
            ..StubStore::default()
        };
        let config = EngineConfig {
            expected_annual_filings: 1,
            completeness_warn_threshold: 0.02,
            completeness_error_floor: 0.01,
            ..EngineConfig::default()
        };
        let report = run(&store, &config).await;
        assert!(
            report
                .issues
                .iter()
                .all(|i| i.kind != IssueKind::LowCompleteness),
            "issues: {:?}",
            report.issues
        );
    }

    #[tokio::test]
    async fn low_completeness_escalates_by_threshold() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([(
                "acc-1".to_string(),
                vec![fact("acc-1", "us-gaap:Revenues")],
            )]),
            rows: vec![row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues")],
            ..StubStore::default()
        };
        // One resolved metric out of the whole catalog is below the floor.
        let config = EngineConfig {
            expected_annual_filings: 1,
            completeness_warn_threshold: 0.5,
            completeness_error_floor: 0.1,
            ..EngineConfig::default()
        };
        let report = run(&store, &config).await;
        let completeness: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::LowCompleteness)
            .collect();
        assert_eq!(completeness.len(), 1);
        assert_eq!(completeness[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn orphaned_facts_and_rows_are_errors() {
        let store = StubStore {
            filings: vec![],
            facts: HashMap::from([(
                "acc-ghost".to_string(),
                vec![fact("acc-ghost", "us-gaap:Assets")],
            )]),
            rows: vec![row("acc-ghost", "AAPL", 2023, "total_assets", "us-gaap:Assets")],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        let orphans: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::OrphanedRecord)
            .collect();
        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().all(|i| i.severity == Severity::Error));
    }

    #[tokio::test]
    async fn failed_check_is_contained_and_others_run() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            fail_facts: true,
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        assert!(report.checks_failed >= 1);
        assert!(report.checks_passed >= 1);
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::CheckFailed));
    }

    #[tokio::test]
    async fn clean_store_yields_clean_report() {
        let store = StubStore {
            filings: vec![filing("acc-1", "AAPL", 2023)],
            facts: HashMap::from([(
                "acc-1".to_string(),
                vec![fact("acc-1", "us-gaap:Revenues")],
            )]),
            rows: vec![row("acc-1", "AAPL", 2023, "revenue", "us-gaap:Revenues")],
            ..StubStore::default()
        };
        let report = run(&store, &relaxed_config()).await;
        assert!(report.is_clean(), "issues: {:?}", report.issues);
        assert_eq!(report.checks_passed, 6);
        assert_eq!(report.severity_tallies().len(), 0);
    }
}
