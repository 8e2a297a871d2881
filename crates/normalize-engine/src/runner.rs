//! Concurrent normalization of all filings.
//!
//! The [`BatchRunner`] selects one authoritative filing per company and
//! fiscal period, fans the filings out to bounded concurrent workers, and
//! serializes every write through a single coordinator loop. Workers only
//! read and compute; a worker failure is logged and counted, never allowed
//! to abort its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use normalize_core::{
    EngineConfig, FactStore, FiscalPeriod, FilingMetadata, IssueKind, NormalizedSink,
    QualityIssue, QualityScore, Result, Severity, Ticker,
};

use crate::dedup::dedup_facts;
use crate::mapping::MappingTable;
use crate::resolver::{FilingContext, Resolver};
use crate::scorer::QualityScorer;

/// Summary of one batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// Filings normalized to completion.
    pub filings_processed: usize,
    /// Filings whose worker failed.
    pub filings_failed: usize,
    /// Normalized rows written.
    pub rows_written: usize,
    /// Metric resolutions across all filings.
    pub metrics_resolved: usize,
    /// Metrics left unresolved across all filings.
    pub metrics_unresolved: usize,
    /// Every issue raised during the run, in write order.
    pub issues: Vec<QualityIssue>,
}

/// Everything one worker produces for one filing.
struct WorkerOutput {
    accession_number: String,
    rows: Vec<normalize_core::NormalizedFinancial>,
    issues: Vec<QualityIssue>,
    score: QualityScore,
    resolved: usize,
    unresolved: usize,
}

/// Runs normalization across filings with bounded concurrency.
pub struct BatchRunner {
    store: Arc<dyn FactStore>,
    sink: Arc<dyn NormalizedSink>,
    table: Arc<MappingTable>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("metrics", &self.table.metric_count())
            .field("max_concurrency", &self.config.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    /// Creates a runner.
    ///
    /// # Errors
    /// Fails when the configuration does not validate. Configuration
    /// problems are fatal before any filing is touched.
    pub fn new(
        store: Arc<dyn FactStore>,
        sink: Arc<dyn NormalizedSink>,
        table: MappingTable,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            sink,
            table: Arc::new(table),
            config: Arc::new(config),
        })
    }

    /// The mapping table this runner resolves against.
    #[must_use]
    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// The engine configuration this runner was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Normalizes every company's filings.
    ///
    /// # Errors
    /// Only fails when the filing index cannot be read or a sink write
    /// fails; per-filing worker failures are contained in the report.
    #[instrument(skip(self))]
    pub async fn run_all(&self) -> Result<BatchReport> {
        let filings = self.store.filings().await?;
        self.run_filings(filings).await
    }

    /// Normalizes one company's filings, leaving every other company's
    /// rows untouched.
    ///
    /// # Errors
    /// Same failure surface as [`run_all`](Self::run_all).
    #[instrument(skip(self))]
    pub async fn run_company(&self, ticker: &Ticker) -> Result<BatchReport> {
        let filings = self
            .store
            .filings()
            .await?
            .into_iter()
            .filter(|f| &f.company_ticker == ticker)
            .collect();
        self.run_filings(filings).await
    }

    async fn run_filings(&self, filings: Vec<FilingMetadata>) -> Result<BatchReport> {
        let authoritative = select_authoritative(filings);
        debug!(filings = authoritative.len(), "Batch starting");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut handles: Vec<(String, JoinHandle<Result<WorkerOutput>>)> =
            Vec::with_capacity(authoritative.len());
        for meta in authoritative {
            let accession = meta.accession_number.clone();
            let store = Arc::clone(&self.store);
            let table = Arc::clone(&self.table);
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            handles.push((
                accession,
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| normalize_core::NormalizeError::Other(e.to_string()))?;
                    normalize_one(&*store, &table, &config, meta).await
                }),
            ));
        }

        // Single-writer coordinator: workers stage results, all sink writes
        // happen here, in spawn order.
        let mut report = BatchReport::default();
        for (accession, handle) in handles {
            let output = match handle.await {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    warn!(accession = %accession, error = %err, "Worker failed");
                    let issue = worker_failure(&accession, &err.to_string());
                    self.sink.append_issues(std::slice::from_ref(&issue)).await?;
                    report.issues.push(issue);
                    report.filings_failed += 1;
                    continue;
                }
                Err(join_err) => {
                    warn!(accession = %accession, error = %join_err, "Worker panicked");
                    let issue = worker_failure(&accession, &join_err.to_string());
                    self.sink.append_issues(std::slice::from_ref(&issue)).await?;
                    report.issues.push(issue);
                    report.filings_failed += 1;
                    continue;
                }
            };

            self.sink
                .upsert_normalized(&output.accession_number, &output.rows)
                .await?;
            if !output.issues.is_empty() {
                self.sink.append_issues(&output.issues).await?;
            }
            self.sink.upsert_score(&output.score).await?;

            report.filings_processed += 1;
            report.rows_written += output.rows.len();
            report.metrics_resolved += output.resolved;
            report.metrics_unresolved += output.unresolved;
            report.issues.extend(output.issues);
        }

        debug!(
            processed = report.filings_processed,
            failed = report.filings_failed,
            rows = report.rows_written,
            "Batch complete"
        );
        Ok(report)
    }
}

/// One worker's pure read-and-compute pass over a single filing.
async fn normalize_one(
    store: &dyn FactStore,
    table: &MappingTable,
    config: &EngineConfig,
    meta: FilingMetadata,
) -> Result<WorkerOutput> {
    let accession_number = meta.accession_number.clone();
    let raw = store.raw_facts(&accession_number).await?;
    let dedup = dedup_facts(raw, config.duplicate_tolerance);
    let issues = dedup.issues;
    let ctx = FilingContext::new(meta, dedup.facts, dedup.stats);
    let resolution = Resolver::new(table, config).resolve_filing(&ctx);
    let score = QualityScorer::new(config).score_filing(&ctx, &resolution);
    Ok(WorkerOutput {
        accession_number,
        rows: resolution.rows,
        issues,
        score,
        resolved: resolution.resolved,
        unresolved: resolution.unresolved,
    })
}

fn worker_failure(accession: &str, detail: &str) -> QualityIssue {
    QualityIssue::new(
        Severity::Error,
        IssueKind::WorkerFailed,
        accession,
        format!("normalization of filing {accession} failed: {detail}"),
        1,
    )
}

/// Keeps one filing per (company, fiscal period): amendments beat
/// originals, then the latest filing date wins, then the lowest accession
/// number for determinism.
fn select_authoritative(filings: Vec<FilingMetadata>) -> Vec<FilingMetadata> {
    let mut best: HashMap<(Ticker, FiscalPeriod), FilingMetadata> = HashMap::new();
    for filing in filings {
        let key = (filing.company_ticker.clone(), filing.period());
        match best.get(&key) {
            Some(current) if !supersedes(&filing, current) => {}
            _ => {
                best.insert(key, filing);
            }
        }
    }
    let mut selected: Vec<FilingMetadata> = best.into_values().collect();
    selected.sort_by(|a, b| a.accession_number.cmp(&b.accession_number));
    selected
}

fn supersedes(candidate: &FilingMetadata, current: &FilingMetadata) -> bool {
    (candidate.is_amendment(), candidate.filing_date)
        .cmp(&(current.is_amendment(), current.filing_date))
        .then_with(|| current.accession_number.cmp(&candidate.accession_number))
        .is_gt()
}
