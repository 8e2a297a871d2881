//! Pipeline wiring the engine to a store.

use std::sync::Arc;

use tracing::debug;

use normalize_core::{
    CompanyQuality, EngineConfig, FactStore, NormalizedSink, Result, Ticker,
};
use normalize_engine::runner::{BatchReport, BatchRunner};
use normalize_engine::scorer::aggregate_company;
use normalize_engine::{MappingTable, ReconciliationEngine, ReconciliationReport};
use normalize_store::MemoryStore;
use polars::prelude::DataFrame;

use crate::frame::normalized_to_dataframe;

/// End-to-end normalization pipeline over one store.
///
/// Owns the store (as both its read and write halves), the validated
/// mapping table, and the engine configuration. All operations are
/// re-runnable; normalization upserts, so repeating a run converges on
/// the same rows.
///
/// # Example
///
/// ```rust,ignore
/// use normalize::Pipeline;
///
/// let pipeline = Pipeline::in_memory()?;
/// let report = pipeline.normalize_all().await?;
/// ```
pub struct Pipeline {
    store: Arc<dyn FactStore>,
    runner: BatchRunner,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("metrics", &self.runner.table().metric_count())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline over a store that serves both reads and writes.
    ///
    /// # Errors
    /// Fails when the configuration does not validate.
    pub fn new<S>(store: Arc<S>, table: MappingTable, config: EngineConfig) -> Result<Self>
    where
        S: FactStore + NormalizedSink + 'static,
    {
        let fact_store: Arc<dyn FactStore> = Arc::clone(&store) as Arc<dyn FactStore>;
        let sink: Arc<dyn NormalizedSink> = store;
        let runner = BatchRunner::new(Arc::clone(&fact_store), sink, table, config)?;
        debug!(
            metrics = runner.table().metric_count(),
            "Pipeline constructed"
        );
        Ok(Self {
            store: fact_store,
            runner,
        })
    }

    /// Creates a pipeline over a fresh in-memory store with the built-in
    /// metric catalog.
    ///
    /// # Errors
    /// Fails when the default configuration does not validate.
    pub fn in_memory() -> Result<Self> {
        Self::with_memory_store(Arc::new(MemoryStore::new()))
    }

    /// Creates a pipeline over an existing in-memory store.
    ///
    /// Useful when the caller keeps its own handle to load filings and
    /// facts before running.
    ///
    /// # Errors
    /// Fails when the default configuration does not validate.
    pub fn with_memory_store(store: Arc<MemoryStore>) -> Result<Self> {
        Self::new(store, MappingTable::builtin(), EngineConfig::default())
    }

    /// Creates a pipeline over a SQLite store at the given path with the
    /// built-in metric catalog.
    ///
    /// # Errors
    /// Fails when the database cannot be opened or the default
    /// configuration does not validate.
    #[cfg(feature = "store-sqlite")]
    pub fn with_sqlite(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let store = Arc::new(normalize_store::SqliteStore::new(path)?);
        Self::new(store, MappingTable::builtin(), EngineConfig::default())
    }

    /// Normalizes every company's filings.
    ///
    /// # Errors
    /// Fails only on filing-index or sink failures; per-filing problems
    /// are contained in the report.
    pub async fn normalize_all(&self) -> Result<BatchReport> {
        self.runner.run_all().await
    }

    /// Normalizes one company's filings, leaving other companies' rows
    /// untouched.
    ///
    /// # Errors
    /// Same failure surface as [`normalize_all`](Self::normalize_all).
    pub async fn normalize_company(&self, ticker: &Ticker) -> Result<BatchReport> {
        self.runner.run_company(ticker).await
    }

    /// Runs the read-only reconciliation checks over the store.
    ///
    /// # Errors
    /// Fails only when the filing index cannot be read.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        ReconciliationEngine::new(&*self.store, self.runner.table(), self.runner.config())
            .run_all()
            .await
    }

    /// Aggregates one company's filing scores.
    ///
    /// Returns `None` when the company has no scored filings.
    ///
    /// # Errors
    /// Fails when the store cannot be read.
    pub async fn score_company(&self, ticker: &Ticker) -> Result<Option<CompanyQuality>> {
        let filings = self.store.filings().await?;
        let company_accessions: std::collections::HashSet<&str> = filings
            .iter()
            .filter(|f| &f.company_ticker == ticker)
            .map(|f| f.accession_number.as_str())
            .collect();
        let scores: Vec<_> = self
            .store
            .scores()
            .await?
            .into_iter()
            .filter(|s| company_accessions.contains(s.accession_number.as_str()))
            .collect();
        Ok(aggregate_company(ticker.clone(), &scores))
    }

    /// Exports all normalized rows as a polars DataFrame.
    ///
    /// # Errors
    /// Fails when the store cannot be read or the frame cannot be built.
    pub async fn normalized_metrics(&self) -> Result<DataFrame> {
        let rows = self.store.normalized_rows().await?;
        normalized_to_dataframe(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use normalize_core::{FilingMetadata, Grade, RawFact};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn filing(accession: &str, ticker: &str) -> FilingMetadata {
        FilingMetadata {
            accession_number: accession.to_string(),
            company_ticker: Ticker::new(ticker),
            sic_code: Some("3571".to_string()),
            form_type: "10-K".to_string(),
            filing_date: date(2024, 11, 1),
            fiscal_year: 2024,
            fiscal_quarter: None,
            processed: true,
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_filing(filing("acc-aapl", "AAPL")).await;
        let period_end = date(2024, 9, 28);
        store
            .insert_facts([
                RawFact::numeric(0, "acc-aapl", "us-gaap:Revenues", 1000.0, period_end),
                RawFact::numeric(0, "acc-aapl", "us-gaap:NetIncomeLoss", 100.0, period_end),
                RawFact::numeric(0, "acc-aapl", "us-gaap:Assets", 5000.0, period_end),
                RawFact::numeric(0, "acc-aapl", "us-gaap:Liabilities", 3000.0, period_end),
                RawFact::numeric(0, "acc-aapl", "us-gaap:StockholdersEquity", 2000.0, period_end),
            ])
            .await;
        store
    }

    #[tokio::test]
    async fn end_to_end_normalize_score_and_reconcile() {
        let store = seeded_store().await;
        let pipeline = Pipeline::with_memory_store(Arc::clone(&store)).unwrap();

        let report = pipeline.normalize_all().await.unwrap();
        assert_eq!(report.filings_processed, 1);
        assert!(report.rows_written >= 5);

        let quality = pipeline
            .score_company(&Ticker::new("AAPL"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quality.filing_count, 1);
        assert!(quality.average_score > 0.0);

        let reconciliation = pipeline.reconcile().await.unwrap();
        // A single well-formed filing raises no errors; the sparse filing
        // history still warrants a cadence warning.
        assert!(reconciliation.is_clean());
    }

    #[tokio::test]
    async fn score_company_without_filings_is_none() {
        let pipeline = Pipeline::in_memory().unwrap();
        let quality = pipeline.score_company(&Ticker::new("MSFT")).await.unwrap();
        assert!(quality.is_none());
    }

    #[tokio::test]
    async fn normalized_metrics_exports_a_frame() {
        let store = seeded_store().await;
        let pipeline = Pipeline::with_memory_store(Arc::clone(&store)).unwrap();
        pipeline.normalize_all().await.unwrap();

        let df = pipeline.normalized_metrics().await.unwrap();
        assert!(df.height() >= 5);
        assert!(df.column("metric_id").is_ok());
        assert!(df.column("metric_value").is_ok());
    }

    #[tokio::test]
    async fn grades_survive_the_store_round_trip() {
        let store = seeded_store().await;
        let pipeline = Pipeline::with_memory_store(Arc::clone(&store)).unwrap();
        pipeline.normalize_all().await.unwrap();

        let scores = store.scores().await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].grade, Grade::from_score(scores[0].score));
    }
}
