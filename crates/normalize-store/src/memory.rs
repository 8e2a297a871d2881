//! In-memory store implementation.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use normalize_core::{
    FactStore, FilingMetadata, NormalizedFinancial, NormalizedSink, QualityIssue, QualityScore,
    RawFact, Result, Ticker,
};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// In-memory store for testing and development.
///
/// Data is held in `RwLock`-protected maps and is lost when the store is
/// dropped. Fact ids are assigned on insertion so tests never have to
/// invent them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    filings: RwLock<BTreeMap<String, FilingMetadata>>,
    facts: RwLock<HashMap<String, Vec<RawFact>>>,
    next_fact_id: RwLock<i64>,
    normalized: RwLock<BTreeMap<(Ticker, i32, Option<u8>, String), NormalizedFinancial>>,
    issues: RwLock<Vec<QualityIssue>>,
    scores: RwLock<BTreeMap<String, QualityScore>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a filing in the index.
    pub async fn insert_filing(&self, filing: FilingMetadata) {
        self.filings
            .write()
            .await
            .insert(filing.accession_number.clone(), filing);
    }

    /// Inserts a raw fact, assigning it the next fact id.
    ///
    /// Returns the assigned id.
    pub async fn insert_fact(&self, mut fact: RawFact) -> i64 {
        let mut next = self.next_fact_id.write().await;
        *next += 1;
        fact.fact_id = *next;
        let id = fact.fact_id;
        self.facts
            .write()
            .await
            .entry(fact.accession_number.clone())
            .or_default()
            .push(fact);
        id
    }

    /// Inserts several raw facts for one filing.
    pub async fn insert_facts(&self, facts: impl IntoIterator<Item = RawFact>) {
        for fact in facts {
            self.insert_fact(fact).await;
        }
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn filings(&self) -> Result<Vec<FilingMetadata>> {
        Ok(self.filings.read().await.values().cloned().collect())
    }

    async fn filing(&self, accession_number: &str) -> Result<Option<FilingMetadata>> {
        Ok(self.filings.read().await.get(accession_number).cloned())
    }

    async fn raw_facts(&self, accession_number: &str) -> Result<Vec<RawFact>> {
        Ok(self
            .facts
            .read()
            .await
            .get(accession_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn fact_accessions(&self) -> Result<Vec<String>> {
        let mut accessions: Vec<String> = self.facts.read().await.keys().cloned().collect();
        accessions.sort();
        Ok(accessions)
    }

    async fn normalized_rows(&self) -> Result<Vec<NormalizedFinancial>> {
        Ok(self.normalized.read().await.values().cloned().collect())
    }

    async fn issues(&self) -> Result<Vec<QualityIssue>> {
        Ok(self.issues.read().await.clone())
    }

    async fn scores(&self) -> Result<Vec<QualityScore>> {
        Ok(self.scores.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl NormalizedSink for MemoryStore {
    #[instrument(skip(self, rows), fields(accession = %accession_number, count = rows.len()))]
    async fn upsert_normalized(
        &self,
        accession_number: &str,
        rows: &[NormalizedFinancial],
    ) -> Result<()> {
        let mut normalized = self.normalized.write().await;
        // Rows this filing produced earlier but no longer does must not
        // linger, so the filing's old output goes first.
        normalized.retain(|_, row| row.source_accession != accession_number);
        for row in rows {
            normalized.insert(row.key(), row.clone());
        }
        debug!("Upserted normalized rows");
        Ok(())
    }

    #[instrument(skip(self, issues), fields(count = issues.len()))]
    async fn append_issues(&self, issues: &[QualityIssue]) -> Result<()> {
        self.issues.write().await.extend_from_slice(issues);
        Ok(())
    }

    #[instrument(skip(self, score), fields(accession = %score.accession_number))]
    async fn upsert_score(&self, score: &QualityScore) -> Result<()> {
        self.scores
            .write()
            .await
            .insert(score.accession_number.clone(), score.clone());
        Ok(())
    }
}
