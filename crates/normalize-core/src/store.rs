//! Storage traits the engine reads and writes through.
//!
//! The engine never owns a transport or connection; it consumes a
//! [`FactStore`] for reads and a [`NormalizedSink`] for writes. Transient
//! failures (and any retry policy) are the implementation's concern — the
//! core performs no retry or backoff of its own.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FilingMetadata, NormalizedFinancial, QualityIssue, QualityScore, RawFact};

/// Read interface over raw facts, filings, and previously written output.
///
/// Implementations must return facts exactly as extracted.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Returns the full filing index.
    async fn filings(&self) -> Result<Vec<FilingMetadata>>;

    /// Looks up one filing by accession number.
    async fn filing(&self, accession_number: &str) -> Result<Option<FilingMetadata>>;

    /// Returns all raw facts extracted from one filing.
    async fn raw_facts(&self, accession_number: &str) -> Result<Vec<RawFact>>;

    /// Returns the distinct accession numbers present in the fact table.
    ///
    /// Used by the referential-integrity check to find facts whose filing
    /// is missing from the filing index.
    async fn fact_accessions(&self) -> Result<Vec<String>>;

    /// Returns all normalized rows.
    async fn normalized_rows(&self) -> Result<Vec<NormalizedFinancial>>;

    /// Returns all recorded quality issues.
    async fn issues(&self) -> Result<Vec<QualityIssue>>;

    /// Returns all quality scores, latest per filing.
    async fn scores(&self) -> Result<Vec<QualityScore>>;
}

/// Write interface for normalization output.
///
/// Only the batch runner's single serialized coordinator calls these
/// methods; workers stage results in memory and never write directly, so
/// no two writers ever race on the same row key.
#[async_trait]
pub trait NormalizedSink: Send + Sync {
    /// Upserts one filing's normalized rows atomically.
    ///
    /// Any existing row with the same (ticker, fiscal year, fiscal quarter,
    /// metric) key is fully replaced; no partial update is ever visible to
    /// readers. Rows for other filings and other companies are untouched.
    async fn upsert_normalized(
        &self,
        accession_number: &str,
        rows: &[NormalizedFinancial],
    ) -> Result<()>;

    /// Appends quality issues to the audit trail.
    async fn append_issues(&self, issues: &[QualityIssue]) -> Result<()>;

    /// Inserts or replaces the quality score for one filing.
    async fn upsert_score(&self, score: &QualityScore) -> Result<()>;
}
