//! SQLite-backed store implementation.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use normalize_core::{
    Dimensions, FactStore, FilingMetadata, NormalizeError, NormalizedFinancial, NormalizedSink,
    PeriodType, QualityIssue, QualityScore, RawFact, Result, Ticker,
};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};

/// Persistent SQLite-backed store.
///
/// Filings and facts live in relational tables; dimension maps, issues, and
/// score breakdowns are stored as JSON. A unique expression index enforces
/// the one-row-per-(company, period, metric) invariant at the storage layer
/// as well as in the sink's upsert.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation
    /// fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| NormalizeError::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Creates an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| NormalizeError::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS filings (
                accession_number TEXT PRIMARY KEY,
                company_ticker TEXT NOT NULL,
                sic_code TEXT,
                form_type TEXT NOT NULL,
                filing_date TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER,
                processed INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS facts (
                fact_id INTEGER PRIMARY KEY AUTOINCREMENT,
                accession_number TEXT NOT NULL,
                concept_name TEXT NOT NULL,
                value REAL,
                text_value TEXT,
                unit TEXT,
                period_type TEXT NOT NULL,
                period_start TEXT,
                period_end TEXT NOT NULL,
                dimensions_json TEXT NOT NULL,
                decimals INTEGER,
                is_custom INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_facts_accession
             ON facts(accession_number)",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS normalized_financials (
                company_ticker TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER,
                metric_id TEXT NOT NULL,
                metric_value REAL NOT NULL,
                source_concept TEXT NOT NULL,
                source_accession TEXT NOT NULL,
                confidence_score REAL NOT NULL
            )",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        // NULL quarters compare unequal in SQL, so the annual key needs the
        // ifnull form to be unique.
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_normalized_key
             ON normalized_financials(company_ticker, fiscal_year,
                                      ifnull(fiscal_quarter, -1), metric_id)",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS quality_issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                severity TEXT NOT NULL,
                data_json TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS quality_scores (
                accession_number TEXT PRIMARY KEY,
                score REAL NOT NULL,
                grade TEXT NOT NULL,
                data_json TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        debug!("SQLite store schema initialized");
        Ok(())
    }

    /// Inserts or replaces a filing in the index.
    ///
    /// # Errors
    /// Returns an error on a database failure.
    #[instrument(skip(self, filing), fields(accession = %filing.accession_number))]
    pub async fn insert_filing(&self, filing: &FilingMetadata) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO filings
             (accession_number, company_ticker, sic_code, form_type, filing_date,
              fiscal_year, fiscal_quarter, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                filing.accession_number,
                filing.company_ticker.to_string(),
                filing.sic_code,
                filing.form_type,
                filing.filing_date.to_string(),
                filing.fiscal_year,
                filing.fiscal_quarter,
                filing.processed,
            ],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;
        Ok(())
    }

    /// Inserts a raw fact, letting the database assign its fact id.
    ///
    /// Returns the assigned id.
    ///
    /// # Errors
    /// Returns an error on a database failure.
    #[instrument(skip(self, fact), fields(accession = %fact.accession_number, concept = %fact.concept_name))]
    pub async fn insert_fact(&self, fact: &RawFact) -> Result<i64> {
        let dimensions_json = serde_json::to_string(&fact.dimensions)
            .map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO facts
             (accession_number, concept_name, value, text_value, unit, period_type,
              period_start, period_end, dimensions_json, decimals, is_custom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                fact.accession_number,
                fact.concept_name,
                fact.value,
                fact.text_value,
                fact.unit,
                period_type_to_str(fact.period_type),
                fact.period_start.map(|d| d.to_string()),
                fact.period_end.to_string(),
                dimensions_json,
                fact.decimals,
                fact.is_custom,
            ],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NormalizeError::Store(e.to_string()))
    }
}

/// Convert period type to database string.
fn period_type_to_str(pt: PeriodType) -> &'static str {
    match pt {
        PeriodType::Instant => "I",
        PeriodType::Duration => "D",
    }
}

/// Convert database string to period type.
fn str_to_period_type(s: &str) -> Result<PeriodType> {
    match s {
        "I" => Ok(PeriodType::Instant),
        "D" => Ok(PeriodType::Duration),
        _ => Err(NormalizeError::Parse(format!("invalid period type: {s}"))),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| NormalizeError::Parse(format!("invalid date '{s}': {e}")))
}

/// Raw column values for one filing row, parsed outside the query closure.
type FilingRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    i32,
    Option<u8>,
    bool,
);

fn filing_from_row(row: FilingRow) -> Result<FilingMetadata> {
    let (accession, ticker, sic_code, form_type, filing_date, fiscal_year, fiscal_quarter, processed) =
        row;
    Ok(FilingMetadata {
        accession_number: accession,
        company_ticker: Ticker::new(ticker),
        sic_code,
        form_type,
        filing_date: parse_date(&filing_date)?,
        fiscal_year,
        fiscal_quarter,
        processed,
    })
}

/// Raw column values for one fact row.
type FactRow = (
    i64,
    String,
    String,
    Option<f64>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
    Option<i32>,
    bool,
);

fn fact_from_row(row: FactRow) -> Result<RawFact> {
    let (
        fact_id,
        accession_number,
        concept_name,
        value,
        text_value,
        unit,
        period_type,
        period_start,
        period_end,
        dimensions_json,
        decimals,
        is_custom,
    ) = row;
    let dimensions: Dimensions = serde_json::from_str(&dimensions_json)
        .map_err(|e| NormalizeError::Parse(e.to_string()))?;
    Ok(RawFact {
        fact_id,
        accession_number,
        concept_name,
        value,
        text_value,
        unit,
        period_type: str_to_period_type(&period_type)?,
        period_start: period_start.as_deref().map(parse_date).transpose()?,
        period_end: parse_date(&period_end)?,
        dimensions,
        decimals,
        is_custom,
    })
}

const FILING_COLUMNS: &str = "accession_number, company_ticker, sic_code, form_type, \
                              filing_date, fiscal_year, fiscal_quarter, processed";

const FACT_COLUMNS: &str = "fact_id, accession_number, concept_name, value, text_value, unit, \
                            period_type, period_start, period_end, dimensions_json, decimals, \
                            is_custom";

#[async_trait]
impl FactStore for SqliteStore {
    #[instrument(skip(self))]
    async fn filings(&self) -> Result<Vec<FilingMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FILING_COLUMNS} FROM filings ORDER BY accession_number"
            ))
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i32>(5)?,
                    row.get::<_, Option<u8>>(6)?,
                    row.get::<_, bool>(7)?,
                ))
            })
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        let mut filings = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| NormalizeError::Store(e.to_string()))?;
            filings.push(filing_from_row(raw)?);
        }
        Ok(filings)
    }

    #[instrument(skip(self))]
    async fn filing(&self, accession_number: &str) -> Result<Option<FilingMetadata>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {FILING_COLUMNS} FROM filings WHERE accession_number = ?1"),
                params![accession_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i32>(5)?,
                        row.get::<_, Option<u8>>(6)?,
                        row.get::<_, bool>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        raw.map(filing_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn raw_facts(&self, accession_number: &str) -> Result<Vec<RawFact>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM facts
                 WHERE accession_number = ?1 ORDER BY fact_id"
            ))
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map(params![accession_number], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<i32>>(10)?,
                    row.get::<_, bool>(11)?,
                ))
            })
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        let mut facts = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| NormalizeError::Store(e.to_string()))?;
            facts.push(fact_from_row(raw)?);
        }
        debug!(count = facts.len(), "Loaded raw facts");
        Ok(facts)
    }

    #[instrument(skip(self))]
    async fn fact_accessions(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT accession_number FROM facts ORDER BY accession_number")
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| NormalizeError::Store(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn normalized_rows(&self) -> Result<Vec<NormalizedFinancial>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT company_ticker, fiscal_year, fiscal_quarter, metric_id, metric_value,
                        source_concept, source_accession, confidence_score
                 FROM normalized_financials
                 ORDER BY company_ticker, fiscal_year, fiscal_quarter, metric_id",
            )
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NormalizedFinancial {
                    company_ticker: Ticker::new(row.get::<_, String>(0)?),
                    fiscal_year: row.get(1)?,
                    fiscal_quarter: row.get(2)?,
                    metric_id: row.get(3)?,
                    metric_value: row.get(4)?,
                    source_concept: row.get(5)?,
                    source_accession: row.get(6)?,
                    confidence_score: row.get(7)?,
                })
            })
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<NormalizedFinancial>>>()
            .map_err(|e| NormalizeError::Store(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn issues(&self) -> Result<Vec<QualityIssue>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data_json FROM quality_issues ORDER BY id")
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        let mut issues = Vec::new();
        for row in rows {
            let json = row.map_err(|e| NormalizeError::Store(e.to_string()))?;
            issues.push(
                serde_json::from_str(&json).map_err(|e| NormalizeError::Parse(e.to_string()))?,
            );
        }
        Ok(issues)
    }

    #[instrument(skip(self))]
    async fn scores(&self) -> Result<Vec<QualityScore>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data_json FROM quality_scores ORDER BY accession_number")
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        let mut scores = Vec::new();
        for row in rows {
            let json = row.map_err(|e| NormalizeError::Store(e.to_string()))?;
            scores.push(
                serde_json::from_str(&json).map_err(|e| NormalizeError::Parse(e.to_string()))?,
            );
        }
        Ok(scores)
    }
}

#[async_trait]
impl NormalizedSink for SqliteStore {
    #[instrument(skip(self, rows), fields(accession = %accession_number, count = rows.len()))]
    async fn upsert_normalized(
        &self,
        accession_number: &str,
        rows: &[NormalizedFinancial],
    ) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        // The filing's previous output and any row another filing wrote for
        // the same key both give way to the new rows.
        tx.execute(
            "DELETE FROM normalized_financials WHERE source_accession = ?1",
            params![accession_number],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;

        for row in rows {
            tx.execute(
                "DELETE FROM normalized_financials
                 WHERE company_ticker = ?1 AND fiscal_year = ?2
                   AND fiscal_quarter IS ?3 AND metric_id = ?4",
                params![
                    row.company_ticker.to_string(),
                    row.fiscal_year,
                    row.fiscal_quarter,
                    row.metric_id,
                ],
            )
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
            tx.execute(
                "INSERT INTO normalized_financials
                 (company_ticker, fiscal_year, fiscal_quarter, metric_id, metric_value,
                  source_concept, source_accession, confidence_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.company_ticker.to_string(),
                    row.fiscal_year,
                    row.fiscal_quarter,
                    row.metric_id,
                    row.metric_value,
                    row.source_concept,
                    row.source_accession,
                    row.confidence_score,
                ],
            )
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        }

        tx.commit().map_err(|e| NormalizeError::Store(e.to_string()))?;
        debug!("Upserted {} normalized rows", rows.len());
        Ok(())
    }

    #[instrument(skip(self, issues), fields(count = issues.len()))]
    async fn append_issues(&self, issues: &[QualityIssue]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| NormalizeError::Store(e.to_string()))?;

        for issue in issues {
            let data_json =
                serde_json::to_string(issue).map_err(|e| NormalizeError::Parse(e.to_string()))?;
            tx.execute(
                "INSERT INTO quality_issues (scope, severity, data_json) VALUES (?1, ?2, ?3)",
                params![issue.scope, issue.severity.to_string(), data_json],
            )
            .map_err(|e| NormalizeError::Store(e.to_string()))?;
        }

        tx.commit().map_err(|e| NormalizeError::Store(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, score), fields(accession = %score.accession_number))]
    async fn upsert_score(&self, score: &QualityScore) -> Result<()> {
        let data_json =
            serde_json::to_string(score).map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO quality_scores (accession_number, score, grade, data_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                score.accession_number,
                score.score,
                score.grade.to_string(),
                data_json,
            ],
        )
        .map_err(|e| NormalizeError::Store(e.to_string()))?;
        Ok(())
    }
}
