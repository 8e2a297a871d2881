//! DataFrame export of normalized metrics.

use normalize_core::{NormalizeError, NormalizedFinancial, Result};
use polars::prelude::*;

/// Builds a DataFrame from normalized rows, one row per resolved
/// (company, period, metric).
///
/// Columns: `ticker`, `fiscal_year`, `fiscal_quarter`, `metric_id`,
/// `metric_value`, `source_concept`, `source_accession`,
/// `confidence_score`.
///
/// # Errors
/// Returns an error if the frame cannot be assembled.
pub fn normalized_to_dataframe(rows: &[NormalizedFinancial]) -> Result<DataFrame> {
    let tickers: Vec<String> = rows.iter().map(|r| r.company_ticker.to_string()).collect();
    let years: Vec<i32> = rows.iter().map(|r| r.fiscal_year).collect();
    let quarters: Vec<Option<u32>> = rows
        .iter()
        .map(|r| r.fiscal_quarter.map(u32::from))
        .collect();
    let metrics: Vec<String> = rows.iter().map(|r| r.metric_id.clone()).collect();
    let values: Vec<f64> = rows.iter().map(|r| r.metric_value).collect();
    let concepts: Vec<String> = rows.iter().map(|r| r.source_concept.clone()).collect();
    let accessions: Vec<String> = rows.iter().map(|r| r.source_accession.clone()).collect();
    let confidences: Vec<f64> = rows.iter().map(|r| r.confidence_score).collect();

    DataFrame::new(vec![
        Column::new("ticker".into(), tickers),
        Column::new("fiscal_year".into(), years),
        Column::new("fiscal_quarter".into(), quarters),
        Column::new("metric_id".into(), metrics),
        Column::new("metric_value".into(), values),
        Column::new("source_concept".into(), concepts),
        Column::new("source_accession".into(), accessions),
        Column::new("confidence_score".into(), confidences),
    ])
    .map_err(|e| NormalizeError::Other(e.to_string()))
}
