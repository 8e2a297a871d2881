#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factornorm/normalize/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Facade over the normalization engine and its stores.
//!
//! Re-exports the core data model and engine types, and provides the
//! [`Pipeline`] for running normalization, reconciliation, and quality
//! scoring against a store.
//!
//! # Features
//!
//! - `store-sqlite` - persistent SQLite-backed store (default)
//!
//! # Example
//!
//! ```rust,ignore
//! use normalize::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> normalize::Result<()> {
//!     let pipeline = Pipeline::with_sqlite("filings.db")?;
//!     let report = pipeline.normalize_all().await?;
//!     println!(
//!         "normalized {} filings, {} rows",
//!         report.filings_processed, report.rows_written
//!     );
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use normalize_core::*;

// Engine surface
pub use normalize_engine::{
    BatchReport, MappingTable, ReconciliationReport, dedup_facts,
};

// Store implementations
pub use normalize_store::MemoryStore;

#[cfg(feature = "store-sqlite")]
pub use normalize_store::SqliteStore;

/// DataFrame export of normalized metrics.
pub mod frame;
mod pipeline;

pub use frame::normalized_to_dataframe;
pub use pipeline::Pipeline;
