#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factornorm/normalize/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Concept normalization and data quality engine.
//!
//! Processing order within one filing is strictly sequenced: deduplication
//! produces [`CanonicalFact`](normalize_core::CanonicalFact)s, the
//! [`Resolver`](resolver::Resolver) consumes them, and the
//! [`QualityScorer`](scorer::QualityScorer) scores the result. Across
//! filings the [`BatchRunner`](runner::BatchRunner) fans work out to
//! independent workers and serializes all writes through one coordinator.

/// Deterministic collapse of duplicate raw facts.
pub mod dedup;
/// Calculation-rule parsing and evaluation for derived metrics.
pub mod formula;
/// The immutable concept mapping table.
pub mod mapping;
/// Read-only consistency checks across stores.
pub mod reconcile;
/// Priority/fallback resolution of standardized metrics.
pub mod resolver;
/// Concurrent normalization of all filings.
pub mod runner;
/// Composite quality scoring.
pub mod scorer;
/// Built-in metric and mapping catalog.
pub mod seed;

pub use dedup::{DedupOutcome, DedupStats, dedup_facts};
pub use formula::Formula;
pub use mapping::MappingTable;
pub use reconcile::{ReconciliationEngine, ReconciliationReport};
pub use resolver::{FilingContext, ResolutionOutcome, Resolver};
pub use runner::{BatchReport, BatchRunner};
pub use scorer::{QualityScorer, aggregate_company};
