#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factornorm/normalize/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core types and traits for the normalization engine.
//!
//! This crate provides the foundational abstractions shared by the engine
//! and store crates:
//!
//! - [`RawFact`](types::RawFact) - One tagged value extracted from a filing
//! - [`ConceptMapping`](types::ConceptMapping) - Priority/fallback mapping rule
//! - [`NormalizedFinancial`](types::NormalizedFinancial) - One resolved metric value
//! - [`QualityIssue`](types::QualityIssue) / [`QualityScore`](types::QualityScore) - Audit output
//! - [`FactStore`](store::FactStore) / [`NormalizedSink`](store::NormalizedSink) - Storage seams
//! - [`EngineConfig`](config::EngineConfig) - Immutable engine configuration

/// Engine configuration: score weights, thresholds, required concepts.
pub mod config;
/// Error types for normalization operations.
pub mod error;
/// Storage traits the engine reads and writes through.
pub mod store;
/// Core data types (facts, mappings, normalized rows, issues, scores).
pub mod types;

// Re-export commonly used items at crate root
pub use config::{EngineConfig, ScoreWeights};
pub use error::{NormalizeError, Result};
pub use store::{FactStore, NormalizedSink};
pub use types::{
    CanonicalFact, CompanyQuality, ConceptMapping, Dimensions, FilingMetadata, FiscalPeriod,
    Grade, IssueKind, MetricCategory, MetricDataType, NormalizedFinancial, PeriodType,
    QualityIssue, QualityScore, RawFact, ScoreBreakdown, Severity, StandardizedMetric, Ticker,
};
