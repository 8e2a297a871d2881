#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factornorm/normalize/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Store implementations for the normalization engine.
//!
//! This crate provides implementations of the [`FactStore`] and
//! [`NormalizedSink`] traits from `normalize-core`:
//!
//! - [`SqliteStore`] - Persistent SQLite-backed store (default, requires `sqlite` feature)
//! - [`MemoryStore`] - In-memory store for testing and development

/// In-memory store implementation.
pub mod memory;

/// SQLite-backed store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the traits for convenience
pub use normalize_core::{FactStore, NormalizedSink};

// Re-export implementations
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
