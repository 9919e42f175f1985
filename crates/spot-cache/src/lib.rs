#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/spot/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Store implementations for the spot price history cache.
//!
//! This crate provides implementations of the [`PriceStore`] trait from `spot-core`:
//!
//! - [`SqliteStore`] - Persistent SQLite-based store (default, requires `sqlite` feature)
//! - [`InMemoryStore`] - In-memory store for testing

/// In-memory store implementation.
pub mod memory;

/// SQLite-based store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use spot_core::PriceStore;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
