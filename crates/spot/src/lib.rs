#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/spot/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Spot price history cache.
//!
//! This crate re-exports the core types, the store implementations and the
//! HTTP source, and provides the [`Reconciler`] that keeps a store in sync
//! with a remote source.
//!
//! # Features
//!
//! - `http` - HTTP observation source
//! - `cache-sqlite` - SQLite-based store
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spot::{Reconciler, SpotConfig, TimeWindow};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> spot::Result<()> {
//!     let config = SpotConfig::from_path("spot.toml")?;
//!     let reconciler = Reconciler::from_config(&config)?;
//!
//!     let start = NaiveDate::from_ymd_opt(2016, 12, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2016, 12, 8).unwrap().and_hms_opt(0, 0, 0).unwrap();
//!
//!     reconciler.reconcile_range(&"m4.large".into(), start, end).await?;
//!     let history = reconciler.history(&"m4.large".into(), &TimeWindow::new(start, end)?).await?;
//!     println!("{:?}", history.to_dataframe()?);
//!
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use spot_core::*;

// Store implementations
#[cfg(feature = "cache-sqlite")]
pub use spot_cache::SqliteStore;
pub use spot_cache::InMemoryStore;

// Sources
#[cfg(feature = "http")]
pub use spot_http::HttpObservationSource;

mod reconciler;
pub use reconciler::{ReconcileReport, Reconciler};
