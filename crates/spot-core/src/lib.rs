#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/spot/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the spot price history cache.
//!
//! This crate provides the building blocks the reconciler is assembled from:
//!
//! - [`PriceStore`](store::PriceStore) - Keyed, append-only record storage
//! - [`ObservationSource`](source::ObservationSource) - Paginated remote listing
//! - [`FetchClient`](fetch::FetchClient) - Drains a listing for one triple
//! - [`missing_windows`](coverage::missing_windows) - Gap detection against a cached extent
//! - [`OfferingCatalog`](catalog::OfferingCatalog) - Offering capabilities and unit packing

/// Offering capability catalog.
pub mod catalog;
/// Configuration types.
pub mod config;
/// Missing-window computation.
pub mod coverage;
/// Error types for cache operations.
pub mod error;
/// Paginating fetch client.
pub mod fetch;
/// Range query results.
pub mod history;
/// Remote source trait.
pub mod source;
/// Store trait.
pub mod store;
/// Core data types (OfferingType, Zone, TimeWindow, PriceRecord, etc.).
pub mod types;

/// Scripted sources for tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at crate root
pub use catalog::{OfferingCatalog, OfferingSpec, OfferingUnits, ResourceRequest};
pub use config::{CacheConfig, HttpSourceConfig, ReconcileConfig, SpotConfig};
pub use coverage::missing_windows;
pub use error::{Result, SpotError, ZoneFailure, ZoneFailures};
pub use fetch::FetchClient;
pub use history::PriceHistory;
pub use source::ObservationSource;
pub use store::PriceStore;
pub use types::{
    Coverage, ObservationPage, OfferingType, PricePoint, PriceRecord, TIMESTAMP_FORMAT, TimeWindow,
    Zone,
};
