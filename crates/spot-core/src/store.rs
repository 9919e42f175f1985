//! Store trait for persisted price records.
//!
//! This module defines the [`PriceStore`] trait that provides a unified interface
//! for keyed, append-only storage of price observations plus the sync ledger
//! that remembers which windows were already fetched.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::{
    error::Result,
    types::{Coverage, OfferingType, PriceRecord, TimeWindow, Zone},
};

/// Trait for durable storage of price records.
///
/// Records are keyed by `(offering, zone, timestamp)`. Inserting a key that
/// already exists is ignored: the first write for a key wins permanently.
/// Implementations can store data in various backends (SQLite, in-memory, etc.).
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Inserts records for an offering, ignoring keys that already exist.
    ///
    /// The batch is applied atomically. Every record must belong to `offering`,
    /// otherwise nothing is written. Returns the number of newly inserted records.
    async fn upsert_many(&self, offering: &OfferingType, records: &[PriceRecord]) -> Result<usize>;

    /// Distinct zones with at least one cached record.
    async fn zones(&self, offering: &OfferingType) -> Result<BTreeSet<Zone>>;

    /// Earliest and latest cached timestamp for a zone, `None` without records.
    async fn coverage(&self, offering: &OfferingType, zone: &Zone) -> Result<Option<Coverage>>;

    /// Cached records in `[window.start, window.end)`, ascending by timestamp.
    async fn query_range(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<Vec<PriceRecord>>;

    /// Records that `window` was fetched completely for a zone.
    async fn record_synced(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<()>;

    /// Hull of all windows recorded with [`record_synced`](Self::record_synced).
    async fn synced_extent(&self, offering: &OfferingType, zone: &Zone)
    -> Result<Option<Coverage>>;

    /// Number of cached records for an offering.
    async fn count(&self, offering: &OfferingType) -> Result<usize>;

    /// Removes every record and ledger entry for an offering.
    async fn clear(&self, offering: &OfferingType) -> Result<()>;
}

/// Rejects a batch containing records of another offering.
///
/// # Errors
/// Returns [`SpotError::InvalidParameter`](crate::SpotError::InvalidParameter)
/// naming the first foreign record.
pub fn ensure_offering(offering: &OfferingType, records: &[PriceRecord]) -> Result<()> {
    match records.iter().find(|r| &r.offering != offering) {
        Some(foreign) => Err(crate::SpotError::InvalidParameter(format!(
            "record for {} in {} passed to the {} store",
            foreign.offering, foreign.zone, offering
        ))),
        None => Ok(()),
    }
}
