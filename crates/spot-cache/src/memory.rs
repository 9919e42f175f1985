//! In-memory store implementation.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use spot_core::{
    Coverage, OfferingType, PriceRecord, PriceStore, Result, TimeWindow, Zone,
    store::ensure_offering,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Everything cached for one offering.
#[derive(Debug, Default)]
struct Shelf {
    records: BTreeMap<Zone, BTreeMap<NaiveDateTime, f64>>,
    synced: HashMap<Zone, Coverage>,
}

/// Simple in-memory store for testing and development.
///
/// Data is stored in a `RwLock`-protected map of per-offering shelves and is
/// lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    shelves: RwLock<HashMap<OfferingType, Shelf>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceStore for InMemoryStore {
    #[instrument(skip(self, records), fields(offering = %offering, count = records.len()))]
    async fn upsert_many(&self, offering: &OfferingType, records: &[PriceRecord]) -> Result<usize> {
        ensure_offering(offering, records)?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut shelves = self.shelves.write().await;
        let shelf = shelves.entry(offering.clone()).or_default();

        let mut inserted = 0;
        for record in records {
            let series = shelf.records.entry(record.zone.clone()).or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(record.timestamp) {
                slot.insert(record.price);
                inserted += 1;
            }
        }

        debug!("Inserted {} of {} records", inserted, records.len());
        Ok(inserted)
    }

    async fn zones(&self, offering: &OfferingType) -> Result<BTreeSet<Zone>> {
        let shelves = self.shelves.read().await;
        Ok(shelves
            .get(offering)
            .map(|s| {
                s.records
                    .iter()
                    .filter(|(_, series)| !series.is_empty())
                    .map(|(zone, _)| zone.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn coverage(&self, offering: &OfferingType, zone: &Zone) -> Result<Option<Coverage>> {
        let shelves = self.shelves.read().await;
        let series = shelves.get(offering).and_then(|s| s.records.get(zone));
        Ok(series.and_then(|series| {
            let earliest = series.keys().next()?;
            let latest = series.keys().next_back()?;
            Some(Coverage::new(*earliest, *latest))
        }))
    }

    #[instrument(skip(self), fields(offering = %offering, zone = %zone, window = %window))]
    async fn query_range(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<Vec<PriceRecord>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let shelves = self.shelves.read().await;
        let Some(series) = shelves.get(offering).and_then(|s| s.records.get(zone)) else {
            return Ok(Vec::new());
        };

        Ok(series
            .range(window.start()..window.end())
            .map(|(ts, price)| PriceRecord {
                offering: offering.clone(),
                zone: zone.clone(),
                timestamp: *ts,
                price: *price,
            })
            .collect())
    }

    async fn record_synced(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<()> {
        if window.is_empty() {
            return Ok(());
        }

        let mut shelves = self.shelves.write().await;
        let synced = &mut shelves.entry(offering.clone()).or_default().synced;
        let extent = Coverage::from(*window);
        synced
            .entry(zone.clone())
            .and_modify(|c| *c = c.hull(extent))
            .or_insert(extent);
        Ok(())
    }

    async fn synced_extent(
        &self,
        offering: &OfferingType,
        zone: &Zone,
    ) -> Result<Option<Coverage>> {
        let shelves = self.shelves.read().await;
        Ok(shelves.get(offering).and_then(|s| s.synced.get(zone)).copied())
    }

    async fn count(&self, offering: &OfferingType) -> Result<usize> {
        let shelves = self.shelves.read().await;
        Ok(shelves
            .get(offering)
            .map(|s| s.records.values().map(BTreeMap::len).sum())
            .unwrap_or_default())
    }

    async fn clear(&self, offering: &OfferingType) -> Result<()> {
        self.shelves.write().await.remove(offering);
        debug!("Cleared in-memory store for {}", offering);
        Ok(())
    }
}
