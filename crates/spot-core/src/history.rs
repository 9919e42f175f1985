//! Range query results.

use std::collections::BTreeMap;

use polars::prelude::*;

use crate::{
    error::{Result, SpotError},
    types::{PricePoint, Zone},
};

/// Price history per zone, each series ascending by timestamp.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceHistory {
    series: BTreeMap<Zone, Vec<PricePoint>>,
}

impl PriceHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the series for a zone, replacing any previous one.
    pub fn insert(&mut self, zone: Zone, points: Vec<PricePoint>) {
        self.series.insert(zone, points);
    }

    /// Series for one zone.
    #[must_use]
    pub fn get(&self, zone: &Zone) -> Option<&[PricePoint]> {
        self.series.get(zone).map(Vec::as_slice)
    }

    /// Zones present, including those with an empty series.
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.series.keys()
    }

    /// Iterates `(zone, series)` pairs in zone order.
    pub fn iter(&self) -> impl Iterator<Item = (&Zone, &[PricePoint])> {
        self.series.iter().map(|(z, p)| (z, p.as_slice()))
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Returns true if no zone is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total number of points across all zones.
    #[must_use]
    pub fn total_points(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    /// Long-format frame with columns `zone`, `timestamp` and `price`.
    ///
    /// Rows are grouped by zone and ascending by timestamp within a zone.
    /// Zones with an empty series contribute no rows.
    ///
    /// # Errors
    /// Returns [`SpotError::Other`] if the frame cannot be assembled.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let rows = self.total_points();
        let mut zones: Vec<&str> = Vec::with_capacity(rows);
        let mut timestamps: Vec<i64> = Vec::with_capacity(rows);
        let mut prices: Vec<f64> = Vec::with_capacity(rows);

        for (zone, points) in &self.series {
            for point in points {
                zones.push(zone.as_str());
                timestamps.push(point.timestamp.and_utc().timestamp_millis());
                prices.push(point.price);
            }
        }

        let timestamp_col = Column::new("timestamp".into(), timestamps)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| SpotError::Other(e.to_string()))?;

        DataFrame::new(vec![
            Column::new("zone".into(), zones),
            timestamp_col,
            Column::new("price".into(), prices),
        ])
        .map_err(|e| SpotError::Other(e.to_string()))
    }
}

impl IntoIterator for PriceHistory {
    type Item = (Zone, Vec<PricePoint>);
    type IntoIter = std::collections::btree_map::IntoIter<Zone, Vec<PricePoint>>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.into_iter()
    }
}

impl FromIterator<(Zone, Vec<PricePoint>)> for PriceHistory {
    fn from_iter<I: IntoIterator<Item = (Zone, Vec<PricePoint>)>>(iter: I) -> Self {
        Self {
            series: iter.into_iter().collect(),
        }
    }
}
