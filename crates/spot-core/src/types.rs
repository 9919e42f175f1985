//! Core data types for spot price history.
//!
//! This module defines the fundamental data structures:
//!
//! - [`OfferingType`] - Compute offering identifier (e.g. `m4.large`)
//! - [`Zone`] - Availability zone identifier
//! - [`TimeWindow`] - Half-open `[start, end)` interval of naive UTC timestamps
//! - [`Coverage`] - Earliest/latest timestamp extent
//! - [`PriceRecord`] - One price observation
//! - [`PricePoint`] - A `(timestamp, price)` pair returned by range queries
//! - [`ObservationPage`] - One page of a paginated remote listing

use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SpotError};

/// Format used to persist timestamps; sorts lexicographically in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Truncates a timestamp to whole seconds.
#[must_use]
pub fn to_second(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp.trunc_subsecs(0)
}

/// Identifier for a class of compute resource being priced.
///
/// Offering names are trimmed on creation but otherwise kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferingType(String);

impl OfferingType {
    /// Creates a new offering type.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        Self(s.trim().to_string())
    }

    /// Returns the offering as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfferingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OfferingType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for OfferingType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OfferingType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identifier for a failure-isolated sub-region (availability zone).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Zone(String);

impl Zone {
    /// Creates a new zone.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        Self(s.trim().to_string())
    }

    /// Returns the zone as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Zone {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Zone {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Zone {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Half-open `[start, end)` interval over naive UTC timestamps.
///
/// Both bounds are truncated to whole seconds. A window whose start equals
/// its end is empty and never needs fetching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeWindow {
    /// Creates a window, rejecting `start > end`.
    ///
    /// # Errors
    /// Returns [`SpotError::InvalidWindow`] if `start` is after `end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        let (start, end) = (to_second(start), to_second(end));
        if start > end {
            return Err(SpotError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start of the window.
    #[must_use]
    pub const fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Exclusive end of the window.
    #[must_use]
    pub const fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Returns true if the window contains no instant.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if `timestamp` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Earliest and latest cached timestamp for one zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coverage {
    /// Earliest cached instant.
    pub earliest: NaiveDateTime,
    /// Latest cached instant.
    pub latest: NaiveDateTime,
}

impl Coverage {
    /// Creates a coverage extent, swapping the bounds if given out of order.
    #[must_use]
    pub fn new(earliest: NaiveDateTime, latest: NaiveDateTime) -> Self {
        if earliest <= latest {
            Self { earliest, latest }
        } else {
            Self {
                earliest: latest,
                latest: earliest,
            }
        }
    }

    /// Smallest extent containing both `self` and `other`.
    #[must_use]
    pub fn hull(self, other: Self) -> Self {
        Self {
            earliest: self.earliest.min(other.earliest),
            latest: self.latest.max(other.latest),
        }
    }

    /// Combines two optional extents.
    #[must_use]
    pub fn merge(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.hull(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Extent spanned by a set of timestamps, `None` when empty.
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = NaiveDateTime>) -> Option<Self> {
        timestamps.into_iter().fold(None, |acc, ts| {
            let point = Self::new(ts, ts);
            Some(acc.map_or(point, |c: Self| c.hull(point)))
        })
    }
}

impl From<TimeWindow> for Coverage {
    fn from(window: TimeWindow) -> Self {
        Self::new(window.start(), window.end())
    }
}

/// A single price observation for one offering in one zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Offering the price applies to.
    pub offering: OfferingType,
    /// Zone the price was observed in.
    pub zone: Zone,
    /// Naive UTC instant, second resolution.
    pub timestamp: NaiveDateTime,
    /// Non-negative price.
    pub price: f64,
}

impl PriceRecord {
    /// Creates a new record, truncating the timestamp to whole seconds.
    ///
    /// # Errors
    /// Returns [`SpotError::InvalidParameter`] if the price is negative or not finite.
    pub fn new(
        offering: OfferingType,
        zone: Zone,
        timestamp: NaiveDateTime,
        price: f64,
    ) -> Result<Self> {
        if !price.is_finite() || price < 0.0 {
            return Err(SpotError::InvalidParameter(format!(
                "price must be a non-negative number, got {price} for {offering} in {zone}"
            )));
        }
        Ok(Self {
            offering,
            zone,
            timestamp: to_second(timestamp),
            price,
        })
    }

    /// Returns the `(timestamp, price)` pair of this record.
    #[must_use]
    pub const fn point(&self) -> PricePoint {
        PricePoint {
            timestamp: self.timestamp,
            price: self.price,
        }
    }
}

/// A `(timestamp, price)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Naive UTC instant.
    pub timestamp: NaiveDateTime,
    /// Price at that instant.
    pub price: f64,
}

/// One page of a paginated observation listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationPage {
    /// Records on this page, in whatever order and batch size the source chose.
    pub records: Vec<PriceRecord>,
    next_token: Option<String>,
}

impl ObservationPage {
    /// Creates a page; an empty token is treated as "no further pages".
    #[must_use]
    pub fn new(records: Vec<PriceRecord>, next_token: Option<String>) -> Self {
        Self {
            records,
            next_token: next_token.filter(|t| !t.is_empty()),
        }
    }

    /// Creates a final page.
    #[must_use]
    pub fn last(records: Vec<PriceRecord>) -> Self {
        Self::new(records, None)
    }

    /// Continuation token for the next page, if any.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }
}
