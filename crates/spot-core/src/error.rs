//! Error types for cache and fetch operations.
//!
//! This module defines [`SpotError`] which covers every failure the cache can
//! surface: remote fetches, local persistence, window validation and the
//! aggregate raised when a reconciliation leaves some zones behind.

use std::fmt;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::types::{OfferingType, TimeWindow, Zone};

/// Errors that can occur while fetching, caching, or querying price history.
#[derive(Error, Debug)]
pub enum SpotError {
    /// Network-related errors (connection failures, timeouts, HTTP status, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by the remote source.
    #[error("Rate limited by {source_name}: retry after {retry_after:?}")]
    RateLimited {
        /// The source that rate limited the request.
        source_name: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// The remote source rejected a continuation token as malformed or expired.
    #[error("Invalid continuation token: {0}")]
    InvalidToken(String),

    /// Error parsing data from the remote source or the cache.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error interacting with the local store.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A time window whose start lies after its end.
    #[error("Invalid window: start {start} is after end {end}")]
    InvalidWindow {
        /// Requested start.
        start: NaiveDateTime,
        /// Requested end.
        end: NaiveDateTime,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested capability is not supported by a source.
    #[error("Feature not supported: {0}")]
    NotSupported(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetching one (offering, zone, window) triple failed.
    #[error("Fetch failed for {offering} in {zone} over {window}: {source}")]
    Fetch {
        /// Offering being fetched.
        offering: OfferingType,
        /// Zone being fetched.
        zone: Zone,
        /// Window being fetched.
        window: TimeWindow,
        /// The underlying source error.
        #[source]
        source: Box<SpotError>,
    },

    /// Any other error.
    #[error("{0}")]
    Other(String),

    /// One or more zones failed during a reconciliation; all zones were attempted.
    #[error("Reconciliation of {offering} failed for {failures}")]
    Reconcile {
        /// Offering that was reconciled.
        offering: OfferingType,
        /// Every zone that failed, with the window it failed on.
        failures: ZoneFailures,
    },
}

impl SpotError {
    /// Wraps a source error with the triple it was raised for.
    pub fn fetch(offering: &OfferingType, zone: &Zone, window: TimeWindow, source: Self) -> Self {
        Self::Fetch {
            offering: offering.clone(),
            zone: zone.clone(),
            window,
            source: Box::new(source),
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } | Self::Storage(_) => true,
            Self::Fetch { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// A single zone that could not be brought up to date.
#[derive(Debug)]
pub struct ZoneFailure {
    /// Zone that failed.
    pub zone: Zone,
    /// Window being processed when the failure happened.
    pub window: TimeWindow,
    /// What went wrong.
    pub error: SpotError,
}

impl fmt::Display for ZoneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.zone, self.window, self.error)
    }
}

/// Collection of per-zone failures carried by [`SpotError::Reconcile`].
#[derive(Debug, Default)]
pub struct ZoneFailures(Vec<ZoneFailure>);

impl ZoneFailures {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Records a failure.
    pub fn push(&mut self, failure: ZoneFailure) {
        self.0.push(failure);
    }

    /// Returns the number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &ZoneFailure> {
        self.0.iter()
    }

    /// Returns the distinct zones that failed, in first-failure order.
    #[must_use]
    pub fn zones(&self) -> Vec<&Zone> {
        let mut zones: Vec<&Zone> = Vec::new();
        for failure in &self.0 {
            if !zones.contains(&&failure.zone) {
                zones.push(&failure.zone);
            }
        }
        zones
    }
}

impl fmt::Display for ZoneFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} zone(s)", self.zones().len())?;
        for (i, failure) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl IntoIterator for ZoneFailures {
    type Item = ZoneFailure;
    type IntoIter = std::vec::IntoIter<ZoneFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Result type alias using [`SpotError`].
pub type Result<T> = std::result::Result<T, SpotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window(d1: u32, d2: u32) -> TimeWindow {
        let at = |d| {
            NaiveDate::from_ymd_opt(2016, 12, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        TimeWindow::new(at(d1), at(d2)).unwrap()
    }

    #[test]
    fn test_aggregate_mentions_every_failed_zone() {
        let mut failures = ZoneFailures::new();
        failures.push(ZoneFailure {
            zone: Zone::new("us-east-1b"),
            window: window(1, 8),
            error: SpotError::Network("connection reset".to_string()),
        });
        failures.push(ZoneFailure {
            zone: Zone::new("us-east-1c"),
            window: window(1, 3),
            error: SpotError::Storage("disk full".to_string()),
        });

        let err = SpotError::Reconcile {
            offering: OfferingType::new("m4.large"),
            failures,
        };
        let message = err.to_string();

        assert!(message.contains("m4.large"));
        assert!(message.contains("2 zone(s)"));
        assert!(message.contains("us-east-1b"));
        assert!(message.contains("us-east-1c"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn test_fetch_error_names_triple() {
        let err = SpotError::fetch(
            &OfferingType::new("c4.xlarge"),
            &Zone::new("us-west-2a"),
            window(2, 4),
            SpotError::InvalidToken("expired".to_string()),
        );
        let message = err.to_string();

        assert!(message.contains("c4.xlarge"));
        assert!(message.contains("us-west-2a"));
        assert!(message.contains("2016-12-02"));
        assert!(message.contains("expired"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(SpotError::Network("timeout".to_string()).is_transient());
        assert!(SpotError::Storage("locked".to_string()).is_transient());
        assert!(!SpotError::Parse("bad".to_string()).is_transient());
    }

    #[test]
    fn test_failed_zones_are_distinct() {
        let mut failures = ZoneFailures::new();
        for w in [window(1, 2), window(5, 8)] {
            failures.push(ZoneFailure {
                zone: Zone::new("us-east-1a"),
                window: w,
                error: SpotError::Network("reset".to_string()),
            });
        }
        assert_eq!(failures.len(), 2);
        assert_eq!(failures.zones(), vec![&Zone::new("us-east-1a")]);
    }
}
