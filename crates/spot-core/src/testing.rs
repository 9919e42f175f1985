//! Deterministic in-memory observation source for tests.
//!
//! [`ScriptedSource`] serves a fixed set of records, paginated with offset
//! tokens, and records every call it receives.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::{Result, SpotError},
    source::ObservationSource,
    types::{ObservationPage, OfferingType, PriceRecord, TimeWindow, Zone},
};

const TOKEN_PREFIX: &str = "offset-";

/// One call received by a [`ScriptedSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCall {
    /// Offering requested.
    pub offering: OfferingType,
    /// Zone requested.
    pub zone: Zone,
    /// Window requested.
    pub window: TimeWindow,
    /// Continuation token passed in.
    pub token: Option<String>,
}

/// Scripted source serving canned observations.
///
/// Zones listed with [`failing_zone`](Self::failing_zone) fail every call with
/// a network error. Without [`with_zone_catalog`](Self::with_zone_catalog),
/// `list_zones` reports the catalog as unsupported.
#[derive(Debug)]
pub struct ScriptedSource {
    records: Mutex<Vec<PriceRecord>>,
    page_size: usize,
    zone_catalog: Option<Vec<Zone>>,
    failing: HashSet<Zone>,
    delay: Option<Duration>,
    calls: Mutex<Vec<SourceCall>>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    /// Creates an empty source with a page size of 100.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            page_size: 100,
            zone_catalog: None,
            failing: HashSet::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Serves these records.
    #[must_use]
    pub fn with_records(self, records: Vec<PriceRecord>) -> Self {
        if let Ok(mut guard) = self.records.lock() {
            guard.extend(records);
        }
        self
    }

    /// Sets how many records each page holds.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Publishes a zone catalog.
    #[must_use]
    pub fn with_zone_catalog<I, Z>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = Z>,
        Z: Into<Zone>,
    {
        self.zone_catalog = Some(zones.into_iter().map(Into::into).collect());
        self
    }

    /// Makes every call for `zone` fail.
    #[must_use]
    pub fn failing_zone(mut self, zone: impl Into<Zone>) -> Self {
        self.failing.insert(zone.into());
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adds records after construction, as if the remote gained new data.
    pub fn push_records(&self, records: Vec<PriceRecord>) {
        if let Ok(mut guard) = self.records.lock() {
            guard.extend(records);
        }
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls made for the first page of a listing, one per fetched window.
    #[must_use]
    pub fn first_page_calls(&self) -> Vec<SourceCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.token.is_none())
            .collect()
    }

    fn parse_token(token: Option<&str>) -> Result<usize> {
        match token {
            None => Ok(0),
            Some(t) => t
                .strip_prefix(TOKEN_PREFIX)
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| SpotError::InvalidToken(t.to_string())),
        }
    }
}

#[async_trait]
impl ObservationSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_observations(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
        continuation_token: Option<&str>,
    ) -> Result<ObservationPage> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SourceCall {
                offering: offering.clone(),
                zone: zone.clone(),
                window: *window,
                token: continuation_token.map(str::to_string),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(zone) {
            return Err(SpotError::Network(format!("scripted failure for {zone}")));
        }

        let offset = Self::parse_token(continuation_token)?;

        let mut matching: Vec<PriceRecord> = self
            .records
            .lock()
            .map_err(|e| SpotError::Other(e.to_string()))?
            .iter()
            .filter(|r| &r.offering == offering && &r.zone == zone && window.contains(r.timestamp))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.timestamp);

        if offset > matching.len() {
            return Err(SpotError::InvalidToken(format!("{TOKEN_PREFIX}{offset}")));
        }

        let end = (offset + self.page_size).min(matching.len());
        let page: Vec<PriceRecord> = matching[offset..end].to_vec();
        let next = (end < matching.len()).then(|| format!("{TOKEN_PREFIX}{end}"));

        Ok(ObservationPage::new(page, next))
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.zone_catalog
            .clone()
            .ok_or_else(|| SpotError::NotSupported("scripted source has no zone catalog".into()))
    }
}
