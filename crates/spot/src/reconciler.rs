//! Cache reconciliation and range queries.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use spot_core::{
    Coverage, FetchClient, ObservationSource, OfferingType, PriceHistory, PriceRecord, PriceStore,
    ReconcileConfig, Result, SpotError, TimeWindow, Zone, ZoneFailure, ZoneFailures,
    config::DEFAULT_MAX_CONCURRENT_FETCHES, missing_windows,
};

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Offering that was reconciled.
    pub offering: OfferingType,
    /// Zones considered, in the order they were planned.
    pub zones_checked: Vec<Zone>,
    /// Windows fetched and merged, in the order they were written.
    pub windows_fetched: Vec<(Zone, TimeWindow)>,
    /// Records returned by the source.
    pub records_fetched: usize,
    /// Records that were new to the store.
    pub records_inserted: usize,
}

/// Brings a [`PriceStore`] up to date with an [`ObservationSource`] and
/// answers range queries from the store.
///
/// Zone fetches run on a bounded pool; their results are merged by a single
/// writer in planning order. Reconciliations of the same offering are
/// serialized, different offerings proceed independently. Lock entries for
/// offerings no reconcile is holding are dropped on the next acquisition.
///
/// # Example
///
/// ```rust,ignore
/// use spot::{InMemoryStore, Reconciler, TimeWindow};
///
/// let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()), source);
/// let report = reconciler.reconcile(&"m4.large".into(), &window).await?;
/// println!("fetched {} windows", report.windows_fetched.len());
/// ```
pub struct Reconciler {
    store: Arc<dyn PriceStore>,
    fetcher: FetchClient,
    max_concurrent_fetches: usize,
    exclude_zones: HashSet<Zone>,
    locks: Mutex<HashMap<OfferingType, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("source", &self.fetcher.source().name())
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("exclude_zones", &self.exclude_zones)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn PriceStore>, source: Arc<dyn ObservationSource>) -> Self {
        Self {
            store,
            fetcher: FetchClient::new(source),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            exclude_zones: HashSet::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a reconciler using the given reconciliation settings.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn PriceStore>,
        source: Arc<dyn ObservationSource>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            exclude_zones: config.excluded_zones(),
            ..Self::new(store, source)
        }
    }

    /// Build the SQLite store and HTTP source described by `config`.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] or [`SpotError::Storage`] if either
    /// component cannot be created.
    #[cfg(all(feature = "http", feature = "cache-sqlite"))]
    pub fn from_config(config: &spot_core::SpotConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(spot_cache::SqliteStore::open(&config.cache)?);
        let source = Arc::new(spot_http::HttpObservationSource::from_config(&config.http)?);
        Ok(Self::with_config(store, source, &config.reconcile))
    }

    /// Set how many zone fetches may be in flight at once.
    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, n: usize) -> Self {
        self.max_concurrent_fetches = n.max(1);
        self
    }

    /// Set the zones [`history`](Self::history) leaves out.
    #[must_use]
    pub fn with_excluded_zones<I, Z>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = Z>,
        Z: Into<Zone>,
    {
        self.exclude_zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    /// Zones left out by [`history`](Self::history).
    #[must_use]
    pub const fn excluded_zones(&self) -> &HashSet<Zone> {
        &self.exclude_zones
    }

    async fn offering_lock(&self, offering: &OfferingType) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(offering.clone()).or_default())
    }

    /// Validates `[start, end)` and reconciles it.
    ///
    /// # Errors
    /// Returns [`SpotError::InvalidWindow`] before any I/O if `start > end`,
    /// otherwise whatever [`reconcile`](Self::reconcile) returns.
    pub async fn reconcile_range(
        &self,
        offering: &OfferingType,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ReconcileReport> {
        let window = TimeWindow::new(start, end)?;
        self.reconcile(offering, &window).await
    }

    /// Fetches whatever the store is missing for `offering` over `window`.
    ///
    /// Candidate zones come from the source's zone catalog, or from the zones
    /// already cached when the source has none. Each zone is compared against
    /// the hull of its cached records and previously synced windows; only the
    /// leading and trailing gaps are fetched.
    ///
    /// # Errors
    /// Returns [`SpotError::Reconcile`] listing every zone that failed, after
    /// all zones were attempted. Zones that succeeded stay merged. Errors
    /// listing the candidate zones are returned as is.
    #[instrument(skip(self), fields(offering = %offering, window = %window))]
    pub async fn reconcile(
        &self,
        offering: &OfferingType,
        window: &TimeWindow,
    ) -> Result<ReconcileReport> {
        let lock = self.offering_lock(offering).await;
        let _guard = lock.lock().await;

        let mut report = ReconcileReport {
            offering: offering.clone(),
            ..ReconcileReport::default()
        };
        if window.is_empty() {
            return Ok(report);
        }

        let zones = self.candidate_zones(offering).await?;
        let mut failures = ZoneFailures::new();
        let mut tasks: Vec<(Zone, TimeWindow)> = Vec::new();

        for zone in zones {
            match self.plan_zone(offering, &zone, window).await {
                Ok(gaps) => {
                    if gaps.is_empty() {
                        debug!("{} is up to date", zone);
                    }
                    tasks.extend(gaps.into_iter().map(|gap| (zone.clone(), gap)));
                }
                Err(error) => {
                    warn!("Could not plan {}: {}", zone, error);
                    failures.push(ZoneFailure {
                        zone: zone.clone(),
                        window: *window,
                        error,
                    });
                }
            }
            report.zones_checked.push(zone);
        }

        debug!("Fetching {} windows", tasks.len());

        let fetcher = &self.fetcher;
        let mut results = stream::iter(tasks)
            .map(|(zone, gap)| async move {
                let result = fetcher.fetch(offering, &zone, &gap).await;
                (zone, gap, result)
            })
            .buffered(self.max_concurrent_fetches);

        while let Some((zone, gap, result)) = results.next().await {
            match self.merge(offering, &zone, &gap, result).await {
                Ok((fetched, inserted)) => {
                    report.records_fetched += fetched;
                    report.records_inserted += inserted;
                    report.windows_fetched.push((zone, gap));
                }
                Err(error) => {
                    warn!("Failed to reconcile {} {}: {}", zone, gap, error);
                    failures.push(ZoneFailure {
                        zone,
                        window: gap,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            debug!(
                "Reconciled {} zones, {} new records",
                report.zones_checked.len(),
                report.records_inserted
            );
            Ok(report)
        } else {
            Err(SpotError::Reconcile {
                offering: offering.clone(),
                failures,
            })
        }
    }

    async fn candidate_zones(&self, offering: &OfferingType) -> Result<BTreeSet<Zone>> {
        match self.fetcher.source().list_zones().await {
            Ok(zones) => Ok(zones.into_iter().collect()),
            Err(SpotError::NotSupported(reason)) => {
                debug!("Falling back to cached zones: {}", reason);
                self.store.zones(offering).await
            }
            Err(e) => Err(e),
        }
    }

    async fn plan_zone(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<Vec<TimeWindow>> {
        let coverage = self.store.coverage(offering, zone).await?;
        let synced = self.store.synced_extent(offering, zone).await?;
        Ok(missing_windows(*window, Coverage::merge(coverage, synced)))
    }

    async fn merge(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
        fetched: Result<Vec<PriceRecord>>,
    ) -> Result<(usize, usize)> {
        let records = fetched?;
        let inserted = self.store.upsert_many(offering, &records).await?;
        self.store.record_synced(offering, zone, window).await?;
        Ok((records.len(), inserted))
    }

    /// Cached history of `offering` over `window`, per zone.
    ///
    /// Never contacts the source. Every cached zone not in `exclude_zones`
    /// appears in the result, with an empty series if it has nothing in range.
    ///
    /// # Errors
    /// Returns [`SpotError::Storage`] if the store cannot be read.
    #[instrument(skip(self, exclude_zones), fields(offering = %offering, window = %window))]
    pub async fn get_history(
        &self,
        offering: &OfferingType,
        window: &TimeWindow,
        exclude_zones: &HashSet<Zone>,
    ) -> Result<PriceHistory> {
        let mut history = PriceHistory::new();
        for zone in self.store.zones(offering).await? {
            if exclude_zones.contains(&zone) {
                continue;
            }
            let points = self
                .store
                .query_range(offering, &zone, window)
                .await?
                .iter()
                .map(PriceRecord::point)
                .collect();
            history.insert(zone, points);
        }

        debug!("Read {} points across {} zones", history.total_points(), history.len());
        Ok(history)
    }

    /// [`get_history`](Self::get_history) with the configured exclusions.
    ///
    /// # Errors
    /// Returns [`SpotError::Storage`] if the store cannot be read.
    pub async fn history(
        &self,
        offering: &OfferingType,
        window: &TimeWindow,
    ) -> Result<PriceHistory> {
        self.get_history(offering, window, &self.exclude_zones).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use spot_cache::InMemoryStore;
    use spot_core::testing::ScriptedSource;
    use spot_core::{ObservationPage, PricePoint};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn at(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 12, day)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn window(d1: u32, d2: u32) -> TimeWindow {
        TimeWindow::new(at(d1, 0), at(d2, 0)).unwrap()
    }

    fn record(zone: &str, ts: NaiveDateTime, price: f64) -> PriceRecord {
        PriceRecord::new("m4.large".into(), zone.into(), ts, price).unwrap()
    }

    fn offering() -> OfferingType {
        OfferingType::new("m4.large")
    }

    fn setup(source: ScriptedSource) -> (Reconciler, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()), source.clone());
        (reconciler, source)
    }

    #[tokio::test]
    async fn test_empty_cache_fetches_full_window() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_records(vec![
                    record("us-east-1a", at(5, 0), 0.05),
                    record("us-east-1a", at(2, 6), 0.02),
                    record("us-east-1a", at(7, 12), 0.07),
                ]),
        );

        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();
        assert_eq!(report.records_inserted, 3);
        assert_eq!(report.windows_fetched, vec![(Zone::new("us-east-1a"), window(1, 8))]);
        assert_eq!(source.first_page_calls().len(), 1);

        let coverage = reconciler
            .store()
            .coverage(&offering(), &"us-east-1a".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coverage, Coverage::new(at(2, 6), at(7, 12)));

        let history = reconciler
            .get_history(&offering(), &window(1, 8), &HashSet::new())
            .await
            .unwrap();
        let series = history.get(&"us-east-1a".into()).unwrap();
        assert_eq!(
            series,
            &[
                PricePoint { timestamp: at(2, 6), price: 0.02 },
                PricePoint { timestamp: at(5, 0), price: 0.05 },
                PricePoint { timestamp: at(7, 12), price: 0.07 },
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_cache_fetches_leading_then_trailing() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_records(vec![
                    record("us-east-1a", at(1, 12), 0.01),
                    record("us-east-1a", at(7, 12), 0.07),
                ]),
        );
        let reconciler = reconciler.with_max_concurrent_fetches(1);
        reconciler
            .store()
            .upsert_many(
                &offering(),
                &[record("us-east-1a", at(3, 0), 0.03), record("us-east-1a", at(6, 0), 0.06)],
            )
            .await
            .unwrap();

        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        let windows: Vec<TimeWindow> = source.first_page_calls().iter().map(|c| c.window).collect();
        assert_eq!(windows, vec![window(1, 3), window(6, 8)]);
        assert_eq!(
            report.windows_fetched,
            vec![
                (Zone::new("us-east-1a"), window(1, 3)),
                (Zone::new("us-east-1a"), window(6, 8)),
            ]
        );
        assert_eq!(reconciler.store().count(&offering()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_zone_does_not_abort_others() {
        let (reconciler, _source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a", "us-east-1b"])
                .failing_zone("us-east-1b")
                .with_records(vec![
                    record("us-east-1a", at(2, 0), 0.02),
                    record("us-east-1b", at(2, 0), 0.09),
                ]),
        );

        let err = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap_err();
        match &err {
            SpotError::Reconcile { failures, .. } => {
                assert_eq!(failures.zones(), vec![&Zone::new("us-east-1b")]);
                let failure = failures.iter().next().unwrap();
                assert_eq!(failure.window, window(1, 8));
                assert!(matches!(failure.error, SpotError::Fetch { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("us-east-1b"));

        let history = reconciler
            .get_history(&offering(), &window(1, 8), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(history.get(&"us-east-1a".into()).unwrap().len(), 1);
        assert!(history.get(&"us-east-1b".into()).is_none());
    }

    #[tokio::test]
    async fn test_second_reconcile_is_a_no_op() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a", "us-east-1b"])
                .with_page_size(2)
                .with_records(vec![
                    record("us-east-1a", at(2, 0), 0.02),
                    record("us-east-1a", at(3, 0), 0.03),
                    record("us-east-1a", at(4, 0), 0.04),
                    record("us-east-1b", at(6, 0), 0.06),
                ]),
        );

        reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();
        let calls = source.calls().len();
        let count = reconciler.store().count(&offering()).await.unwrap();

        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        assert_eq!(source.calls().len(), calls);
        assert!(report.windows_fetched.is_empty());
        assert_eq!(report.zones_checked.len(), 2);
        assert_eq!(reconciler.store().count(&offering()).await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_zone_without_observations_is_not_refetched() {
        let (reconciler, source) = setup(ScriptedSource::new().with_zone_catalog(["us-east-1c"]));

        reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();
        reconciler.reconcile(&offering(), &window(2, 5)).await.unwrap();

        assert_eq!(source.first_page_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_extending_window_fetches_only_the_new_tail() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_records(vec![record("us-east-1a", at(2, 0), 0.02)]),
        );

        reconciler.reconcile(&offering(), &window(1, 5)).await.unwrap();
        source.push_records(vec![record("us-east-1a", at(6, 0), 0.06)]);
        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        assert_eq!(report.windows_fetched, vec![(Zone::new("us-east-1a"), window(5, 8))]);
        assert_eq!(report.records_inserted, 1);
    }

    #[tokio::test]
    async fn test_cached_zones_used_without_catalog() {
        let (reconciler, source) = setup(
            ScriptedSource::new().with_records(vec![record("us-east-1d", at(7, 0), 0.07)]),
        );
        reconciler
            .store()
            .upsert_many(&offering(), &[record("us-east-1d", at(3, 0), 0.03)])
            .await
            .unwrap();

        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        assert_eq!(report.zones_checked, vec![Zone::new("us-east-1d")]);
        assert!(source.calls().iter().all(|c| c.zone.as_str() == "us-east-1d"));
        assert_eq!(reconciler.store().count(&offering()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_catalog_zone_gets_one_full_fetch() {
        let (reconciler, source) = setup(
            ScriptedSource::new().with_zone_catalog(["us-east-1a", "us-east-1c"]),
        );
        reconciler
            .store()
            .record_synced(&offering(), &"us-east-1a".into(), &window(1, 8))
            .await
            .unwrap();

        reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        let calls = source.first_page_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].zone.as_str(), "us-east-1c");
        assert_eq!(calls[0].window, window(1, 8));
    }

    #[tokio::test]
    async fn test_empty_window_does_nothing() {
        let (reconciler, source) = setup(ScriptedSource::new().with_zone_catalog(["us-east-1a"]));

        let report = reconciler.reconcile(&offering(), &window(3, 3)).await.unwrap();

        assert!(report.zones_checked.is_empty());
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_rejected_before_io() {
        let (reconciler, source) = setup(ScriptedSource::new().with_zone_catalog(["us-east-1a"]));

        let err = reconciler
            .reconcile_range(&offering(), at(8, 0), at(1, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, SpotError::InvalidWindow { .. }));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_half_open_and_honours_exclusions() {
        let (reconciler, _source) = setup(ScriptedSource::new());
        let store = reconciler.store();
        store
            .upsert_many(
                &offering(),
                &[
                    record("us-east-1a", at(1, 0), 0.01),
                    record("us-east-1a", at(2, 0), 0.02),
                    record("us-east-1a", at(3, 0), 0.03),
                    record("us-east-1b", at(5, 0), 0.05),
                    record("us-east-1e", at(2, 0), 9.99),
                ],
            )
            .await
            .unwrap();

        let reconciler = reconciler.with_excluded_zones(["us-east-1e"]);
        let history = reconciler.history(&offering(), &window(1, 3)).await.unwrap();

        let zones: Vec<&str> = history.zones().map(Zone::as_str).collect();
        assert_eq!(zones, vec!["us-east-1a", "us-east-1b"]);
        let series = history.get(&"us-east-1a".into()).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.iter().all(|p| p.timestamp >= at(1, 0) && p.timestamp < at(3, 0)));
        assert!(history.get(&"us-east-1b".into()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_offering_reconciles_are_serialized() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_delay(Duration::from_millis(20))
                .with_records(vec![record("us-east-1a", at(2, 0), 0.02)]),
        );

        let (o, w) = (offering(), window(1, 8));
        let (a, b) = tokio::join!(reconciler.reconcile(&o, &w), reconciler.reconcile(&o, &w));
        a.unwrap();
        b.unwrap();

        assert_eq!(source.first_page_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_offering_locks_are_dropped() {
        let (reconciler, _source) = setup(ScriptedSource::new().with_zone_catalog(["us-east-1a"]));

        reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();
        reconciler
            .reconcile(&OfferingType::new("c4.xlarge"), &window(1, 8))
            .await
            .unwrap();

        let locks = reconciler.locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&OfferingType::new("c4.xlarge")));
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_leaves_nothing_half_synced() {
        let records: Vec<PriceRecord> = (2..7)
            .map(|day| record("us-east-1a", at(day, 0), f64::from(day) / 100.0))
            .collect();
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_page_size(1)
                .with_delay(Duration::from_millis(30))
                .with_records(records),
        );
        let (o, w) = (offering(), window(1, 8));
        let zone = Zone::new("us-east-1a");

        let cancelled =
            tokio::time::timeout(Duration::from_millis(60), reconciler.reconcile(&o, &w)).await;
        assert!(cancelled.is_err());

        let store = reconciler.store();
        assert_eq!(store.count(&o).await.unwrap(), 0);
        assert!(store.synced_extent(&o, &zone).await.unwrap().is_none());

        let report = reconciler.reconcile(&o, &w).await.unwrap();
        assert_eq!(report.windows_fetched, vec![(zone.clone(), w)]);
        assert_eq!(source.first_page_calls().len(), 2);
        assert_eq!(store.count(&o).await.unwrap(), 5);
        assert_eq!(
            store.synced_extent(&o, &zone).await.unwrap(),
            Some(Coverage::from(w))
        );
    }

    #[tokio::test]
    async fn test_disjoint_windows_leave_no_hole() {
        let (reconciler, source) = setup(
            ScriptedSource::new()
                .with_zone_catalog(["us-east-1a"])
                .with_records(vec![
                    record("us-east-1a", at(1, 12), 0.01),
                    record("us-east-1a", at(5, 0), 0.05),
                    record("us-east-1a", at(11, 0), 0.11),
                ]),
        );
        let zone = Zone::new("us-east-1a");

        reconciler.reconcile(&offering(), &window(1, 2)).await.unwrap();
        let report = reconciler.reconcile(&offering(), &window(10, 12)).await.unwrap();
        assert_eq!(report.windows_fetched, vec![(zone.clone(), window(2, 12))]);

        let calls = source.first_page_calls().len();
        let report = reconciler.reconcile(&offering(), &window(4, 6)).await.unwrap();
        assert!(report.windows_fetched.is_empty());
        assert_eq!(source.first_page_calls().len(), calls);

        let history = reconciler
            .get_history(&offering(), &window(4, 6), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(
            history.get(&zone).unwrap(),
            &[PricePoint { timestamp: at(5, 0), price: 0.05 }]
        );
    }

    #[derive(Debug, Default)]
    struct GaugedSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObservationSource for GaugedSource {
        fn name(&self) -> &str {
            "gauged"
        }

        async fn list_observations(
            &self,
            _offering: &OfferingType,
            _zone: &Zone,
            _window: &TimeWindow,
            _token: Option<&str>,
        ) -> Result<ObservationPage> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ObservationPage::last(Vec::new()))
        }

        async fn list_zones(&self) -> Result<Vec<Zone>> {
            Ok((b'a'..=b'f').map(|c| Zone::new(format!("us-east-1{}", c as char))).collect())
        }
    }

    #[tokio::test]
    async fn test_fetch_pool_is_bounded() {
        let source = Arc::new(GaugedSource::default());
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()), source.clone())
            .with_max_concurrent_fetches(2);

        let report = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap();

        assert_eq!(report.windows_fetched.len(), 6);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
        assert!(source.peak.load(Ordering::SeqCst) >= 1);
    }

    #[derive(Debug)]
    struct BrokenCatalog;

    #[async_trait]
    impl ObservationSource for BrokenCatalog {
        fn name(&self) -> &str {
            "broken"
        }

        async fn list_observations(
            &self,
            _offering: &OfferingType,
            _zone: &Zone,
            _window: &TimeWindow,
            _token: Option<&str>,
        ) -> Result<ObservationPage> {
            Ok(ObservationPage::last(Vec::new()))
        }

        async fn list_zones(&self) -> Result<Vec<Zone>> {
            Err(SpotError::Network("catalog unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_is_returned() {
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()), Arc::new(BrokenCatalog));

        let err = reconciler.reconcile(&offering(), &window(1, 8)).await.unwrap_err();

        assert!(matches!(err, SpotError::Network(_)));
    }
}
