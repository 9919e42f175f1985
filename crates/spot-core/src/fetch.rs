//! Paginating fetch client.
//!
//! [`FetchClient`] pulls every observation for one (offering, zone, window)
//! triple from an [`ObservationSource`], following continuation tokens until
//! the source reports no further pages.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    error::{Result, SpotError},
    source::ObservationSource,
    types::{OfferingType, PriceRecord, TimeWindow, Zone},
};

/// Default upper bound on pages followed for a single triple.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Client that drains a paginated listing for one triple.
///
/// There is no retry inside the client; any failure is returned as
/// [`SpotError::Fetch`] naming the triple.
#[derive(Debug, Clone)]
pub struct FetchClient {
    source: Arc<dyn ObservationSource>,
    max_pages: usize,
}

impl FetchClient {
    /// Create a client over a source.
    #[must_use]
    pub fn new(source: Arc<dyn ObservationSource>) -> Self {
        Self {
            source,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Set the maximum number of pages followed before giving up.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ObservationSource> {
        &self.source
    }

    /// Fetches every observation of `offering` in `zone` over `window`.
    ///
    /// Records for other offerings or zones returned by the source are dropped.
    ///
    /// # Errors
    /// Returns [`SpotError::Fetch`] wrapping the source error on transport or
    /// token failures, when a token repeats, or when the page limit is exceeded.
    #[instrument(skip(self), fields(source = self.source.name(), offering = %offering, zone = %zone, window = %window))]
    pub async fn fetch(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<Vec<PriceRecord>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let fail = |e: SpotError| SpotError::fetch(offering, zone, *window, e);

        let mut records = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if pages == self.max_pages {
                return Err(fail(SpotError::InvalidToken(format!(
                    "gave up after {pages} pages"
                ))));
            }

            let page = self
                .source
                .list_observations(offering, zone, window, token.as_deref())
                .await
                .map_err(fail)?;
            pages += 1;

            debug!("Fetched {} observations on page {}", page.records.len(), pages);

            let next = page.next_token().map(str::to_string);
            records.extend(page.records);

            match next {
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(fail(SpotError::InvalidToken(format!(
                            "token {next} returned twice"
                        ))));
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        let before = records.len();
        records.retain(|r| &r.offering == offering && &r.zone == zone);
        if records.len() < before {
            warn!(
                "Dropped {} observations outside {} / {}",
                before - records.len(),
                offering,
                zone
            );
        }

        debug!("Fetched {} observations in {} pages", records.len(), pages);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use crate::types::ObservationPage;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 12, day)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn record(zone: &str, ts: NaiveDateTime, price: f64) -> PriceRecord {
        PriceRecord::new("m4.large".into(), zone.into(), ts, price).unwrap()
    }

    #[tokio::test]
    async fn test_follows_pagination_until_exhausted() {
        let source = ScriptedSource::new().with_page_size(2).with_records(
            (1..=7)
                .map(|d| record("us-east-1a", at(d, 12), 0.01 * f64::from(d)))
                .collect(),
        );
        let source = Arc::new(source);
        let client = FetchClient::new(source.clone());
        let window = TimeWindow::new(at(1, 0), at(8, 0)).unwrap();

        let records = client
            .fetch(&"m4.large".into(), &"us-east-1a".into(), &window)
            .await
            .unwrap();

        assert_eq!(records.len(), 7);
        // 7 records, 2 per page
        assert_eq!(source.calls().len(), 4);
        assert_eq!(source.calls()[0].token, None);
        assert!(source.calls()[1].token.is_some());
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_call() {
        let source = Arc::new(ScriptedSource::new());
        let client = FetchClient::new(source.clone());
        let window = TimeWindow::new(at(3, 0), at(3, 0)).unwrap();

        let records = client
            .fetch(&"m4.large".into(), &"us-east-1a".into(), &window)
            .await
            .unwrap();

        assert!(records.is_empty());
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_names_triple() {
        let source = ScriptedSource::new().failing_zone("us-east-1b");
        let client = FetchClient::new(Arc::new(source));
        let window = TimeWindow::new(at(1, 0), at(2, 0)).unwrap();

        let err = client
            .fetch(&"m4.large".into(), &"us-east-1b".into(), &window)
            .await
            .unwrap_err();

        match err {
            SpotError::Fetch { zone, offering, .. } => {
                assert_eq!(zone.as_str(), "us-east-1b");
                assert_eq!(offering.as_str(), "m4.large");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Debug)]
    struct LoopingSource;

    #[async_trait]
    impl ObservationSource for LoopingSource {
        fn name(&self) -> &str {
            "looping"
        }

        async fn list_observations(
            &self,
            _offering: &OfferingType,
            _zone: &Zone,
            _window: &TimeWindow,
            _token: Option<&str>,
        ) -> Result<ObservationPage> {
            Ok(ObservationPage::new(Vec::new(), Some("same".to_string())))
        }
    }

    #[tokio::test]
    async fn test_repeated_token_is_rejected() {
        let client = FetchClient::new(Arc::new(LoopingSource));
        let window = TimeWindow::new(at(1, 0), at(2, 0)).unwrap();

        let err = client
            .fetch(&"m4.large".into(), &"us-east-1a".into(), &window)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SpotError::Fetch { ref source, .. } if matches!(**source, SpotError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_records_are_dropped() {
        #[derive(Debug)]
        struct Chatty;

        #[async_trait]
        impl ObservationSource for Chatty {
            fn name(&self) -> &str {
                "chatty"
            }

            async fn list_observations(
                &self,
                _offering: &OfferingType,
                _zone: &Zone,
                _window: &TimeWindow,
                _token: Option<&str>,
            ) -> Result<ObservationPage> {
                Ok(ObservationPage::last(vec![
                    record("us-east-1a", at(1, 1), 0.1),
                    record("us-east-1c", at(1, 2), 0.2),
                ]))
            }
        }

        let client = FetchClient::new(Arc::new(Chatty));
        let window = TimeWindow::new(at(1, 0), at(2, 0)).unwrap();
        let records = client
            .fetch(&"m4.large".into(), &"us-east-1a".into(), &window)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].zone.as_str(), "us-east-1a");
    }
}
