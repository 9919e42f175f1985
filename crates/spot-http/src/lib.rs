#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/spot/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP observation source.
//!
//! This crate provides an [`ObservationSource`] over an HTTP/JSON price
//! history service.
//!
//! # Features
//!
//! - Paginated spot price listing with continuation tokens
//! - Zone catalog lookup
//! - Built-in rate limiting (disabled by default)
//! - RFC 3339 timestamps normalised to naive UTC
//!
//! # Example
//!
//! ```no_run
//! use spot_http::HttpObservationSource;
//! use spot_core::{ObservationSource, TimeWindow};
//! use chrono::NaiveDate;
//!
//! # async fn example() -> spot_core::Result<()> {
//! let source = HttpObservationSource::new("http://localhost:8080")?;
//! let start = NaiveDate::from_ymd_opt(2016, 12, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let end = NaiveDate::from_ymd_opt(2016, 12, 8).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let window = TimeWindow::new(start, end)?;
//!
//! let page = source
//!     .list_observations(&"m4.large".into(), &"us-east-1a".into(), &window, None)
//!     .await?;
//! println!("Fetched {} observations", page.records.len());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::Deserialize;
use spot_core::{
    HttpSourceConfig, ObservationPage, ObservationSource, OfferingType, PriceRecord, Result,
    SpotError, TimeWindow, Zone, config::DEFAULT_PRODUCT_DESCRIPTION, types::to_second,
};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Price listing endpoint, relative to the base URL.
const HISTORY_PATH: &str = "spot-price-history";

/// Zone catalog endpoint, relative to the base URL.
const ZONES_PATH: &str = "availability-zones";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Source name reported in errors and logs.
const SOURCE_NAME: &str = "HTTP spot price history";

/// HTTP/JSON observation source.
///
/// Implements [`ObservationSource`].
#[derive(Debug)]
pub struct HttpObservationSource {
    client: reqwest::Client,
    base_url: String,
    product_description: String,
    page_size: Option<u32>,
    rate_limit_ms: u64,
    last_request_time: AtomicU64,
}

impl HttpObservationSource {
    /// Create a source for a base URL with default settings.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::from_config(&HttpSourceConfig {
            base_url: base_url.into(),
            ..HttpSourceConfig::default()
        })
    }

    /// Create a source from configuration.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &HttpSourceConfig) -> Result<Self> {
        config.validate()?;
        let timeout = if config.timeout_secs == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            config.timeout_secs
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| SpotError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            product_description: config.product_description.clone(),
            page_size: config.page_size,
            rate_limit_ms: config.rate_limit_ms,
            last_request_time: AtomicU64::new(0),
        })
    }

    /// Create a source with a custom HTTP client.
    ///
    /// Uses the provided client for all HTTP requests; no rate limiting is applied.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
            page_size: None,
            rate_limit_ms: 0,
            last_request_time: AtomicU64::new(0),
        }
    }

    /// Set the minimum delay between requests.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit_ms = u64::try_from(rate_limit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the maximum number of records requested per page.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    fn now_ms() -> u64 {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self) {
        if self.rate_limit_ms == 0 {
            return;
        }

        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = Self::now_ms().saturating_sub(last);

        if elapsed < self.rate_limit_ms {
            let wait_time = self.rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            sleep(Duration::from_millis(wait_time)).await;
        }

        self.last_request_time.store(Self::now_ms(), Ordering::Relaxed);
    }

    fn format_time(ts: NaiveDateTime) -> String {
        ts.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Query parameters for one page of a listing.
    fn history_query(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
        token: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("InstanceType", offering.to_string()),
            ("AvailabilityZone", zone.to_string()),
            ("ProductDescription", self.product_description.clone()),
            ("StartTime", Self::format_time(window.start())),
            ("EndTime", Self::format_time(window.end())),
        ];
        if let Some(page_size) = self.page_size {
            query.push(("MaxResults", page_size.to_string()));
        }
        if let Some(token) = token {
            query.push(("NextToken", token.to_string()));
        }
        query
    }

    /// Map a non-success status to an error.
    fn status_error(status: reqwest::StatusCode, token: Option<&str>, what: &str) -> SpotError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return SpotError::RateLimited {
                source_name: SOURCE_NAME.to_string(),
                retry_after: Some(Duration::from_secs(1)),
            };
        }
        match token {
            Some(token) if status == reqwest::StatusCode::BAD_REQUEST => {
                SpotError::InvalidToken(format!("{token} rejected with HTTP {status}"))
            }
            _ => SpotError::Network(format!("HTTP {status} for {what}")),
        }
    }

    /// Parse a listing response into a page.
    fn parse_history_response(response: HistoryResponse) -> Result<ObservationPage> {
        let mut records = Vec::with_capacity(response.spot_price_history.len());
        for entry in response.spot_price_history {
            let timestamp = DateTime::parse_from_rfc3339(&entry.timestamp)
                .map_err(|e| SpotError::Parse(format!("Invalid timestamp {:?}: {e}", entry.timestamp)))?
                .naive_utc();
            let price = entry
                .spot_price
                .trim()
                .parse::<f64>()
                .map_err(|e| SpotError::Parse(format!("Invalid price {:?}: {e}", entry.spot_price)))?;

            records.push(PriceRecord::new(
                OfferingType::new(entry.instance_type),
                Zone::new(entry.availability_zone),
                to_second(timestamp),
                price,
            )?);
        }

        Ok(ObservationPage::new(records, response.next_token))
    }
}

#[async_trait]
impl ObservationSource for HttpObservationSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(skip(self, window), fields(offering = %offering, zone = %zone, has_token = continuation_token.is_some()))]
    async fn list_observations(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
        continuation_token: Option<&str>,
    ) -> Result<ObservationPage> {
        self.apply_rate_limit().await;

        let url = format!("{}/{}", self.base_url, HISTORY_PATH);
        debug!("Fetching spot price history: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&self.history_query(offering, zone, window, continuation_token))
            .send()
            .await
            .map_err(|e| SpotError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err = Self::status_error(status, continuation_token, &format!("{offering} in {zone}"));
            warn!("Spot price listing failed: {}", err);
            return Err(err);
        }

        let body = response
            .json::<HistoryResponse>()
            .await
            .map_err(|e| SpotError::Parse(e.to_string()))?;

        Self::parse_history_response(body)
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.apply_rate_limit().await;

        let url = format!("{}/{}", self.base_url, ZONES_PATH);
        debug!("Fetching zone catalog: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SpotError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::NOT_IMPLEMENTED {
            return Err(SpotError::NotSupported(format!(
                "{SOURCE_NAME} has no zone catalog at {url}"
            )));
        }
        if !status.is_success() {
            return Err(Self::status_error(status, None, "zone catalog"));
        }

        let body = response
            .json::<ZonesResponse>()
            .await
            .map_err(|e| SpotError::Parse(e.to_string()))?;

        Ok(body
            .availability_zones
            .into_iter()
            .map(|z| Zone::new(z.zone_name))
            .collect())
    }
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryResponse {
    #[serde(default)]
    spot_price_history: Vec<HistoryEntry>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryEntry {
    availability_zone: String,
    instance_type: String,
    spot_price: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZonesResponse {
    #[serde(default)]
    availability_zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZoneEntry {
    zone_name: String,
}
