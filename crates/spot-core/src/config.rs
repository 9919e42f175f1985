//! Configuration for stores, sources and the reconciler.
//!
//! Everything a component needs is passed to its constructor; there are no
//! process-wide defaults beyond the [`Default`] impls below.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SpotError},
    types::Zone,
};

/// Default table holding price records.
pub const DEFAULT_TABLE: &str = "spot_price_history";

/// Default number of zone fetches in flight at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Default product description sent to the remote source.
pub const DEFAULT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

/// Top-level configuration.
///
/// ```toml
/// [cache]
/// path = "cache/spot.db"
///
/// [reconcile]
/// max_concurrent_fetches = 8
/// exclude_zones = ["us-east-1e"]
///
/// [http]
/// base_url = "http://localhost:8080"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotConfig {
    /// Local cache settings.
    pub cache: CacheConfig,
    /// Reconciliation settings.
    pub reconcile: ReconcileConfig,
    /// Remote HTTP source settings.
    pub http: HttpSourceConfig,
}

impl SpotConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] on syntax errors or invalid values.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SpotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SpotError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.reconcile.validate()?;
        self.http.validate()
    }
}

/// Local cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file; `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    /// Table holding price records. The sync ledger lives in `<table>_synced`.
    pub table: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl CacheConfig {
    /// Cache stored in the given file.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Checks that the table name is a plain SQL identifier.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] for anything else.
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.table.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(SpotError::Config(format!(
                "table name {:?} is not a plain identifier",
                self.table
            )))
        }
    }
}

/// Reconciliation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Zone fetches allowed in flight at once.
    pub max_concurrent_fetches: usize,
    /// Zones dropped from history queries by default (known-anomalous zones).
    pub exclude_zones: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            exclude_zones: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    /// The configured exclusions as zones.
    #[must_use]
    pub fn excluded_zones(&self) -> HashSet<Zone> {
        self.exclude_zones.iter().map(Zone::new).collect()
    }

    /// Checks the pool size.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] if no fetch may run.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(SpotError::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remote HTTP source settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceConfig {
    /// Base URL of the price history service.
    pub base_url: String,
    /// Product description filter.
    pub product_description: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum records requested per page; `None` lets the service decide.
    pub page_size: Option<u32>,
    /// Minimum delay between requests, in milliseconds.
    pub rate_limit_ms: u64,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
            timeout_secs: 30,
            page_size: None,
            rate_limit_ms: 0,
        }
    }
}

impl HttpSourceConfig {
    /// Checks the URL scheme and page size.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] on an unusable value.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SpotError::Config(format!(
                "base_url {:?} must be an http(s) URL",
                self.base_url
            )));
        }
        if self.page_size == Some(0) {
            return Err(SpotError::Config("page_size must be positive".to_string()));
        }
        Ok(())
    }
}
