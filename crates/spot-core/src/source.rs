//! Remote observation source trait.
//!
//! This module defines [`ObservationSource`], the capability the cache consumes
//! to list price observations page by page and to discover zones.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::{Result, SpotError},
    types::{ObservationPage, OfferingType, TimeWindow, Zone},
};

/// Paginated source of price observations.
///
/// Implementations return one page per call. A page may hold any number of
/// records and carries a continuation token when more pages follow.
#[async_trait]
pub trait ObservationSource: Send + Sync + Debug {
    /// Returns the name of this source (e.g. "EC2 spot price history").
    fn name(&self) -> &str;

    /// Lists one page of observations for an offering in a zone.
    ///
    /// `continuation_token` is `None` for the first page and the token of the
    /// previous page afterwards.
    async fn list_observations(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
        continuation_token: Option<&str>,
    ) -> Result<ObservationPage>;

    /// Lists every zone the source knows about.
    ///
    /// The default implementation reports [`SpotError::NotSupported`], in which
    /// case callers fall back to the zones already cached.
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Err(SpotError::NotSupported(format!(
            "{} does not publish a zone catalog",
            self.name()
        )))
    }
}
