//! Gap computation between a requested window and a cached extent.
//!
//! The cached extent of a zone is assumed to be contiguous: everything between
//! its earliest and latest timestamp counts as cached. Only leading and
//! trailing gaps are detected; holes inside the extent are not.

use crate::types::{Coverage, TimeWindow};

/// Returns the sub-windows of `requested` not covered by `cached`.
///
/// Windows come back in chronological order and are never empty. An empty
/// `requested` window yields no gaps.
#[must_use]
pub fn missing_windows(requested: TimeWindow, cached: Option<Coverage>) -> Vec<TimeWindow> {
    if requested.is_empty() {
        return Vec::new();
    }

    let Some(cached) = cached else {
        return vec![requested];
    };

    if cached.earliest <= requested.start() && cached.latest >= requested.end() {
        return Vec::new();
    }

    let mut gaps = Vec::with_capacity(2);

    // Gaps run up to the cached extent even when the request lies wholly
    // outside it, so the extent stays contiguous once they are merged.
    if requested.start() < cached.earliest {
        push_non_empty(&mut gaps, requested.start(), cached.earliest);
    }

    if cached.latest < requested.end() {
        push_non_empty(&mut gaps, cached.latest, requested.end());
    }

    gaps
}

fn push_non_empty(
    gaps: &mut Vec<TimeWindow>,
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
) {
    match TimeWindow::new(start, end) {
        Ok(window) if !window.is_empty() => gaps.push(window),
        _ => {}
    }
}
