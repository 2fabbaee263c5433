//! ==============================================================================
//! aggregate.rs - minute-granular downsampling of raw readings
//! ==============================================================================
//!
//! pipeline:
//!
//! ```text
//!     scan(ts >= now - (limit + buffer) min)
//!         └─► group by local calendar minute, newest reading wins
//!             └─► newest `limit` minutes
//!                 └─► ascending by timestamp
//! ```
//!
//! the buffer lets sparse or irregular reporting still fill `limit`
//! buckets. samples are recomputed on every call and never cached, so two
//! calls with no insert in between return the same sequence.
//!
//! within a minute the reading with the latest receipt timestamp wins.
//! equal timestamps fall back to scan order, later beats earlier.
//!
//! ==============================================================================

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{AggregatedSample, MinuteBucket, Reading};
use crate::error::StoreError;
use crate::store::SharedStore;

pub const DEFAULT_LOOKBACK_BUFFER_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct AggregationEngine {
    store: SharedStore,
    lookback_buffer_minutes: i64,
}

impl AggregationEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store, lookback_buffer_minutes: DEFAULT_LOOKBACK_BUFFER_MINUTES }
    }

    pub fn with_lookback_buffer(mut self, minutes: i64) -> Self {
        self.lookback_buffer_minutes = minutes.max(0);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// at most `limit` one-per-minute samples, oldest first
    pub fn aggregate(&self, limit: usize) -> Result<Vec<AggregatedSample>, StoreError> {
        self.aggregate_at(limit, Utc::now())
    }

    pub fn aggregate_at(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<AggregatedSample>, StoreError> {
        let readings = self.store.scan_since(self.threshold(limit, now))?;
        Ok(collapse_by_minute(&readings, limit))
    }

    fn threshold(&self, limit: usize, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(limit)
            .ok()
            .and_then(|l| l.checked_add(self.lookback_buffer_minutes))
            .and_then(Duration::try_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// group readings by local minute and keep the newest `limit` minutes
///
/// ties on timestamp are broken by position in `readings`, later wins.
pub fn collapse_by_minute(readings: &[Reading], limit: usize) -> Vec<AggregatedSample> {
    let mut winners: HashMap<MinuteBucket, &Reading> = HashMap::new();
    for reading in readings {
        winners
            .entry(MinuteBucket::of(&reading.timestamp))
            .and_modify(|current| {
                if reading.timestamp >= current.timestamp {
                    *current = reading;
                }
            })
            .or_insert(reading);
    }

    let mut newest_first: Vec<&Reading> = winners.into_values().collect();
    newest_first.sort_by_key(|r| Reverse(r.timestamp));
    newest_first.truncate(limit);

    newest_first.iter().rev().map(|r| AggregatedSample::from_reading(r)).collect()
}
