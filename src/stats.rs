//! ==============================================================================
//! stats.rs - read side: live reading, statistics, chart/table views
//! ==============================================================================
//!
//! purpose:
//!     the calls the presentation layer makes. everything here reads through
//!     one AggregationEngine call per request so the chart and the table
//!     shown together always come from the same snapshot.
//!
//! relationships:
//!     - used by: api.rs (http handlers)
//!     - uses: aggregate.rs, store.rs
//!
//! ==============================================================================

use std::net::SocketAddr;

use serde::Serialize;

use crate::aggregate::AggregationEngine;
use crate::config::StatisticsConfig;
use crate::domain::{AggregatedSample, Reading};
use crate::error::ApiError;
use crate::store::SharedStore;

pub const MSG_SAMPLES: &str = "Latest historical readings (1-minute samples).";
pub const MSG_NO_HISTORY: &str = "No historical data available yet.";
pub const MSG_NO_READINGS: &str = "No readings found yet.";

/// the two presentation orders of one aggregation result
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct StatisticsView {
    /// oldest first
    pub chart: Vec<AggregatedSample>,
    /// newest first
    pub table: Vec<AggregatedSample>,
}

impl StatisticsView {
    pub fn from_samples(ascending: Vec<AggregatedSample>) -> Self {
        let table = ascending.iter().rev().cloned().collect();
        Self { chart: ascending, table }
    }
}

#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct StatisticsReport {
    pub message: String,
    pub count: usize,
    /// ascending by timestamp
    pub data: Vec<AggregatedSample>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LiveReading {
    Latest(Reading),
    NoReadings,
}

/// everything the dashboard page renders in one go
#[derive(Clone, Serialize, Debug)]
pub struct DashboardSnapshot {
    /// where devices should connect, "ip:port"
    pub device_endpoint: SocketAddr,
    pub latest: Option<Reading>,
    pub statistics: StatisticsView,
}

#[derive(Clone)]
pub struct ReadApi {
    engine: Option<AggregationEngine>,
    history_minutes: usize,
}

impl ReadApi {
    pub fn new(store: Option<SharedStore>, config: &StatisticsConfig) -> Self {
        Self {
            engine: store.map(|store| {
                AggregationEngine::new(store).with_lookback_buffer(config.lookback_buffer_minutes)
            }),
            history_minutes: config.history_minutes,
        }
    }

    pub fn store_connected(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<&AggregationEngine, ApiError> {
        self.engine.as_ref().ok_or(ApiError::StoreUnavailable)
    }

    pub fn get_live_reading(&self) -> Result<LiveReading, ApiError> {
        Ok(match self.engine()?.store().latest()? {
            Some(reading) => LiveReading::Latest(reading),
            None => LiveReading::NoReadings,
        })
    }

    /// `limit` defaults to the configured history length
    pub fn get_statistics(&self, limit: Option<usize>) -> Result<StatisticsReport, ApiError> {
        let engine = self.engine()?;
        let limit = limit.unwrap_or(self.history_minutes);
        let data = engine.aggregate(limit)?;

        let message = if !data.is_empty() {
            MSG_SAMPLES.to_string()
        } else if engine.store().count()? > 0 {
            format!(
                "No minute-aligned data in the last {} minutes. \
                 Please ensure the sensor is sending data.",
                limit
            )
        } else {
            MSG_NO_HISTORY.to_string()
        };

        Ok(StatisticsReport { message, count: data.len(), data })
    }

    pub fn dashboard(&self, device_endpoint: SocketAddr) -> Result<DashboardSnapshot, ApiError> {
        let engine = self.engine()?;
        Ok(DashboardSnapshot {
            device_endpoint,
            latest: engine.store().latest()?,
            statistics: StatisticsView::from_samples(engine.aggregate(self.history_minutes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ReadingStore, SqliteStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn reading(temperature: f64, minutes_ago: i64) -> Reading {
        Reading {
            temperature,
            humidity: 47.2,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            client_ip: "10.0.0.9".to_string(),
            client_port: 6000,
        }
    }

    fn api_with(readings: Vec<Reading>) -> ReadApi {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for r in readings {
            store.insert(r).unwrap();
        }
        ReadApi::new(Some(store), &StatisticsConfig::default())
    }

    #[test]
    fn test_empty_store_is_not_an_error() {
        let api = api_with(Vec::new());

        let report = api.get_statistics(None).unwrap();
        assert_eq!(report.count, 0);
        assert_eq!(report.message, MSG_NO_HISTORY);
        assert!(report.data.is_empty());

        assert_eq!(api.get_live_reading().unwrap(), LiveReading::NoReadings);
    }

    #[test]
    fn test_stale_store_reports_empty_window() {
        let api = api_with(vec![reading(20.0, 24 * 60)]);

        let report = api.get_statistics(None).unwrap();
        assert_eq!(report.count, 0);
        assert!(report.message.starts_with("No minute-aligned data"));
    }

    #[test]
    fn test_statistics_and_live_reading() {
        let api = api_with(vec![reading(20.0, 3), reading(21.0, 2), reading(21.5, 0)]);

        let report = api.get_statistics(None).unwrap();
        assert_eq!(report.message, MSG_SAMPLES);
        assert_eq!(report.count, report.data.len());
        assert!(report.count >= 2);
        assert_eq!(report.data.last().unwrap().temperature, 21.5);

        match api.get_live_reading().unwrap() {
            LiveReading::Latest(r) => assert_eq!(r.temperature, 21.5),
            LiveReading::NoReadings => panic!("expected a reading"),
        }
    }

    #[test]
    fn test_table_is_reversed_chart() {
        let api = api_with(vec![reading(1.0, 5), reading(2.0, 3), reading(3.0, 1)]);
        let endpoint: SocketAddr = "192.168.1.10:5500".parse().unwrap();
        let snapshot = api.dashboard(endpoint).unwrap();

        assert_eq!(snapshot.device_endpoint, endpoint);

        let mut reversed = snapshot.statistics.chart.clone();
        reversed.reverse();
        assert_eq!(snapshot.statistics.table, reversed);
        assert_eq!(snapshot.statistics.table.first().unwrap().temperature, 3.0);
        assert_eq!(snapshot.latest.unwrap().temperature, 3.0);
    }

    #[test]
    fn test_unavailable_store() {
        let api = ReadApi::new(None, &StatisticsConfig::default());
        assert!(!api.store_connected());
        assert!(matches!(api.get_statistics(None), Err(ApiError::StoreUnavailable)));
        assert!(matches!(api.get_live_reading(), Err(ApiError::StoreUnavailable)));
    }
}
