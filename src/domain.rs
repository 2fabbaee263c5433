use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// display format for sample timestamps (day-month-year, 24h clock)
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// one persisted sensor reading
/// immutable once written; timestamp is assigned by the server at receipt
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Reading {
    /// temperature in device-reported units
    pub temperature: f64,
    /// relative humidity (0-100%)
    pub humidity: f64,
    /// receipt time
    pub timestamp: DateTime<Utc>,
    /// peer ip of the reporting device
    pub client_ip: String,
    /// peer port of the reporting device
    pub client_port: u16,
}

impl Reading {
    pub fn received_now(
        temperature: f64,
        humidity: f64,
        client_ip: String,
        client_port: u16,
    ) -> Self {
        Self {
            temperature,
            humidity,
            timestamp: Utc::now(),
            client_ip,
            client_port,
        }
    }
}

/// calendar minute in the server's local time zone
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteBucket {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl MinuteBucket {
    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        let local = timestamp.with_timezone(&Local);
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }
}

/// one-per-minute view of the readings, derived on every query and never stored
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct AggregatedSample {
    #[serde(rename = "_id")]
    pub bucket: MinuteBucket,
    pub temperature: f64,
    pub humidity: f64,
    /// raw receipt timestamp of the reading that won the minute
    pub timestamp: DateTime<Utc>,
    pub timestamp_formatted: String,
    pub client_ip: String,
}

impl AggregatedSample {
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            bucket: MinuteBucket::of(&reading.timestamp),
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.timestamp,
            timestamp_formatted: reading
                .timestamp
                .with_timezone(&Local)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            client_ip: reading.client_ip.clone(),
        }
    }
}
