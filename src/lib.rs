//! ==============================================================================
//! sensor_ingest - device telemetry ingestion and minute statistics
//! ==============================================================================
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                        sensor-ingest                         │
//!     │  ┌──────────────────┐              ┌──────────────────────┐  │
//!     │  │ listener (:5500) │              │   read api (:3000)   │  │
//!     │  │  task/connection │              │  live / statistics   │  │
//!     │  └────────┬─────────┘              └──────────┬───────────┘  │
//!     │           │ session                           │ stats        │
//!     │     ┌─────┴──────┐                     ┌──────┴──────┐       │
//!     │     │  protocol  │                     │  aggregate  │       │
//!     │     └─────┬──────┘                     └──────┬──────┘       │
//!     │           │ insert                      scan  │              │
//!     │           └──────────────┬────────────────────┘              │
//!     │                    ┌─────┴─────┐                             │
//!     │                    │   store   │  sqlite (file | memory)     │
//!     │                    └───────────┘                             │
//!     └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ==============================================================================

pub mod aggregate;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stats;
pub mod store;

pub use aggregate::AggregationEngine;
pub use config::IngestConfig;
pub use domain::{AggregatedSample, Reading};
pub use listener::IngestionListener;
pub use registry::ConnectionRegistry;
pub use stats::{ReadApi, StatisticsView};
pub use store::{ReadingStore, SharedStore, SqliteStore};
