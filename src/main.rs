//! ==============================================================================
//! main.rs - sensor ingest entry point
//! ==============================================================================
//!
//! responsibilities:
//!     - load configuration (first cli argument, or config/ingest.toml)
//!     - install the log subscriber
//!     - open the reading store (degrades to "not connected" on failure)
//!     - serve the read api in the background
//!     - run the device listener until it fails
//!
//! ==============================================================================

use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensor_ingest::api::{self, ApiState};
use sensor_ingest::{store, IngestConfig, IngestionListener, ReadApi};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Sensor Ingest - temperature/humidity telemetry server");
    println!("===========================================================");

    // step 1: load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = IngestConfig::load_or_default(config_path.as_deref());

    // step 2: logging, RUST_LOG wins over the config level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.print_summary();

    // step 3: persistence
    let store = store::open_store(&config.store);
    if store.is_none() {
        info!("ingestion will acknowledge readings without saving them");
    }

    // step 4: bind the device listener
    let bound = IngestionListener::bind(
        &config.listener,
        store.clone(),
        config.logging.show_sensor_data,
    )
    .await;
    let listener = match bound {
        Ok(listener) => listener,
        Err(e) => {
            error!("fatal: {:#}", e);
            return Err(e);
        }
    };
    let device_endpoint = listener.device_endpoint()?;
    info!(endpoint = %device_endpoint, "devices connect here");

    // step 5: read api in background
    if config.api.enabled {
        let state = ApiState {
            read_api: ReadApi::new(store, &config.statistics),
            registry: listener.registry(),
            device_endpoint,
        };
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = api::run_server(&bind, state).await {
                error!("read api error: {:#}", e);
            }
        });
    }

    // step 6: accept devices until the listener fails
    if let Err(e) = listener.run().await {
        error!("fatal: {:#}", e);
        return Err(e);
    }
    Ok(())
}
