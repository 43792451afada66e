//! ==============================================================================
//! main.rs - sensor node entry point
//! ==============================================================================
//!
//! purpose:
//!     loads the configuration, sets up logging, builds the task set and
//!     runs it until ctrl-c.
//!
//! usage:
//!     sensor-node [path/to/config.json|node.toml]
//!
//!     without an argument the default search paths in config.rs are tried.
//!     RUST_LOG overrides `logging.level` from the file.
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │            one thread, tokio current_thread + LocalSet    │
//!     │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │  │ SensorTask  │   │ DisplayRen-  │   │ HttpResponder│   │
//!     │  │ (per sensor)│   │ derer (2s)   │   │ (accept loop)│   │
//!     │  └──────┬──────┘   └──────┬───────┘   └──────┬───────┘   │
//!     │         │ set             │ snapshot         │ snapshot  │
//!     │         └─────────────────┼──────────────────┘           │
//!     │                    ┌──────┴──────┐                       │
//!     │                    │    store    │ <- store.rs            │
//!     │                    └─────────────┘                       │
//!     └──────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use sensor_node::config::NodeConfig;
use sensor_node::node;
use sensor_node::store::SharedStateStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Sensor Node");
    println!("  sensors -> store -> display + http");
    println!("===========================================================");

    // step 1: load configuration
    let config = match std::env::args_os().nth(1) {
        Some(path) => NodeConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.to_string_lossy()))?,
        None => NodeConfig::load_or_default(),
    };
    config.print_summary();

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid logging.level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: build every task around one store
    let store = SharedStateStore::new();
    let node = node::assemble(&config, &store)?;
    if node.scheduler.is_empty() {
        tracing::warn!("nothing configured, the node will sit idle");
    }
    if let Some(addr) = node.http_addr {
        println!("[STARTUP] ✓ Readings served at http://{addr}/");
    }
    println!("[STARTUP] ✓ {} task(s) registered", node.scheduler.len());
    println!("────────────────────────────────────────────────────────────");

    // step 4: run until ctrl-c
    node.scheduler.run().await
}
