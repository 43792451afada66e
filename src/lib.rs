//! ==============================================================================
//! sensor-node - a single-board monitoring node
//! ==============================================================================
//!
//! polls temperature / humidity sensors, shows the latest values on a small
//! i2c display and serves them as json over http. every task runs on one
//! thread under a cooperative scheduler.
//!
//! modules:
//!     - config: configuration schema and loader
//!     - node: turns a config into a ready-to-run scheduler
//!     - runtime: scheduler, Task trait, supervision
//!     - store: latest reading per sensor
//!     - sensor: sensor kinds, sysfs drivers, polling task
//!     - display: display backends, formatting, renderer task
//!     - httpd: http/1.0 json responder
//!     - hal: i2c bus (rppal or mock)
//!
//! ==============================================================================

pub mod config;
pub mod display;
pub mod domain;
pub mod error;
pub mod hal;
pub mod httpd;
pub mod node;
pub mod runtime;
pub mod sensor;
pub mod store;
