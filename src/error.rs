//! ==============================================================================
//! error.rs - error taxonomy for the node
//! ==============================================================================
//!
//! purpose:
//!     typed errors for the four failure families of the node. task
//!     boundaries wrap these in anyhow so the supervisor can log the
//!     whole chain.
//!
//! relationships:
//!     - ConfigError: config.rs, node.rs (startup only)
//!     - DriverError: sensor/ (per sensor task)
//!     - DisplayError: display/ (per render tick)
//!     - ConnectionError: httpd.rs (per connection)
//!
//! ==============================================================================

use std::io;
use std::path::PathBuf;

/// Problems found while loading or applying the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Non-fatal: the sensor is skipped and the others proceed.
    #[error("unknown sensor type '{kind}' for sensor '{name}'")]
    UnknownSensorType { name: String, kind: String },

    /// Fatal: the display task cannot be started.
    #[error("unknown display type '{0}'")]
    UnknownDisplayType(String),

    #[error("sensor '{name}' wants pin {pin} which is already owned by '{owner}'")]
    PinInUse {
        name: String,
        pin: u8,
        owner: String,
    },

    #[error("no i2c bus is wired to scl={scl} sda={sda}")]
    UnsupportedI2cPins { scl: u8, sda: u8 },

    #[error("invalid i2c address '{0}'")]
    InvalidAddress(String),

    #[error("invalid format template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Sensor driver failures. These end the current run of a sensor task.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no {kind} device found under {root}")]
    NoDevice { kind: &'static str, root: PathBuf },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed data in {path}: {content:?}")]
    Malformed { path: PathBuf, content: String },

    #[error("crc check failed in {0}")]
    Crc(PathBuf),

    /// Another configured sensor already reads from this device.
    #[error("device {0} is already claimed by another sensor")]
    DeviceClaimed(PathBuf),

    #[error("driver handle is not open")]
    NotOpen,

    #[error("blocking driver worker failed: {0}")]
    Worker(String),
}

impl DriverError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures while painting a display.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("i2c bus error: {0}")]
    Bus(String),

    #[error("template references field '{0}' which the reading does not have")]
    MissingField(String),

    #[error("blocking display worker failed: {0}")]
    Worker(String),
}

/// Per-connection failures of the http responder.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection i/o: {0}")]
    Io(#[from] io::Error),

    #[error("client did not send a request in time")]
    Timeout,

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}
