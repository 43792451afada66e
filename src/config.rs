//! ==============================================================================
//! config.rs - Node Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `config.json` (or `node.toml`, same shape).
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - sensors: name -> {type, pin, format}, in declaration order.
//!     - display: optional. panel type, i2c pins, address, dimensions.
//!     - httpd: optional. listen address, port, backlog.
//!     - logging / supervision / paths: optional, all fields defaulted.
//!
//! ==============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::runtime::RestartPolicy;
use crate::sensor::SysfsRoots;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeConfig {
    /// sensor name -> settings, in the order they were declared
    #[serde(default, deserialize_with = "ordered_sensors")]
    pub sensors: Vec<(String, SensorEntry)>,
    #[serde(default)]
    pub display: Option<DisplayConfig>,
    #[serde(default)]
    pub httpd: Option<HttpdConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SensorEntry {
    /// "dht11" or "ds18x20"; checked when the node is assembled
    #[serde(rename = "type")]
    pub kind: String,
    pub pin: u8,
    #[serde(default)]
    pub format: Option<String>,
    /// overrides the kind's poll interval
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// sysfs device directory name, when the pin alone is ambiguous
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DisplayConfig {
    /// "i2lcd" or "ssd1306"
    #[serde(rename = "type")]
    pub kind: String,
    pub pin: I2cPins,
    pub address: I2cAddress,
    pub dimensions: Dimensions,
    #[serde(default = "default_display_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct I2cPins {
    pub scl: u8,
    pub sda: u8,
}

/// characters for an lcd, pixels for an oled
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Written either as a number (`39`) or a hex string (`"0x27"`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum I2cAddress {
    Number(u64),
    Text(String),
}

impl I2cAddress {
    /// The 7-bit bus address.
    pub fn resolve(&self) -> Result<u16, ConfigError> {
        let invalid = || ConfigError::InvalidAddress(self.to_string());
        let value = match self {
            I2cAddress::Number(n) => *n,
            I2cAddress::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
                    None => s.parse().map_err(|_| invalid())?,
                }
            }
        };
        if value > 0x7F {
            return Err(invalid());
        }
        Ok(value as u16)
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cAddress::Number(n) => write!(f, "{n}"),
            I2cAddress::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpdConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// 0 disables the per-connection timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HttpdConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl Default for HttpdConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            backlog: default_backlog(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// tracing filter directive; RUST_LOG wins when set
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SupervisionConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl SupervisionConfig {
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy::bounded(
            self.max_restarts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_w1_devices")]
    pub w1_devices: PathBuf,
    #[serde(default = "default_iio_devices")]
    pub iio_devices: PathBuf,
}

impl PathsConfig {
    pub fn roots(&self) -> SysfsRoots {
        SysfsRoots {
            w1_devices: self.w1_devices.clone(),
            iio_devices: self.iio_devices.clone(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            w1_devices: default_w1_devices(),
            iio_devices: default_iio_devices(),
        }
    }
}

fn default_display_interval_ms() -> u64 {
    2000
}
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_backlog() -> u32 {
    100
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_level() -> String {
    "info".to_string()
}
fn default_max_restarts() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_w1_devices() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}
fn default_iio_devices() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices")
}

/// Reads the `sensors` map into a Vec so declaration order survives.
fn ordered_sensors<'de, D>(deserializer: D) -> Result<Vec<(String, SensorEntry)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SensorsVisitor;

    impl<'de> Visitor<'de> for SensorsVisitor {
        type Value = Vec<(String, SensorEntry)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of sensor name to sensor settings")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut sensors: Vec<(String, SensorEntry)> = Vec::new();
            while let Some((name, entry)) = map.next_entry::<String, SensorEntry>()? {
                if sensors.iter().any(|(existing, _)| *existing == name) {
                    return Err(de::Error::custom(format!("sensor '{name}' is declared twice")));
                }
                sensors.push((name, entry));
            }
            Ok(sensors)
        }
    }

    deserializer.deserialize_map(SensorsVisitor)
}

impl NodeConfig {
    /// Load configuration from file; `.json` and `.toml` are understood.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config.json"),
            PathBuf::from("config").join("node.json"),
            PathBuf::from("config").join("node.toml"),
            PathBuf::from("..").join("config").join("node.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           NODE CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        for (name, sensor) in &self.sensors {
            println!("│ Sensor: {:<12} {:<8} pin {:<5}│", name, sensor.kind, sensor.pin);
        }
        match &self.display {
            Some(display) => println!(
                "│ Display: {:<8} {:>4}x{:<4} @ {:<8}│",
                display.kind, display.dimensions.width, display.dimensions.height, display.address
            ),
            None => println!("│ Display: none                           │"),
        }
        match &self.httpd {
            Some(httpd) => println!("│ HTTP: {:<22} :{:<9}│", httpd.listen_address, httpd.port),
            None => println!("│ HTTP: disabled                          │"),
        }
        println!("│ Log Level: {:<29}│", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
