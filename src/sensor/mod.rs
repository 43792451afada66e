//! ==============================================================================
//! sensor/ - sensor kinds, the driver capability and the polling task
//! ==============================================================================
//!
//! purpose:
//!     one SensorTask per configured sensor. each task owns its driver
//!     handle exclusively and is the only writer of its store entry.
//!
//! loop, per iteration:
//!     trigger -> wait conversion delay -> read -> store.set -> wait interval
//!
//! failure policy:
//!     driver errors are not retried inside the loop. they end the current
//!     `run`, the handle is dropped, and the supervisor (runtime.rs) decides
//!     whether to reopen it after a backoff. the store entry stays as it was.
//!
//! relationships:
//!     - writes: store::SharedStateStore
//!     - drivers: ds18x20.rs (w1_therm sysfs), dht11.rs (iio sysfs)
//!     - built by: node.rs
//!
//! ==============================================================================

pub mod dht11;
pub mod ds18x20;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use crate::domain::SensorReading;
use crate::error::{ConfigError, DriverError};
use crate::runtime::Task;
use crate::store::SharedStateStore;

/// Sensor hardware the node knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Dht11,
    Ds18x20,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Dht11 => "dht11",
            SensorKind::Ds18x20 => "ds18x20",
        }
    }

    pub fn timing(self) -> SensorTiming {
        match self {
            // measure() is synchronous, nothing to wait for
            SensorKind::Dht11 => SensorTiming {
                conversion_delay: Duration::ZERO,
                poll_interval: Duration::from_millis(2000),
            },
            // 12-bit conversion takes up to 750ms
            SensorKind::Ds18x20 => SensorTiming {
                conversion_delay: Duration::from_millis(750),
                poll_interval: Duration::from_millis(2000),
            },
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dht11" => Ok(SensorKind::Dht11),
            "ds18x20" => Ok(SensorKind::Ds18x20),
            other => Err(other.to_string()),
        }
    }
}

impl SensorKind {
    /// like `from_str` but reports which configured sensor asked for it
    pub fn parse_for(name: &str, kind: &str) -> Result<Self, ConfigError> {
        kind.parse().map_err(|kind| ConfigError::UnknownSensorType {
            name: name.to_string(),
            kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTiming {
    pub conversion_delay: Duration,
    pub poll_interval: Duration,
}

/// Access to one physical sensor.
///
/// Calls are synchronous. A driver whose calls can take noticeable wall-clock
/// time (kernel sysfs reads that bit-bang or wait for a conversion) must
/// return `true` from [`blocking`](SensorDriver::blocking); the task then runs
/// its calls on the blocking pool instead of the scheduler thread.
pub trait SensorDriver: Send {
    /// Start a measurement. The result is collected by `read` after the
    /// kind's conversion delay.
    fn trigger(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Collect every field of the last measurement.
    fn read(&mut self) -> Result<SensorReading, DriverError>;

    fn blocking(&self) -> bool {
        false
    }
}

pub type BoxedDriver = Box<dyn SensorDriver>;

/// Opens (or reopens after a failure) the driver for one sensor.
pub type DriverOpener = Box<dyn FnMut() -> Result<BoxedDriver, DriverError>>;

/// Where the kernel exposes sensor devices.
#[derive(Debug, Clone)]
pub struct SysfsRoots {
    pub w1_devices: PathBuf,
    pub iio_devices: PathBuf,
}

/// Device paths held by open sensors, keyed by path, valued by sensor name.
///
/// Shared between the openers of one node so two sensors never read the
/// same rom or IIO device. A sensor keeps its claim across reopens.
#[derive(Debug, Clone, Default)]
pub struct DeviceClaims(Rc<RefCell<HashMap<PathBuf, String>>>);

impl DeviceClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if nobody, or `owner` itself, holds `path`.
    pub fn is_free_for(&self, path: &Path, owner: &str) -> bool {
        self.0.borrow().get(path).map_or(true, |holder| holder == owner)
    }

    /// Records `path` for `owner`, dropping whatever `owner` held before.
    pub fn claim(&self, path: &Path, owner: &str) {
        let mut claims = self.0.borrow_mut();
        claims.retain(|_, holder| holder.as_str() != owner);
        claims.insert(path.to_path_buf(), owner.to_string());
    }

    pub fn holder(&self, path: &Path) -> Option<String> {
        self.0.borrow().get(path).cloned()
    }
}

/// Factory: maps a sensor kind to its sysfs-backed driver, skipping devices
/// other sensors already hold and claiming the one it opens for `owner`.
pub fn open_driver(
    kind: SensorKind,
    pin: u8,
    device: Option<&str>,
    roots: &SysfsRoots,
    claims: &DeviceClaims,
    owner: &str,
) -> Result<BoxedDriver, DriverError> {
    let available = |path: &Path| claims.is_free_for(path, owner);
    let (driver, path): (BoxedDriver, PathBuf) = match kind {
        SensorKind::Ds18x20 => {
            let driver = ds18x20::Ds18x20::open(&roots.w1_devices, device, &available)?;
            let path = driver.device().to_path_buf();
            (Box::new(driver), path)
        }
        SensorKind::Dht11 => {
            let driver = dht11::Dht11::open(&roots.iio_devices, pin, device, &available)?;
            let path = driver.device().to_path_buf();
            (Box::new(driver), path)
        }
    };
    claims.claim(&path, owner);
    debug!(sensor = owner, device = %path.display(), "device claimed");
    Ok(driver)
}

/// Periodic producer for one sensor.
pub struct SensorTask {
    name: String,
    kind: SensorKind,
    timing: SensorTiming,
    store: SharedStateStore,
    opener: DriverOpener,
    driver: Option<BoxedDriver>,
}

impl SensorTask {
    pub fn new(
        name: impl Into<String>,
        kind: SensorKind,
        timing: SensorTiming,
        store: SharedStateStore,
        opener: DriverOpener,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            timing,
            store,
            opener,
            driver: None,
        }
    }

    /// One trigger -> delay -> read -> set cycle, without the poll wait.
    pub async fn poll_once(&mut self) -> Result<(), DriverError> {
        self.call_driver(|d| d.trigger()).await?;
        if !self.timing.conversion_delay.is_zero() {
            tokio::time::sleep(self.timing.conversion_delay).await;
        }
        let reading = self.call_driver(|d| d.read()).await?;
        debug!(sensor = %self.name, ?reading, "reading");
        self.store.set(self.name.clone(), reading);
        Ok(())
    }

    /// Runs `op` against the driver, on the blocking pool if the driver
    /// asked for it. The handle is moved out for the call and put back only
    /// if the call succeeded, so any error leaves the task without a driver.
    async fn call_driver<T, F>(&mut self, op: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SensorDriver) -> Result<T, DriverError> + Send + 'static,
    {
        let mut driver = self.driver.take().ok_or(DriverError::NotOpen)?;
        let (driver, result) = if driver.blocking() {
            tokio::task::spawn_blocking(move || {
                let result = op(driver.as_mut());
                (driver, result)
            })
            .await
            .map_err(|e| DriverError::Worker(e.to_string()))?
        } else {
            let result = op(driver.as_mut());
            (driver, result)
        };
        let value = result?;
        self.driver = Some(driver);
        Ok(value)
    }
}

impl Task for SensorTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        if self.driver.is_none() {
            let driver = (self.opener)()
                .with_context(|| format!("opening {} driver for '{}'", self.kind, self.name))?;
            info!(sensor = %self.name, kind = %self.kind, blocking = driver.blocking(), "driver open");
            self.driver = Some(driver);
        }

        loop {
            self.poll_once()
                .await
                .with_context(|| format!("polling {} sensor '{}'", self.kind, self.name))?;
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }
}
