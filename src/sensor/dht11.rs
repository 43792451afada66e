//! DHT11 temperature/humidity sensor through the kernel `dht11` IIO driver.
//!
//! The kernel does the bit-banging; a read of an `in_*_input` attribute
//! samples the sensor, which takes tens of milliseconds and fails with EIO
//! fairly often on a busy system.
//!
//! ```text
//! <iio_devices>/iio:device0/name                        "dht11"
//! <iio_devices>/iio:device0/of_node                     -> .../dht11@11
//! <iio_devices>/iio:device0/in_temp_input               milli-degrees
//! <iio_devices>/iio:device0/in_humidityrelative_input   milli-percent
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SensorDriver;
use crate::domain::SensorReading;
use crate::error::DriverError;

pub struct Dht11 {
    device: PathBuf,
    sample: Option<(i32, i32)>,
}

impl Dht11 {
    /// Finds the IIO device for the sensor on `pin`. `device` names an IIO
    /// directory explicitly; otherwise the one whose device-tree node is
    /// `dht11@<pin in hex>` wins, falling back to the first `dht11` that
    /// `available` accepts.
    pub fn open(
        root: &Path,
        pin: u8,
        device: Option<&str>,
        available: &dyn Fn(&Path) -> bool,
    ) -> Result<Self, DriverError> {
        let no_device = || DriverError::NoDevice {
            kind: "dht11",
            root: root.to_path_buf(),
        };

        if let Some(name) = device {
            let path = root.join(name);
            if !path.is_dir() {
                return Err(no_device());
            }
            if !available(&path) {
                return Err(DriverError::DeviceClaimed(path));
            }
            return Ok(Self::at(path));
        }

        let entries = fs::read_dir(root).map_err(|e| DriverError::io(root, e))?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                fs::read_to_string(path.join("name")).is_ok_and(|name| name.trim() == "dht11")
            })
            .collect();
        candidates.sort();

        let node = format!("dht11@{pin:x}");
        let by_pin = candidates.iter().position(|path| {
            fs::canonicalize(path.join("of_node"))
                .ok()
                .and_then(|p| p.file_name().map(|f| f.to_string_lossy() == node))
                .unwrap_or(false)
        });
        let index = match by_pin {
            // the node for this pin belongs to us; someone else holding it is a config error
            Some(index) if !available(&candidates[index]) => {
                return Err(DriverError::DeviceClaimed(candidates.swap_remove(index)));
            }
            Some(index) => index,
            None => candidates
                .iter()
                .position(|path| available(path))
                .ok_or_else(no_device)?,
        };
        debug!(pin, device = %candidates[index].display(), matched_pin = by_pin.is_some(), "dht11 found");
        Ok(Self::at(candidates.swap_remove(index)))
    }

    /// sysfs directory of the IIO device this handle samples
    pub fn device(&self) -> &Path {
        &self.device
    }

    fn at(device: PathBuf) -> Self {
        Self { device, sample: None }
    }

    fn read_attr(&self, attr: &str) -> Result<i32, DriverError> {
        let path = self.device.join(attr);
        let content = fs::read_to_string(&path).map_err(|e| DriverError::io(&path, e))?;
        content
            .trim()
            .parse()
            .map_err(|_| DriverError::Malformed { path, content })
    }
}

impl SensorDriver for Dht11 {
    /// samples both values; they come from the same 40-bit frame in the
    /// kernel driver's cache when read back to back
    fn trigger(&mut self) -> Result<(), DriverError> {
        self.sample = None;
        let temp = self.read_attr("in_temp_input")?;
        let rel = self.read_attr("in_humidityrelative_input")?;
        self.sample = Some((temp, rel));
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, DriverError> {
        let (temp, rel) = self.sample.take().ok_or(DriverError::NotOpen)?;
        Ok(SensorReading::new()
            .with("rel", f64::from(rel) / 1000.0)
            .with("temp", f64::from(temp) / 1000.0))
    }

    fn blocking(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any(_: &Path) -> bool {
        true
    }

    fn iio_device(root: &Path, dir: &str, name: &str, temp: &str, rel: &str) -> PathBuf {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("name"), format!("{name}\n")).unwrap();
        fs::write(path.join("in_temp_input"), temp).unwrap();
        fs::write(path.join("in_humidityrelative_input"), rel).unwrap();
        path
    }

    #[test]
    fn reads_temperature_and_humidity_together() {
        let tmp = tempfile::tempdir().unwrap();
        iio_device(tmp.path(), "iio:device0", "mcp3008", "0", "0");
        iio_device(tmp.path(), "iio:device1", "dht11", "21000\n", "45000\n");

        let mut sensor = Dht11::open(tmp.path(), 4, None, &any).unwrap();
        sensor.trigger().unwrap();
        let reading = sensor.read().unwrap();
        assert_eq!(reading.get("temp"), Some(21.0));
        assert_eq!(reading.get("rel"), Some(45.0));
        assert_eq!(reading.fields().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn prefers_the_device_tree_node_for_the_pin() {
        let tmp = tempfile::tempdir().unwrap();
        let first = iio_device(tmp.path(), "iio:device0", "dht11", "10000", "10000");
        let second = iio_device(tmp.path(), "iio:device1", "dht11", "22000", "50000");
        let nodes = tmp.path().join("firmware");
        fs::create_dir_all(nodes.join("dht11@4")).unwrap();
        fs::create_dir_all(nodes.join("dht11@11")).unwrap();
        std::os::unix::fs::symlink(nodes.join("dht11@4"), first.join("of_node")).unwrap();
        std::os::unix::fs::symlink(nodes.join("dht11@11"), second.join("of_node")).unwrap();

        // gpio 17 is 0x11
        let mut sensor = Dht11::open(tmp.path(), 17, None, &any).unwrap();
        sensor.trigger().unwrap();
        assert_eq!(sensor.read().unwrap().get("temp"), Some(22.0));
    }

    #[test]
    fn no_dht11_is_a_scan_failure() {
        let tmp = tempfile::tempdir().unwrap();
        iio_device(tmp.path(), "iio:device0", "ads1015", "0", "0");
        assert!(matches!(
            Dht11::open(tmp.path(), 4, None, &any),
            Err(DriverError::NoDevice { kind: "dht11", .. })
        ));
    }

    #[test]
    fn failed_sample_surfaces_as_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = iio_device(tmp.path(), "iio:device0", "dht11", "21000", "45000");
        fs::remove_file(dev.join("in_humidityrelative_input")).unwrap();

        let mut sensor = Dht11::open(tmp.path(), 4, Some("iio:device0"), &any).unwrap();
        assert!(matches!(sensor.trigger(), Err(DriverError::Io { .. })));
        assert!(sensor.read().is_err());
    }

    #[test]
    fn claimed_devices_are_passed_over() {
        let tmp = tempfile::tempdir().unwrap();
        let taken = iio_device(tmp.path(), "iio:device0", "dht11", "10000", "10000");
        iio_device(tmp.path(), "iio:device1", "dht11", "22000", "50000");

        let free = |path: &Path| path != taken;
        let mut sensor = Dht11::open(tmp.path(), 4, None, &free).unwrap();
        assert_eq!(sensor.device(), tmp.path().join("iio:device1"));
        sensor.trigger().unwrap();
        assert_eq!(sensor.read().unwrap().get("temp"), Some(22.0));

        assert!(matches!(
            Dht11::open(tmp.path(), 4, Some("iio:device0"), &free),
            Err(DriverError::DeviceClaimed(path)) if path == taken
        ));
        assert!(matches!(
            Dht11::open(tmp.path(), 4, None, &|_| false),
            Err(DriverError::NoDevice { kind: "dht11", .. })
        ));
    }
}
