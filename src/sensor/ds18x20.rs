//! DS18x20 one-wire thermometer through the kernel `w1_therm` driver.
//!
//! The one-wire timing is done by the kernel; this side only touches sysfs:
//!
//! ```text
//! <w1_devices>/28-0316a2795bff/temperature   millidegrees, e.g. "21562"
//! <w1_devices>/28-0316a2795bff/w1_slave      older kernels, see parse_w1_slave
//! <w1_devices>/w1_bus_master1/therm_bulk_read  write "trigger" to convert
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SensorDriver;
use crate::domain::SensorReading;
use crate::error::DriverError;

/// one-wire family codes of the ds18s20 / ds1822 / ds18b20 / ds1825 / max31850
const FAMILY_CODES: [&str; 5] = ["10", "22", "28", "3b", "42"];

pub struct Ds18x20 {
    device: PathBuf,
    bulk_trigger: Option<PathBuf>,
}

impl Ds18x20 {
    /// Scans `root` for a thermometer. `device` picks a specific rom id;
    /// otherwise the first one in sorted order that `available` accepts is
    /// used, so sensors sharing a bus each get their own rom.
    pub fn open(root: &Path, device: Option<&str>, available: &dyn Fn(&Path) -> bool) -> Result<Self, DriverError> {
        let roms = scan(root)?;
        let path = match device {
            Some(wanted) => {
                let path = roms
                    .into_iter()
                    .find(|r| r == wanted)
                    .map(|rom| root.join(rom))
                    .ok_or_else(|| DriverError::NoDevice {
                        kind: "ds18x20",
                        root: root.to_path_buf(),
                    })?;
                if !available(&path) {
                    return Err(DriverError::DeviceClaimed(path));
                }
                path
            }
            None => roms
                .into_iter()
                .map(|rom| root.join(rom))
                .find(|path| available(path))
                .ok_or_else(|| DriverError::NoDevice {
                    kind: "ds18x20",
                    root: root.to_path_buf(),
                })?,
        };

        let bulk_trigger = bus_master_trigger(root);
        debug!(device = %path.display(), bulk = bulk_trigger.is_some(), "ds18x20 found");
        Ok(Self {
            device: path,
            bulk_trigger,
        })
    }

    /// sysfs directory of the rom this handle reads
    pub fn device(&self) -> &Path {
        &self.device
    }
}

impl SensorDriver for Ds18x20 {
    fn trigger(&mut self) -> Result<(), DriverError> {
        // without bulk read support the kernel converts on every read instead
        if let Some(path) = &self.bulk_trigger {
            fs::write(path, "trigger\n").map_err(|e| DriverError::io(path, e))?;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, DriverError> {
        let millis = read_millidegrees(&self.device)?;
        Ok(SensorReading::new().with("temp", f64::from(millis) / 1000.0))
    }

    fn blocking(&self) -> bool {
        true
    }
}

fn scan(root: &Path) -> Result<Vec<String>, DriverError> {
    let entries = fs::read_dir(root).map_err(|e| DriverError::io(root, e))?;
    let mut roms: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            name.split_once('-')
                .is_some_and(|(family, _)| FAMILY_CODES.contains(&family.to_ascii_lowercase().as_str()))
        })
        .collect();
    roms.sort();
    Ok(roms)
}

fn bus_master_trigger(root: &Path) -> Option<PathBuf> {
    let mut masters: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("w1_bus_master"))
        .map(|entry| entry.path().join("therm_bulk_read"))
        .filter(|path| path.exists())
        .collect();
    masters.sort();
    masters.into_iter().next()
}

fn read_millidegrees(device: &Path) -> Result<i32, DriverError> {
    let temperature = device.join("temperature");
    match fs::read_to_string(&temperature) {
        Ok(content) => content.trim().parse().map_err(|_| DriverError::Malformed {
            path: temperature,
            content,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let w1_slave = device.join("w1_slave");
            let content = fs::read_to_string(&w1_slave).map_err(|e| DriverError::io(&w1_slave, e))?;
            parse_w1_slave(&w1_slave, &content)
        }
        Err(e) => Err(DriverError::io(temperature, e)),
    }
}

/// `w1_slave` holds two lines; the first ends in the crc verdict, the
/// second carries the temperature:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
fn parse_w1_slave(path: &Path, content: &str) -> Result<i32, DriverError> {
    let malformed = || DriverError::Malformed {
        path: path.to_path_buf(),
        content: content.to_string(),
    };
    let mut lines = content.lines();
    let crc_line = lines.next().ok_or_else(malformed)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(DriverError::Crc(path.to_path_buf()));
    }
    let data_line = lines.next().ok_or_else(malformed)?;
    let (_, value) = data_line.rsplit_once("t=").ok_or_else(malformed)?;
    value.trim().parse().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any(_: &Path) -> bool {
        true
    }

    fn device(root: &Path, rom: &str) -> PathBuf {
        let dir = root.join(rom);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scan_picks_first_thermometer_in_sorted_order() {
        let tmp = tempfile::tempdir().unwrap();
        device(tmp.path(), "w1_bus_master1");
        device(tmp.path(), "01-00000aaaaaaa");
        fs::write(device(tmp.path(), "28-000000000002").join("temperature"), "19000\n").unwrap();
        fs::write(device(tmp.path(), "28-000000000001").join("temperature"), "21562\n").unwrap();

        let mut thermometer = Ds18x20::open(tmp.path(), None, &any).unwrap();
        thermometer.trigger().unwrap();
        assert_eq!(thermometer.read().unwrap().get("temp"), Some(21.562));
    }

    #[test]
    fn named_device_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(device(tmp.path(), "28-000000000001").join("temperature"), "1000").unwrap();
        fs::write(device(tmp.path(), "28-000000000002").join("temperature"), "-5500").unwrap();

        let mut thermometer = Ds18x20::open(tmp.path(), Some("28-000000000002"), &any).unwrap();
        assert_eq!(thermometer.read().unwrap().get("temp"), Some(-5.5));
    }

    #[test]
    fn empty_bus_is_a_scan_failure() {
        let tmp = tempfile::tempdir().unwrap();
        device(tmp.path(), "w1_bus_master1");
        let err = Ds18x20::open(tmp.path(), None, &any).err().unwrap();
        assert!(matches!(err, DriverError::NoDevice { kind: "ds18x20", .. }));
    }

    #[test]
    fn trigger_writes_bulk_read_when_available() {
        let tmp = tempfile::tempdir().unwrap();
        let master = device(tmp.path(), "w1_bus_master1");
        fs::write(master.join("therm_bulk_read"), "0").unwrap();
        fs::write(device(tmp.path(), "28-000000000001").join("temperature"), "20000").unwrap();

        let mut thermometer = Ds18x20::open(tmp.path(), None, &any).unwrap();
        thermometer.trigger().unwrap();
        assert_eq!(fs::read_to_string(master.join("therm_bulk_read")).unwrap(), "trigger\n");
    }

    #[test]
    fn falls_back_to_w1_slave() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            device(tmp.path(), "28-000000000001").join("w1_slave"),
            "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n",
        )
        .unwrap();

        let mut thermometer = Ds18x20::open(tmp.path(), None, &any).unwrap();
        assert_eq!(thermometer.read().unwrap().get("temp"), Some(23.125));
    }

    #[test]
    fn crc_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            device(tmp.path(), "28-000000000001").join("w1_slave"),
            "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n",
        )
        .unwrap();

        let mut thermometer = Ds18x20::open(tmp.path(), None, &any).unwrap();
        assert!(matches!(thermometer.read(), Err(DriverError::Crc(_))));
    }

    #[test]
    fn garbage_temperature_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(device(tmp.path(), "28-000000000001").join("temperature"), "n/a").unwrap();
        let mut thermometer = Ds18x20::open(tmp.path(), None, &any).unwrap();
        assert!(matches!(thermometer.read(), Err(DriverError::Malformed { .. })));
    }

    #[test]
    fn claimed_roms_are_passed_over() {
        let tmp = tempfile::tempdir().unwrap();
        let taken = device(tmp.path(), "28-000000000001");
        fs::write(taken.join("temperature"), "10000").unwrap();
        fs::write(device(tmp.path(), "28-000000000002").join("temperature"), "30000").unwrap();

        let free = |path: &Path| path != taken;
        let mut thermometer = Ds18x20::open(tmp.path(), None, &free).unwrap();
        assert_eq!(thermometer.device(), tmp.path().join("28-000000000002"));
        assert_eq!(thermometer.read().unwrap().get("temp"), Some(30.0));

        let err = Ds18x20::open(tmp.path(), Some("28-000000000001"), &free).err().unwrap();
        assert!(matches!(err, DriverError::DeviceClaimed(path) if path == taken));
    }

    #[test]
    fn every_rom_claimed_is_a_scan_failure() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(device(tmp.path(), "28-000000000001").join("temperature"), "10000").unwrap();
        let err = Ds18x20::open(tmp.path(), None, &|_| false).err().unwrap();
        assert!(matches!(err, DriverError::NoDevice { kind: "ds18x20", .. }));
    }
}
