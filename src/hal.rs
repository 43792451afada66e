//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer for the display bus
//! ==============================================================================
//!
//! purpose:
//!     provides the I2C bus the display backends write to. abstracts away the
//!     difference between running on a real Raspberry Pi (using `rppal`) and
//!     a development machine (using a mock that only logs).
//!
//! design philosophy:
//!     - "Compile Anywhere": the node builds and runs on Windows/Mac/Linux.
//!     - "Zero Cost": with feature="hardware" this is a direct `rppal` call.
//!
//! relationships:
//!     - used by: display/lcd.rs, display/ssd1306.rs, node.rs (bus selection)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use crate::error::{ConfigError, DisplayError};

/// Write-only access to one I2C bus.
pub trait I2cBus: Send {
    /// One I2C write transaction to the 7-bit `address`.
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DisplayError>;
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DisplayError> {
        (**self).write(address, bytes)
    }
}

/// Maps a configured (scl, sda) GPIO pair to the Raspberry Pi I2C bus wired
/// to those pins.
pub fn bus_for_pins(scl: u8, sda: u8) -> Result<u8, ConfigError> {
    match (scl, sda) {
        (1, 0) => Ok(0),
        (3, 2) => Ok(1),
        (5, 4) => Ok(3),
        (7, 6) => Ok(4),
        (13, 12) => Ok(5),
        (23, 22) => Ok(6),
        _ => Err(ConfigError::UnsupportedI2cPins { scl, sda }),
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    bus: u8,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn open(bus: u8) -> anyhow::Result<Self> {
        tracing::info!(bus, "Using MOCK I2C (No hardware access)");
        Ok(Self { bus })
    }
}

#[cfg(not(feature = "hardware"))]
impl I2cBus for Hal {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DisplayError> {
        tracing::trace!("[MOCK I2C] bus {} addr 0x{:02X}: {:02X?}", self.bus, address, bytes);
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    i2c: rppal::i2c::I2c,
    address: Option<u16>,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn open(bus: u8) -> anyhow::Result<Self> {
        use anyhow::Context;
        tracing::info!(bus, "Using REAL HARDWARE I2C (rppal)");
        let i2c = rppal::i2c::I2c::with_bus(bus).with_context(|| format!("opening i2c bus {bus}"))?;
        Ok(Self { i2c, address: None })
    }
}

#[cfg(feature = "hardware")]
impl I2cBus for Hal {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DisplayError> {
        if self.address != Some(address) {
            self.i2c
                .set_slave_address(address)
                .map_err(|e| DisplayError::Bus(e.to_string()))?;
            self.address = Some(address);
        }
        let written = self.i2c.write(bytes).map_err(|e| DisplayError::Bus(e.to_string()))?;
        if written != bytes.len() {
            return Err(DisplayError::Bus(format!("short write: {written} of {} bytes", bytes.len())));
        }
        Ok(())
    }
}
