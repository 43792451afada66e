//! HD44780 character LCD behind a PCF8574 I2C backpack ("i2lcd").
//!
//! The backpack maps its 8 output pins to the LCD like this:
//!
//! ```text
//! P0 RS | P1 RW | P2 E | P3 backlight | P4..P7 D4..D7
//! ```
//!
//! so every LCD byte goes out as two 4-bit nibbles, each latched by pulsing E.

use std::thread;
use std::time::Duration;

use super::{wrap_text, Display};
use crate::error::DisplayError;
use crate::hal::I2cBus;

const MASK_RS: u8 = 0x01;
const MASK_E: u8 = 0x04;
const BACKLIGHT: u8 = 0x08;

const CMD_CLEAR: u8 = 0x01;
const CMD_ENTRY_INCREMENT: u8 = 0x06;
const CMD_DISPLAY_OFF: u8 = 0x08;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_FUNCTION_4BIT: u8 = 0x20;
const FUNCTION_2LINES: u8 = 0x08;
const CMD_SET_DDRAM: u8 = 0x80;

pub struct CharLcd<B: I2cBus> {
    bus: B,
    address: u16,
    columns: usize,
    rows: usize,
}

impl<B: I2cBus> CharLcd<B> {
    /// Runs the 4-bit initialisation sequence. This sleeps for about 30ms in
    /// total, so it belongs to startup, not to a running task.
    pub fn new(bus: B, address: u16, columns: usize, rows: usize) -> Result<Self, DisplayError> {
        let mut lcd = Self {
            bus,
            address,
            columns: columns.max(1),
            rows: rows.max(1),
        };

        lcd.bus.write(address, &[0])?;
        thread::sleep(Duration::from_millis(20));
        // three times 8-bit mode to get a known state, then switch to 4-bit
        lcd.write_nibble(0x30, false)?;
        thread::sleep(Duration::from_millis(5));
        lcd.write_nibble(0x30, false)?;
        thread::sleep(Duration::from_millis(1));
        lcd.write_nibble(0x30, false)?;
        thread::sleep(Duration::from_millis(1));
        lcd.write_nibble(0x20, false)?;
        thread::sleep(Duration::from_millis(1));

        let lines = if lcd.rows > 1 { FUNCTION_2LINES } else { 0 };
        lcd.command(CMD_FUNCTION_4BIT | lines)?;
        lcd.command(CMD_DISPLAY_OFF)?;
        lcd.command(CMD_CLEAR)?;
        lcd.command(CMD_ENTRY_INCREMENT)?;
        lcd.command(CMD_DISPLAY_ON)?;
        Ok(lcd)
    }

    fn write_nibble(&mut self, nibble: u8, data: bool) -> Result<(), DisplayError> {
        let rs = if data { MASK_RS } else { 0 };
        let byte = (nibble & 0xF0) | rs | BACKLIGHT;
        self.bus.write(self.address, &[byte | MASK_E, byte])
    }

    fn write_byte(&mut self, byte: u8, data: bool) -> Result<(), DisplayError> {
        self.write_nibble(byte & 0xF0, data)?;
        self.write_nibble(byte << 4, data)
    }

    fn command(&mut self, cmd: u8) -> Result<(), DisplayError> {
        self.write_byte(cmd, false)?;
        if cmd == CMD_CLEAR {
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn move_to(&mut self, column: usize, row: usize) -> Result<(), DisplayError> {
        // rows 2 and 3 of a 4-line module continue rows 0 and 1 in ddram
        let mut address = column & 0x3F;
        if row & 1 == 1 {
            address += 0x40;
        }
        if row & 2 == 2 {
            address += self.columns;
        }
        self.command(CMD_SET_DDRAM | (address as u8 & 0x7F))
    }
}

impl<B: I2cBus> Display for CharLcd<B> {
    fn show_text(&mut self, text: &str) -> Result<(), DisplayError> {
        let lines = wrap_text(text, self.columns);
        if lines.len() > self.rows {
            tracing::debug!(lines = lines.len(), rows = self.rows, "lcd text truncated");
        }
        for row in 0..self.rows {
            self.move_to(0, row)?;
            let line = lines.get(row).map_or("", String::as_str);
            // pad so leftovers from the previous paint are overwritten
            let padded = format!("{line:<width$}", width = self.columns);
            for c in padded.chars() {
                let byte = if c.is_ascii() { c as u8 } else { b'?' };
                self.write_byte(byte, true)?;
            }
        }
        Ok(())
    }

    fn blocking(&self) -> bool {
        true
    }
}
