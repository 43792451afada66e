//! SSD1306 monochrome OLED over I2C.
//!
//! Text is rasterised with a 6x10 monospace font into an in-memory
//! framebuffer laid out the way the controller expects (one byte = 8
//! vertical pixels of a page), then the whole buffer is sent in one
//! horizontal-addressing burst.

use std::convert::Infallible;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

use super::{wrap_text, Display};
use crate::error::DisplayError;
use crate::hal::I2cBus;

const GLYPH_WIDTH: u32 = 6;
const GLYPH_HEIGHT: u32 = 10;

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;
/// bytes of pixel data per i2c transaction
const DATA_CHUNK: usize = 16;

/// 1 bit per pixel, page-major: byte `page * width + x`, bit `y % 8`.
pub struct MonoFrame {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl MonoFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes: vec![0; (width * height.div_ceil(8)) as usize],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pixel(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = ((y / 8) * self.width + x) as usize;
        self.bytes[index] & (1 << (y % 8)) != 0
    }

    fn set_pixel(&mut self, x: u32, y: u32, on: bool) {
        let index = ((y / 8) * self.width + x) as usize;
        let mask = 1 << (y % 8);
        if on {
            self.bytes[index] |= mask;
        } else {
            self.bytes[index] &= !mask;
        }
    }

    fn blank(&mut self) {
        self.bytes.fill(0);
    }
}

impl OriginDimensions for MonoFrame {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for MonoFrame {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.y >= 0 && (coord.x as u32) < self.width && (coord.y as u32) < self.height {
                self.set_pixel(coord.x as u32, coord.y as u32, color.is_on());
            }
        }
        Ok(())
    }
}

pub struct Ssd1306<B: I2cBus> {
    bus: B,
    address: u16,
    frame: MonoFrame,
}

impl<B: I2cBus> Ssd1306<B> {
    /// `width` x `height` in pixels; height must be 32 or 64 on real panels.
    pub fn new(bus: B, address: u16, width: u32, height: u32) -> Result<Self, DisplayError> {
        let mut panel = Self {
            bus,
            address,
            frame: MonoFrame::new(width.max(1), height.max(8)),
        };
        let (w, h) = (panel.frame.width, panel.frame.height);
        let com_pins = if h > 32 { 0x12 } else { 0x02 };
        panel.command(&[
            0xAE, // display off
            0xD5, 0x80, // clock divide
            0xA8, (h - 1) as u8, // multiplex ratio
            0xD3, 0x00, // display offset
            0x40, // start line 0
            0x8D, 0x14, // charge pump on
            0x20, 0x00, // horizontal addressing
            0xA1, // segment remap
            0xC8, // com scan decrement
            0xDA, com_pins,
            0x81, 0xCF, // contrast
            0xD9, 0xF1, // precharge
            0xDB, 0x40, // vcomh deselect
            0xA4, // resume from ram
            0xA6, // normal, not inverted
        ])?;
        panel.flush()?;
        panel.command(&[0xAF])?;
        tracing::debug!(width = w, height = h, columns = panel.columns(), rows = panel.rows(), "ssd1306 ready");
        Ok(panel)
    }

    pub fn columns(&self) -> usize {
        (self.frame.width / GLYPH_WIDTH).max(1) as usize
    }

    pub fn rows(&self) -> usize {
        (self.frame.height / GLYPH_HEIGHT).max(1) as usize
    }

    pub fn frame(&self) -> &MonoFrame {
        &self.frame
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.push(CONTROL_COMMAND);
        buf.extend_from_slice(bytes);
        self.bus.write(self.address, &buf)
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        let last_column = (self.frame.width - 1) as u8;
        let last_page = (self.frame.height.div_ceil(8) - 1) as u8;
        self.command(&[0x21, 0, last_column, 0x22, 0, last_page])?;
        let mut buf = Vec::with_capacity(DATA_CHUNK + 1);
        for chunk in self.frame.bytes.chunks(DATA_CHUNK) {
            buf.clear();
            buf.push(CONTROL_DATA);
            buf.extend_from_slice(chunk);
            self.bus.write(self.address, &buf)?;
        }
        Ok(())
    }
}

impl<B: I2cBus> Display for Ssd1306<B> {
    fn show_text(&mut self, text: &str) -> Result<(), DisplayError> {
        self.frame.blank();
        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        let lines = wrap_text(text, self.columns());
        for (row, line) in lines.iter().take(self.rows()).enumerate() {
            let origin = Point::new(0, (row as u32 * GLYPH_HEIGHT) as i32);
            // drawing into the framebuffer cannot fail
            let _ = Text::with_baseline(line, origin, style, Baseline::Top).draw(&mut self.frame);
        }
        self.flush()
    }

    fn blocking(&self) -> bool {
        true
    }
}
