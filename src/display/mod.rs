//! ==============================================================================
//! display/ - display capability, backends, and the periodic renderer
//! ==============================================================================
//!
//! purpose:
//!     the renderer turns a store snapshot into text; a Display backend puts
//!     that text on glass. backends only know `show_text`.
//!
//! relationships:
//!     - format.rs: per-sensor templates and unit suffixes
//!     - renderer.rs: DisplayRenderer task
//!     - lcd.rs: hd44780 character lcd behind a pcf8574 backpack
//!     - ssd1306.rs: monochrome oled pixel panel
//!     - built by: node.rs
//!
//! ==============================================================================

pub mod format;
pub mod lcd;
pub mod renderer;
pub mod ssd1306;

use std::str::FromStr;

use crate::error::{ConfigError, DisplayError};

pub use renderer::DisplayRenderer;

/// Something that can show a block of text.
///
/// A backend whose `show_text` waits on a bus (every I2C panel does: a full
/// ssd1306 frame is over a kilobyte at 100 kHz) must return `true` from
/// [`blocking`](Display::blocking). The renderer then paints on the blocking
/// pool so sensor and http tasks keep running while the bus is busy.
pub trait Display: Send {
    fn show_text(&mut self, text: &str) -> Result<(), DisplayError>;

    fn blocking(&self) -> bool {
        false
    }
}

impl<D: Display + ?Sized> Display for Box<D> {
    fn show_text(&mut self, text: &str) -> Result<(), DisplayError> {
        (**self).show_text(text)
    }

    fn blocking(&self) -> bool {
        (**self).blocking()
    }
}

/// Display hardware the node knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    /// character lcd, dimensions in characters
    I2cLcd,
    /// oled panel, dimensions in pixels
    Ssd1306,
}

impl FromStr for DisplayKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i2lcd" => Ok(DisplayKind::I2cLcd),
            "ssd1306" => Ok(DisplayKind::Ssd1306),
            other => Err(ConfigError::UnknownDisplayType(other.to_string())),
        }
    }
}

/// Splits `text` into lines of at most `width` characters.
///
/// Breaks fall exactly on the width boundary, never on word boundaries; a
/// `\n` also ends a line. Empty text gives no lines at all.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for segment in text.split('\n') {
        let chars: Vec<char> = segment.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        lines.extend(chars.chunks(width).map(|chunk| chunk.iter().collect::<String>()));
    }
    if text.is_empty() {
        lines.clear();
    }
    lines
}
