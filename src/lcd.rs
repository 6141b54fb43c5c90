//! 16x2 character LCD (HD44780) behind a PCF8574 i2c backpack.
//!
//! Every call blocks for a few milliseconds; async callers should go through
//! `spawn_blocking`.

use crate::hal::{HalResult, HardwareDriver};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ADDR: u16 = 0x27;
pub const COLUMNS: usize = 16;

const MODE_CMD: u8 = 0;
const MODE_CHR: u8 = 1;
const LINE_1: u8 = 0x80;
const LINE_2: u8 = 0xC0;
const BACKLIGHT: u8 = 0x08;
const ENABLE: u8 = 0b0000_0100;
const CLEAR: u8 = 0x01;

/// 4-bit mode, cursor off, two lines, clear
const INIT_SEQUENCE: [u8; 6] = [0x33, 0x32, 0x06, 0x0C, 0x28, CLEAR];

#[derive(Clone)]
pub struct Lcd {
    hal: Arc<dyn HardwareDriver>,
    addr: u16,
    settle: Duration,
}

impl Lcd {
    pub fn new(hal: Arc<dyn HardwareDriver>, addr: u16) -> Self {
        Self { hal, addr, settle: Duration::from_micros(500) }
    }

    /// override the enable-pulse settle time (zero in tests)
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn init(&self) -> HalResult<()> {
        for cmd in INIT_SEQUENCE {
            self.send(cmd, MODE_CMD)?;
        }
        std::thread::sleep(self.settle);
        Ok(())
    }

    pub fn clear(&self) -> HalResult<()> {
        self.send(CLEAR, MODE_CMD)?;
        std::thread::sleep(self.settle);
        Ok(())
    }

    /// write both lines, each cut to the display width
    pub fn show(&self, line1: &str, line2: &str) -> HalResult<()> {
        self.send(LINE_1, MODE_CMD)?;
        self.write_str(line1)?;
        self.send(LINE_2, MODE_CMD)?;
        self.write_str(line2)
    }

    fn write_str(&self, text: &str) -> HalResult<()> {
        for ch in text.chars().take(COLUMNS) {
            let byte = if ch.is_ascii() { ch as u8 } else { b'?' };
            self.send(byte, MODE_CHR)?;
        }
        Ok(())
    }

    fn send(&self, bits: u8, mode: u8) -> HalResult<()> {
        let high = mode | (bits & 0xF0) | BACKLIGHT;
        let low = mode | ((bits << 4) & 0xF0) | BACKLIGHT;
        self.write_byte(high)?;
        self.toggle_enable(high)?;
        self.write_byte(low)?;
        self.toggle_enable(low)
    }

    fn toggle_enable(&self, bits: u8) -> HalResult<()> {
        std::thread::sleep(self.settle);
        self.write_byte(bits | ENABLE)?;
        std::thread::sleep(self.settle);
        self.write_byte(bits & !ENABLE)?;
        std::thread::sleep(self.settle);
        Ok(())
    }

    fn write_byte(&self, byte: u8) -> HalResult<()> {
        self.hal.i2c_write(self.addr, &[byte])
    }
}
