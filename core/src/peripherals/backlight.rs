/// Backlight controller (port range 0xB)
///
/// A single PWM duty register at 0x24. Writing a non-zero value to any of
/// the gate registers (0x21, 0x22, 0x25, 0x26) switches the light off.
use crate::error::RestoreError;
use crate::snapshot::{Reader, Writer};

const BRIGHTNESS: u16 = 0x24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlight {
    brightness: u8,
}

impl Backlight {
    pub fn new() -> Self {
        Self { brightness: 0xFF }
    }

    pub fn read(&self, offset: u16) -> u8 {
        match offset & 0xFF {
            BRIGHTNESS => self.brightness,
            _ => 0x00,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        match offset & 0xFF {
            0x21 | 0x22 | 0x25 | 0x26 if value != 0 => self.set(0),
            BRIGHTNESS => self.set(value),
            _ => {}
        }
    }

    fn set(&mut self, value: u8) {
        if self.brightness != value {
            tracing::debug!(from = self.brightness, to = value, "backlight level");
            self.brightness = value;
        }
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn save(&self, w: &mut Writer) {
        w.u8(self.brightness);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        Ok(Self {
            brightness: r.u8("peripherals")?,
        })
    }
}

impl Default for Backlight {
    fn default() -> Self {
        Self::new()
    }
}
