//! Interrupt controller (port range 0x5, MMIO 0xF00000)
//!
//! Three 32-bit registers, byte addressable, mirrored every 16 bytes:
//! - 0x00 STATUS: latched sources; writing 1 to a bit acknowledges it
//! - 0x04 ENABLED: sources allowed to assert the CPU's IRQ line
//! - 0x08 RAW: current source levels (read only)
//!
//! Sources wired on this machine:
//! - Bit 0: ON key
//! - Bits 1-3: general purpose timers 1-3
//! - Bit 4: OS timer
//! - Bit 12: real-time clock

use crate::error::RestoreError;
use crate::snapshot::{Reader, Writer};

/// Interrupt source bit masks
pub mod sources {
    pub const ON_KEY: u32 = 1 << 0;
    pub const TIMER1: u32 = 1 << 1;
    pub const TIMER2: u32 = 1 << 2;
    pub const TIMER3: u32 = 1 << 3;
    pub const OSTIMER: u32 = 1 << 4;
    pub const RTC: u32 = 1 << 12;

    /// Source bit for general purpose timer `index` (0-2)
    pub const fn timer(index: usize) -> u32 {
        TIMER1 << index
    }
}

mod regs {
    pub const STATUS: u16 = 0x00;
    pub const ENABLED: u16 = 0x04;
    pub const RAW: u16 = 0x08;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptController {
    status: u32,
    enabled: u32,
    raw: u32,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Level of the CPU's IRQ input
    pub fn irq_pending(&self) -> bool {
        self.status & self.enabled != 0
    }

    /// Latch a source
    pub fn raise(&mut self, source: u32) {
        self.raw |= source;
        self.status |= source;
    }

    /// The source's level dropped; its latch stays until acknowledged.
    pub fn clear_raw(&mut self, source: u32) {
        self.raw &= !source;
    }

    pub fn acknowledge(&mut self, mask: u32) {
        self.status &= !mask;
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn enabled(&self) -> u32 {
        self.enabled
    }

    pub fn read(&self, offset: u16) -> u8 {
        let value = match offset & 0x0C {
            regs::STATUS => self.status,
            regs::ENABLED => self.enabled,
            regs::RAW => self.raw,
            _ => 0,
        };
        (value >> byte_shift(offset)) as u8
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        let shift = byte_shift(offset);
        let bits = (value as u32) << shift;
        match offset & 0x0C {
            regs::STATUS => self.acknowledge(bits),
            regs::ENABLED => self.enabled = (self.enabled & !(0xFF << shift)) | bits,
            _ => {}
        }
    }

    pub fn save(&self, w: &mut Writer) {
        w.u32(self.status);
        w.u32(self.enabled);
        w.u32(self.raw);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        Ok(Self {
            status: r.u32(s)?,
            enabled: r.u32(s)?,
            raw: r.u32(s)?,
        })
    }
}

fn byte_shift(offset: u16) -> u32 {
    (offset as u32 & 0x03) * 8
}
