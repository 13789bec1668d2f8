//! Real-time clock (port range 0x8, MMIO 0xF80000)
//!
//! Counts seconds, minutes, hours and days from a periodic event on the
//! 32 kHz domain. Loads are applied as soon as the load bit is written.
//!
//! Register layout:
//! - 0x00/0x04/0x08: seconds, minutes, hours
//! - 0x0C-0x0D: day count
//! - 0x10/0x14/0x18: alarm seconds, minutes, hours
//! - 0x20: control (bit 0 tick, bits 1-5 interrupt enables, bit 6 load)
//! - 0x24/0x28/0x2C/0x30-0x31: load values
//! - 0x34: interrupt status, write 1 to clear
//! - 0x3C: revision
//! - 0x40: load status (always complete)

use super::interrupt::sources;
use super::PortCtx;
use crate::error::RestoreError;
use crate::scheduler::ClockId;
use crate::snapshot::{Reader, Writer};

/// Ticks per second at 32.768 kHz
pub const TICKS_PER_SECOND: u64 = 32768;

/// Tag of the once-per-second event
pub const TICK_EVENT: u8 = 0;

const REVISION: u32 = 0x0001_0500;

mod ctrl {
    pub const ENABLE: u8 = 1 << 0;
    pub const LOAD: u8 = 1 << 6;
}

/// Interrupt status bits
pub mod irq {
    pub const SECOND: u8 = 1 << 0;
    pub const MINUTE: u8 = 1 << 1;
    pub const HOUR: u8 = 1 << 2;
    pub const DAY: u8 = 1 << 3;
    pub const ALARM: u8 = 1 << 4;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Time {
    sec: u8,
    min: u8,
    hour: u8,
    day: u16,
}

impl Time {
    /// Advance one second and report which fields rolled over.
    fn tick(&mut self) -> u8 {
        let mut events = irq::SECOND;
        self.sec += 1;
        if self.sec < 60 {
            return events;
        }
        self.sec = 0;
        self.min += 1;
        events |= irq::MINUTE;
        if self.min < 60 {
            return events;
        }
        self.min = 0;
        self.hour += 1;
        events |= irq::HOUR;
        if self.hour < 24 {
            return events;
        }
        self.hour = 0;
        self.day = self.day.wrapping_add(1);
        events | irq::DAY
    }

    fn save(&self, w: &mut Writer) {
        w.u8(self.sec);
        w.u8(self.min);
        w.u8(self.hour);
        w.u16(self.day);
    }

    fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        Ok(Self {
            sec: r.u8(s)?,
            min: r.u8(s)?,
            hour: r.u8(s)?,
            day: r.u16(s)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealTimeClock {
    control: u8,
    interrupt: u8,
    counter: Time,
    load: Time,
    alarm: Time,
}

impl RealTimeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all registers and start the seconds event.
    pub fn reset(&mut self, ctx: &mut PortCtx<'_>) {
        *self = Self::new();
        ctx.schedule(TICK_EVENT, ClockId::Clock32K, TICKS_PER_SECOND, TICKS_PER_SECOND);
    }

    /// Current (seconds, minutes, hours, days)
    pub fn time(&self) -> (u8, u8, u8, u16) {
        let t = self.counter;
        (t.sec, t.min, t.hour, t.day)
    }

    pub fn on_event(&mut self, tag: u8, ctx: &mut PortCtx<'_>) {
        if tag != TICK_EVENT || self.control & ctrl::ENABLE == 0 {
            return;
        }
        let mut events = self.counter.tick();
        let (c, a) = (self.counter, self.alarm);
        if (c.sec, c.min, c.hour) == (a.sec, a.min, a.hour) {
            events |= irq::ALARM;
        }
        events &= self.control >> 1;
        if events != 0 {
            self.interrupt |= events;
            ctx.intc.raise(sources::RTC);
        }
    }

    pub fn read(&self, offset: u16) -> u8 {
        let offset = offset & 0xFF;
        match offset {
            0x00 => self.counter.sec,
            0x04 => self.counter.min,
            0x08 => self.counter.hour,
            0x0C => self.counter.day as u8,
            0x0D => (self.counter.day >> 8) as u8,
            0x10 => self.alarm.sec,
            0x14 => self.alarm.min,
            0x18 => self.alarm.hour,
            0x20 => self.control,
            0x24 => self.load.sec,
            0x28 => self.load.min,
            0x2C => self.load.hour,
            0x30 => self.load.day as u8,
            0x31 => (self.load.day >> 8) as u8,
            0x34 => self.interrupt,
            0x3C..=0x3F => (REVISION >> ((offset & 3) * 8)) as u8,
            _ => 0x00,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8, ctx: &mut PortCtx<'_>) {
        match offset & 0xFF {
            0x10 => self.alarm.sec = value & 63,
            0x14 => self.alarm.min = value & 63,
            0x18 => self.alarm.hour = value & 31,
            0x20 => {
                self.control = value & !ctrl::LOAD;
                if value & ctrl::LOAD != 0 {
                    self.counter = self.load;
                    tracing::debug!(
                        day = self.load.day,
                        hour = self.load.hour,
                        min = self.load.min,
                        sec = self.load.sec,
                        "rtc loaded"
                    );
                }
            }
            0x24 => self.load.sec = value & 63,
            0x28 => self.load.min = value & 63,
            0x2C => self.load.hour = value & 31,
            0x30 => self.load.day = (self.load.day & 0xFF00) | value as u16,
            0x31 => self.load.day = (self.load.day & 0x00FF) | (value as u16) << 8,
            0x34 => {
                self.interrupt &= !value;
                if self.interrupt == 0 {
                    ctx.intc.clear_raw(sources::RTC);
                }
            }
            _ => {}
        }
    }

    pub fn save(&self, w: &mut Writer) {
        w.u8(self.control);
        w.u8(self.interrupt);
        self.counter.save(w);
        self.load.save(w);
        self.alarm.save(w);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        Ok(Self {
            control: r.u8(s)?,
            interrupt: r.u8(s)?,
            counter: Time::load(r)?,
            load: Time::load(r)?,
            alarm: Time::load(r)?,
        })
    }
}
