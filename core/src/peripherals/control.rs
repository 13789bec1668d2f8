//! Control ports (port range 0x0, MMIO 0xFF0000, OUT0/IN0 0x00nn)
//!
//! System-level registers: power, CPU speed, LCD enable, flash unlock,
//! privileged boundary, protected range and the stack limit. The offset is
//! mirrored every 256 bytes.

use super::PortCtx;
use crate::config::CpuSpeed;
use crate::error::RestoreError;
use crate::scheduler::ClockId;
use crate::snapshot::{Reader, Writer};

mod regs {
    pub const POWER: u16 = 0x00;
    pub const CPU_SPEED: u16 = 0x01;
    pub const BATTERY_STATUS: u16 = 0x02;
    pub const DEVICE_TYPE: u16 = 0x03;
    pub const CONTROL_FLAGS: u16 = 0x05;
    /// Bit 2 opens the protected ports (including flash unlock)
    pub const UNLOCK_STATUS: u16 = 0x06;
    pub const FIXED_7F: u16 = 0x08;
    pub const LCD_ENABLE: u16 = 0x0D;
    pub const USB_CONTROL: u16 = 0x0F;
    pub const FIXED_80: u16 = 0x1C;
    /// 0x1D-0x1F
    pub const PRIVILEGED: u16 = 0x1D;
    /// 0x20-0x22
    pub const PROTECTED_START: u16 = 0x20;
    /// 0x23-0x25
    pub const PROTECTED_END: u16 = 0x23;
    pub const FLASH_UNLOCK: u16 = 0x28;
    pub const GENERAL: u16 = 0x29;
    /// 0x3A-0x3C
    pub const STACK_LIMIT: u16 = 0x3A;
    pub const PROTECTION_STATUS: u16 = 0x3D;
    pub const PROTECTION_CLEAR: u16 = 0x3E;
}

/// Default protected window; start == end protects nothing
const PROTECTED_DEFAULT: u32 = 0xD1887C;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPorts {
    power: u8,
    cpu_speed: u8,
    control_flags: u8,
    unlock_status: u8,
    lcd_enable: u8,
    usb_control: u8,
    flash_unlock: u8,
    general: u8,
    privileged: u32,
    protected_start: u32,
    protected_end: u32,
    stack_limit: u32,
}

impl ControlPorts {
    pub fn new() -> Self {
        Self {
            power: 0x00,
            cpu_speed: CpuSpeed::Mhz6 as u8,
            control_flags: 0x00,
            unlock_status: 0x00,
            lcd_enable: 0x00,
            usb_control: 0x02,
            flash_unlock: 0x00,
            general: 0x00,
            privileged: 0xFFFFFF,
            protected_start: PROTECTED_DEFAULT,
            protected_end: PROTECTED_DEFAULT,
            stack_limit: 0,
        }
    }

    /// Power-on values. The speed register follows whatever rate the CPU
    /// domain was reset to.
    pub fn reset(&mut self, ctx: &mut PortCtx<'_>) {
        *self = Self::new();
        if let Some(speed) = CpuSpeed::from_hz(ctx.sched.rate(ClockId::Cpu)) {
            self.cpu_speed = speed as u8;
        }
        self.sync_lines(ctx);
    }

    pub fn read(&mut self, offset: u16, ctx: &mut PortCtx<'_>) -> u8 {
        self.peek(offset, ctx)
    }

    pub fn peek(&self, offset: u16, ctx: &PortCtx<'_>) -> u8 {
        match offset & 0xFF {
            regs::POWER => self.power,
            regs::CPU_SPEED => self.cpu_speed,
            // Battery check always reports complete
            regs::BATTERY_STATUS => 0,
            regs::DEVICE_TYPE => 0,
            regs::CONTROL_FLAGS => self.control_flags,
            regs::UNLOCK_STATUS => self.unlock_status,
            regs::FIXED_7F => 0x7F,
            regs::LCD_ENABLE => self.lcd_enable,
            // VBUS valid, so the OS believes it has power
            regs::USB_CONTROL => self.usb_control | 0xC0,
            regs::FIXED_80 => 0x80,
            o @ 0x1D..=0x1F => byte_of(self.privileged, o - regs::PRIVILEGED),
            o @ 0x20..=0x22 => byte_of(self.protected_start, o - regs::PROTECTED_START),
            o @ 0x23..=0x25 => byte_of(self.protected_end, o - regs::PROTECTED_END),
            regs::FLASH_UNLOCK => self.flash_unlock,
            regs::GENERAL => self.general,
            o @ 0x3A..=0x3C => byte_of(self.stack_limit, o - regs::STACK_LIMIT),
            regs::PROTECTION_STATUS => ctx.lines.protection_status,
            _ => 0x00,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8, ctx: &mut PortCtx<'_>) {
        match offset & 0xFF {
            regs::POWER => {
                let power = value & 0x93;
                if power != self.power {
                    tracing::debug!(from = self.power, to = power, "power register");
                }
                self.power = power;
            }
            regs::CPU_SPEED => {
                self.cpu_speed = value & 0x13;
                let speed = CpuSpeed::from_bits(value);
                if let Err(err) = ctx.sched.set_rate(ClockId::Cpu, speed.hz()) {
                    tracing::warn!(%err, "cpu speed rejected");
                } else {
                    tracing::debug!(mhz = speed.hz() / 1_000_000, "cpu speed select");
                }
            }
            regs::CONTROL_FLAGS => self.control_flags = value & 0x1F,
            regs::UNLOCK_STATUS => {
                self.unlock_status = value & 0x07;
                if !self.protected_ports_unlocked() {
                    self.flash_unlock &= !0x04;
                }
            }
            regs::LCD_ENABLE => {
                let lcd = (value & 0x0F) << 4 | (value & 0x0F);
                if lcd != self.lcd_enable {
                    tracing::debug!(on = lcd & 0x08 != 0, "lcd enable");
                }
                self.lcd_enable = lcd;
            }
            regs::USB_CONTROL => self.usb_control = value & 0x03,
            o @ 0x1D..=0x1F => set_byte(&mut self.privileged, o - regs::PRIVILEGED, value),
            o @ 0x20..=0x22 => {
                set_byte(&mut self.protected_start, o - regs::PROTECTED_START, value)
            }
            o @ 0x23..=0x25 => set_byte(&mut self.protected_end, o - regs::PROTECTED_END, value),
            regs::FLASH_UNLOCK if self.protected_ports_unlocked() => {
                self.flash_unlock = (self.flash_unlock | 0x05) & value;
            }
            regs::GENERAL => self.general = value & 0x01,
            o @ 0x3A..=0x3C => set_byte(&mut self.stack_limit, o - regs::STACK_LIMIT, value),
            regs::PROTECTION_CLEAR => ctx.lines.protection_status &= !value,
            _ => {}
        }
        self.sync_lines(ctx);
    }

    fn sync_lines(&self, ctx: &mut PortCtx<'_>) {
        let unlocked = self.flash_unlocked();
        if unlocked != ctx.lines.flash_unlocked {
            tracing::debug!(unlocked, "flash write enable");
        }
        ctx.lines.flash_unlocked = unlocked;
        ctx.lines.stack_limit = self.stack_limit;
    }

    pub fn protected_ports_unlocked(&self) -> bool {
        self.unlock_status & 0x04 != 0
    }

    pub fn flash_unlocked(&self) -> bool {
        self.protected_ports_unlocked() && self.flash_unlock & 0x04 != 0
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcd_enable != 0
    }

    /// Code above the privileged boundary and outside the protected window
    pub fn is_unprivileged(&self, pc: u32) -> bool {
        pc > self.privileged && (pc < self.protected_start || pc > self.protected_end)
    }

    pub fn save(&self, w: &mut Writer) {
        for b in [
            self.power,
            self.cpu_speed,
            self.control_flags,
            self.unlock_status,
            self.lcd_enable,
            self.usb_control,
            self.flash_unlock,
            self.general,
        ] {
            w.u8(b);
        }
        w.u24(self.privileged);
        w.u24(self.protected_start);
        w.u24(self.protected_end);
        w.u24(self.stack_limit);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        Ok(Self {
            power: r.u8(s)?,
            cpu_speed: r.u8(s)?,
            control_flags: r.u8(s)?,
            unlock_status: r.u8(s)?,
            lcd_enable: r.u8(s)?,
            usb_control: r.u8(s)?,
            flash_unlock: r.u8(s)?,
            general: r.u8(s)?,
            privileged: r.u24(s)?,
            protected_start: r.u24(s)?,
            protected_end: r.u24(s)?,
            stack_limit: r.u24(s)?,
        })
    }
}

impl Default for ControlPorts {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_of(value: u32, index: u16) -> u8 {
    (value >> (index * 8)) as u8
}

fn set_byte(value: &mut u32, index: u16, byte: u8) {
    let shift = index * 8;
    *value = (*value & !(0xFF << shift)) | ((byte as u32) << shift);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::peripherals::{InterruptController, SystemLines};
    use crate::scheduler::Scheduler;

    struct Rig {
        sched: Scheduler,
        intc: InterruptController,
        lines: SystemLines,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                sched: Scheduler::new(MachineConfig::default().scheduler_rates()).unwrap(),
                intc: InterruptController::new(),
                lines: SystemLines::default(),
            }
        }

        fn ctx(&mut self) -> PortCtx<'_> {
            PortCtx {
                sched: &mut self.sched,
                intc: &mut self.intc,
                lines: &mut self.lines,
                range: 0,
            }
        }
    }

    #[test]
    fn test_reset_reports_configured_speed() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        cp.reset(&mut rig.ctx());
        assert_eq!(cp.read(regs::CPU_SPEED, &mut rig.ctx()), CpuSpeed::Mhz48 as u8);
        assert_eq!(cp.read(0x1D, &mut rig.ctx()), 0xFF);
        assert_eq!(cp.read(0x22, &mut rig.ctx()), 0xD1);
    }

    #[test]
    fn test_speed_write_retunes_cpu_domain() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        cp.write(regs::CPU_SPEED, 0x10, &mut rig.ctx());
        assert_eq!(rig.sched.rate(ClockId::Cpu), 6_000_000);
        assert_eq!(cp.read(regs::CPU_SPEED, &mut rig.ctx()), 0x10);
        cp.write(regs::CPU_SPEED, 0x02, &mut rig.ctx());
        assert_eq!(rig.sched.rate(ClockId::Cpu), 24_000_000);
    }

    #[test]
    fn test_flash_unlock_needs_protected_ports() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        cp.write(regs::FLASH_UNLOCK, 0x04, &mut rig.ctx());
        assert!(!rig.lines.flash_unlocked);

        cp.write(regs::UNLOCK_STATUS, 0x04, &mut rig.ctx());
        cp.write(regs::FLASH_UNLOCK, 0x04, &mut rig.ctx());
        assert!(rig.lines.flash_unlocked);

        cp.write(regs::UNLOCK_STATUS, 0x00, &mut rig.ctx());
        assert!(!rig.lines.flash_unlocked);
        assert_eq!(cp.read(regs::FLASH_UNLOCK, &mut rig.ctx()) & 0x04, 0);
    }

    #[test]
    fn test_stack_limit_mirrors_to_lines() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        cp.write(0x3A, 0x00, &mut rig.ctx());
        cp.write(0x3B, 0xA0, &mut rig.ctx());
        cp.write(0x3C, 0xD1, &mut rig.ctx());
        assert_eq!(rig.lines.stack_limit, 0xD1A000);
        assert_eq!(cp.read(0x13C, &mut rig.ctx()), 0xD1);
    }

    #[test]
    fn test_protection_status_write_one_to_clear() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        rig.lines.protection_status = 0x03;
        assert_eq!(cp.read(regs::PROTECTION_STATUS, &mut rig.ctx()), 0x03);
        cp.write(regs::PROTECTION_CLEAR, 0x01, &mut rig.ctx());
        assert_eq!(rig.lines.protection_status, 0x02);
    }

    #[test]
    fn test_masked_registers() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        cp.write(regs::POWER, 0xFF, &mut rig.ctx());
        cp.write(regs::LCD_ENABLE, 0x0B, &mut rig.ctx());
        assert_eq!(cp.read(regs::POWER, &mut rig.ctx()), 0x93);
        assert_eq!(cp.read(regs::LCD_ENABLE, &mut rig.ctx()), 0xBB);
        assert!(cp.lcd_enabled());
        assert_eq!(cp.read(regs::FIXED_7F, &mut rig.ctx()), 0x7F);
    }

    #[test]
    fn test_privilege_window() {
        let mut rig = Rig::new();
        let mut cp = ControlPorts::new();
        assert!(!cp.is_unprivileged(0x123456));
        for (i, b) in [0xFF, 0xFF, 0x3F].into_iter().enumerate() {
            cp.write(0x1D + i as u16, b, &mut rig.ctx());
        }
        assert!(cp.is_unprivileged(0xD00000));
        assert!(!cp.is_unprivileged(0x100000));
    }
}
