//! Port dispatcher
//!
//! A 16-bit port id splits into a range selector (bits 15..12) and a 12-bit
//! offset. The dispatcher owns the 16-entry range map and hands each access
//! to the handler mapped at its range. The debugger's port monitors sit on
//! top of every instrumented access:
//!
//! - reads run first, then a READ monitor latches a hit
//! - writes to a FROZEN port are dropped before any handler runs and latch
//!   nothing; other writes run, then a WRITE monitor latches a hit
//!
//! `read_debug`/`write_debug` skip the monitors entirely.
//!
//! The same ranges are visible in memory space (see [`mmio_port`]).

use crate::debug::{BreakReason, DebugEvent, PortFlags, PortMonitorTable};
use crate::error::RestoreError;
use crate::peripherals::{PortHandler, Peripherals, SystemLines, RANGE_COUNT};
use crate::scheduler::{EventTarget, Scheduler};
use crate::snapshot::{Reader, Writer};

/// Per-range read cost in CPU cycles
pub const READ_CYCLES: [u64; RANGE_COUNT] = [2, 2, 2, 4, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3];
/// Per-range write cost in CPU cycles
pub const WRITE_CYCLES: [u64; RANGE_COUNT] = [2, 2, 2, 4, 2, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3];

/// Split a port id into (range, offset)
#[inline]
pub fn split(port: u16) -> (u8, u16) {
    ((port >> 12) as u8, port & 0x0FFF)
}

/// Port id aliased by a memory address, if it falls in a mapped MMIO window.
///
/// ```text
/// 0xE00000-0xE3FFFF  ranges 1-4
/// 0xF00000-0xFAFFFF  ranges 5-15
/// 0xFF0000-0xFFFFFF  range 0
/// ```
pub fn mmio_port(addr: u32) -> Option<u16> {
    let addr = addr & 0xFF_FFFF;
    let range = match addr {
        0xE0_0000..=0xE3_FFFF => 1 + ((addr >> 16) & 0x3),
        0xF0_0000..=0xFA_FFFF => 5 + ((addr >> 16) & 0xF),
        0xFF_0000..=0xFF_FFFF => 0,
        _ => return None,
    };
    Some(((range << 12) | (addr & 0xFFF)) as u16)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDispatcher {
    periph: Peripherals,
    monitors: PortMonitorTable,
    /// First monitor hit since the last `take_hit`
    hit: Option<DebugEvent>,
}

impl PortDispatcher {
    pub fn new() -> Self {
        Self {
            periph: Peripherals::new(),
            monitors: PortMonitorTable::new(),
            hit: None,
        }
    }

    pub fn read(&mut self, port: u16, sched: &mut Scheduler) -> u8 {
        let (range, offset) = split(port);
        let value = self
            .periph
            .with_handler(range, sched, |h, ctx| h.read(offset, ctx));
        if self.monitors.get(port).contains(PortFlags::READ) {
            self.latch(BreakReason::PortRead, port);
        }
        value
    }

    pub fn write(&mut self, port: u16, value: u8, sched: &mut Scheduler) {
        let flags = self.monitors.get(port);
        if flags.contains(PortFlags::FREEZE) {
            tracing::trace!(port = format_args!("{port:#06x}"), value, "frozen port write dropped");
            return;
        }
        let (range, offset) = split(port);
        self.periph
            .with_handler(range, sched, |h, ctx| h.write(offset, value, ctx));
        if flags.contains(PortFlags::WRITE) {
            self.latch(BreakReason::PortWrite, port);
        }
    }

    /// Read without side effects and without consulting monitors.
    pub fn read_debug(&self, port: u16, sched: &mut Scheduler) -> u8 {
        let (range, offset) = split(port);
        self.periph.peek(range, offset, sched)
    }

    /// Write through to the handler, ignoring FREEZE and WRITE monitors.
    pub fn write_debug(&mut self, port: u16, value: u8, sched: &mut Scheduler) {
        let (range, offset) = split(port);
        self.periph
            .with_handler(range, sched, |h, ctx| h.write(offset, value, ctx));
    }

    /// Replace the handler for `range`. The outgoing handler's pending events
    /// are cancelled and the new one starts from its power-on state.
    pub fn set_map(&mut self, range: u8, handler: PortHandler, sched: &mut Scheduler) -> PortHandler {
        let range = range & 0xF;
        sched.cancel_range(range);
        let old = std::mem::replace(&mut self.periph.handlers[range as usize], handler);
        self.periph.with_handler(range, sched, |h, ctx| h.reset(ctx));
        tracing::debug!(range, from = old.name(), to = self.periph.handlers[range as usize].name(), "port range remapped");
        old
    }

    pub fn handler(&self, range: u8) -> &PortHandler {
        &self.periph.handlers[range as usize & 0xF]
    }

    /// Hand a fired scheduler event to its owning handler.
    pub fn deliver(&mut self, target: EventTarget, sched: &mut Scheduler) {
        self.periph
            .with_handler(target.range, sched, |h, ctx| h.on_event(target.tag, ctx));
    }

    /// Power-on reset of every handler. Monitors survive.
    pub fn reset(&mut self, sched: &mut Scheduler) {
        self.periph.reset(sched);
        self.hit = None;
    }

    fn latch(&mut self, reason: BreakReason, port: u16) {
        if self.hit.is_none() {
            self.hit = Some(DebugEvent::new(reason, port as u32));
        }
    }

    pub fn take_hit(&mut self) -> Option<DebugEvent> {
        self.hit.take()
    }

    pub fn monitors(&self) -> &PortMonitorTable {
        &self.monitors
    }

    pub fn monitors_mut(&mut self) -> &mut PortMonitorTable {
        &mut self.monitors
    }

    pub fn lines(&self) -> &SystemLines {
        &self.periph.lines
    }

    pub fn lines_mut(&mut self) -> &mut SystemLines {
        &mut self.periph.lines
    }

    pub fn peripherals(&self) -> &Peripherals {
        &self.periph
    }

    #[cfg(test)]
    pub(crate) fn peripherals_mut(&mut self) -> &mut Peripherals {
        &mut self.periph
    }

    pub fn irq_line(&self) -> bool {
        self.periph.irq_line()
    }

    pub fn save(&self, w: &mut Writer) {
        self.periph.save(w);
    }

    /// Rebuild from a snapshot, keeping this dispatcher's monitors.
    pub fn load(&self, r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        Ok(Self {
            periph: Peripherals::load(r)?,
            monitors: self.monitors.clone(),
            hit: None,
        })
    }
}

impl Default for PortDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::peripherals::RegisterLatch;

    fn rig() -> (PortDispatcher, Scheduler) {
        let mut sched = Scheduler::new(MachineConfig::default().scheduler_rates()).unwrap();
        let mut ports = PortDispatcher::new();
        ports.reset(&mut sched);
        (ports, sched)
    }

    #[test]
    fn test_mmio_aliases() {
        assert_eq!(mmio_port(0xE00010), Some(0x1010));
        assert_eq!(mmio_port(0xE30FFF), Some(0x4FFF));
        assert_eq!(mmio_port(0xE40000), None);
        assert_eq!(mmio_port(0xF00004), Some(0x5004));
        assert_eq!(mmio_port(0xF20030), Some(0x7030));
        assert_eq!(mmio_port(0xFA0000), Some(0xF000));
        assert_eq!(mmio_port(0xFB0000), None);
        assert_eq!(mmio_port(0xFF0001), Some(0x0001));
        assert_eq!(mmio_port(0xD00000), None);
    }

    #[test]
    fn test_ranges_are_isolated() {
        let (mut ports, mut sched) = rig();
        for range in 0..RANGE_COUNT as u8 {
            ports.set_map(range, PortHandler::Latch(RegisterLatch::new()), &mut sched);
        }
        for range in 0..RANGE_COUNT as u16 {
            ports.write(range << 12 | 0x123, range as u8 + 1, &mut sched);
        }
        for range in 0..RANGE_COUNT as u16 {
            assert_eq!(ports.read(range << 12 | 0x123, &mut sched), range as u8 + 1);
            assert_eq!(ports.read(range << 12 | 0x124, &mut sched), 0);
        }
    }

    #[test]
    fn test_set_map_returns_previous_and_cancels_events() {
        let (mut ports, mut sched) = rig();
        assert!(sched.is_active(EventTarget::new(0x8, 0)));
        let old = ports.set_map(0x8, PortHandler::Unmapped, &mut sched);
        assert_eq!(old.name(), "rtc");
        assert!(!sched.is_active(EventTarget::new(0x8, 0)));
        assert_eq!(ports.handler(0x8).name(), "unmapped");
    }

    #[test]
    fn test_read_monitor_latches_after_read() {
        let (mut ports, mut sched) = rig();
        ports.monitors_mut().set(0xB024, PortFlags::READ, true).unwrap();
        assert_eq!(ports.read(0xB024, &mut sched), 0xFF);
        assert_eq!(ports.take_hit(), Some(DebugEvent::new(BreakReason::PortRead, 0xB024)));
        assert_eq!(ports.take_hit(), None);
    }

    #[test]
    fn test_frozen_write_is_dropped_without_event() {
        let (mut ports, mut sched) = rig();
        ports
            .monitors_mut()
            .set(0xB024, PortFlags::FREEZE | PortFlags::WRITE, true)
            .unwrap();
        ports.write(0xB024, 0x10, &mut sched);
        assert_eq!(ports.take_hit(), None);
        assert_eq!(ports.read_debug(0xB024, &mut sched), 0xFF);

        ports.monitors_mut().set(0xB024, PortFlags::FREEZE, false).unwrap();
        ports.write(0xB024, 0x10, &mut sched);
        assert_eq!(ports.take_hit(), Some(DebugEvent::new(BreakReason::PortWrite, 0xB024)));
        assert_eq!(ports.read_debug(0xB024, &mut sched), 0x10);
    }

    #[test]
    fn test_debug_access_bypasses_monitors() {
        let (mut ports, mut sched) = rig();
        ports
            .monitors_mut()
            .set(0xB024, PortFlags::all(), true)
            .unwrap();
        ports.write_debug(0xB024, 0x42, &mut sched);
        assert_eq!(ports.read_debug(0xB024, &mut sched), 0x42);
        assert_eq!(ports.take_hit(), None);
    }

    #[test]
    fn test_first_hit_wins() {
        let (mut ports, mut sched) = rig();
        ports.monitors_mut().set(0x1000, PortFlags::WRITE, true).unwrap();
        ports.monitors_mut().set(0x1001, PortFlags::WRITE, true).unwrap();
        ports.write(0x1000, 1, &mut sched);
        ports.write(0x1001, 1, &mut sched);
        assert_eq!(ports.take_hit().map(|e| e.address), Some(0x1000));
    }

    #[test]
    fn test_load_keeps_monitors() {
        let (mut ports, mut sched) = rig();
        ports.write(0xB024, 0x33, &mut sched);
        let mut w = Writer::new();
        ports.save(&mut w);
        let bytes = w.finish();

        let (mut other, _) = rig();
        other.monitors_mut().set(0x5000, PortFlags::READ, true).unwrap();
        let restored = other.load(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(restored.read_debug(0xB024, &mut sched), 0x33);
        assert_eq!(restored.monitors().len(), 1);
    }
}
