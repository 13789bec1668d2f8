//! System bus for TI-84 Plus CE
//!
//! The bus sits between the CPU and everything it can reach. It decodes
//! addresses, charges each access its cycle cost, routes the MMIO windows
//! through the port dispatcher and checks memory breakpoints.
//!
//! Memory Map (24-bit address space):
//! ```text
//! 0x000000 - 0xBFFFFF : Flash (4MB, mirrored)
//! 0xC00000 - 0xCFFFFF : Unmapped
//! 0xD00000 - 0xD657FF : RAM (including VRAM)
//! 0xD65800 - 0xDFFFFF : Unmapped
//! 0xE00000 - 0xFFFFFF : Memory-mapped I/O
//! ```
//!
//! Instruction fetches cost cycles but never trip breakpoints. `peek`/`poke`
//! do neither.
//!
//! Reference: CEmu (https://github.com/CE-Programming/CEmu)

use crate::debug::{BreakFlags, BreakReason, BreakpointTable, DebugEvent};
use crate::memory::{addr, Memory, Region};
use crate::peripherals::ProgramRequest;
use crate::ports::{self, PortDispatcher};
use crate::scheduler::Scheduler;

pub struct Bus {
    pub mem: Memory,
    pub ports: PortDispatcher,
    pub sched: Scheduler,
    breakpoints: BreakpointTable,
    /// First memory breakpoint hit since the last `take_hit`
    hit: Option<DebugEvent>,
    /// CPU cycles charged since reset
    cycles: u64,
}

impl Bus {
    /// Wait states per memory region
    pub const FLASH_READ_CYCLES: u64 = 10;
    pub const RAM_READ_CYCLES: u64 = 4;
    pub const RAM_WRITE_CYCLES: u64 = 2;
    pub const UNMAPPED_CYCLES: u64 = 2;

    pub fn new(sched: Scheduler) -> Self {
        Self {
            mem: Memory::new(),
            ports: PortDispatcher::new(),
            sched,
            breakpoints: BreakpointTable::new(),
            hit: None,
            cycles: 0,
        }
    }

    /// Power-on reset: RAM, scheduler queue and every port handler.
    /// Flash contents and breakpoints survive.
    pub fn reset(&mut self) {
        self.mem.reset();
        self.sched.reset();
        self.ports.reset(&mut self.sched);
        self.hit = None;
        self.cycles = 0;
        self.sync_lines();
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn add_cycles(&mut self, count: u64) {
        self.cycles += count;
    }

    // ========== CPU accesses ==========

    /// Fetch an instruction byte.
    pub fn fetch_byte(&mut self, addr: u32) -> u8 {
        self.load(addr & addr::ADDR_MASK)
    }

    pub fn read_byte(&mut self, addr: u32) -> u8 {
        let addr = addr & addr::ADDR_MASK;
        let value = self.load(addr);
        if self.breakpoints.hits(addr, BreakFlags::READ) {
            self.latch(BreakReason::Read, addr);
        }
        value
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) {
        let addr = addr & addr::ADDR_MASK;
        match Region::of(addr) {
            Region::Ram => {
                self.cycles += Self::RAM_WRITE_CYCLES;
                self.mem.write_byte(addr, value);
            }
            Region::Flash => {
                self.cycles += Self::FLASH_READ_CYCLES;
                if !self.mem.write_byte(addr, value) {
                    tracing::trace!(addr = format_args!("{addr:#08x}"), "store to locked flash ignored");
                }
            }
            Region::Mmio => match ports::mmio_port(addr) {
                Some(port) => self.port_write(port, value),
                None => self.cycles += Self::UNMAPPED_CYCLES,
            },
            Region::Unmapped => self.cycles += Self::UNMAPPED_CYCLES,
        }

        let lines = self.ports.lines_mut();
        if lines.stack_limit != 0 && addr == lines.stack_limit {
            tracing::warn!(addr = format_args!("{addr:#08x}"), "stack limit reached");
            lines.protection_status |= 1;
            lines.nmi = true;
        }
        if self.breakpoints.hits(addr, BreakFlags::WRITE) {
            self.latch(BreakReason::Write, addr);
        }
    }

    fn load(&mut self, addr: u32) -> u8 {
        match Region::of(addr) {
            Region::Flash => {
                self.cycles += Self::FLASH_READ_CYCLES;
                self.mem.read_byte(addr)
            }
            Region::Ram => {
                self.cycles += Self::RAM_READ_CYCLES;
                self.mem.read_byte(addr)
            }
            Region::Mmio => match ports::mmio_port(addr) {
                Some(port) => self.port_read(port),
                None => {
                    self.cycles += Self::UNMAPPED_CYCLES;
                    0
                }
            },
            Region::Unmapped => {
                self.cycles += Self::UNMAPPED_CYCLES;
                0
            }
        }
    }

    pub fn read_word(&mut self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Read a 24-bit value
    pub fn read_long(&mut self, addr: u32) -> u32 {
        let lo = self.read_word(addr) as u32;
        lo | (self.read_byte(addr.wrapping_add(2)) as u32) << 16
    }

    /// Write a 24-bit value
    pub fn write_long(&mut self, addr: u32, value: u32) {
        self.write_word(addr, value as u16);
        self.write_byte(addr.wrapping_add(2), (value >> 16) as u8);
    }

    // ========== I/O ports ==========

    /// IN from a port (also reached through the MMIO windows)
    pub fn port_read(&mut self, port: u16) -> u8 {
        let (range, _) = ports::split(port);
        self.cycles += ports::READ_CYCLES[range as usize];
        self.ports.read(port, &mut self.sched)
    }

    /// OUT to a port
    pub fn port_write(&mut self, port: u16, value: u8) {
        let (range, _) = ports::split(port);
        self.cycles += ports::WRITE_CYCLES[range as usize];
        self.ports.write(port, value, &mut self.sched);
        self.sync_lines();
    }

    /// Port read for the debugger: no cost, no monitors, no side effects.
    pub fn port_read_debug(&mut self, port: u16) -> u8 {
        self.ports.read_debug(port, &mut self.sched)
    }

    /// Port write for the debugger: no cost, no monitors, ignores FREEZE.
    pub fn port_write_debug(&mut self, port: u16, value: u8) {
        self.ports.write_debug(port, value, &mut self.sched);
        self.sync_lines();
    }

    /// Flash write permission follows the control port's unlock state.
    fn sync_lines(&mut self) {
        let unlocked = self.ports.lines().flash_unlocked;
        self.mem.set_flash_writable(unlocked);
    }

    // ========== Debugger access ==========

    /// Read memory without cost or breakpoints.
    pub fn peek(&mut self, addr: u32) -> u8 {
        let addr = addr & addr::ADDR_MASK;
        match ports::mmio_port(addr) {
            Some(port) => self.port_read_debug(port),
            None => self.mem.read_byte(addr),
        }
    }

    /// Write memory without cost or breakpoints, ignoring flash protection.
    pub fn poke(&mut self, addr: u32, value: u8) {
        let addr = addr & addr::ADDR_MASK;
        match ports::mmio_port(addr) {
            Some(port) => self.port_write_debug(port, value),
            None => self.mem.poke(addr, value),
        }
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointTable {
        &mut self.breakpoints
    }

    fn latch(&mut self, reason: BreakReason, addr: u32) {
        if self.hit.is_none() {
            self.hit = Some(DebugEvent::new(reason, addr));
        }
    }

    /// Breakpoint or port monitor hit during the last instruction, memory first.
    pub fn take_hit(&mut self) -> Option<DebugEvent> {
        let port = self.ports.take_hit();
        self.hit.take().or(port)
    }

    pub fn take_program_request(&mut self) -> Option<ProgramRequest> {
        self.ports.lines_mut().program_request.take()
    }

    // ========== Interrupt lines ==========

    pub fn irq_line(&self) -> bool {
        self.ports.irq_line()
    }

    /// Consume a pending NMI request
    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.ports.lines_mut().nmi)
    }

    // ========== Time ==========

    /// Advance the scheduler by `cycles` CPU cycles and run every event
    /// that came due, in order.
    pub fn advance(&mut self, cycles: u64) {
        for target in self.sched.advance(cycles) {
            self.ports.deliver(target, &mut self.sched);
        }
        self.sync_lines();
    }

    /// Swap in restored state. Breakpoints and port monitors stay.
    pub(crate) fn install(&mut self, mem: Memory, ports: PortDispatcher, sched: Scheduler, cycles: u64) {
        self.mem = mem;
        self.ports = ports;
        self.sched = sched;
        self.cycles = cycles;
        self.hit = None;
        self.sync_lines();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("cycles", &self.cycles)
            .field("breakpoints", &self.breakpoints.len())
            .finish_non_exhaustive()
    }
}
