//! eZ80 CPU tests
//!
//! - instructions.rs: individual instructions and instruction families
//! - modes.rs: ADL/Z80 mode behavior, suffixes, mixed-mode calls, interrupts
//!
//! Programs are hand assembled and poked into RAM at 0xD00000 unless a test
//! says otherwise.
//!
//! # References
//! - eZ80 CPU User Manual (Zilog UM0077)
//! - CEmu (https://github.com/CE-Programming/CEmu)

use super::*;
use crate::bus::Bus;
use crate::config::MachineConfig;
use crate::scheduler::Scheduler;

mod instructions;
mod modes;

// ========== Test Helpers ==========

const CODE: u32 = 0xD00000;

fn bus() -> Bus {
    let sched = Scheduler::new(MachineConfig::default().scheduler_rates()).unwrap();
    let mut bus = Bus::new(sched);
    bus.reset();
    bus
}

/// CPU in ADL mode at CODE with a long stack in RAM and `program` loaded
fn adl(program: &[u8]) -> (Cpu, Bus) {
    let mut cpu = Cpu::new();
    let mut bus = bus();
    cpu.mbase = 0xD0;
    cpu.spl = 0xD1A000;
    cpu.sps = 0x2000;
    cpu.set_pc(CODE, true);
    load(&mut bus, CODE, program);
    (cpu, bus)
}

/// CPU in Z80 mode with MBASE = 0xD0, PC = 0x0100 and `program` at 0xD00100
fn z80(program: &[u8]) -> (Cpu, Bus) {
    let mut cpu = Cpu::new();
    let mut bus = bus();
    cpu.mbase = 0xD0;
    cpu.spl = 0xD1A000;
    cpu.sps = 0x2000;
    cpu.set_pc(0x0100, false);
    load(&mut bus, 0xD00100, program);
    (cpu, bus)
}

fn load(bus: &mut Bus, at: u32, bytes: &[u8]) {
    for (i, b) in bytes.iter().enumerate() {
        bus.poke(at + i as u32, *b);
    }
}

fn step(cpu: &mut Cpu, bus: &mut Bus) -> u32 {
    cpu.step(bus).unwrap()
}

fn steps(cpu: &mut Cpu, bus: &mut Bus, count: usize) {
    for _ in 0..count {
        step(cpu, bus);
    }
}

/// Latch `source` in the interrupt controller with it enabled
fn raise_irq(bus: &mut Bus, source: u32) {
    for byte in 0..4 {
        bus.port_write_debug(0x5004 + byte, (source >> (byte * 8)) as u8);
    }
    bus.ports.peripherals_mut().intc.raise(source);
}
