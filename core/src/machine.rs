//! Machine orchestrator
//!
//! One [`Machine`] owns the register file, the bus (memory, port dispatcher,
//! scheduler) and the debugger. Every operation goes through it, so several
//! independent machines can live side by side.
//!
//! # Instruction boundary
//!
//! [`Machine::step_instruction`] is the unit of work:
//! 1. EXEC breakpoint or Run-Until marker at the next PC pauses before
//!    anything runs
//! 2. the CPU executes one instruction (or takes an interrupt)
//! 3. the scheduler advances by exactly the cycles that instruction cost
//! 4. memory/port hits and program requests latched during the instruction
//!    pause the machine, then step completion is checked
//!
//! Debugger commands are applied between two calls, never inside one.

use std::io::{Read, Write};

use crate::bus::Bus;
use crate::config::MachineConfig;
use crate::cpu::{Cpu, Register};
use crate::debug::{
    BreakFlags, BreakReason, DebugEvent, DebugState, Debugger, PortFlags, StepKind, ADDRESS_LIMIT,
};
use crate::decode::{self, Flow};
use crate::error::{ConfigError, CoreDesync, DebugError, Error, RestoreError, Result, SaveError};
use crate::memory::Memory;
use crate::peripherals::{PortHandler, ProgramRequest};
use crate::scheduler::{ClockId, Scheduler};
use crate::snapshot::{self, Reader, Snapshot, Writer};

/// Longest eZ80 encoding: suffix + DD/FD + opcode + d + 24-bit immediate
const MAX_INSN_LEN: usize = 6;

/// Ring of recently executed PCs for crash diagnostics
#[derive(Debug, Clone)]
struct ExecutionHistory {
    entries: Vec<u32>,
    /// Next slot to write
    write_idx: usize,
    /// Entries written, capped at capacity
    count: usize,
}

impl ExecutionHistory {
    fn new(capacity: usize) -> Self {
        Self {
            entries: vec![0; capacity.max(1)],
            write_idx: 0,
            count: 0,
        }
    }

    fn record(&mut self, pc: u32) {
        let capacity = self.entries.len();
        self.entries[self.write_idx] = pc;
        self.write_idx = (self.write_idx + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    /// Oldest to newest
    fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let capacity = self.entries.len();
        let start = if self.count < capacity { 0 } else { self.write_idx };
        (0..self.count).map(move |i| self.entries[(start + i) % capacity])
    }

    fn clear(&mut self) {
        self.write_idx = 0;
        self.count = 0;
    }
}

pub struct Machine {
    cpu: Cpu,
    bus: Bus,
    debugger: Debugger,
    history: ExecutionHistory,
    config: MachineConfig,
    /// Hash of the loaded ROM, `None` until a ROM is loaded
    rom_hash: Option<u64>,
    /// Set once the core desyncs; cleared only by reset, restore or a new ROM
    desync: Option<CoreDesync>,
    /// Instructions (and halted slots) executed since reset
    instructions: u64,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self> {
        config.validate()?;
        let sched = Scheduler::new(config.scheduler_rates())?;
        let mut bus = Bus::new(sched);
        bus.reset();
        Ok(Self {
            cpu: Cpu::new(),
            bus,
            debugger: Debugger::new(config.attach_paused),
            history: ExecutionHistory::new(config.history_len),
            config,
            rom_hash: None,
            desync: None,
            instructions: 0,
        })
    }

    /// Copy `image` into flash and reset.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<()> {
        self.bus.mem.load_rom(image)?;
        let hash = snapshot::rom_hash(self.bus.mem.flash());
        self.rom_hash = Some(hash);
        tracing::info!(bytes = image.len(), hash = format_args!("{hash:016x}"), "ROM loaded");
        self.reset();
        Ok(())
    }

    pub fn rom_loaded(&self) -> bool {
        self.rom_hash.is_some()
    }

    /// Power-on reset of the register file, RAM, peripherals and scheduler.
    /// Flash, breakpoints, port monitors and the debugger state survive.
    pub fn reset(&mut self) {
        tracing::info!("reset");
        self.cpu.reset();
        self.bus.reset();
        self.history.clear();
        self.desync = None;
        self.instructions = 0;
    }

    // ========== Execution ==========

    /// Run one instruction boundary. Returns the event that paused the
    /// machine, if any. Does nothing while PAUSED.
    ///
    /// Once the core desyncs every further call fails with the same error.
    pub fn step_instruction(&mut self) -> Result<Option<DebugEvent>, CoreDesync> {
        if let Some(desync) = &self.desync {
            return Err(desync.clone());
        }
        if self.debugger.is_paused() {
            return Ok(None);
        }

        let pc = self.cpu.pc;
        let insn_addr = self.cpu.code_addr(0);
        let exempt = self.debugger.exec_exempt(pc);
        if !exempt && !self.cpu.halted {
            if self.debugger.at_run_until(insn_addr) {
                return Ok(Some(self.stop(BreakReason::RunUntil, insn_addr)));
            }
            if self.bus.breakpoints().hits(insn_addr, BreakFlags::EXEC) {
                return Ok(Some(self.stop(BreakReason::Exec, insn_addr)));
            }
        }

        let flow = match self.debugger.state() {
            DebugState::Stepping(_) => self.decode_at_pc().flow,
            _ => Flow::Other,
        };

        let cycles = match self.cpu.step(&mut self.bus) {
            Ok(cycles) => cycles,
            Err(desync) => return Err(self.fail(desync)),
        };
        self.bus.advance(cycles as u64);
        self.history.record(insn_addr);
        self.instructions += 1;

        if let Some(event) = self.bus.take_hit() {
            self.debugger.pause(event);
            return Ok(Some(event));
        }
        if let Some(request) = self.bus.take_program_request() {
            if request == ProgramRequest::Abort {
                tracing::warn!(pc = format_args!("{insn_addr:#08x}"), "program aborted");
            }
            return Ok(Some(self.stop(BreakReason::ProgramRequest, insn_addr)));
        }
        if self.debugger.step_done(flow, self.cpu.pc, self.cpu.sp()) {
            let at = self.cpu.code_addr(0);
            return Ok(Some(self.stop(BreakReason::StepComplete, at)));
        }
        Ok(None)
    }

    /// Execute until the machine pauses or `max_instructions` boundaries
    /// have passed.
    pub fn run(&mut self, max_instructions: u64) -> Result<Option<DebugEvent>> {
        if !self.rom_loaded() {
            return Err(Error::NoRom);
        }
        for _ in 0..max_instructions {
            if self.debugger.is_paused() {
                break;
            }
            if let Some(event) = self.step_instruction()? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn stop(&mut self, reason: BreakReason, address: u32) -> DebugEvent {
        let event = DebugEvent::new(reason, address);
        self.debugger.pause(event);
        event
    }

    fn fail(&mut self, desync: CoreDesync) -> CoreDesync {
        tracing::error!(%desync, history = %self.dump_history(), "core desync, emulation halted");
        self.desync = Some(desync.clone());
        desync
    }

    fn decode_at_pc(&mut self) -> decode::Decoded {
        let mut bytes = [0u8; MAX_INSN_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.bus.peek(self.cpu.code_addr(i as u32));
        }
        decode::decode(|i| bytes.get(i as usize).copied().unwrap_or(0), self.cpu.adl)
    }

    /// Recently executed instruction addresses, oldest first
    pub fn history(&self) -> Vec<u32> {
        self.history.iter().collect()
    }

    pub fn dump_history(&self) -> String {
        let mut output = String::from("Execution history (oldest to newest):\n");
        for pc in self.history.iter() {
            output.push_str(&format!("  PC={pc:06X}\n"));
        }
        output.push_str(&format!(
            "Current PC: {:06X} ADL={} cycles={}\n",
            self.cpu.pc,
            self.cpu.adl,
            self.bus.cycles()
        ));
        output
    }

    // ========== Debugger ==========

    pub fn debug_state(&self) -> DebugState {
        self.debugger.state()
    }

    pub fn is_paused(&self) -> bool {
        self.debugger.is_paused()
    }

    pub fn desync(&self) -> Option<&CoreDesync> {
        self.desync.as_ref()
    }

    /// Pause at the current boundary.
    pub fn pause(&mut self) -> DebugEvent {
        let at = self.cpu.code_addr(0);
        self.stop(BreakReason::PauseRequest, at)
    }

    pub fn resume(&mut self) {
        tracing::debug!(pc = format_args!("{:#08x}", self.cpu.pc), "resumed");
        self.debugger.resume(self.cpu.pc);
    }

    pub fn step_in(&mut self) {
        self.begin_step(StepKind::In);
    }

    pub fn step_over(&mut self) {
        self.begin_step(StepKind::Over);
    }

    pub fn step_next(&mut self) {
        self.begin_step(StepKind::Next);
    }

    pub fn step_out(&mut self) {
        self.begin_step(StepKind::Out);
    }

    fn begin_step(&mut self, kind: StepKind) {
        let decoded = self.decode_at_pc();
        tracing::debug!(?kind, pc = format_args!("{:#08x}", self.cpu.pc), "step");
        self.debugger.begin_step(
            kind,
            self.cpu.pc,
            self.cpu.sp(),
            decoded.flow,
            decoded.len,
            self.cpu.pc_mask(),
        );
    }

    /// Abort a step in progress into PAUSED. Returns the pause event if a
    /// step was actually cut short.
    pub fn settle(&mut self) -> Option<DebugEvent> {
        match self.debugger.state() {
            DebugState::Stepping(_) => {
                let at = self.cpu.code_addr(0);
                Some(self.stop(BreakReason::PauseRequest, at))
            }
            _ => None,
        }
    }

    /// Redirect execution. `adl` selects the mode the next fetch runs in.
    pub fn set_pc(&mut self, address: u32, adl: bool) -> Result<(), DebugError> {
        if address > ADDRESS_LIMIT {
            return Err(DebugError::InvalidAddress(address));
        }
        self.cpu.set_pc(address, adl);
        Ok(())
    }

    pub fn run_until_toggle(&mut self, address: u32) -> Result<(), DebugError> {
        self.debugger.toggle_run_until(address)
    }

    pub fn breakpoint_set(&mut self, address: u32, flags: BreakFlags, enabled: bool) -> Result<(), DebugError> {
        self.bus.breakpoints_mut().set(address, flags, enabled)
    }

    pub fn breakpoint_add(&mut self, address: u32, flags: BreakFlags) -> Result<(), DebugError> {
        self.bus.breakpoints_mut().add(address, flags)
    }

    pub fn breakpoint_remove(&mut self, address: u32) -> bool {
        self.bus.breakpoints_mut().remove(address)
    }

    pub fn breakpoints(&self) -> Vec<(u32, BreakFlags)> {
        self.bus.breakpoints().entries()
    }

    pub fn port_monitor_set(&mut self, port: u32, flags: PortFlags, enabled: bool) -> Result<(), DebugError> {
        self.bus.ports.monitors_mut().set(port, flags, enabled)
    }

    pub fn port_monitor_remove(&mut self, port: u32) -> Result<bool, DebugError> {
        self.bus.ports.monitors_mut().remove(port)
    }

    pub fn port_monitors(&self) -> Vec<(u16, PortFlags)> {
        self.bus.ports.monitors().entries()
    }

    pub fn port_read_debug(&mut self, port: u32) -> Result<u8, DebugError> {
        let port = u16::try_from(port).map_err(|_| DebugError::InvalidPort(port))?;
        Ok(self.bus.port_read_debug(port))
    }

    pub fn port_write_debug(&mut self, port: u32, value: u8) -> Result<(), DebugError> {
        let port = u16::try_from(port).map_err(|_| DebugError::InvalidPort(port))?;
        self.bus.port_write_debug(port, value);
        Ok(())
    }

    /// Read memory without cost, breakpoints or side effects.
    pub fn peek(&mut self, address: u32) -> u8 {
        self.bus.peek(address)
    }

    /// Write memory without cost or breakpoints. Flash is writable.
    pub fn poke(&mut self, address: u32, value: u8) {
        self.bus.poke(address, value);
    }

    pub fn register(&self, reg: Register) -> u32 {
        self.cpu.register(reg)
    }

    pub fn set_register(&mut self, reg: Register, value: u32) {
        self.cpu.set_register(reg, value);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Replace the handler serving a port range.
    pub fn set_map(&mut self, range: u8, handler: PortHandler) -> PortHandler {
        self.bus.ports.set_map(range, handler, &mut self.bus.sched)
    }

    /// Completed debug console lines written by the program since the last call
    pub fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.bus.ports.lines_mut().console)
    }

    // ========== Timing ==========

    /// CPU cycles since reset
    pub fn cycles(&self) -> u64 {
        self.bus.cycles()
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Current CPU clock in Hz
    pub fn cpu_rate(&self) -> u64 {
        self.bus.sched.rate(ClockId::Cpu)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn set_throttle(&mut self, enabled: bool, speed_percent: u32) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&speed_percent) {
            return Err(ConfigError::SpeedOutOfRange(speed_percent));
        }
        self.config.throttle = enabled;
        self.config.speed_percent = speed_percent;
        tracing::debug!(enabled, speed_percent, "throttle");
        Ok(())
    }

    // ========== State Persistence ==========

    /// Capture the whole machine. A step in progress is aborted first.
    pub fn save(&mut self) -> Result<Snapshot> {
        let hash = self.rom_hash.ok_or(Error::NoRom)?;
        self.settle();

        let mut payload = Writer::new();
        section(&mut payload, |w| self.cpu.save(w));
        section(&mut payload, |w| self.bus.sched.save(w));
        section(&mut payload, |w| self.bus.ports.save(w));
        section(&mut payload, |w| {
            w.u64(self.bus.cycles());
            w.u64(self.instructions);
        });
        section(&mut payload, |w| self.bus.mem.save_ram(w));
        section(&mut payload, |w| self.bus.mem.save_flash(w));

        let snapshot = Snapshot::new(hash, payload.finish());
        tracing::info!(bytes = snapshot.len(), "state saved");
        Ok(snapshot)
    }

    /// Replace the whole machine with `snapshot`. Every section is decoded
    /// before anything live changes, so a failure leaves the machine as it was.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.restore_and_settle(snapshot).map(|_| ())
    }

    /// Restore, also returning the pause event for a step the restore cut
    /// short. Nothing is settled when the snapshot is refused.
    pub fn restore_and_settle(&mut self, snapshot: &Snapshot) -> Result<Option<DebugEvent>> {
        let hash = self.rom_hash.ok_or(Error::NoRom)?;
        let mut r = Reader::new(snapshot.payload(hash)?);

        let cpu = Cpu::load(&mut Reader::new(r.block("cpu")?))?;
        let sched = Scheduler::load(&mut Reader::new(r.block("scheduler")?))?;
        let ports = self.bus.ports.load(&mut Reader::new(r.block("peripherals")?))?;
        let mut meta = Reader::new(r.block("metadata")?);
        let cycles = meta.u64("metadata")?;
        let instructions = meta.u64("metadata")?;
        let mem = Memory::load(
            &mut Reader::new(r.block("ram")?),
            &mut Reader::new(r.block("flash")?),
        )?;
        if r.remaining() != 0 {
            return Err(RestoreError::corrupt("payload", format!("{} trailing bytes", r.remaining())).into());
        }

        let settled = self.settle();
        self.cpu = cpu;
        self.bus.install(mem, ports, sched, cycles);
        self.instructions = instructions;
        self.history.clear();
        self.desync = None;
        tracing::info!(cycles, "state restored");
        Ok(settled)
    }

    pub fn save_to(&mut self, destination: impl Write) -> Result<()> {
        self.save()?.write_to(destination)?;
        Ok(())
    }

    pub fn restore_from(&mut self, source: impl Read) -> Result<()> {
        let snapshot = Snapshot::read_from(source)?;
        self.restore(&snapshot)
    }

    /// Write the full flash image out.
    pub fn export_rom(&self, mut destination: impl Write) -> Result<()> {
        if !self.rom_loaded() {
            return Err(Error::NoRom);
        }
        destination.write_all(self.bus.mem.flash()).map_err(SaveError::Io)?;
        Ok(())
    }
}

fn section(payload: &mut Writer, fill: impl FnOnce(&mut Writer)) {
    let mut w = Writer::new();
    fill(&mut w);
    payload.block(&w.finish());
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("{:#08x}", self.cpu.pc))
            .field("adl", &self.cpu.adl)
            .field("state", &self.debugger.state())
            .field("cycles", &self.bus.cycles())
            .field("rom_loaded", &self.rom_loaded())
            .finish_non_exhaustive()
    }
}
