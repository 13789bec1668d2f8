//! Debugger instrumentation: breakpoint and port monitor tables, the
//! RUNNING/PAUSED/STEPPING state machine and step completion tracking.
//!
//! The tables are consulted by the bus (memory READ/WRITE), the port
//! dispatcher (port READ/WRITE/FREEZE) and the machine loop (EXEC). This
//! module only keeps the bookkeeping; it never touches the CPU.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::decode::Flow;
use crate::error::DebugError;

/// Highest valid breakpoint address
pub const ADDRESS_LIMIT: u32 = 0xFF_FFFF;
/// Highest valid port id
pub const PORT_LIMIT: u32 = 0xFFFF;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct BreakFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PortFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Drop writes to the port
        const FREEZE = 1 << 2;
    }
}

/// Memory breakpoints, at most one entry per address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointTable {
    entries: BTreeMap<u32, BreakFlags>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear `flags` at `address`. Clearing the last flag drops the entry.
    pub fn set(&mut self, address: u32, flags: BreakFlags, enabled: bool) -> Result<(), DebugError> {
        if address > ADDRESS_LIMIT {
            return Err(DebugError::InvalidAddress(address));
        }
        update(&mut self.entries, address, flags, enabled);
        Ok(())
    }

    /// Insert a new entry; fails if the address already has one.
    pub fn add(&mut self, address: u32, flags: BreakFlags) -> Result<(), DebugError> {
        if address > ADDRESS_LIMIT {
            return Err(DebugError::InvalidAddress(address));
        }
        if self.entries.contains_key(&address) {
            return Err(DebugError::DuplicateBreakpoint(address));
        }
        update(&mut self.entries, address, flags, true);
        Ok(())
    }

    pub fn remove(&mut self, address: u32) -> bool {
        self.entries.remove(&address).is_some()
    }

    pub fn get(&self, address: u32) -> BreakFlags {
        self.entries.get(&address).copied().unwrap_or_default()
    }

    /// Whether an access of kind `flag` at `address` should trap
    #[inline]
    pub fn hits(&self, address: u32, flag: BreakFlags) -> bool {
        !self.entries.is_empty() && self.get(address).contains(flag)
    }

    pub fn entries(&self) -> Vec<(u32, BreakFlags)> {
        self.entries.iter().map(|(&a, &f)| (a, f)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Port monitors, keyed by full 16-bit port id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMonitorTable {
    entries: BTreeMap<u16, PortFlags>,
}

impl PortMonitorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, port: u32, flags: PortFlags, enabled: bool) -> Result<(), DebugError> {
        let port = valid_port(port)?;
        update(&mut self.entries, port, flags, enabled);
        Ok(())
    }

    pub fn remove(&mut self, port: u32) -> Result<bool, DebugError> {
        let port = valid_port(port)?;
        Ok(self.entries.remove(&port).is_some())
    }

    #[inline]
    pub fn get(&self, port: u16) -> PortFlags {
        if self.entries.is_empty() {
            return PortFlags::empty();
        }
        self.entries.get(&port).copied().unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<(u16, PortFlags)> {
        self.entries.iter().map(|(&p, &f)| (p, f)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn valid_port(port: u32) -> Result<u16, DebugError> {
    u16::try_from(port).map_err(|_| DebugError::InvalidPort(port))
}

fn update<K: Ord, F: bitflags::Flags + Copy>(
    entries: &mut BTreeMap<K, F>,
    key: K,
    flags: F,
    enabled: bool,
) {
    if enabled {
        if flags.is_empty() {
            return;
        }
        let entry = entries.entry(key).or_insert_with(F::empty);
        entry.insert(flags);
    } else if let Some(entry) = entries.get_mut(&key) {
        entry.remove(flags);
        if entry.is_empty() {
            entries.remove(&key);
        }
    }
}

// ========== State machine ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// One instruction, following calls
    In,
    /// One instruction; calls run to their return
    Over,
    /// Like `Over`, and repeating forms run until they fall through
    Next,
    /// Until the current subroutine returns
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    Running,
    Paused,
    Stepping(StepKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakReason {
    Exec,
    Read,
    Write,
    PortRead,
    PortWrite,
    RunUntil,
    StepComplete,
    PauseRequest,
    ProgramRequest,
}

/// Why the machine stopped and where: a memory address, a port id or the PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugEvent {
    pub reason: BreakReason,
    pub address: u32,
}

impl DebugEvent {
    pub fn new(reason: BreakReason, address: u32) -> Self {
        Self { reason, address }
    }
}

/// Where a step began and what ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    kind: StepKind,
    /// Stack pointer before the first instruction
    start_sp: u32,
    /// Resume address for OVER/NEXT across a call or loop
    until_pc: Option<u32>,
}

/// Debugger state owned by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debugger {
    state: DebugState,
    run_until: Option<u32>,
    /// EXEC breakpoint at this PC is not re-trapped on resume
    skip_exec_at: Option<u32>,
    step: Option<StepPlan>,
}

impl Debugger {
    pub fn new(attach_paused: bool) -> Self {
        Self {
            state: if attach_paused {
                DebugState::Paused
            } else {
                DebugState::Running
            },
            run_until: None,
            skip_exec_at: None,
            step: None,
        }
    }

    pub fn state(&self) -> DebugState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == DebugState::Paused
    }

    pub fn run_until(&self) -> Option<u32> {
        self.run_until
    }

    /// Set the marker at `address`, or clear it if it is already there.
    pub fn toggle_run_until(&mut self, address: u32) -> Result<(), DebugError> {
        if address > ADDRESS_LIMIT {
            return Err(DebugError::InvalidAddress(address));
        }
        self.run_until = match self.run_until {
            Some(a) if a == address => None,
            _ => Some(address),
        };
        Ok(())
    }

    /// Enter PAUSED. Drops any step in progress and the run-until marker.
    pub fn pause(&mut self, event: DebugEvent) {
        tracing::debug!(reason = ?event.reason, address = format_args!("{:#08x}", event.address), "paused");
        self.state = DebugState::Paused;
        self.step = None;
        self.run_until = None;
    }

    /// Leave PAUSED, not re-trapping an EXEC breakpoint at `pc`.
    pub fn resume(&mut self, pc: u32) {
        self.state = DebugState::Running;
        self.step = None;
        self.skip_exec_at = Some(pc);
    }

    /// Begin a step from `pc`. `flow` and `len` describe the instruction there.
    pub fn begin_step(&mut self, kind: StepKind, pc: u32, sp: u32, flow: Flow, len: u32, pc_mask: u32) {
        let follows = (pc + len) & pc_mask;
        let until_pc = match (kind, flow) {
            (StepKind::Over | StepKind::Next, Flow::Call | Flow::Rst) => Some(follows),
            (StepKind::Next, Flow::RepeatBlock | Flow::Djnz) => Some(follows),
            _ => None,
        };
        self.state = DebugState::Stepping(kind);
        self.step = Some(StepPlan {
            kind,
            start_sp: sp,
            until_pc,
        });
        self.skip_exec_at = Some(pc);
    }

    /// Consume the resume exemption if it applies to `pc`.
    pub fn exec_exempt(&mut self, pc: u32) -> bool {
        match self.skip_exec_at.take() {
            Some(a) => a == pc,
            None => false,
        }
    }

    /// The instruction about to execute is at the run-until marker.
    pub fn at_run_until(&self, pc: u32) -> bool {
        self.run_until == Some(pc)
    }

    /// Called after an instruction of class `flow` completed while
    /// stepping. Returns true when the step is done.
    pub fn step_done(&self, flow: Flow, pc: u32, sp: u32) -> bool {
        let Some(plan) = self.step else {
            return false;
        };
        match plan.kind {
            StepKind::In => true,
            StepKind::Over | StepKind::Next => match plan.until_pc {
                None => true,
                Some(target) => pc == target && sp >= plan.start_sp,
            },
            StepKind::Out => flow == Flow::Ret && sp > plan.start_sp,
        }
    }
}
