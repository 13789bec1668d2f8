//! Emulation worker thread
//!
//! [`Worker::spawn`] moves a [`Machine`] onto its own thread. Everything
//! else talks to it through a command channel; commands are applied only
//! between two instructions. [`DebugEvent`]s flow back on a second channel
//! once the boundary where they were detected has passed. Readers that only
//! want to look use [`Worker::status`], a copy refreshed at boundaries.
//!
//! The stop flag is checked before every instruction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cpu::{Cpu, Register};
use crate::debug::{BreakFlags, DebugEvent, DebugState, PortFlags, StepKind};
use crate::error::{DebugError, Error, Result};
use crate::machine::Machine;
use crate::snapshot::Snapshot;

/// Emulated time run between throttle checks and status refreshes
const TIME_SLICE: Duration = Duration::from_millis(10);
/// How long an idle worker waits for a command before rechecking the stop flag
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Channel a command answers on
pub type Reply<T> = Sender<T>;

/// Requests understood by the worker. Ones that produce a result carry the
/// channel to answer on.
pub enum Command {
    Pause,
    Resume,
    Step(StepKind),
    Reset,
    SetPc { address: u32, adl: bool, reply: Reply<Result<(), DebugError>> },
    RunUntilToggle { address: u32, reply: Reply<Result<(), DebugError>> },
    BreakpointSet { address: u32, flags: BreakFlags, enabled: bool, reply: Reply<Result<(), DebugError>> },
    BreakpointAdd { address: u32, flags: BreakFlags, reply: Reply<Result<(), DebugError>> },
    BreakpointRemove { address: u32, reply: Reply<bool> },
    Breakpoints { reply: Reply<Vec<(u32, BreakFlags)>> },
    PortMonitorSet { port: u32, flags: PortFlags, enabled: bool, reply: Reply<Result<(), DebugError>> },
    PortMonitorRemove { port: u32, reply: Reply<Result<bool, DebugError>> },
    PortMonitors { reply: Reply<Vec<(u16, PortFlags)>> },
    PortReadDebug { port: u32, reply: Reply<Result<u8, DebugError>> },
    PortWriteDebug { port: u32, value: u8, reply: Reply<Result<(), DebugError>> },
    Peek { address: u32, len: usize, reply: Reply<Vec<u8>> },
    Poke { address: u32, bytes: Vec<u8> },
    SetRegister { reg: Register, value: u32 },
    Save { reply: Reply<Result<Snapshot>> },
    Restore { snapshot: Snapshot, reply: Reply<Result<()>> },
    LoadRom { image: Vec<u8>, reply: Reply<Result<()>> },
    ExportRom { reply: Reply<Result<Vec<u8>>> },
    SetThrottle { enabled: bool, speed_percent: u32, reply: Reply<Result<()>> },
    /// Leave the loop. Sent by [`Worker::shutdown`] so a waiting worker wakes.
    Shutdown,
}

/// Copy of the machine's externally visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub cpu: Cpu,
    pub state: DebugState,
    pub cycles: u64,
    pub instructions: u64,
    /// Set once the core desynced; the worker keeps serving commands but
    /// executes nothing until reset or restore.
    pub desync: Option<String>,
}

impl Status {
    fn of(machine: &Machine) -> Self {
        Self {
            cpu: machine.cpu().clone(),
            state: machine.debug_state(),
            cycles: machine.cycles(),
            instructions: machine.instructions(),
            desync: machine.desync().map(|d| d.to_string()),
        }
    }
}

pub struct Worker {
    commands: Sender<Command>,
    events: Receiver<DebugEvent>,
    status: Arc<Mutex<Status>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Machine>>,
}

impl Worker {
    pub fn spawn(machine: Machine) -> Self {
        let (commands, command_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let status = Arc::new(Mutex::new(Status::of(&machine)));
        let stop = Arc::new(AtomicBool::new(false));

        let mut worker_loop = WorkerLoop {
            machine,
            commands: command_rx,
            events: event_tx,
            status: Arc::clone(&status),
            stop: Arc::clone(&stop),
            pacer: Pacer::new(),
        };
        let thread = thread::Builder::new()
            .name("ce-core".into())
            .spawn(move || {
                worker_loop.run();
                worker_loop.machine
            })
            .ok();
        if thread.is_none() {
            tracing::error!("failed to spawn emulation thread");
        }

        Self {
            commands,
            events,
            status,
            stop,
            thread,
        }
    }

    /// Queue a command without waiting for it.
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::WorkerGone)
    }

    /// Send a command built around a fresh reply channel and wait for the answer.
    pub fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, answer) = mpsc::channel();
        self.send(build(reply))?;
        answer.recv().map_err(|_| Error::WorkerGone)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn step(&self, kind: StepKind) -> Result<()> {
        self.send(Command::Step(kind))
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn breakpoint_set(&self, address: u32, flags: BreakFlags, enabled: bool) -> Result<()> {
        Ok(self.request(|reply| Command::BreakpointSet { address, flags, enabled, reply })??)
    }

    pub fn port_monitor_set(&self, port: u32, flags: PortFlags, enabled: bool) -> Result<()> {
        Ok(self.request(|reply| Command::PortMonitorSet { port, flags, enabled, reply })??)
    }

    pub fn save(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Save { reply })?
    }

    pub fn restore(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::Restore { snapshot, reply })?
    }

    /// Next debugger event, if one is waiting.
    pub fn try_event(&self) -> Option<DebugEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for a debugger event.
    pub fn wait_event(&self, timeout: Duration) -> Option<DebugEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Latest boundary copy of the machine state.
    pub fn status(&self) -> Status {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop the thread within one instruction and take the machine back.
    pub fn shutdown(mut self) -> Result<Machine> {
        self.stop.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        let thread = self.thread.take().ok_or(Error::WorkerGone)?;
        thread.join().map_err(|_| Error::WorkerGone)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Keeps emulated time from running ahead of wall-clock time.
struct Pacer {
    anchor: Instant,
    /// Emulated time since `anchor`, in nanoseconds
    emulated_ns: u128,
}

impl Pacer {
    fn new() -> Self {
        Self {
            anchor: Instant::now(),
            emulated_ns: 0,
        }
    }

    fn restart(&mut self) {
        *self = Self::new();
    }

    fn account(&mut self, cycles: u64, rate: u64) {
        if rate != 0 {
            self.emulated_ns += cycles as u128 * 1_000_000_000 / rate as u128;
        }
    }

    /// How long to sleep so wall time matches emulated time at `speed_percent`.
    fn lag(&self, speed_percent: u32) -> Option<Duration> {
        let target_ns = self.emulated_ns * 100 / speed_percent.max(1) as u128;
        let target = Duration::from_nanos(target_ns.min(u64::MAX as u128) as u64);
        target.checked_sub(self.anchor.elapsed()).filter(|d| !d.is_zero())
    }
}

struct WorkerLoop {
    machine: Machine,
    commands: Receiver<Command>,
    events: Sender<DebugEvent>,
    status: Arc<Mutex<Status>>,
    stop: Arc<AtomicBool>,
    pacer: Pacer,
}

impl WorkerLoop {
    fn run(&mut self) {
        tracing::debug!("emulation worker started");
        while !self.stop.load(Ordering::Acquire) {
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }

            if self.idle() {
                self.publish();
                match self.commands.recv_timeout(IDLE_POLL) {
                    Ok(command) => self.apply(command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                self.pacer.restart();
                continue;
            }

            self.run_slice();
            self.publish();
            if self.machine.config().throttle {
                self.pace();
            } else {
                self.pacer.restart();
            }
        }
        self.publish();
        tracing::debug!("emulation worker stopped");
    }

    /// Wait out the throttle lag on the command channel. Any command ends
    /// the wait early.
    fn pace(&mut self) {
        let Some(lag) = self.pacer.lag(self.machine.config().speed_percent) else {
            return;
        };
        match self.commands.recv_timeout(lag) {
            Ok(command) => self.apply(command),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }

    fn idle(&self) -> bool {
        self.machine.is_paused() || self.machine.desync().is_some() || !self.machine.rom_loaded()
    }

    /// Run one time slice of emulated time, or less if the machine pauses.
    fn run_slice(&mut self) {
        let rate = self.machine.cpu_rate();
        let budget = (rate as u128 * TIME_SLICE.as_nanos() / 1_000_000_000) as u64;
        let start = self.machine.cycles();
        while self.machine.cycles() - start < budget {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.machine.step_instruction() {
                Ok(Some(event)) => {
                    self.emit(event);
                    break;
                }
                Ok(None) if self.machine.is_paused() => break,
                Ok(None) => {}
                // Already logged with the execution history
                Err(_) => break,
            }
        }
        self.pacer.account(self.machine.cycles() - start, rate);
    }

    fn emit(&self, event: DebugEvent) {
        self.publish();
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let status = Status::of(&self.machine);
        match self.status.lock() {
            Ok(mut slot) => *slot = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    fn apply(&mut self, command: Command) {
        let m = &mut self.machine;
        // A closed reply channel only means the requester stopped waiting
        match command {
            Command::Pause => {
                if !m.is_paused() {
                    let event = m.pause();
                    self.emit(event);
                }
            }
            Command::Resume => {
                m.resume();
                self.pacer.restart();
            }
            Command::Step(kind) => match kind {
                StepKind::In => m.step_in(),
                StepKind::Over => m.step_over(),
                StepKind::Next => m.step_next(),
                StepKind::Out => m.step_out(),
            },
            Command::Reset => m.reset(),
            Command::SetPc { address, adl, reply } => {
                let _ = reply.send(m.set_pc(address, adl));
            }
            Command::RunUntilToggle { address, reply } => {
                let _ = reply.send(m.run_until_toggle(address));
            }
            Command::BreakpointSet { address, flags, enabled, reply } => {
                let _ = reply.send(m.breakpoint_set(address, flags, enabled));
            }
            Command::BreakpointAdd { address, flags, reply } => {
                let _ = reply.send(m.breakpoint_add(address, flags));
            }
            Command::BreakpointRemove { address, reply } => {
                let _ = reply.send(m.breakpoint_remove(address));
            }
            Command::Breakpoints { reply } => {
                let _ = reply.send(m.breakpoints());
            }
            Command::PortMonitorSet { port, flags, enabled, reply } => {
                let _ = reply.send(m.port_monitor_set(port, flags, enabled));
            }
            Command::PortMonitorRemove { port, reply } => {
                let _ = reply.send(m.port_monitor_remove(port));
            }
            Command::PortMonitors { reply } => {
                let _ = reply.send(m.port_monitors());
            }
            Command::PortReadDebug { port, reply } => {
                let _ = reply.send(m.port_read_debug(port));
            }
            Command::PortWriteDebug { port, value, reply } => {
                let _ = reply.send(m.port_write_debug(port, value));
            }
            Command::Peek { address, len, reply } => {
                let bytes = (0..len as u32).map(|i| m.peek(address.wrapping_add(i))).collect();
                let _ = reply.send(bytes);
            }
            Command::Poke { address, bytes } => {
                for (i, b) in bytes.into_iter().enumerate() {
                    m.poke(address.wrapping_add(i as u32), b);
                }
            }
            Command::SetRegister { reg, value } => m.set_register(reg, value),
            Command::Save { reply } => {
                if let Some(event) = m.settle() {
                    self.emit(event);
                }
                let _ = reply.send(self.machine.save());
            }
            Command::Restore { snapshot, reply } => {
                let result = match m.restore_and_settle(&snapshot) {
                    Ok(settled) => {
                        if let Some(event) = settled {
                            self.emit(event);
                        }
                        self.pacer.restart();
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::LoadRom { image, reply } => {
                let _ = reply.send(m.load_rom(&image));
            }
            Command::ExportRom { reply } => {
                let mut image = Vec::new();
                let result = m.export_rom(&mut image).map(|()| image);
                let _ = reply.send(result);
            }
            Command::Shutdown => self.stop.store(true, Ordering::Release),
            Command::SetThrottle { enabled, speed_percent, reply } => {
                let result = m.set_throttle(enabled, speed_percent).map_err(Error::from);
                self.pacer.restart();
                let _ = reply.send(result);
            }
        }
        self.publish();
    }
}
