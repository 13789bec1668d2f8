//! TI-84 Plus CE Peripheral Emulation
//!
//! The port space is split into 16 ranges of 4 KiB each. Every range is
//! served by one [`PortHandler`], a closed set of variants fixed for this
//! machine revision:
//! - 0x0: Control ports (power, CPU speed, flash unlock, protection)
//! - 0x5: Interrupt controller
//! - 0x7: General purpose timers
//! - 0x8: Real-time clock
//! - 0xB: Backlight
//! - 0xF: Debug port (program-issued debugger commands, console)
//! - everything else: plain register latches
//!
//! Handlers never see the CPU or the bus. They reach the rest of the
//! machine only through [`PortCtx`]: the scheduler for timed events, the
//! interrupt controller, and the shared [`SystemLines`].

pub mod backlight;
pub mod control;
pub mod debug_port;
pub mod interrupt;
pub mod latch;
pub mod rtc;
pub mod timer;

pub use backlight::Backlight;
pub use control::ControlPorts;
pub use debug_port::{DebugPort, ProgramRequest};
pub use interrupt::InterruptController;
pub use latch::RegisterLatch;
pub use rtc::RealTimeClock;
pub use timer::GeneralTimers;

use crate::error::RestoreError;
use crate::scheduler::{ClockId, EventTarget, Scheduler};
use crate::snapshot::{Reader, Writer};

/// Number of port ranges
pub const RANGE_COUNT: usize = 16;

/// Console lines kept for the host before the oldest are dropped
const CONSOLE_BACKLOG: usize = 256;

/// Signals that cross from port handlers to the bus, the CPU and the debugger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemLines {
    /// CPU stores to flash are honoured
    pub flash_unlocked: bool,
    /// A store to this address raises an NMI (0 = off)
    pub stack_limit: u32,
    /// Bit 0: stack limit hit
    pub protection_status: u8,
    /// NMI requested, consumed by the CPU at the next boundary
    pub nmi: bool,
    /// Debugger command written by the running program
    pub program_request: Option<ProgramRequest>,
    /// Completed debug console lines not yet collected by the host
    pub console: Vec<String>,
}

impl SystemLines {
    pub fn push_console_line(&mut self, line: String) {
        if self.console.len() == CONSOLE_BACKLOG {
            self.console.remove(0);
        }
        self.console.push(line);
    }

    fn save(&self, w: &mut Writer) {
        w.bool(self.flash_unlocked);
        w.u24(self.stack_limit);
        w.u8(self.protection_status);
        w.bool(self.nmi);
        w.u8(self.program_request.map_or(0, |r| r as u8));
    }

    fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        Ok(Self {
            flash_unlocked: r.bool(s)?,
            stack_limit: r.u24(s)?,
            protection_status: r.u8(s)?,
            nmi: r.bool(s)?,
            program_request: match r.u8(s)? {
                0 => None,
                code => Some(
                    ProgramRequest::from_code(code)
                        .ok_or_else(|| RestoreError::corrupt(s, "unknown program request"))?,
                ),
            },
            console: Vec::new(),
        })
    }
}

/// What a handler may touch while serving an access or an event.
pub struct PortCtx<'a> {
    pub sched: &'a mut Scheduler,
    pub intc: &'a mut InterruptController,
    pub lines: &'a mut SystemLines,
    /// Range this handler is mapped at; owns the handler's event targets
    pub range: u8,
}

impl PortCtx<'_> {
    /// Arm (or re-arm) one of this handler's events.
    pub fn schedule(&mut self, tag: u8, clock: ClockId, delay: u64, period: u64) {
        self.sched
            .schedule(EventTarget::new(self.range, tag), clock, delay, period);
    }

    pub fn cancel(&mut self, tag: u8) {
        self.sched.cancel(EventTarget::new(self.range, tag));
    }

    pub fn now(&self, clock: ClockId) -> u64 {
        self.sched.now(clock)
    }
}

/// One range's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortHandler {
    Control(ControlPorts),
    /// Served by the dispatcher's interrupt controller
    Interrupt,
    Timers(GeneralTimers),
    Rtc(RealTimeClock),
    Backlight(Backlight),
    DebugPort(DebugPort),
    Latch(RegisterLatch),
    /// Reads 0, ignores writes
    Unmapped,
}

impl PortHandler {
    /// Default handler for a range on this machine revision
    pub fn default_for(range: u8) -> Self {
        match range {
            0x0 => PortHandler::Control(ControlPorts::new()),
            0x5 => PortHandler::Interrupt,
            0x7 => PortHandler::Timers(GeneralTimers::new()),
            0x8 => PortHandler::Rtc(RealTimeClock::new()),
            0xB => PortHandler::Backlight(Backlight::new()),
            0xF => PortHandler::DebugPort(DebugPort::new()),
            _ => PortHandler::Latch(RegisterLatch::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PortHandler::Control(_) => "control",
            PortHandler::Interrupt => "interrupt",
            PortHandler::Timers(_) => "timers",
            PortHandler::Rtc(_) => "rtc",
            PortHandler::Backlight(_) => "backlight",
            PortHandler::DebugPort(_) => "debug",
            PortHandler::Latch(_) => "latch",
            PortHandler::Unmapped => "unmapped",
        }
    }

    pub fn read(&mut self, offset: u16, ctx: &mut PortCtx<'_>) -> u8 {
        match self {
            PortHandler::Control(h) => h.read(offset, ctx),
            PortHandler::Interrupt => ctx.intc.read(offset),
            PortHandler::Timers(h) => h.read(offset, ctx),
            PortHandler::Rtc(h) => h.read(offset),
            PortHandler::Backlight(h) => h.read(offset),
            PortHandler::DebugPort(h) => h.read(offset),
            PortHandler::Latch(h) => h.read(offset),
            PortHandler::Unmapped => 0,
        }
    }

    /// Side-effect-free read for debugger inspection.
    pub fn peek(&self, offset: u16, ctx: &PortCtx<'_>) -> u8 {
        match self {
            PortHandler::Control(h) => h.peek(offset, ctx),
            PortHandler::Interrupt => ctx.intc.read(offset),
            PortHandler::Timers(h) => h.peek(offset, ctx),
            PortHandler::Rtc(h) => h.read(offset),
            PortHandler::Backlight(h) => h.read(offset),
            PortHandler::DebugPort(h) => h.read(offset),
            PortHandler::Latch(h) => h.read(offset),
            PortHandler::Unmapped => 0,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8, ctx: &mut PortCtx<'_>) {
        match self {
            PortHandler::Control(h) => h.write(offset, value, ctx),
            PortHandler::Interrupt => ctx.intc.write(offset, value),
            PortHandler::Timers(h) => h.write(offset, value, ctx),
            PortHandler::Rtc(h) => h.write(offset, value, ctx),
            PortHandler::Backlight(h) => h.write(offset, value),
            PortHandler::DebugPort(h) => h.write(offset, value, ctx),
            PortHandler::Latch(h) => h.write(offset, value),
            PortHandler::Unmapped => {}
        }
    }

    /// A scheduled event owned by this range came due.
    pub fn on_event(&mut self, tag: u8, ctx: &mut PortCtx<'_>) {
        match self {
            PortHandler::Timers(h) => h.on_event(tag, ctx),
            PortHandler::Rtc(h) => h.on_event(tag, ctx),
            other => tracing::warn!(handler = other.name(), tag, "event for handler without events"),
        }
    }

    /// Return to power-on state and arm any free-running events.
    pub fn reset(&mut self, ctx: &mut PortCtx<'_>) {
        match self {
            PortHandler::Control(h) => h.reset(ctx),
            PortHandler::Interrupt => ctx.intc.reset(),
            PortHandler::Timers(h) => *h = GeneralTimers::new(),
            PortHandler::Rtc(h) => h.reset(ctx),
            PortHandler::Backlight(h) => *h = Backlight::new(),
            PortHandler::DebugPort(h) => *h = DebugPort::new(),
            PortHandler::Latch(h) => h.clear(),
            PortHandler::Unmapped => {}
        }
    }

    fn kind(&self) -> u8 {
        match self {
            PortHandler::Control(_) => 0,
            PortHandler::Interrupt => 1,
            PortHandler::Timers(_) => 2,
            PortHandler::Rtc(_) => 3,
            PortHandler::Backlight(_) => 4,
            PortHandler::DebugPort(_) => 5,
            PortHandler::Latch(_) => 6,
            PortHandler::Unmapped => 7,
        }
    }

    pub fn save(&self, w: &mut Writer) {
        w.u8(self.kind());
        match self {
            PortHandler::Control(h) => h.save(w),
            PortHandler::Timers(h) => h.save(w),
            PortHandler::Rtc(h) => h.save(w),
            PortHandler::Backlight(h) => h.save(w),
            PortHandler::DebugPort(h) => h.save(w),
            PortHandler::Latch(h) => h.save(w),
            PortHandler::Interrupt | PortHandler::Unmapped => {}
        }
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        Ok(match r.u8("peripherals")? {
            0 => PortHandler::Control(ControlPorts::load(r)?),
            1 => PortHandler::Interrupt,
            2 => PortHandler::Timers(GeneralTimers::load(r)?),
            3 => PortHandler::Rtc(RealTimeClock::load(r)?),
            4 => PortHandler::Backlight(Backlight::load(r)?),
            5 => PortHandler::DebugPort(DebugPort::load(r)?),
            6 => PortHandler::Latch(RegisterLatch::load(r)?),
            7 => PortHandler::Unmapped,
            other => {
                return Err(RestoreError::corrupt(
                    "peripherals",
                    format!("unknown handler kind {other}"),
                ))
            }
        })
    }
}

/// All handlers plus the state they share. Owned by the port dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripherals {
    pub handlers: [PortHandler; RANGE_COUNT],
    pub intc: InterruptController,
    pub lines: SystemLines,
}

impl Peripherals {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|range| PortHandler::default_for(range as u8)),
            intc: InterruptController::new(),
            lines: SystemLines::default(),
        }
    }

    /// Split borrows: the handler for `range` and a context over the rest.
    pub fn with_handler<R>(
        &mut self,
        range: u8,
        sched: &mut Scheduler,
        f: impl FnOnce(&mut PortHandler, &mut PortCtx<'_>) -> R,
    ) -> R {
        let mut ctx = PortCtx {
            sched,
            intc: &mut self.intc,
            lines: &mut self.lines,
            range,
        };
        f(&mut self.handlers[range as usize & 0xF], &mut ctx)
    }

    pub fn peek(&self, range: u8, offset: u16, sched: &mut Scheduler) -> u8 {
        // PortCtx wants unique borrows; peeking only reads through them.
        let mut intc = self.intc.clone();
        let mut lines = self.lines.clone();
        let ctx = PortCtx {
            sched,
            intc: &mut intc,
            lines: &mut lines,
            range,
        };
        self.handlers[range as usize & 0xF].peek(offset, &ctx)
    }

    /// Reset every handler. The scheduler must already be cleared.
    pub fn reset(&mut self, sched: &mut Scheduler) {
        self.intc.reset();
        self.lines = SystemLines::default();
        for range in 0..RANGE_COUNT as u8 {
            self.with_handler(range, sched, |h, ctx| h.reset(ctx));
        }
    }

    pub fn irq_line(&self) -> bool {
        self.intc.irq_pending()
    }

    pub fn save(&self, w: &mut Writer) {
        for handler in &self.handlers {
            handler.save(w);
        }
        self.intc.save(w);
        self.lines.save(w);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let mut handlers = Vec::with_capacity(RANGE_COUNT);
        for _ in 0..RANGE_COUNT {
            handlers.push(PortHandler::load(r)?);
        }
        let handlers: [PortHandler; RANGE_COUNT] = handlers
            .try_into()
            .map_err(|_| RestoreError::corrupt("peripherals", "handler count"))?;
        Ok(Self {
            handlers,
            intc: InterruptController::load(r)?,
            lines: SystemLines::load(r)?,
        })
    }
}

impl Default for Peripherals {
    fn default() -> Self {
        Self::new()
    }
}
