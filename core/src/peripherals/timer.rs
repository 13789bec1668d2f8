//! General purpose timers (port range 0x7, MMIO 0xF20000)
//!
//! Three 32-bit timers, each with 0x10 bytes of registers:
//!
//! ```text
//! 0x00 counter   0x04 reset (reload)   0x08 match1   0x0C match2
//! ```
//!
//! followed by the shared block at 0x30:
//! - 0x30 CONTROL: 3 bits per timer (enable, 32 kHz clock, overflow
//!   interrupt), then bits 9-11 select counting down
//! - 0x34 STATUS: 3 bits per timer (match1, match2, overflow), write 1 to clear
//! - 0x38 MASK: which status bits raise the timer's interrupt
//! - 0x3C REVISION
//!
//! Counters are not ticked one by one. Each running timer remembers the
//! domain tick at which its `counter` was last brought up to date and keeps
//! one scheduler event armed at the next tick where something observable
//! happens (a match or an overflow).

use super::interrupt::sources;
use super::PortCtx;
use crate::error::RestoreError;
use crate::scheduler::ClockId;
use crate::snapshot::{Reader, Writer};

pub const TIMER_COUNT: usize = 3;

mod regs {
    pub const COUNTER: u16 = 0x00;
    pub const RESET: u16 = 0x04;
    pub const MATCH1: u16 = 0x08;
    pub const MATCH2: u16 = 0x0C;

    pub const CONTROL: u16 = 0x30;
    pub const STATUS: u16 = 0x34;
    pub const MASK: u16 = 0x38;
    pub const REVISION: u16 = 0x3C;
}

const REVISION_VALUE: u32 = 0x0001_0801;

/// Status bits of one timer, before shifting into its lane
pub mod status {
    pub const MATCH1: u32 = 1 << 0;
    pub const MATCH2: u32 = 1 << 1;
    pub const OVERFLOW: u32 = 1 << 2;
}

mod ctrl {
    pub const ENABLE: u32 = 1 << 0;
    pub const CLOCK_32K: u32 = 1 << 1;
    pub const OVERFLOW_INT: u32 = 1 << 2;
    pub const COUNT_DOWN_SHIFT: usize = 9;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counter {
    counter: u32,
    reset_value: u32,
    match1: u32,
    match2: u32,
    /// Domain tick at which `counter` was current
    anchor: u64,
}

impl Counter {
    fn reg(&self, offset: u16) -> u32 {
        match offset & 0x0C {
            regs::COUNTER => self.counter,
            regs::RESET => self.reset_value,
            regs::MATCH1 => self.match1,
            _ => self.match2,
        }
    }

    fn reg_mut(&mut self, offset: u16) -> &mut u32 {
        match offset & 0x0C {
            regs::COUNTER => &mut self.counter,
            regs::RESET => &mut self.reset_value,
            regs::MATCH1 => &mut self.match1,
            _ => &mut self.match2,
        }
    }

    /// Ticks from the current value until the counter wraps and reloads
    fn ticks_to_overflow(&self, down: bool) -> u64 {
        if down {
            self.counter as u64 + 1
        } else {
            (u32::MAX - self.counter) as u64 + 1
        }
    }

    /// Ticks until the counter next shows `target` without wrapping (0 = never)
    fn ticks_to(&self, target: u32, down: bool) -> u64 {
        if down {
            self.counter.wrapping_sub(target) as u64
        } else {
            target.wrapping_sub(self.counter) as u64
        }
    }

    fn match_bits(&self, value: u32) -> u32 {
        let mut bits = 0;
        if value == self.match1 {
            bits |= status::MATCH1;
        }
        if value == self.match2 {
            bits |= status::MATCH2;
        }
        bits
    }

    /// Bits of matches passed within the next `within` ticks
    fn crossed(&self, within: u64, down: bool) -> u32 {
        let mut bits = 0;
        for (target, bit) in [(self.match1, status::MATCH1), (self.match2, status::MATCH2)] {
            let d = self.ticks_to(target, down);
            if d != 0 && d <= within {
                bits |= bit;
            }
        }
        bits
    }

    /// Run `elapsed` ticks and return the status bits that were set.
    fn run(&mut self, mut elapsed: u64, down: bool) -> u32 {
        let mut bits = 0;
        while elapsed != 0 {
            let to_overflow = self.ticks_to_overflow(down);
            if elapsed >= to_overflow {
                bits |= self.crossed(to_overflow - 1, down) | status::OVERFLOW;
                self.counter = self.reset_value;
                bits |= self.match_bits(self.counter);
                elapsed -= to_overflow;
            } else {
                bits |= self.crossed(elapsed, down);
                let step = elapsed as u32;
                self.counter = if down {
                    self.counter.wrapping_sub(step)
                } else {
                    self.counter.wrapping_add(step)
                };
                elapsed = 0;
            }
        }
        bits
    }

    /// Ticks until the next match or overflow
    fn next_event(&self, down: bool) -> u64 {
        let mut next = self.ticks_to_overflow(down);
        for target in [self.match1, self.match2] {
            let d = self.ticks_to(target, down);
            if d != 0 {
                next = next.min(d);
            }
        }
        next
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralTimers {
    timers: [Counter; TIMER_COUNT],
    control: u32,
    status: u32,
    mask: u32,
}

impl GeneralTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn bits(&self, index: usize) -> u32 {
        (self.control >> (index * 3)) & 0x7
    }

    fn enabled(&self, index: usize) -> bool {
        self.bits(index) & ctrl::ENABLE != 0
    }

    fn counts_down(&self, index: usize) -> bool {
        self.control & (1 << (ctrl::COUNT_DOWN_SHIFT + index)) != 0
    }

    pub fn clock(&self, index: usize) -> ClockId {
        if self.bits(index) & ctrl::CLOCK_32K != 0 {
            ClockId::Clock32K
        } else {
            ClockId::Cpu
        }
    }

    pub fn counter(&self, index: usize) -> u32 {
        self.timers[index].counter
    }

    /// Bring every running counter up to `now` and latch what happened.
    fn sync(&mut self, ctx: &mut PortCtx<'_>) {
        for index in 0..TIMER_COUNT {
            let fresh = self.catch_up(index, ctx.now(self.clock(index)));
            self.latch(index, fresh, ctx);
        }
    }

    fn catch_up(&mut self, index: usize, now: u64) -> u32 {
        let down = self.counts_down(index);
        let running = self.enabled(index);
        let timer = &mut self.timers[index];
        let elapsed = now.saturating_sub(timer.anchor);
        timer.anchor = now;
        if running {
            timer.run(elapsed, down)
        } else {
            0
        }
    }

    fn latch(&mut self, index: usize, fresh: u32, ctx: &mut PortCtx<'_>) {
        if fresh == 0 {
            return;
        }
        let shift = index * 3;
        self.status |= fresh << shift;

        let mut wake = fresh & (self.mask >> shift) & (status::MATCH1 | status::MATCH2);
        if fresh & status::OVERFLOW != 0 && self.bits(index) & ctrl::OVERFLOW_INT != 0 {
            wake |= status::OVERFLOW;
        }
        if wake != 0 {
            tracing::trace!(timer = index + 1, bits = wake, "timer interrupt");
            ctx.intc.raise(sources::timer(index));
        }
    }

    /// Re-arm (or drop) each timer's event from its current state.
    fn rearm(&self, ctx: &mut PortCtx<'_>) {
        for index in 0..TIMER_COUNT {
            if self.enabled(index) {
                let delay = self.timers[index].next_event(self.counts_down(index));
                ctx.schedule(index as u8, self.clock(index), delay, 0);
            } else {
                ctx.cancel(index as u8);
            }
        }
    }

    pub fn on_event(&mut self, tag: u8, ctx: &mut PortCtx<'_>) {
        if (tag as usize) < TIMER_COUNT {
            self.sync(ctx);
            self.rearm(ctx);
        }
    }

    pub fn read(&mut self, offset: u16, ctx: &mut PortCtx<'_>) -> u8 {
        self.sync(ctx);
        self.rearm(ctx);
        self.register(offset)
    }

    /// Current register value without latching anything.
    pub fn peek(&self, offset: u16, ctx: &PortCtx<'_>) -> u8 {
        let mut view = self.clone();
        for index in 0..TIMER_COUNT {
            let fresh = view.catch_up(index, ctx.now(view.clock(index)));
            view.status |= fresh << (index * 3);
        }
        view.register(offset)
    }

    fn register(&self, offset: u16) -> u8 {
        let offset = offset & 0x3F;
        let value = match offset & 0x3C {
            o if o < regs::CONTROL => self.timers[(o / 0x10) as usize].reg(o),
            regs::CONTROL => self.control,
            regs::STATUS => self.status,
            regs::MASK => self.mask,
            _ => REVISION_VALUE,
        };
        (value >> ((offset & 3) * 8)) as u8
    }

    pub fn write(&mut self, offset: u16, value: u8, ctx: &mut PortCtx<'_>) {
        let offset = offset & 0x3F;
        let shift = (offset & 3) * 8;
        let lane = 0xFFu32 << shift;
        let bits = (value as u32) << shift;
        let merge = |reg: &mut u32| *reg = (*reg & !lane) | bits;

        self.sync(ctx);
        match offset & 0x3C {
            o if o < regs::CONTROL => {
                let index = (o / 0x10) as usize;
                merge(self.timers[index].reg_mut(o));
            }
            regs::CONTROL => {
                merge(&mut self.control);
                self.control &= 0x0FFF;
                // A clock source change restarts the anchor in the new domain
                for index in 0..TIMER_COUNT {
                    self.timers[index].anchor = ctx.now(self.clock(index));
                }
            }
            regs::STATUS => {
                self.status &= !bits;
                for index in 0..TIMER_COUNT {
                    if (self.status >> (index * 3)) & 0x7 == 0 {
                        ctx.intc.clear_raw(sources::timer(index));
                    }
                }
            }
            regs::MASK => {
                merge(&mut self.mask);
                self.mask &= 0x1FF;
            }
            _ => {}
        }
        self.rearm(ctx);
    }

    pub fn save(&self, w: &mut Writer) {
        for t in &self.timers {
            w.u32(t.counter);
            w.u32(t.reset_value);
            w.u32(t.match1);
            w.u32(t.match2);
            w.u64(t.anchor);
        }
        w.u32(self.control);
        w.u32(self.status);
        w.u32(self.mask);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "peripherals";
        let mut timers = [Counter::default(); TIMER_COUNT];
        for t in &mut timers {
            *t = Counter {
                counter: r.u32(s)?,
                reset_value: r.u32(s)?,
                match1: r.u32(s)?,
                match2: r.u32(s)?,
                anchor: r.u64(s)?,
            };
        }
        Ok(Self {
            timers,
            control: r.u32(s)? & 0x0FFF,
            status: r.u32(s)? & 0x1FF,
            mask: r.u32(s)? & 0x1FF,
        })
    }
}
