//! Event Scheduler for TI-84 Plus CE Emulation
//!
//! Based on CEmu's schedule.c implementation.
//! Uses a 7.68 GHz base clock rate as LCM of all hardware clocks, so every
//! domain converts to and from base ticks with exact integer division.
//!
//! Each clock domain keeps its own tick counter. Deadlines are absolute
//! values in the owning domain's ticks. `advance` is fed the CPU cycles of
//! one instruction and returns the events that came due, earliest first.

use crate::error::{ConfigError, RestoreError};
use crate::snapshot::{Reader, Writer};

/// Base clock rate: 7,680,000,000 Hz (7.68 GHz)
pub const SCHED_BASE_CLOCK_RATE: u64 = 7_680_000_000;

/// Upper bound on simultaneously pending events; a sanity limit for restore.
const MAX_EVENTS: usize = 256;

/// Clock identifiers for different hardware components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClockId {
    /// CPU clock (variable: 6/12/24/48 MHz)
    Cpu = 0,
    /// 48 MHz fixed clock
    Clock48M = 1,
    /// 24 MHz fixed clock
    Clock24M = 2,
    /// 12 MHz fixed clock
    Clock12M = 3,
    /// 6 MHz fixed clock
    Clock6M = 4,
    /// 3 MHz fixed clock
    Clock3M = 5,
    /// 1 MHz fixed clock
    Clock1M = 6,
    /// 32.768 kHz crystal (RTC, slow timers)
    Clock32K = 7,
}

impl ClockId {
    pub const COUNT: usize = 8;

    pub const ALL: [ClockId; Self::COUNT] = [
        ClockId::Cpu,
        ClockId::Clock48M,
        ClockId::Clock24M,
        ClockId::Clock12M,
        ClockId::Clock6M,
        ClockId::Clock3M,
        ClockId::Clock1M,
        ClockId::Clock32K,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Rate on stock hardware
    pub fn nominal_rate(self) -> u64 {
        match self {
            ClockId::Cpu => 48_000_000,
            ClockId::Clock48M => 48_000_000,
            ClockId::Clock24M => 24_000_000,
            ClockId::Clock12M => 12_000_000,
            ClockId::Clock6M => 6_000_000,
            ClockId::Clock3M => 3_000_000,
            ClockId::Clock1M => 1_000_000,
            ClockId::Clock32K => 32_768,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClockId::Cpu => "CPU",
            ClockId::Clock48M => "48M",
            ClockId::Clock24M => "24M",
            ClockId::Clock12M => "12M",
            ClockId::Clock6M => "6M",
            ClockId::Clock3M => "3M",
            ClockId::Clock1M => "1M",
            ClockId::Clock32K => "32K",
        }
    }
}

/// Opaque handler reference carried by an event: the port range whose
/// handler owns it and a tag local to that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTarget {
    pub range: u8,
    pub tag: u8,
}

impl EventTarget {
    pub const fn new(range: u8, tag: u8) -> Self {
        Self { range, tag }
    }
}

/// A pending event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub target: EventTarget,
    pub clock: ClockId,
    /// Absolute deadline in `clock` ticks
    pub deadline: u64,
    /// Recurrence in `clock` ticks; 0 = one-shot
    pub period: u64,
    /// Registration order, breaks deadline ties
    seq: u64,
}

/// Per-domain tick counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct DomainClock {
    rate: u64,
    ticks: u64,
    /// Base ticks accumulated since the last whole domain tick
    remainder: u64,
}

impl DomainClock {
    fn base_per_tick(&self) -> u64 {
        SCHED_BASE_CLOCK_RATE / self.rate
    }
}

/// The scheduler manages timed events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    domains: [DomainClock; ClockId::COUNT],
    /// Rates restored by `reset`
    configured: [u64; ClockId::COUNT],
    events: Vec<ScheduledEvent>,
    next_seq: u64,
}

impl Scheduler {
    /// Create a scheduler with the given domain rates (Hz, indexed by `ClockId`).
    pub fn new(rates: [u64; ClockId::COUNT]) -> Result<Self, ConfigError> {
        for clock in ClockId::ALL {
            check_rate(clock, rates[clock as usize])?;
        }
        let mut domains = [DomainClock::default(); ClockId::COUNT];
        for (domain, &rate) in domains.iter_mut().zip(rates.iter()) {
            domain.rate = rate;
        }
        Ok(Self {
            domains,
            configured: rates,
            events: Vec::new(),
            next_seq: 0,
        })
    }

    /// Drop every pending event and zero all domain counters.
    pub fn reset(&mut self) {
        for (domain, &rate) in self.domains.iter_mut().zip(self.configured.iter()) {
            *domain = DomainClock {
                rate,
                ticks: 0,
                remainder: 0,
            };
        }
        self.events.clear();
        self.next_seq = 0;
    }

    /// Change a domain's rate. Elapsed ticks are kept; only future
    /// conversions use the new rate.
    pub fn set_rate(&mut self, clock: ClockId, hz: u64) -> Result<(), ConfigError> {
        check_rate(clock, hz)?;
        let domain = &mut self.domains[clock as usize];
        if domain.rate != hz {
            tracing::debug!(clock = clock.name(), hz, "clock rate changed");
            domain.rate = hz;
            domain.remainder = 0;
        }
        Ok(())
    }

    pub fn rate(&self, clock: ClockId) -> u64 {
        self.domains[clock as usize].rate
    }

    /// Current time in `clock` ticks
    pub fn now(&self, clock: ClockId) -> u64 {
        self.domains[clock as usize].ticks
    }

    /// Register `target` to fire `delay` ticks from now in `clock`, repeating
    /// every `period` ticks when non-zero. Replaces any pending event for the
    /// same target.
    pub fn schedule(&mut self, target: EventTarget, clock: ClockId, delay: u64, period: u64) {
        let deadline = self.now(clock) + delay;
        self.schedule_at(target, clock, deadline, period);
    }

    /// Register `target` at an absolute deadline.
    pub fn schedule_at(&mut self, target: EventTarget, clock: ClockId, deadline: u64, period: u64) {
        self.cancel(target);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(ScheduledEvent {
            target,
            clock,
            deadline,
            period,
            seq,
        });
    }

    /// Remove a pending event. Returns whether one existed.
    pub fn cancel(&mut self, target: EventTarget) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.target != target);
        self.events.len() != before
    }

    /// Cancel every event owned by a port range.
    pub fn cancel_range(&mut self, range: u8) {
        self.events.retain(|e| e.target.range != range);
    }

    pub fn is_active(&self, target: EventTarget) -> bool {
        self.events.iter().any(|e| e.target == target)
    }

    /// Ticks (in the event's own domain) until `target` fires
    pub fn ticks_remaining(&self, target: EventTarget) -> Option<u64> {
        self.events
            .iter()
            .find(|e| e.target == target)
            .map(|e| e.deadline.saturating_sub(self.now(e.clock)))
    }

    /// Pending events in firing order
    pub fn pending(&self) -> Vec<&ScheduledEvent> {
        let mut out: Vec<_> = self.events.iter().collect();
        out.sort_by_key(|e| (self.due_base(e), e.seq));
        out
    }

    /// Advance by `cpu_cycles` CPU clock cycles and return every event that
    /// came due, in deadline order with ties broken by registration order.
    /// Periodic events are re-armed at `deadline + period` and may appear
    /// more than once if several periods elapsed.
    pub fn advance(&mut self, cpu_cycles: u64) -> Vec<EventTarget> {
        if cpu_cycles != 0 {
            let base = cpu_cycles * self.domains[ClockId::Cpu as usize].base_per_tick();
            for domain in &mut self.domains {
                let total = domain.remainder + base;
                let per = domain.base_per_tick();
                domain.ticks += total / per;
                domain.remainder = total % per;
            }
        }

        let mut fired = Vec::new();
        while let Some(idx) = self.next_due() {
            let event = &mut self.events[idx];
            fired.push(event.target);
            if event.period == 0 {
                self.events.swap_remove(idx);
            } else {
                event.deadline += event.period;
            }
        }
        fired
    }

    fn next_due(&self) -> Option<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= self.now(e.clock))
            .min_by_key(|(_, e)| (self.due_base(e), e.seq))
            .map(|(i, _)| i)
    }

    /// When the event's deadline falls, expressed as base ticks relative to
    /// now (larger = further in the past). Inverted so that earlier deadlines
    /// sort first.
    fn due_base(&self, event: &ScheduledEvent) -> i128 {
        let domain = &self.domains[event.clock as usize];
        let lag = domain.ticks as i128 - event.deadline as i128;
        -(lag * domain.base_per_tick() as i128 + domain.remainder as i128)
    }
}

fn check_rate(clock: ClockId, hz: u64) -> Result<(), ConfigError> {
    if hz == 0 || SCHED_BASE_CLOCK_RATE % hz != 0 {
        return Err(ConfigError::IndivisibleRate {
            domain: clock.name(),
            rate: hz,
        });
    }
    Ok(())
}

// ========== State Persistence ==========

impl Scheduler {
    const SECTION: &'static str = "scheduler";

    pub fn save(&self, w: &mut Writer) {
        for domain in &self.domains {
            w.u64(domain.rate);
            w.u64(domain.ticks);
            w.u64(domain.remainder);
        }
        for &rate in &self.configured {
            w.u64(rate);
        }
        w.u64(self.next_seq);
        w.u32(self.events.len() as u32);
        for e in &self.events {
            w.u8(e.target.range);
            w.u8(e.target.tag);
            w.u8(e.clock as u8);
            w.u64(e.deadline);
            w.u64(e.period);
            w.u64(e.seq);
        }
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = Self::SECTION;
        let mut domains = [DomainClock::default(); ClockId::COUNT];
        for (clock, domain) in ClockId::ALL.iter().zip(domains.iter_mut()) {
            let rate = r.u64(s)?;
            check_rate(*clock, rate)
                .map_err(|e| RestoreError::corrupt(s, e.to_string()))?;
            let ticks = r.u64(s)?;
            let remainder = r.u64(s)?;
            if remainder >= SCHED_BASE_CLOCK_RATE / rate {
                return Err(RestoreError::corrupt(s, "domain remainder exceeds one tick"));
            }
            *domain = DomainClock {
                rate,
                ticks,
                remainder,
            };
        }
        let mut configured = [0u64; ClockId::COUNT];
        for (clock, slot) in ClockId::ALL.iter().zip(configured.iter_mut()) {
            *slot = r.u64(s)?;
            check_rate(*clock, *slot).map_err(|e| RestoreError::corrupt(s, e.to_string()))?;
        }
        let next_seq = r.u64(s)?;
        let count = r.u32(s)? as usize;
        if count > MAX_EVENTS {
            return Err(RestoreError::corrupt(s, format!("{count} pending events")));
        }
        let mut events: Vec<ScheduledEvent> = Vec::with_capacity(count);
        for _ in 0..count {
            let target = EventTarget::new(r.u8(s)?, r.u8(s)?);
            if target.range > 0xF {
                return Err(RestoreError::corrupt(s, "event target range out of bounds"));
            }
            let clock = ClockId::from_u8(r.u8(s)?)
                .ok_or_else(|| RestoreError::corrupt(s, "unknown clock id"))?;
            let deadline = r.u64(s)?;
            let period = r.u64(s)?;
            let seq = r.u64(s)?;
            if seq >= next_seq {
                return Err(RestoreError::corrupt(s, "event sequence ahead of counter"));
            }
            if events.iter().any(|e| e.target == target) {
                return Err(RestoreError::corrupt(s, "duplicate event target"));
            }
            events.push(ScheduledEvent {
                target,
                clock,
                deadline,
                period,
                seq,
            });
        }
        Ok(Self {
            domains,
            configured,
            events,
            next_seq,
        })
    }
}
