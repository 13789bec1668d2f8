//! Machine configuration
//!
//! Hosts build a [`MachineConfig`] programmatically; `Default` matches a
//! stock TI-84 Plus CE.

use crate::error::ConfigError;
use crate::scheduler::{ClockId, SCHED_BASE_CLOCK_RATE};

/// CPU speed select values understood by the control port (bits 1:0 of port 0x01)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CpuSpeed {
    #[default]
    Mhz6 = 0,
    Mhz12 = 1,
    Mhz24 = 2,
    Mhz48 = 3,
}

impl CpuSpeed {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => CpuSpeed::Mhz6,
            1 => CpuSpeed::Mhz12,
            2 => CpuSpeed::Mhz24,
            _ => CpuSpeed::Mhz48,
        }
    }

    pub fn hz(self) -> u64 {
        6_000_000 << (self as u8)
    }

    /// Speed select matching an exact CPU rate
    pub fn from_hz(hz: u64) -> Option<Self> {
        [Self::Mhz6, Self::Mhz12, Self::Mhz24, Self::Mhz48]
            .into_iter()
            .find(|s| s.hz() == hz)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Rate of every non-CPU clock domain, indexed by `ClockId as usize`.
    /// The CPU entry is ignored; it follows `cpu_speed`.
    pub clock_rates: [u64; ClockId::COUNT],
    /// CPU speed at reset
    pub cpu_speed: CpuSpeed,
    /// Sleep so emulated time tracks wall-clock time
    pub throttle: bool,
    /// Emulated speed relative to real hardware, in percent
    pub speed_percent: u32,
    /// Start in PAUSED, as when a debugger attaches before the first instruction
    pub attach_paused: bool,
    /// Number of executed PCs kept for diagnostics
    pub history_len: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        let mut clock_rates = [0; ClockId::COUNT];
        for clock in ClockId::ALL {
            clock_rates[clock as usize] = clock.nominal_rate();
        }
        Self {
            clock_rates,
            cpu_speed: CpuSpeed::Mhz48,
            throttle: false,
            speed_percent: 100,
            attach_paused: false,
            history_len: 64,
        }
    }
}

impl MachineConfig {
    pub fn with_clock_rate(mut self, clock: ClockId, hz: u64) -> Self {
        self.clock_rates[clock as usize] = hz;
        self
    }

    pub fn with_cpu_speed(mut self, speed: CpuSpeed) -> Self {
        self.cpu_speed = speed;
        self
    }

    pub fn with_throttle(mut self, enabled: bool, speed_percent: u32) -> Self {
        self.throttle = enabled;
        self.speed_percent = speed_percent;
        self
    }

    pub fn with_attach_paused(mut self, paused: bool) -> Self {
        self.attach_paused = paused;
        self
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self
    }

    /// Domain rates for the scheduler, with the CPU entry taken from `cpu_speed`.
    pub fn scheduler_rates(&self) -> [u64; ClockId::COUNT] {
        let mut rates = self.clock_rates;
        rates[ClockId::Cpu as usize] = self.cpu_speed.hz();
        rates
    }

    /// Check every value the machine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for clock in ClockId::ALL {
            if clock == ClockId::Cpu {
                continue;
            }
            let rate = self.clock_rates[clock as usize];
            if rate == 0 || SCHED_BASE_CLOCK_RATE % rate != 0 {
                return Err(ConfigError::IndivisibleRate {
                    domain: clock.name(),
                    rate,
                });
            }
        }
        validate_speed(self.speed_percent)?;
        if self.history_len == 0 {
            return Err(ConfigError::EmptyHistory);
        }
        Ok(())
    }
}

pub(crate) fn validate_speed(percent: u32) -> Result<(), ConfigError> {
    if (1..=1000).contains(&percent) {
        Ok(())
    } else {
        Err(ConfigError::SpeedOutOfRange(percent))
    }
}
