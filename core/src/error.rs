//! Error taxonomy for the emulator core
//!
//! Everything except [`CoreDesync`] is recoverable: it is handed back to the
//! immediate caller and never stops the worker loop. A desync means the
//! engine found its own state inconsistent and emulation must not continue.

use thiserror::Error;

/// Rejections from the breakpoint and port monitor tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DebugError {
    /// Breakpoint address does not fit in 24 bits.
    #[error("address {0:#x} is outside the 24-bit address space")]
    InvalidAddress(u32),
    /// Port id does not fit in 16 bits.
    #[error("port {0:#x} is outside the 16-bit port space")]
    InvalidPort(u32),
    /// An entry already exists at this address.
    #[error("breakpoint already set at {0:#08x}")]
    DuplicateBreakpoint(u32),
}

/// Reasons a snapshot was refused. The live machine is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    #[error("snapshot truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("bad snapshot magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot was taken with a different ROM")]
    RomMismatch,
    #[error("snapshot section `{section}` is corrupt: {detail}")]
    Corrupt {
        section: &'static str,
        detail: String,
    },
    #[error("failed to read snapshot: {0}")]
    Io(String),
}

impl RestoreError {
    pub(crate) fn corrupt(section: &'static str, detail: impl Into<String>) -> Self {
        RestoreError::Corrupt {
            section,
            detail: detail.into(),
        }
    }
}

/// I/O failure while writing a snapshot or ROM image out.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// ROM images the flash cannot hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RomError {
    #[error("ROM image is empty")]
    Empty,
    #[error("ROM image is {size} bytes, flash holds {capacity}")]
    TooLarge { size: usize, capacity: usize },
}

/// Invalid [`MachineConfig`](crate::config::MachineConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("clock rate {rate} Hz for {domain} does not divide the scheduler base clock")]
    IndivisibleRate { domain: &'static str, rate: u64 },
    #[error("speed {0}% is outside 1..=1000")]
    SpeedOutOfRange(u32),
    #[error("history length must be non-zero")]
    EmptyHistory,
}

/// Fatal: the engine's register file disagrees with its decode state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("core desync at pc={pc:#08x}: {reason}")]
pub struct CoreDesync {
    pub pc: u32,
    pub reason: String,
}

/// Umbrella error for the host-facing API and the C ABI.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Debug(#[from] DebugError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error(transparent)]
    Rom(#[from] RomError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Desync(#[from] CoreDesync),
    #[error("no ROM loaded")]
    NoRom,
    #[error("emulation worker has stopped")]
    WorkerGone,
}

impl Error {
    /// Stable negative code for the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            Error::NoRom => -2,
            Error::Rom(RomError::Empty) => -2,
            Error::Rom(RomError::TooLarge { .. }) => -3,
            Error::Debug(DebugError::InvalidAddress(_)) => -10,
            Error::Debug(DebugError::InvalidPort(_)) => -11,
            Error::Debug(DebugError::DuplicateBreakpoint(_)) => -12,
            Error::Config(_) => -20,
            Error::Save(_) => -101,
            Error::Restore(RestoreError::BadMagic(_)) => -102,
            Error::Restore(RestoreError::UnsupportedVersion(_)) => -103,
            Error::Restore(RestoreError::RomMismatch) => -104,
            Error::Restore(RestoreError::Truncated { .. }) => -106,
            Error::Restore(_) => -105,
            Error::Desync(_) => -200,
            Error::WorkerGone => -201,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
