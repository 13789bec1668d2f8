//! Plain register storage for blocks without a behavioural model
//!
//! Writes are kept and read back unchanged, which is enough for the OS to
//! configure hardware it never polls for side effects.

use crate::error::RestoreError;
use crate::snapshot::{Reader, Writer};

const LATCH_SIZE: usize = 0x1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLatch {
    regs: Box<[u8; LATCH_SIZE]>,
}

impl RegisterLatch {
    pub fn new() -> Self {
        Self {
            regs: Box::new([0; LATCH_SIZE]),
        }
    }

    pub fn clear(&mut self) {
        self.regs.fill(0);
    }

    pub fn read(&self, offset: u16) -> u8 {
        self.regs[offset as usize & (LATCH_SIZE - 1)]
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        self.regs[offset as usize & (LATCH_SIZE - 1)] = value;
    }

    pub fn save(&self, w: &mut Writer) {
        w.bytes(&self.regs[..]);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        Ok(Self {
            regs: Box::new(r.array::<LATCH_SIZE>("peripherals")?),
        })
    }
}

impl Default for RegisterLatch {
    fn default() -> Self {
        Self::new()
    }
}
