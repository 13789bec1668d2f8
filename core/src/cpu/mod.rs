//! eZ80 CPU implementation for TI-84 Plus CE
//!
//! The eZ80 is a Zilog Z80-compatible processor with extended 24-bit addressing.
//!
//! # Module Organization
//!
//! - `flags`: F register bits
//! - `helpers`: register access, address formation, fetch, stack, ALU
//! - `execute`: opcode pages (base, CB, ED, DD/FD)
//!
//! # Modes
//!
//! ADL selects between Z80 mode (16-bit registers and PC, addresses formed
//! with MBASE as the upper byte) and ADL mode (24-bit everything). Each
//! instruction additionally carries two widths that normally equal ADL:
//! - L: data width, register pair masking and which stack pointer (SPS or
//!   SPL) is used
//! - IL: width of immediates and jump targets
//!
//! A suffix byte (.SIS/.LIS/.SIL/.LIL) overrides L and IL for the single
//! instruction that follows it. Both are back to ADL at every boundary.
//!
//! # Step granularity
//!
//! One `step` is one instruction, an interrupt acknowledge, or one halted
//! wait. Repeating block instructions do one iteration per step and rewind
//! PC to their first byte, so interrupts and the debugger see every pass.
//!
//! # References
//! - eZ80 CPU User Manual (Zilog UM0077)
//! - CEmu (https://github.com/CE-Programming/CEmu)

use crate::bus::Bus;
use crate::decode;
use crate::error::{CoreDesync, RestoreError};
use crate::snapshot::{Reader, Writer};

mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

/// Interrupt modes. This machine vectors every maskable interrupt to 0x38.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
}

impl InterruptMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(InterruptMode::Mode0),
            1 => Some(InterruptMode::Mode1),
            2 => Some(InterruptMode::Mode2),
            _ => None,
        }
    }
}

/// Register standing in for HL in the current instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Index {
    #[default]
    Hl,
    Ix,
    Iy,
}

/// Registers the debugger can read and edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    F,
    BC,
    DE,
    HL,
    AltAF,
    AltBC,
    AltDE,
    AltHL,
    IX,
    IY,
    SPS,
    SPL,
    PC,
    I,
    R,
    MBASE,
    ADL,
    MADL,
    IFF1,
    IFF2,
    IM,
}

impl Register {
    pub const ALL: [Register; 22] = [
        Register::A,
        Register::F,
        Register::BC,
        Register::DE,
        Register::HL,
        Register::AltAF,
        Register::AltBC,
        Register::AltDE,
        Register::AltHL,
        Register::IX,
        Register::IY,
        Register::SPS,
        Register::SPL,
        Register::PC,
        Register::I,
        Register::R,
        Register::MBASE,
        Register::ADL,
        Register::MADL,
        Register::IFF1,
        Register::IFF2,
        Register::IM,
    ];

    /// Bit mask applied to written values (IM is range-checked instead)
    pub fn mask(self) -> u32 {
        match self {
            Register::A | Register::F | Register::R | Register::MBASE => 0xFF,
            Register::AltAF | Register::SPS | Register::I => 0xFFFF,
            Register::ADL | Register::MADL | Register::IFF1 | Register::IFF2 => 1,
            Register::IM => 2,
            _ => 0xFF_FFFF,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// eZ80 CPU state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub bc: u32,
    pub de: u32,
    pub hl: u32,

    // Shadow set for EX AF,AF' and EXX
    pub a_alt: u8,
    pub f_alt: u8,
    pub bc_alt: u32,
    pub de_alt: u32,
    pub hl_alt: u32,

    pub ix: u32,
    pub iy: u32,
    /// Short stack pointer, used when L is clear; addresses MBASE:SPS
    pub sps: u32,
    /// Long stack pointer, used when L is set
    pub spl: u32,
    /// 16 bits in Z80 mode, 24 in ADL mode
    pub pc: u32,
    /// Interrupt vector base (16-bit on eZ80)
    pub i: u16,
    /// Refresh counter; bit 7 only changes through LD R,A
    pub r: u8,
    /// Upper address byte in Z80 mode
    pub mbase: u8,

    pub iff1: bool,
    pub iff2: bool,
    pub im: InterruptMode,
    pub adl: bool,
    /// Mixed-memory mode: interrupts and RETI/RETN save and restore ADL
    pub madl: bool,
    pub halted: bool,

    /// Steps until a pending EI takes effect
    ei_delay: u8,

    // Decode state of the instruction in flight, reset at each boundary
    l: bool,
    il: bool,
    suffixed: bool,
    prefix: Index,
    /// Address of the first byte (suffix included) of this instruction
    insn_pc: u32,
}

impl Cpu {
    /// Power-on state: everything zero, Z80 mode
    pub fn new() -> Self {
        Self {
            a: 0,
            f: 0,
            bc: 0,
            de: 0,
            hl: 0,
            a_alt: 0,
            f_alt: 0,
            bc_alt: 0,
            de_alt: 0,
            hl_alt: 0,
            ix: 0,
            iy: 0,
            sps: 0,
            spl: 0,
            pc: 0,
            i: 0,
            r: 0,
            mbase: 0,
            iff1: false,
            iff2: false,
            im: InterruptMode::Mode0,
            adl: false,
            madl: false,
            halted: false,
            ei_delay: 0,
            l: false,
            il: false,
            suffixed: false,
            prefix: Index::Hl,
            insn_pc: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Force the next fetch to `address` in the given mode, dropping any
    /// half-decoded state and waking the CPU from HALT.
    pub fn set_pc(&mut self, address: u32, adl: bool) {
        self.adl = adl;
        self.pc = address & self.pc_mask();
        self.halted = false;
        self.end_instruction();
    }

    /// Mask for PC in the current mode
    pub fn pc_mask(&self) -> u32 {
        if self.adl {
            0xFF_FFFF
        } else {
            0xFFFF
        }
    }

    /// Stack pointer the current mode uses
    pub fn sp(&self) -> u32 {
        if self.adl {
            self.spl
        } else {
            self.sps
        }
    }

    /// Physical address of the byte `offset` past PC
    pub fn code_addr(&self, offset: u32) -> u32 {
        let pc = self.pc.wrapping_add(offset);
        if self.adl {
            pc & 0xFF_FFFF
        } else {
            (self.mbase as u32) << 16 | (pc & 0xFFFF)
        }
    }

    // ========== Instruction Execution ==========

    /// Execute one instruction (or take an interrupt, or idle one halted
    /// slot) and return the cycles it cost. The register file is checked
    /// afterwards; a violation is fatal.
    pub fn step(&mut self, bus: &mut Bus) -> Result<u32, CoreDesync> {
        let start = bus.cycles();

        if bus.take_nmi() {
            self.iff2 = self.iff1;
            self.iff1 = false;
            self.interrupt(bus, 0x66);
        } else if self.iff1 && bus.irq_line() {
            self.iff1 = false;
            self.iff2 = false;
            self.interrupt(bus, 0x38);
        } else if self.halted {
            bus.add_cycles(4);
        } else {
            self.execute_one(bus);
        }

        if self.ei_delay > 0 {
            self.ei_delay -= 1;
            if self.ei_delay == 0 {
                self.iff1 = true;
                self.iff2 = true;
            }
        }

        self.verify()?;
        Ok((bus.cycles() - start) as u32)
    }

    fn execute_one(&mut self, bus: &mut Bus) {
        self.insn_pc = self.pc;
        let mut op = self.fetch_opcode(bus);

        if decode::is_suffix(op) {
            // A suffix followed by another suffix is spent on its own
            if decode::is_suffix(bus.peek(self.code_addr(0))) {
                return;
            }
            self.suffixed = true;
            self.l = op & 0x01 != 0;
            self.il = op & 0x02 != 0;
            op = self.fetch_opcode(bus);
        }

        if op == 0xDD || op == 0xFD {
            if matches!(bus.peek(self.code_addr(0)), 0xDD | 0xFD) {
                self.end_instruction();
                return;
            }
            self.prefix = if op == 0xDD { Index::Ix } else { Index::Iy };
            op = self.fetch_opcode(bus);
        }

        tracing::trace!(pc = format_args!("{:06x}", self.insn_pc), op = format_args!("{op:02x}"), adl = self.adl, "exec");
        self.execute(bus, op);
        self.end_instruction();
    }

    /// Return the per-instruction widths to ADL and drop prefixes.
    fn end_instruction(&mut self) {
        self.l = self.adl;
        self.il = self.adl;
        self.suffixed = false;
        self.prefix = Index::Hl;
    }

    /// Push PC and vector. With MADL set the entry is a mixed-mode call that
    /// lands in ADL mode and records the interrupted mode.
    fn interrupt(&mut self, bus: &mut Bus, vector: u32) {
        self.halted = false;
        self.ei_delay = 0;
        if self.madl {
            self.l = true;
            self.il = true;
        } else {
            self.l = self.adl;
            self.il = self.adl;
        }
        bus.add_cycles(2);
        self.call(bus, vector, self.madl);
        self.end_instruction();
        tracing::trace!(vector, "interrupt taken");
    }

    /// Register file widths and decode state at an instruction boundary.
    fn verify(&self) -> Result<(), CoreDesync> {
        let desync = |reason: String| {
            Err(CoreDesync {
                pc: self.pc,
                reason,
            })
        };
        let wide = [
            ("BC", self.bc),
            ("DE", self.de),
            ("HL", self.hl),
            ("BC'", self.bc_alt),
            ("DE'", self.de_alt),
            ("HL'", self.hl_alt),
            ("IX", self.ix),
            ("IY", self.iy),
            ("SPL", self.spl),
            ("PC", self.pc),
        ];
        for (name, value) in wide {
            if value > 0xFF_FFFF {
                return desync(format!("{name}={value:#x} exceeds 24 bits"));
            }
        }
        if self.sps > 0xFFFF {
            return desync(format!("SPS={:#x} exceeds 16 bits", self.sps));
        }
        if !self.adl && self.pc > 0xFFFF {
            return desync(format!("PC={:#x} exceeds 16 bits in Z80 mode", self.pc));
        }
        if self.suffixed || self.prefix != Index::Hl || self.l != self.adl || self.il != self.adl {
            return desync("decode state leaked across the instruction boundary".into());
        }
        if self.ei_delay > 2 {
            return desync(format!("EI delay {}", self.ei_delay));
        }
        Ok(())
    }

    // ========== Debugger access ==========

    pub fn register(&self, reg: Register) -> u32 {
        match reg {
            Register::A => self.a as u32,
            Register::F => self.f as u32,
            Register::BC => self.bc,
            Register::DE => self.de,
            Register::HL => self.hl,
            Register::AltAF => (self.a_alt as u32) << 8 | self.f_alt as u32,
            Register::AltBC => self.bc_alt,
            Register::AltDE => self.de_alt,
            Register::AltHL => self.hl_alt,
            Register::IX => self.ix,
            Register::IY => self.iy,
            Register::SPS => self.sps,
            Register::SPL => self.spl,
            Register::PC => self.pc,
            Register::I => self.i as u32,
            Register::R => self.r as u32,
            Register::MBASE => self.mbase as u32,
            Register::ADL => self.adl as u32,
            Register::MADL => self.madl as u32,
            Register::IFF1 => self.iff1 as u32,
            Register::IFF2 => self.iff2 as u32,
            Register::IM => self.im as u32,
        }
    }

    /// Write a register, masked to its width. PC is masked to the current mode.
    pub fn set_register(&mut self, reg: Register, value: u32) {
        let v = value & reg.mask();
        match reg {
            Register::A => self.a = v as u8,
            Register::F => self.f = v as u8,
            Register::BC => self.bc = v,
            Register::DE => self.de = v,
            Register::HL => self.hl = v,
            Register::AltAF => {
                self.a_alt = (v >> 8) as u8;
                self.f_alt = v as u8;
            }
            Register::AltBC => self.bc_alt = v,
            Register::AltDE => self.de_alt = v,
            Register::AltHL => self.hl_alt = v,
            Register::IX => self.ix = v,
            Register::IY => self.iy = v,
            Register::SPS => self.sps = v,
            Register::SPL => self.spl = v,
            Register::PC => self.pc = v & self.pc_mask(),
            Register::I => self.i = v as u16,
            Register::R => self.r = v as u8,
            Register::MBASE => self.mbase = v as u8,
            Register::ADL => {
                self.adl = v != 0;
                self.pc &= self.pc_mask();
                self.end_instruction();
            }
            Register::MADL => self.madl = v != 0,
            Register::IFF1 => self.iff1 = v != 0,
            Register::IFF2 => self.iff2 = v != 0,
            Register::IM => {
                // Out-of-range modes leave the current mode in place
                if let Some(im) = u8::try_from(value).ok().and_then(InterruptMode::from_u8) {
                    self.im = im;
                }
            }
        }
    }
}

// ========== State Persistence ==========

impl Cpu {
    pub fn save(&self, w: &mut Writer) {
        w.u8(self.a);
        w.u8(self.f);
        w.u24(self.bc);
        w.u24(self.de);
        w.u24(self.hl);
        w.u8(self.a_alt);
        w.u8(self.f_alt);
        w.u24(self.bc_alt);
        w.u24(self.de_alt);
        w.u24(self.hl_alt);
        w.u24(self.ix);
        w.u24(self.iy);
        w.u16(self.sps as u16);
        w.u24(self.spl);
        w.u24(self.pc);
        w.u16(self.i);
        w.u8(self.r);
        w.u8(self.mbase);
        w.bool(self.iff1);
        w.bool(self.iff2);
        w.u8(self.im as u8);
        w.bool(self.adl);
        w.bool(self.madl);
        w.bool(self.halted);
        w.u8(self.ei_delay);
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let s = "cpu";
        let mut cpu = Self {
            a: r.u8(s)?,
            f: r.u8(s)?,
            bc: r.u24(s)?,
            de: r.u24(s)?,
            hl: r.u24(s)?,
            a_alt: r.u8(s)?,
            f_alt: r.u8(s)?,
            bc_alt: r.u24(s)?,
            de_alt: r.u24(s)?,
            hl_alt: r.u24(s)?,
            ix: r.u24(s)?,
            iy: r.u24(s)?,
            sps: r.u16(s)? as u32,
            spl: r.u24(s)?,
            pc: r.u24(s)?,
            i: r.u16(s)?,
            r: r.u8(s)?,
            mbase: r.u8(s)?,
            iff1: r.bool(s)?,
            iff2: r.bool(s)?,
            im: {
                let im = r.u8(s)?;
                InterruptMode::from_u8(im)
                    .ok_or_else(|| RestoreError::corrupt(s, format!("interrupt mode {im}")))?
            },
            adl: r.bool(s)?,
            madl: r.bool(s)?,
            halted: r.bool(s)?,
            ei_delay: r.u8(s)?,
            ..Self::new()
        };
        cpu.end_instruction();
        cpu.verify()
            .map_err(|e| RestoreError::corrupt(s, e.reason))?;
        Ok(cpu)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
