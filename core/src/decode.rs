//! Instruction length and control-flow classification
//!
//! The debugger needs to know, before an instruction runs, how long it is
//! and whether it calls, returns or loops. This module answers that from the
//! raw bytes alone without touching CPU state. Bytes are supplied by a
//! closure indexed from the instruction start, so callers can read through
//! side-effect-free memory peeks.

/// How an instruction transfers control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// CALL nn / CALL cc,nn
    Call,
    /// RST n
    Rst,
    /// RET, RET cc, RETI, RETN
    Ret,
    /// Block instructions that rewind PC while BC (or B) is non-zero
    RepeatBlock,
    /// DJNZ e
    Djnz,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Total length in bytes, including suffix and prefix bytes
    pub len: u32,
    pub flow: Flow,
}

/// Suffix bytes .SIS/.LIS/.SIL/.LIL
pub(crate) fn is_suffix(op: u8) -> bool {
    op >> 6 == 1 && (op >> 3) & 7 == op & 7 && op & 7 < 4
}

/// Decode the instruction whose first byte is `byte_at(0)`.
///
/// `adl` is the mode the instruction will execute in. A suffix byte overrides
/// the immediate width for this one instruction.
pub fn decode(byte_at: impl Fn(u32) -> u8, adl: bool) -> Decoded {
    let mut at = 0u32;
    let mut il = adl;
    if is_suffix(byte_at(0)) {
        // A suffix followed by another suffix executes on its own
        if is_suffix(byte_at(1)) {
            return Decoded {
                len: 1,
                flow: Flow::Other,
            };
        }
        il = byte_at(0) & 0x02 != 0;
        at = 1;
    }
    let imm = if il { 3 } else { 2 };

    let op = byte_at(at);
    let (len, flow) = match op {
        0xCB => (2, Flow::Other),
        0xED => ed_page(byte_at(at + 1), imm),
        0xDD | 0xFD => index_page(&byte_at, at + 1, imm),
        _ => base_page(op, imm),
    };
    Decoded { len: at + len, flow }
}

fn base_page(op: u8, imm: u32) -> (u32, Flow) {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let q = y & 1;
    let p = y >> 1;

    match (x, z) {
        (0, 0) if y == 2 => (2, Flow::Djnz),
        (0, 0) if y >= 3 => (2, Flow::Other),
        (0, 1) if q == 0 => (1 + imm, Flow::Other),
        (0, 2) if y >= 4 => (1 + imm, Flow::Other),
        (0, 6) => (2, Flow::Other),
        (3, 0) => (1, Flow::Ret),
        (3, 1) if y == 1 => (1, Flow::Ret),
        (3, 2) => (1 + imm, Flow::Other),
        (3, 3) => match y {
            0 => (1 + imm, Flow::Other),
            2 | 3 => (2, Flow::Other),
            _ => (1, Flow::Other),
        },
        (3, 4) => (1 + imm, Flow::Call),
        (3, 5) if q == 1 && p == 0 => (1 + imm, Flow::Call),
        (3, 6) => (2, Flow::Other),
        (3, 7) => (1, Flow::Rst),
        _ => (1, Flow::Other),
    }
}

/// Length of an ED-page instruction, counting the ED byte.
fn ed_page(op: u8, imm: u32) -> (u32, Flow) {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;

    let len = match (x, z) {
        // IN0 r,(n)
        (0, 0) => 3,
        // OUT0 (n),r; ED 31 is LD IY,(HL)
        (0, 1) if y != 6 => 3,
        // LEA rr,IX+d / LEA rr,IY+d
        (0, 2) | (0, 3) if y & 1 == 0 => 3,
        (1, 3) => 2 + imm,
        _ => match op {
            0x54 | 0x55 | 0x64 | 0x65 | 0x66 | 0x74 => 3,
            _ => 2,
        },
    };

    let flow = match op {
        0x45 | 0x4D => Flow::Ret,
        0x92 | 0x93 | 0x94 | 0x9A | 0x9B | 0x9C => Flow::RepeatBlock,
        0xB0..=0xB4 | 0xB8..=0xBC => Flow::RepeatBlock,
        0xC2 | 0xC3 | 0xCA | 0xCB => Flow::RepeatBlock,
        _ => Flow::Other,
    };
    (len, flow)
}

/// Length of a DD/FD-prefixed instruction, counting the prefix.
fn index_page(byte_at: &impl Fn(u32) -> u8, at: u32, imm: u32) -> (u32, Flow) {
    let op = byte_at(at);
    match op {
        // A prefix followed by another prefix executes on its own
        0xDD | 0xFD => return (1, Flow::Other),
        0xED => {
            let (len, flow) = ed_page(byte_at(at + 1), imm);
            return (1 + len, flow);
        }
        _ => {}
    }
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;

    let (len, flow) = match op {
        0xCB => (3, Flow::Other),
        // LD rr,(IX+d), LD (IX+d),rr and the IX/IY cross loads
        0x07 | 0x0F | 0x17 | 0x1F | 0x27 | 0x2F | 0x31 | 0x37 | 0x3E | 0x3F => (2, Flow::Other),
        0x34 | 0x35 => (2, Flow::Other),
        0x36 => (3, Flow::Other),
        0x76 => (1, Flow::Other),
        _ if x == 1 && (y == 6 || z == 6) => (2, Flow::Other),
        _ if x == 2 && z == 6 => (2, Flow::Other),
        _ => base_page(op, imm),
    };
    (1 + len, flow)
}
