//! F register layout
//!
//! ```text
//! bit  7 6 5  4 3  2  1 0
//!      S Z F5 H F3 PV N C
//! ```
//!
//! F5 and F3 are undocumented. Most ALU paths on the eZ80 leave them as they
//! were, so the helpers here only compute the documented bits.

pub const C: u8 = 1 << 0;
/// Set by subtraction
pub const N: u8 = 1 << 1;
/// Parity or overflow, depending on the instruction
pub const PV: u8 = 1 << 2;
pub const F3: u8 = 1 << 3;
/// Half carry out of bit 3 (bit 11 for 16/24-bit adds)
pub const H: u8 = 1 << 4;
pub const F5: u8 = 1 << 5;
pub const Z: u8 = 1 << 6;
pub const S: u8 = 1 << 7;

/// The two undocumented bits
pub const UNDOC: u8 = F5 | F3;

/// S and Z for an 8-bit result
#[inline]
pub const fn sz(value: u8) -> u8 {
    (value & S) | if value == 0 { Z } else { 0 }
}

/// S, Z and even parity for an 8-bit result
#[inline]
pub const fn szp(value: u8) -> u8 {
    sz(value) | if value.count_ones() % 2 == 0 { PV } else { 0 }
}
