//! Register access, address formation, fetch, stack and ALU helpers

use super::flags::{self, C, H, N, PV, S, UNDOC, Z};
use super::{Cpu, Index};
use crate::bus::Bus;

macro_rules! byte_regs {
    ($($get:ident, $set:ident => $pair:ident >> $shift:literal;)*) => {
        $(
            #[inline]
            pub fn $get(&self) -> u8 {
                (self.$pair >> $shift) as u8
            }

            #[inline]
            pub fn $set(&mut self, value: u8) {
                self.$pair = (self.$pair & !(0xFFu32 << $shift)) | (value as u32) << $shift;
            }
        )*
    };
}

macro_rules! flag_bits {
    ($($get:ident, $set:ident => $bit:ident;)*) => {
        $(
            #[inline]
            pub fn $get(&self) -> bool {
                self.f & $bit != 0
            }

            #[inline]
            pub fn $set(&mut self, on: bool) {
                if on {
                    self.f |= $bit;
                } else {
                    self.f &= !$bit;
                }
            }
        )*
    };
}

impl Cpu {
    // ========== 8-bit Register Halves ==========
    // Writing a half leaves the pair's other bytes alone, including bits 16-23

    byte_regs! {
        b, set_b => bc >> 8;
        c, set_c => bc >> 0;
        d, set_d => de >> 8;
        e, set_e => de >> 0;
        h, set_h => hl >> 8;
        l, set_l => hl >> 0;
        ixh, set_ixh => ix >> 8;
        ixl, set_ixl => ix >> 0;
        iyh, set_iyh => iy >> 8;
        iyl, set_iyl => iy >> 0;
    }

    // ========== Flags ==========

    flag_bits! {
        flag_c, set_flag_c => C;
        flag_n, set_flag_n => N;
        flag_pv, set_flag_pv => PV;
        flag_h, set_flag_h => H;
        flag_z, set_flag_z => Z;
        flag_s, set_flag_s => S;
    }

    /// Replace the documented flags, keeping F5/F3 from before
    #[inline]
    pub(super) fn put_flags(&mut self, f: u8) {
        self.f = (self.f & UNDOC) | (f & !UNDOC);
    }

    /// Condition code y of JP cc / JR cc / CALL cc / RET cc
    pub(super) fn condition(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => !self.flag_z(),
            1 => self.flag_z(),
            2 => !self.flag_c(),
            3 => self.flag_c(),
            4 => !self.flag_pv(),
            5 => self.flag_pv(),
            6 => !self.flag_s(),
            _ => self.flag_s(),
        }
    }

    // ========== Exchanges ==========

    pub(super) fn ex_af(&mut self) {
        std::mem::swap(&mut self.a, &mut self.a_alt);
        std::mem::swap(&mut self.f, &mut self.f_alt);
    }

    pub(super) fn exx(&mut self) {
        std::mem::swap(&mut self.bc, &mut self.bc_alt);
        std::mem::swap(&mut self.de, &mut self.de_alt);
        std::mem::swap(&mut self.hl, &mut self.hl_alt);
    }

    // ========== Widths and Addresses ==========

    /// Mask a register value to the data width of this instruction
    #[inline]
    pub(super) fn mask_l(&self, value: u32) -> u32 {
        if self.l {
            value & 0xFF_FFFF
        } else {
            value & 0xFFFF
        }
    }

    /// Physical address for a data access at `value`
    #[inline]
    pub(super) fn data_addr(&self, value: u32) -> u32 {
        if self.l {
            value & 0xFF_FFFF
        } else {
            (self.mbase as u32) << 16 | (value & 0xFFFF)
        }
    }

    /// Read 2 or 3 bytes depending on L
    pub(super) fn read_wide(&self, bus: &mut Bus, addr: u32) -> u32 {
        if self.l {
            bus.read_long(addr)
        } else {
            bus.read_word(addr) as u32
        }
    }

    pub(super) fn write_wide(&self, bus: &mut Bus, addr: u32, value: u32) {
        if self.l {
            bus.write_long(addr, value);
        } else {
            bus.write_word(addr, value as u16);
        }
    }

    // ========== Fetch ==========

    /// Opcode or prefix fetch; bumps the low 7 bits of R
    pub(super) fn fetch_opcode(&mut self, bus: &mut Bus) -> u8 {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7F);
        self.fetch_byte(bus)
    }

    pub(super) fn fetch_byte(&mut self, bus: &mut Bus) -> u8 {
        let value = bus.fetch_byte(self.code_addr(0));
        self.pc = self.pc.wrapping_add(1) & self.pc_mask();
        value
    }

    /// Signed displacement, sign-extended
    pub(super) fn fetch_disp(&mut self, bus: &mut Bus) -> u32 {
        self.fetch_byte(bus) as i8 as i32 as u32
    }

    /// Immediate or address operand: 3 bytes when IL is set, else 2
    pub(super) fn fetch_imm(&mut self, bus: &mut Bus) -> u32 {
        let lo = self.fetch_byte(bus) as u32;
        let hi = self.fetch_byte(bus) as u32;
        let mut value = lo | hi << 8;
        if self.il {
            value |= (self.fetch_byte(bus) as u32) << 16;
        }
        value
    }

    // ========== Stack ==========

    fn stack_addr(&self, long: bool) -> u32 {
        if long {
            self.spl
        } else {
            (self.mbase as u32) << 16 | self.sps
        }
    }

    pub(super) fn push_byte_on(&mut self, bus: &mut Bus, value: u8, long: bool) {
        if long {
            self.spl = self.spl.wrapping_sub(1) & 0xFF_FFFF;
        } else {
            self.sps = self.sps.wrapping_sub(1) & 0xFFFF;
        }
        bus.write_byte(self.stack_addr(long), value);
    }

    pub(super) fn pop_byte_from(&mut self, bus: &mut Bus, long: bool) -> u8 {
        let value = bus.read_byte(self.stack_addr(long));
        if long {
            self.spl = self.spl.wrapping_add(1) & 0xFF_FFFF;
        } else {
            self.sps = self.sps.wrapping_add(1) & 0xFFFF;
        }
        value
    }

    /// Push at data width onto the stack L selects
    pub(super) fn push(&mut self, bus: &mut Bus, value: u32) {
        let long = self.l;
        if long {
            self.push_byte_on(bus, (value >> 16) as u8, long);
        }
        self.push_byte_on(bus, (value >> 8) as u8, long);
        self.push_byte_on(bus, value as u8, long);
    }

    pub(super) fn pop(&mut self, bus: &mut Bus) -> u32 {
        let long = self.l;
        let mut value = self.pop_byte_from(bus, long) as u32;
        value |= (self.pop_byte_from(bus, long) as u32) << 8;
        if long {
            value |= (self.pop_byte_from(bus, long) as u32) << 16;
        }
        value
    }

    /// SP as seen by the current instruction
    pub(super) fn stack_pointer(&self) -> u32 {
        if self.l {
            self.spl
        } else {
            self.sps
        }
    }

    pub(super) fn set_stack_pointer(&mut self, value: u32) {
        if self.l {
            self.spl = value & 0xFF_FFFF;
        } else {
            self.sps = value & 0xFFFF;
        }
    }

    /// Address of the top of the current stack
    pub(super) fn stack_top(&self) -> u32 {
        self.stack_addr(self.l)
    }

    // ========== Control Flow ==========

    /// Set PC and ADL together
    pub(super) fn jump_mode(&mut self, target: u32, adl: bool) {
        self.adl = adl;
        self.pc = target & self.pc_mask();
    }

    /// Relative jump within the current mode
    pub(super) fn jump_rel(&mut self, disp: u32) {
        self.pc = self.pc.wrapping_add(disp) & self.pc_mask();
    }

    /// CALL/RST/interrupt entry. A mixed call records the caller's mode on
    /// SPL and always saves the full PC, splitting it across both stacks when
    /// the modes differ.
    pub(super) fn call(&mut self, bus: &mut Bus, target: u32, mixed: bool) {
        let pc = self.pc;
        if mixed {
            let long = self.il || (self.l && !self.adl);
            if self.adl {
                self.push_byte_on(bus, (pc >> 16) as u8, true);
            }
            self.push_byte_on(bus, (pc >> 8) as u8, long);
            self.push_byte_on(bus, pc as u8, long);
            self.push_byte_on(bus, (self.madl as u8) << 1 | self.adl as u8, true);
        } else {
            self.push(bus, pc);
        }
        self.jump_mode(target, self.il);
    }

    /// Inverse of [`Cpu::call`]. A mixed return restores ADL from the saved
    /// mode byte.
    pub(super) fn ret(&mut self, bus: &mut Bus, mixed: bool) {
        if mixed {
            let adl = self.pop_byte_from(bus, true) & 1 != 0;
            let mut target = self.pop_byte_from(bus, self.adl) as u32;
            target |= (self.pop_byte_from(bus, self.adl) as u32) << 8;
            if adl {
                target |= (self.pop_byte_from(bus, true) as u32) << 16;
            }
            self.jump_mode(target, adl);
        } else {
            let target = self.pop(bus);
            self.jump_mode(target, self.adl);
        }
    }

    // ========== Operand Decoding ==========

    /// HL, IX or IY depending on the prefix
    pub(super) fn index(&self) -> u32 {
        match self.prefix {
            Index::Hl => self.hl,
            Index::Ix => self.ix,
            Index::Iy => self.iy,
        }
    }

    pub(super) fn set_index(&mut self, value: u32) {
        let value = self.mask_l(value);
        match self.prefix {
            Index::Hl => self.hl = value,
            Index::Ix => self.ix = value,
            Index::Iy => self.iy = value,
        }
    }

    /// Memory operand of an (HL)/(IX+d)/(IY+d) instruction. Fetches the
    /// displacement when prefixed.
    pub(super) fn operand_addr(&mut self, bus: &mut Bus) -> u32 {
        match self.prefix {
            Index::Hl => self.data_addr(self.hl),
            _ => {
                let d = self.fetch_disp(bus);
                self.data_addr(self.index().wrapping_add(d))
            }
        }
    }

    /// Register r (0-7, not 6) with H/L replaced by the index halves
    pub(super) fn reg(&self, r: u8) -> u8 {
        match (r, self.prefix) {
            (4, Index::Ix) => self.ixh(),
            (5, Index::Ix) => self.ixl(),
            (4, Index::Iy) => self.iyh(),
            (5, Index::Iy) => self.iyl(),
            _ => self.reg_plain(r),
        }
    }

    pub(super) fn set_reg(&mut self, r: u8, value: u8) {
        match (r, self.prefix) {
            (4, Index::Ix) => self.set_ixh(value),
            (5, Index::Ix) => self.set_ixl(value),
            (4, Index::Iy) => self.set_iyh(value),
            (5, Index::Iy) => self.set_iyl(value),
            _ => self.set_reg_plain(r, value),
        }
    }

    /// Register r without index substitution; 6 reads as 0
    pub(super) fn reg_plain(&self, r: u8) -> u8 {
        match r & 7 {
            0 => self.b(),
            1 => self.c(),
            2 => self.d(),
            3 => self.e(),
            4 => self.h(),
            5 => self.l(),
            6 => 0,
            _ => self.a,
        }
    }

    pub(super) fn set_reg_plain(&mut self, r: u8, value: u8) {
        match r & 7 {
            0 => self.set_b(value),
            1 => self.set_c(value),
            2 => self.set_d(value),
            3 => self.set_e(value),
            4 => self.set_h(value),
            5 => self.set_l(value),
            6 => {}
            _ => self.a = value,
        }
    }

    /// rp table: BC, DE, HL/IX/IY, SP
    pub(super) fn rp(&self, p: u8) -> u32 {
        let value = match p & 3 {
            0 => self.bc,
            1 => self.de,
            2 => self.index(),
            _ => self.stack_pointer(),
        };
        self.mask_l(value)
    }

    pub(super) fn set_rp(&mut self, p: u8, value: u32) {
        let value = self.mask_l(value);
        match p & 3 {
            0 => self.bc = value,
            1 => self.de = value,
            2 => self.set_index(value),
            _ => self.set_stack_pointer(value),
        }
    }

    /// rp2 table for PUSH/POP: AF replaces SP. AF is zero-extended.
    pub(super) fn rp2(&self, p: u8) -> u32 {
        match p & 3 {
            3 => (self.a as u32) << 8 | self.f as u32,
            _ => self.rp(p),
        }
    }

    pub(super) fn set_rp2(&mut self, p: u8, value: u32) {
        match p & 3 {
            3 => {
                self.a = (value >> 8) as u8;
                self.f = value as u8;
            }
            _ => self.set_rp(p, value),
        }
    }

    // ========== 8-bit ALU ==========

    /// ALU operation y of the x=2 row and the ALU-immediate column
    pub(super) fn alu(&mut self, op: u8, value: u8) {
        match op & 7 {
            0 => self.alu_add(value, false),
            1 => self.alu_add(value, self.flag_c()),
            2 => self.a = self.alu_sub(value, false),
            3 => self.a = self.alu_sub(value, self.flag_c()),
            4 => self.alu_logic(self.a & value, true),
            5 => self.alu_logic(self.a ^ value, false),
            6 => self.alu_logic(self.a | value, false),
            _ => {
                self.alu_sub(value, false);
            }
        }
    }

    fn alu_add(&mut self, value: u8, carry: bool) {
        let a = self.a;
        let c = carry as u16;
        let sum = a as u16 + value as u16 + c;
        let result = sum as u8;
        let mut f = flags::sz(result);
        if (a & 0xF) as u16 + (value & 0xF) as u16 + c > 0xF {
            f |= H;
        }
        if (a ^ result) & (value ^ result) & 0x80 != 0 {
            f |= PV;
        }
        if sum > 0xFF {
            f |= C;
        }
        self.put_flags(f);
        self.a = result;
    }

    /// A - value - carry with flags; returns the difference without storing
    pub(super) fn alu_sub(&mut self, value: u8, carry: bool) -> u8 {
        let a = self.a;
        let c = carry as u8;
        let result = a.wrapping_sub(value).wrapping_sub(c);
        let mut f = flags::sz(result) | N;
        if (a & 0xF) < (value & 0xF) + c {
            f |= H;
        }
        if (a ^ value) & (a ^ result) & 0x80 != 0 {
            f |= PV;
        }
        if (a as u16) < value as u16 + c as u16 {
            f |= C;
        }
        self.put_flags(f);
        result
    }

    fn alu_logic(&mut self, result: u8, half: bool) {
        self.a = result;
        self.put_flags(flags::szp(result) | if half { H } else { 0 });
    }

    /// TST A,value: AND without storing
    pub(super) fn test(&mut self, value: u8) {
        self.put_flags(flags::szp(self.a & value) | H);
    }

    pub(super) fn inc8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        let mut f = flags::sz(result) | (self.f & C);
        if value & 0xF == 0xF {
            f |= H;
        }
        if value == 0x7F {
            f |= PV;
        }
        self.put_flags(f);
        result
    }

    pub(super) fn dec8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        let mut f = flags::sz(result) | N | (self.f & C);
        if value & 0xF == 0 {
            f |= H;
        }
        if value == 0x80 {
            f |= PV;
        }
        self.put_flags(f);
        result
    }

    pub(super) fn daa(&mut self) {
        let a = self.a;
        let sub = self.flag_n();
        let mut fix = 0u8;
        let mut carry = self.flag_c();
        if self.flag_h() || (a & 0xF) > 9 {
            fix |= 0x06;
        }
        if carry || a > 0x99 {
            fix |= 0x60;
            carry = true;
        }
        let result = if sub { a.wrapping_sub(fix) } else { a.wrapping_add(fix) };
        let half = if sub {
            self.flag_h() && (a & 0xF) < 6
        } else {
            (a & 0xF) > 9
        };
        let mut f = flags::szp(result) | (self.f & N);
        if half {
            f |= H;
        }
        if carry {
            f |= C;
        }
        self.put_flags(f);
        self.a = result;
    }

    // ========== Wide ALU ==========

    fn width_bits(&self) -> (u32, u32) {
        if self.l {
            (0xFF_FFFF, 0x80_0000)
        } else {
            (0xFFFF, 0x8000)
        }
    }

    /// ADD HL,rr: only H, N and C change
    pub(super) fn add_wide(&mut self, a: u32, b: u32) -> u32 {
        let (mask, _) = self.width_bits();
        let (a, b) = (a & mask, b & mask);
        let sum = a + b;
        self.set_flag_h((a & 0xFFF) + (b & 0xFFF) > 0xFFF);
        self.set_flag_n(false);
        self.set_flag_c(sum > mask);
        sum & mask
    }

    pub(super) fn adc_wide(&mut self, a: u32, b: u32) -> u32 {
        let (mask, sign) = self.width_bits();
        let (a, b) = (a & mask, b & mask);
        let c = self.flag_c() as u32;
        let sum = a + b + c;
        let result = sum & mask;
        let mut f = if result & sign != 0 { S } else { 0 };
        if result == 0 {
            f |= Z;
        }
        if (a & 0xFFF) + (b & 0xFFF) + c > 0xFFF {
            f |= H;
        }
        if (a ^ result) & (b ^ result) & sign != 0 {
            f |= PV;
        }
        if sum > mask {
            f |= C;
        }
        self.put_flags(f);
        result
    }

    pub(super) fn sbc_wide(&mut self, a: u32, b: u32) -> u32 {
        let (mask, sign) = self.width_bits();
        let (a, b) = (a & mask, b & mask);
        let c = self.flag_c() as u32;
        let result = a.wrapping_sub(b).wrapping_sub(c) & mask;
        let mut f = N | if result & sign != 0 { S } else { 0 };
        if result == 0 {
            f |= Z;
        }
        if (a & 0xFFF) < (b & 0xFFF) + c {
            f |= H;
        }
        if (a ^ b) & (a ^ result) & sign != 0 {
            f |= PV;
        }
        if a < b + c {
            f |= C;
        }
        self.put_flags(f);
        result
    }

    // ========== Rotates and Shifts ==========

    /// CB-page shift y: RLC RRC RL RR SLA SRA SLL SRL
    pub(super) fn shift(&mut self, op: u8, value: u8) -> u8 {
        let carry_in = self.flag_c() as u8;
        let (result, carry) = match op & 7 {
            0 => (value.rotate_left(1), value & 0x80 != 0),
            1 => (value.rotate_right(1), value & 1 != 0),
            2 => (value << 1 | carry_in, value & 0x80 != 0),
            3 => (value >> 1 | carry_in << 7, value & 1 != 0),
            4 => (value << 1, value & 0x80 != 0),
            5 => (((value as i8) >> 1) as u8, value & 1 != 0),
            6 => (value << 1 | 1, value & 0x80 != 0),
            _ => (value >> 1, value & 1 != 0),
        };
        self.put_flags(flags::szp(result) | if carry { C } else { 0 });
        result
    }

    /// RLCA/RRCA/RLA/RRA: S, Z and PV survive
    pub(super) fn rotate_a(&mut self, op: u8) {
        let a = self.a;
        let carry_in = self.flag_c() as u8;
        let (result, carry) = match op & 3 {
            0 => (a.rotate_left(1), a & 0x80 != 0),
            1 => (a.rotate_right(1), a & 1 != 0),
            2 => (a << 1 | carry_in, a & 0x80 != 0),
            _ => (a >> 1 | carry_in << 7, a & 1 != 0),
        };
        self.a = result;
        self.put_flags((self.f & (S | Z | PV)) | if carry { C } else { 0 });
    }

    pub(super) fn bit(&mut self, bit: u8, value: u8) {
        let set = value & (1 << bit) != 0;
        let mut f = H | (self.f & C);
        if !set {
            f |= Z | PV;
        }
        if set && bit == 7 {
            f |= S;
        }
        self.put_flags(f);
    }

    /// RLD (left) and RRD: rotate nibbles between A and (HL)
    pub(super) fn rotate_digit(&mut self, bus: &mut Bus, left: bool) {
        let addr = self.data_addr(self.hl);
        let m = bus.read_byte(addr);
        let a = self.a;
        let (new_m, new_a) = if left {
            (m << 4 | (a & 0xF), (a & 0xF0) | m >> 4)
        } else {
            (a << 4 | m >> 4, (a & 0xF0) | (m & 0xF))
        };
        bus.write_byte(addr, new_m);
        self.a = new_a;
        self.put_flags(flags::szp(new_a) | (self.f & C));
    }
}
