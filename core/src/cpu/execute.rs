//! Opcode pages
//!
//! Opcodes are split as `x = op>>6, y = (op>>3)&7, z = op&7, p = y>>1, q = y&1`.
//! DD/FD select IX/IY through `Cpu::prefix` rather than a separate page, so
//! the base page serves both plain and indexed forms.

use super::{Cpu, Index};
use crate::bus::Bus;

/// Where a block I/O instruction takes its port number from
#[derive(Debug, Clone, Copy)]
enum IoPort {
    /// BC (INI, OUTI, INI2, OUTI2)
    Bc,
    /// C with a zero upper byte (INIM, OTIM)
    C,
    /// DE (INIRX, OTIRX)
    De,
}

#[derive(Debug, Clone, Copy)]
struct BlockIo {
    output: bool,
    backward: bool,
    repeat: bool,
    port: IoPort,
    /// Step C along with HL
    step_c: bool,
    /// Count down BC instead of B
    count_bc: bool,
}

impl BlockIo {
    fn new(op: u8, port: IoPort, step_c: bool) -> Self {
        Self {
            output: op & 1 != 0,
            backward: op & 0x08 != 0,
            repeat: op & 0x10 != 0,
            port,
            step_c,
            count_bc: false,
        }
    }
}

impl Cpu {
    pub(super) fn execute(&mut self, bus: &mut Bus, op: u8) {
        match op {
            0xCB => return self.execute_cb(bus),
            0xED => {
                // An index prefix has no effect on the ED page
                self.prefix = Index::Hl;
                return self.execute_ed(bus);
            }
            _ => {}
        }
        if self.prefix != Index::Hl && self.execute_index_load(bus, op) {
            return;
        }

        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        match x {
            0 => self.execute_x0(bus, y, z),
            1 if op == 0x76 => {
                bus.add_cycles(1);
                self.halted = true;
            }
            1 => self.execute_ld_r_r(bus, y, z),
            2 => {
                let value = self.operand(bus, z);
                self.alu(y, value);
            }
            _ => self.execute_x3(bus, y, z),
        }
    }

    /// Source operand r, reading memory for r = 6
    fn operand(&mut self, bus: &mut Bus, r: u8) -> u8 {
        if r == 6 {
            let addr = self.operand_addr(bus);
            bus.add_cycles(1);
            bus.read_byte(addr)
        } else {
            self.reg(r)
        }
    }

    fn execute_x0(&mut self, bus: &mut Bus, y: u8, z: u8) {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => match y {
                0 => {}
                1 => self.ex_af(),
                2 => {
                    let d = self.fetch_disp(bus);
                    let b = self.b().wrapping_sub(1);
                    self.set_b(b);
                    bus.add_cycles(1);
                    if b != 0 {
                        self.jump_rel(d);
                    }
                }
                3 => {
                    let d = self.fetch_disp(bus);
                    self.jump_rel(d);
                }
                _ => {
                    let d = self.fetch_disp(bus);
                    if self.condition(y - 4) {
                        self.jump_rel(d);
                    }
                }
            },
            1 if q == 0 => {
                let value = self.fetch_imm(bus);
                self.set_rp(p, value);
            }
            1 => {
                let sum = self.add_wide(self.index(), self.rp(p));
                self.set_index(sum);
            }
            2 => self.execute_indirect_load(bus, p, q),
            3 => {
                let value = self.rp(p);
                let value = if q == 0 { value.wrapping_add(1) } else { value.wrapping_sub(1) };
                self.set_rp(p, value);
                bus.add_cycles(1);
            }
            4 | 5 => {
                if y == 6 {
                    let addr = self.operand_addr(bus);
                    bus.add_cycles(1);
                    let value = bus.read_byte(addr);
                    let value = if z == 4 { self.inc8(value) } else { self.dec8(value) };
                    bus.write_byte(addr, value);
                } else {
                    let value = self.reg(y);
                    let value = if z == 4 { self.inc8(value) } else { self.dec8(value) };
                    self.set_reg(y, value);
                }
            }
            6 => {
                if y == 6 {
                    let addr = self.operand_addr(bus);
                    let n = self.fetch_byte(bus);
                    bus.write_byte(addr, n);
                } else {
                    let n = self.fetch_byte(bus);
                    self.set_reg(y, n);
                }
            }
            _ => match y {
                0..=3 => self.rotate_a(y),
                4 => self.daa(),
                5 => {
                    self.a = !self.a;
                    self.set_flag_h(true);
                    self.set_flag_n(true);
                }
                6 => {
                    self.set_flag_c(true);
                    self.set_flag_h(false);
                    self.set_flag_n(false);
                }
                _ => {
                    let c = self.flag_c();
                    self.set_flag_h(c);
                    self.set_flag_c(!c);
                    self.set_flag_n(false);
                }
            },
        }
    }

    /// LD (BC)/(DE)/(nn),A and HL, and the reverse direction
    fn execute_indirect_load(&mut self, bus: &mut Bus, p: u8, q: u8) {
        let addr = match p {
            0 => self.data_addr(self.bc),
            1 => self.data_addr(self.de),
            _ => {
                let nn = self.fetch_imm(bus);
                self.data_addr(nn)
            }
        };
        match (q, p) {
            (0, 2) => {
                let value = self.index();
                self.write_wide(bus, addr, value);
            }
            (0, _) => bus.write_byte(addr, self.a),
            (_, 2) => {
                let value = self.read_wide(bus, addr);
                self.set_index(value);
            }
            _ => self.a = bus.read_byte(addr),
        }
    }

    fn execute_ld_r_r(&mut self, bus: &mut Bus, y: u8, z: u8) {
        // With a memory operand the other side is the plain register
        if y == 6 {
            let addr = self.operand_addr(bus);
            bus.add_cycles(1);
            bus.write_byte(addr, self.reg_plain(z));
        } else if z == 6 {
            let addr = self.operand_addr(bus);
            bus.add_cycles(1);
            let value = bus.read_byte(addr);
            self.set_reg_plain(y, value);
        } else {
            let value = self.reg(z);
            self.set_reg(y, value);
        }
    }

    fn execute_x3(&mut self, bus: &mut Bus, y: u8, z: u8) {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => {
                bus.add_cycles(1);
                if self.condition(y) {
                    self.ret(bus, self.suffixed);
                }
            }
            1 if q == 0 => {
                let value = self.pop(bus);
                self.set_rp2(p, value);
            }
            1 => match p {
                0 => self.ret(bus, self.suffixed),
                1 => self.exx(),
                2 => {
                    let target = self.index();
                    self.jump_mode(target, self.l);
                }
                _ => {
                    let value = self.index();
                    self.set_stack_pointer(self.mask_l(value));
                    bus.add_cycles(1);
                }
            },
            2 => {
                let nn = self.fetch_imm(bus);
                if self.condition(y) {
                    self.jump_mode(nn, self.il);
                }
            }
            3 => match y {
                0 => {
                    let nn = self.fetch_imm(bus);
                    self.jump_mode(nn, self.il);
                }
                2 => {
                    let n = self.fetch_byte(bus);
                    bus.port_write((self.a as u16) << 8 | n as u16, self.a);
                }
                3 => {
                    let n = self.fetch_byte(bus);
                    self.a = bus.port_read((self.a as u16) << 8 | n as u16);
                }
                4 => {
                    let addr = self.stack_top();
                    let value = self.read_wide(bus, addr);
                    let index = self.mask_l(self.index());
                    self.write_wide(bus, addr, index);
                    self.set_index(value);
                    bus.add_cycles(1);
                }
                // EX DE,HL ignores any index prefix
                5 => std::mem::swap(&mut self.de, &mut self.hl),
                6 => {
                    self.iff1 = false;
                    self.iff2 = false;
                    self.ei_delay = 0;
                }
                7 => self.ei_delay = 2,
                // CB is dispatched before reaching here
                _ => {}
            },
            4 => {
                let nn = self.fetch_imm(bus);
                if self.condition(y) {
                    self.call(bus, nn, self.suffixed);
                }
            }
            5 if q == 0 => {
                let value = self.rp2(p);
                self.push(bus, value);
            }
            5 => {
                if p == 0 {
                    let nn = self.fetch_imm(bus);
                    self.call(bus, nn, self.suffixed);
                }
            }
            6 => {
                let n = self.fetch_byte(bus);
                self.alu(y, n);
            }
            _ => {
                bus.add_cycles(1);
                self.call(bus, (y as u32) << 3, self.suffixed);
            }
        }
    }

    // ========== CB Page ==========

    fn execute_cb(&mut self, bus: &mut Bus) {
        // DD CB d op: displacement comes before the opcode
        let (op, addr) = if self.prefix != Index::Hl {
            let addr = self.operand_addr(bus);
            (self.fetch_byte(bus), Some(addr))
        } else {
            let op = self.fetch_opcode(bus);
            let addr = (op & 7 == 6).then(|| self.data_addr(self.hl));
            (op, addr)
        };
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        let value = match addr {
            Some(addr) => {
                bus.add_cycles(1);
                bus.read_byte(addr)
            }
            None => self.reg_plain(z),
        };
        let result = match x {
            0 => self.shift(y, value),
            1 => {
                self.bit(y, value);
                return;
            }
            2 => value & !(1 << y),
            _ => value | (1 << y),
        };
        match addr {
            Some(addr) => bus.write_byte(addr, result),
            None => self.set_reg_plain(z, result),
        }
    }

    // ========== DD/FD eZ80 Loads ==========

    /// eZ80-only DD/FD opcodes. Returns false for anything else.
    fn execute_index_load(&mut self, bus: &mut Bus, op: u8) -> bool {
        let p = (op >> 4) & 3;
        match op {
            // LD BC/DE/HL,(IX+d)
            0x07 | 0x17 | 0x27 => {
                let addr = self.operand_addr(bus);
                let value = self.read_wide(bus, addr);
                self.set_pair(p, value);
            }
            // LD (IX+d),BC/DE/HL
            0x0F | 0x1F | 0x2F => {
                let addr = self.operand_addr(bus);
                let value = self.mask_l(self.pair(p));
                self.write_wide(bus, addr, value);
            }
            // LD IX,(IX+d)
            0x37 => {
                let addr = self.operand_addr(bus);
                let value = self.read_wide(bus, addr);
                self.set_index(value);
            }
            // LD IY,(IX+d)
            0x31 => {
                let addr = self.operand_addr(bus);
                let value = self.read_wide(bus, addr);
                self.set_other_index(value);
            }
            // LD (IX+d),IX
            0x3F => {
                let addr = self.operand_addr(bus);
                let value = self.mask_l(self.index());
                self.write_wide(bus, addr, value);
            }
            // LD (IX+d),IY
            0x3E => {
                let addr = self.operand_addr(bus);
                let value = self.mask_l(self.other_index());
                self.write_wide(bus, addr, value);
            }
            _ => return false,
        }
        true
    }

    /// BC, DE or HL regardless of prefix
    fn pair(&self, p: u8) -> u32 {
        match p {
            0 => self.bc,
            1 => self.de,
            _ => self.hl,
        }
    }

    fn set_pair(&mut self, p: u8, value: u32) {
        let value = self.mask_l(value);
        match p {
            0 => self.bc = value,
            1 => self.de = value,
            _ => self.hl = value,
        }
    }

    fn other_index(&self) -> u32 {
        if self.prefix == Index::Iy {
            self.ix
        } else {
            self.iy
        }
    }

    fn set_other_index(&mut self, value: u32) {
        let value = self.mask_l(value);
        if self.prefix == Index::Iy {
            self.ix = value;
        } else {
            self.iy = value;
        }
    }

    // ========== ED Page ==========

    fn execute_ed(&mut self, bus: &mut Bus) {
        let op = self.fetch_opcode(bus);
        match op >> 6 {
            0 => self.execute_ed_x0(bus, op),
            1 => self.execute_ed_x1(bus, op),
            2 => self.execute_ed_block(bus, op),
            _ => self.execute_ed_x3(bus, op),
        }
    }

    /// Opcodes with no eZ80 meaning execute as NOP
    fn undefined(&self, op: u8) {
        tracing::trace!(pc = format_args!("{:06x}", self.insn_pc), op = format_args!("ED {op:02x}"), "undefined opcode");
    }

    fn execute_ed_x0(&mut self, bus: &mut Bus, op: u8) {
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        match z {
            // IN0 r,(n)
            0 => {
                let n = self.fetch_byte(bus);
                let value = bus.port_read(n as u16);
                self.set_reg_plain(y, value);
                self.put_flags(super::flags::szp(value) | (self.f & super::flags::C));
            }
            // LD IY,(HL)
            1 if y == 6 => {
                let addr = self.data_addr(self.hl);
                self.iy = self.mask_l(self.read_wide(bus, addr));
            }
            // OUT0 (n),r
            1 => {
                let n = self.fetch_byte(bus);
                bus.port_write(n as u16, self.reg_plain(y));
            }
            // LEA rr,IX+d / LEA rr,IY+d
            2 | 3 if y & 1 == 0 => {
                let base = if z == 2 { self.ix } else { self.iy };
                let d = self.fetch_disp(bus);
                let value = self.mask_l(base.wrapping_add(d));
                match p {
                    0 => self.bc = value,
                    1 => self.de = value,
                    2 => self.hl = value,
                    _ if z == 2 => self.ix = value,
                    _ => self.iy = value,
                }
            }
            // TST A,r
            4 => {
                let value = if y == 6 {
                    let addr = self.data_addr(self.hl);
                    bus.read_byte(addr)
                } else {
                    self.reg_plain(y)
                };
                self.test(value);
            }
            // LD (HL),IY
            6 if y == 7 => {
                let addr = self.data_addr(self.hl);
                let value = self.mask_l(self.iy);
                self.write_wide(bus, addr, value);
            }
            // LD rr,(HL) / LD (HL),rr with rr = BC, DE, HL, IX
            7 => {
                let addr = self.data_addr(self.hl);
                if y & 1 == 0 {
                    let value = self.mask_l(self.read_wide(bus, addr));
                    match p {
                        0 => self.bc = value,
                        1 => self.de = value,
                        2 => self.hl = value,
                        _ => self.ix = value,
                    }
                } else {
                    let value = match p {
                        0 => self.bc,
                        1 => self.de,
                        2 => self.hl,
                        _ => self.ix,
                    };
                    let value = self.mask_l(value);
                    self.write_wide(bus, addr, value);
                }
            }
            _ => self.undefined(op),
        }
    }

    fn execute_ed_x1(&mut self, bus: &mut Bus, op: u8) {
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;
        match z {
            // IN r,(C)
            0 => {
                let value = bus.port_read(self.bc as u16);
                self.set_reg_plain(y, value);
                self.put_flags(super::flags::szp(value) | (self.f & super::flags::C));
            }
            // OUT (C),r
            1 => {
                let value = self.reg_plain(y);
                bus.port_write(self.bc as u16, value);
            }
            2 => {
                let (hl, rr) = (self.hl, self.rp(p));
                self.hl = if q == 0 {
                    self.sbc_wide(hl, rr)
                } else {
                    self.adc_wide(hl, rr)
                };
            }
            3 => {
                let nn = self.fetch_imm(bus);
                let addr = self.data_addr(nn);
                if q == 0 {
                    let value = self.rp(p);
                    self.write_wide(bus, addr, value);
                } else {
                    let value = self.read_wide(bus, addr);
                    self.set_rp(p, value);
                }
            }
            4 => match y {
                // NEG
                0 => {
                    let a = self.a;
                    self.a = 0;
                    self.a = self.alu_sub(a, false);
                }
                // MLT rr
                1 | 3 | 5 | 7 => {
                    let rr = self.rp(p);
                    let product = (rr >> 8 & 0xFF) * (rr & 0xFF);
                    self.set_rp(p, product);
                    bus.add_cycles(4);
                }
                // LEA IX,IY+d
                2 => {
                    let d = self.fetch_disp(bus);
                    self.ix = self.mask_l(self.iy.wrapping_add(d));
                }
                // TST A,n
                4 => {
                    let n = self.fetch_byte(bus);
                    self.test(n);
                }
                // TSTIO n
                _ => {
                    let n = self.fetch_byte(bus);
                    let value = bus.port_read(self.c() as u16);
                    self.put_flags(super::flags::szp(value & n) | super::flags::H);
                }
            },
            5 => match y {
                // RETN
                0 => {
                    self.iff1 = self.iff2;
                    self.ret(bus, self.suffixed || self.madl);
                }
                // RETI
                1 => self.ret(bus, self.suffixed || self.madl),
                // LEA IY,IX+d
                2 => {
                    let d = self.fetch_disp(bus);
                    self.iy = self.mask_l(self.ix.wrapping_add(d));
                }
                // PEA IX+d
                4 => {
                    let d = self.fetch_disp(bus);
                    let value = self.ix.wrapping_add(d);
                    self.push(bus, value);
                }
                // LD MB,A
                5 => {
                    if self.adl {
                        self.mbase = self.a;
                    }
                }
                // STMIX
                7 => self.madl = true,
                _ => self.undefined(op),
            },
            6 => match y {
                0 | 1 => self.im = super::InterruptMode::Mode0,
                2 => self.im = super::InterruptMode::Mode1,
                3 => self.im = super::InterruptMode::Mode2,
                // PEA IY+d
                4 => {
                    let d = self.fetch_disp(bus);
                    let value = self.iy.wrapping_add(d);
                    self.push(bus, value);
                }
                // LD A,MB
                5 => self.a = self.mbase,
                // SLP
                6 => self.halted = true,
                // RSMIX
                _ => self.madl = false,
            },
            _ => match y {
                0 => self.i = (self.i & 0xFF00) | self.a as u16,
                1 => self.r = self.a,
                2 | 3 => {
                    self.a = if y == 2 { self.i as u8 } else { self.r };
                    let pv = if self.iff2 { super::flags::PV } else { 0 };
                    self.put_flags(super::flags::sz(self.a) | pv | (self.f & super::flags::C));
                }
                4 => self.rotate_digit(bus, false),
                5 => self.rotate_digit(bus, true),
                _ => self.undefined(op),
            },
        }
    }

    // ========== Block Instructions ==========

    fn execute_ed_block(&mut self, bus: &mut Bus, op: u8) {
        match op {
            0xA0 | 0xA8 | 0xB0 | 0xB8 => self.block_load(bus, op & 0x08 != 0, op & 0x10 != 0),
            0xA1 | 0xA9 | 0xB1 | 0xB9 => self.block_compare(bus, op & 0x08 != 0, op & 0x10 != 0),
            // INI/OUTI family
            0xA2 | 0xA3 | 0xAA | 0xAB | 0xB2 | 0xB3 | 0xBA | 0xBB => {
                self.block_io(bus, BlockIo::new(op, IoPort::Bc, false))
            }
            // INIM/OTIM family
            0x82 | 0x83 | 0x8A | 0x8B | 0x92 | 0x93 | 0x9A | 0x9B => {
                self.block_io(bus, BlockIo::new(op, IoPort::C, true))
            }
            // INI2/IND2 family
            0x84 | 0x8C | 0x94 | 0x9C => self.block_io(bus, BlockIo::new(op, IoPort::Bc, true)),
            // OUTI2/OUTD2 family
            0xA4 | 0xAC | 0xB4 | 0xBC => {
                let mut io = BlockIo::new(op, IoPort::Bc, true);
                io.output = true;
                self.block_io(bus, io)
            }
            _ => self.undefined(op),
        }
    }

    fn execute_ed_x3(&mut self, bus: &mut Bus, op: u8) {
        match op {
            // INIRX/OTIRX/INDRX/OTDRX
            0xC2 | 0xC3 | 0xCA | 0xCB => {
                let mut io = BlockIo::new(op, IoPort::De, false);
                io.repeat = true;
                io.count_bc = true;
                self.block_io(bus, io);
            }
            // LD I,HL
            0xC7 => self.i = self.hl as u16,
            // LD HL,I
            0xD7 => self.hl = self.mask_l((self.mbase as u32) << 16 | self.i as u32),
            _ => self.undefined(op),
        }
    }

    /// Step HL/DE-style pointers by one in either direction
    fn step_pointer(&self, value: u32, backward: bool) -> u32 {
        let value = if backward { value.wrapping_sub(1) } else { value.wrapping_add(1) };
        self.mask_l(value)
    }

    /// Repeat forms rewind to the first byte of the instruction
    fn repeat(&mut self, bus: &mut Bus) {
        self.pc = self.insn_pc;
        bus.add_cycles(1);
    }

    fn block_load(&mut self, bus: &mut Bus, backward: bool, repeat: bool) {
        let value = bus.read_byte(self.data_addr(self.hl));
        bus.write_byte(self.data_addr(self.de), value);
        self.hl = self.step_pointer(self.hl, backward);
        self.de = self.step_pointer(self.de, backward);
        self.bc = self.mask_l(self.bc.wrapping_sub(1));
        let more = self.bc != 0;
        self.set_flag_h(false);
        self.set_flag_n(false);
        self.set_flag_pv(more);
        if repeat && more {
            self.repeat(bus);
        }
    }

    fn block_compare(&mut self, bus: &mut Bus, backward: bool, repeat: bool) {
        let value = bus.read_byte(self.data_addr(self.hl));
        let carry = self.flag_c();
        let diff = self.alu_sub(value, false);
        self.hl = self.step_pointer(self.hl, backward);
        self.bc = self.mask_l(self.bc.wrapping_sub(1));
        let more = self.bc != 0;
        self.set_flag_c(carry);
        self.set_flag_pv(more);
        if repeat && more && diff != 0 {
            self.repeat(bus);
        }
    }

    fn block_io(&mut self, bus: &mut Bus, io: BlockIo) {
        let port = match io.port {
            IoPort::Bc => self.bc as u16,
            IoPort::C => self.c() as u16,
            IoPort::De => self.de as u16,
        };
        let addr = self.data_addr(self.hl);
        let value = if io.output {
            let value = bus.read_byte(addr);
            bus.port_write(port, value);
            value
        } else {
            let value = bus.port_read(port);
            bus.write_byte(addr, value);
            value
        };

        self.hl = self.step_pointer(self.hl, io.backward);
        if io.step_c {
            let c = if io.backward { self.c().wrapping_sub(1) } else { self.c().wrapping_add(1) };
            self.set_c(c);
        }
        let more = if io.count_bc {
            self.bc = self.mask_l(self.bc.wrapping_sub(1));
            self.bc != 0
        } else {
            let b = self.b().wrapping_sub(1);
            self.set_b(b);
            b != 0
        };
        self.set_flag_z(!more);
        self.set_flag_n(value & 0x80 != 0);
        if io.repeat && more {
            self.repeat(bus);
        }
    }
}
