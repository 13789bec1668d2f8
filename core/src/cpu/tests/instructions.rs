//! Instruction tests, grouped by page

use super::*;
use crate::debug::PortFlags;

// ========== Registers ==========

#[test]
fn test_new_cpu_starts_in_z80_mode() {
    let cpu = Cpu::new();
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0);
    assert_eq!(cpu.im, InterruptMode::Mode0);
    assert!(!cpu.iff1);
}

#[test]
fn test_register_halves_keep_upper_byte() {
    let mut cpu = Cpu::new();
    cpu.bc = 0x123456;
    cpu.set_b(0xAA);
    assert_eq!(cpu.bc, 0x12AA56);
    cpu.set_c(0x01);
    assert_eq!(cpu.bc, 0x12AA01);
    cpu.ix = 0xD01234;
    cpu.set_ixh(0x99);
    assert_eq!(cpu.ix, 0xD09934);
    assert_eq!(cpu.ixl(), 0x34);
}

#[test]
fn test_nop_costs_one_flash_fetch() {
    let mut cpu = Cpu::new();
    let mut bus = bus();
    bus.poke(0, 0x00);
    assert_eq!(step(&mut cpu, &mut bus), 10);
    assert_eq!(cpu.pc, 1);
}

#[test]
fn test_r_counts_opcode_fetches() {
    // INC IX: prefix and opcode each bump R
    let (mut cpu, mut bus) = adl(&[0xDD, 0x23]);
    cpu.r = 0x80 | 0x7F;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.r, 0x81);
    assert_eq!(cpu.ix, 1);
}

// ========== Loads ==========

#[test]
fn test_ld_rp_imm_adl() {
    let (mut cpu, mut bus) = adl(&[0x01, 0x56, 0x34, 0x12]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.bc, 0x123456);
    assert_eq!(cpu.pc, CODE + 4);
}

#[test]
fn test_ld_r_r_and_memory() {
    // LD B,A; LD (HL),B; LD C,(HL)
    let (mut cpu, mut bus) = adl(&[0x47, 0x70, 0x4E]);
    cpu.a = 0x55;
    cpu.hl = 0xD00100;
    steps(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.b(), 0x55);
    assert_eq!(bus.peek(0xD00100), 0x55);
    assert_eq!(cpu.c(), 0x55);
}

#[test]
fn test_ld_indirect_wide() {
    // LD (nn),HL; LD DE,(nn) via ED 5B
    let (mut cpu, mut bus) = adl(&[0x22, 0x00, 0x01, 0xD0, 0xED, 0x5B, 0x00, 0x01, 0xD0]);
    cpu.hl = 0xABCDEF;
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0xD00102), 0xAB);
    assert_eq!(cpu.de, 0xABCDEF);
}

#[test]
fn test_ld_rr_hl_indirect() {
    // LD DE,(HL); LD (HL),BC at HL+3 via INC HL x3
    let (mut cpu, mut bus) = adl(&[0xED, 0x17, 0x23, 0x23, 0x23, 0xED, 0x0F]);
    cpu.hl = 0xD00100;
    cpu.bc = 0x0A0B0C;
    load(&mut bus, 0xD00100, &[0x56, 0x34, 0x12]);
    steps(&mut cpu, &mut bus, 5);
    assert_eq!(cpu.de, 0x123456);
    assert_eq!(bus.peek(0xD00103), 0x0C);
    assert_eq!(bus.peek(0xD00105), 0x0A);
}

#[test]
fn test_ld_iy_hl_and_store() {
    // LD IY,(HL); LD (HL),IY after changing IY
    let (mut cpu, mut bus) = adl(&[0xED, 0x31, 0xFD, 0x23, 0xED, 0x3E]);
    cpu.hl = 0xD00100;
    load(&mut bus, 0xD00100, &[0x10, 0x20, 0x30]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.iy, 0x302010);
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0xD00100), 0x11);
}

// ========== 8-bit ALU ==========

#[test]
fn test_add_overflow_flags() {
    let (mut cpu, mut bus) = adl(&[0x80]);
    cpu.a = 0x7F;
    cpu.set_b(0x01);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x80);
    assert!(cpu.flag_s());
    assert!(cpu.flag_h());
    assert!(cpu.flag_pv());
    assert!(!cpu.flag_c());
    assert!(!cpu.flag_n());
}

#[test]
fn test_sub_borrow() {
    // SUB 0x20
    let (mut cpu, mut bus) = adl(&[0xD6, 0x20]);
    cpu.a = 0x10;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xF0);
    assert!(cpu.flag_c());
    assert!(cpu.flag_n());
    assert!(cpu.flag_s());
}

#[test]
fn test_cp_keeps_a() {
    let (mut cpu, mut bus) = adl(&[0xFE, 0x10]);
    cpu.a = 0x10;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x10);
    assert!(cpu.flag_z());
    assert!(cpu.flag_n());
}

#[test]
fn test_logic_ops_set_parity() {
    // AND 0x0F; XOR A; OR 0x81
    let (mut cpu, mut bus) = adl(&[0xE6, 0x0F, 0xAF, 0xF6, 0x81]);
    cpu.a = 0x37;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x07);
    assert!(cpu.flag_h());
    assert!(!cpu.flag_pv());
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0);
    assert!(cpu.flag_z());
    assert!(cpu.flag_pv());
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x81);
    assert!(cpu.flag_s());
    assert!(cpu.flag_pv());
}

#[test]
fn test_undocumented_flags_survive_alu() {
    let (mut cpu, mut bus) = adl(&[0x3C]);
    cpu.f = flags::F5 | flags::F3 | flags::C;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.f & flags::UNDOC, flags::UNDOC);
    assert!(cpu.flag_c());
}

#[test]
fn test_inc_memory_wraps() {
    let (mut cpu, mut bus) = adl(&[0x34]);
    cpu.hl = 0xD00100;
    cpu.f = flags::C;
    bus.poke(0xD00100, 0xFF);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD00100), 0x00);
    assert!(cpu.flag_z());
    assert!(cpu.flag_h());
    assert!(cpu.flag_c());
}

#[test]
fn test_dec_overflow() {
    let (mut cpu, mut bus) = adl(&[0x05]);
    cpu.set_b(0x80);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.b(), 0x7F);
    assert!(cpu.flag_pv());
    assert!(cpu.flag_n());
    assert!(cpu.flag_h());
}

#[test]
fn test_daa_after_add() {
    // ADD A,0x27; DAA
    let (mut cpu, mut bus) = adl(&[0xC6, 0x27, 0x27]);
    cpu.a = 0x15;
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.a, 0x42);
    assert!(!cpu.flag_c());
}

#[test]
fn test_neg() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x44]);
    cpu.a = 0x01;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xFF);
    assert!(cpu.flag_c());
    assert!(cpu.flag_n());
}

#[test]
fn test_cpl_scf_ccf() {
    let (mut cpu, mut bus) = adl(&[0x2F, 0x37, 0x3F]);
    cpu.a = 0x0F;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xF0);
    step(&mut cpu, &mut bus);
    assert!(cpu.flag_c());
    step(&mut cpu, &mut bus);
    assert!(!cpu.flag_c());
    assert!(cpu.flag_h());
}

#[test]
fn test_rotate_a() {
    // RLCA; RRA
    let (mut cpu, mut bus) = adl(&[0x07, 0x1F]);
    cpu.a = 0x81;
    cpu.f = flags::Z;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x03);
    assert!(cpu.flag_c());
    assert!(cpu.flag_z(), "RLCA leaves Z alone");
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x81);
    assert!(cpu.flag_c());
}

#[test]
fn test_tst_does_not_store() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x64, 0x0F]);
    cpu.a = 0xF0;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xF0);
    assert!(cpu.flag_z());
    assert!(cpu.flag_h());
}

// ========== Wide Arithmetic ==========

#[test]
fn test_add_hl_carry_adl() {
    let (mut cpu, mut bus) = adl(&[0x09]);
    cpu.hl = 0xFFFFFF;
    cpu.bc = 0x000001;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0);
    assert!(cpu.flag_c());
}

#[test]
fn test_adc_hl_signed_overflow() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x4A]);
    cpu.hl = 0x7FFFFF;
    cpu.bc = 0x000001;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x800000);
    assert!(cpu.flag_s());
    assert!(cpu.flag_pv());
    assert!(!cpu.flag_c());
}

#[test]
fn test_sbc_hl_to_zero() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x52]);
    cpu.hl = 0x123456;
    cpu.de = 0x123455;
    cpu.f = flags::C;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0);
    assert!(cpu.flag_z());
    assert!(cpu.flag_n());
}

#[test]
fn test_mlt_multiplies_low_bytes() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x4C]);
    cpu.bc = 0x120304;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.bc, 12);
}

#[test]
fn test_lea_and_pea() {
    // LEA HL,IX+5; PEA IX-2
    let (mut cpu, mut bus) = adl(&[0xED, 0x22, 0x05, 0xED, 0x65, 0xFE]);
    cpu.ix = 0xD00100;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0xD00105);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.spl, 0xD19FFD);
    assert_eq!(bus.mem.read_long(0xD19FFD), 0xD000FE);
}

#[test]
fn test_lea_ix_from_iy() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x54, 0x80]);
    cpu.iy = 0x000100;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.ix, 0x000080);
}

// ========== Jumps, Calls, Stack ==========

#[test]
fn test_jr_negative() {
    let (mut cpu, mut bus) = adl(&[0x00, 0x18, 0xFD]);
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.pc, CODE);
}

#[test]
fn test_djnz_runs_b_times() {
    let (mut cpu, mut bus) = adl(&[0x10, 0xFE]);
    cpu.set_b(3);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.b(), 0);
    assert_eq!(cpu.pc, CODE + 2);
}

#[test]
fn test_call_ret_adl() {
    let (mut cpu, mut bus) = adl(&[0xCD, 0x00, 0x02, 0xD0]);
    bus.poke(0xD00200, 0xC9);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0xD00200);
    assert_eq!(cpu.spl, 0xD19FFD);
    assert_eq!(bus.mem.read_long(0xD19FFD), CODE + 4);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 4);
    assert_eq!(cpu.spl, 0xD1A000);
}

#[test]
fn test_conditional_ret() {
    // RET NZ with Z set falls through, with Z clear returns
    let (mut cpu, mut bus) = adl(&[0xC0, 0xC0]);
    bus.mem.write_long(0xD19FFD, 0xD00300);
    cpu.spl = 0xD19FFD;
    cpu.f = flags::Z;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 1);
    cpu.f = 0;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0xD00300);
}

#[test]
fn test_rst_pushes_return() {
    let (mut cpu, mut bus) = adl(&[0xEF]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x28);
    assert_eq!(bus.mem.read_long(cpu.spl), CODE + 1);
}

#[test]
fn test_push_pop_af_is_three_bytes_in_adl() {
    let (mut cpu, mut bus) = adl(&[0xF5, 0xC1]);
    cpu.a = 0x12;
    cpu.f = 0x34;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.spl, 0xD19FFD);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.bc, 0x001234);
    assert_eq!(cpu.spl, 0xD1A000);
}

#[test]
fn test_ex_sp_hl() {
    let (mut cpu, mut bus) = adl(&[0xE3]);
    cpu.spl = 0xD19FFD;
    bus.mem.write_long(0xD19FFD, 0x111111);
    cpu.hl = 0x222222;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x111111);
    assert_eq!(bus.mem.read_long(0xD19FFD), 0x222222);
}

#[test]
fn test_exchanges() {
    // EX AF,AF'; EXX; EX DE,HL
    let (mut cpu, mut bus) = adl(&[0x08, 0xD9, 0xEB]);
    cpu.a = 1;
    cpu.a_alt = 2;
    cpu.bc = 3;
    cpu.bc_alt = 4;
    cpu.de = 5;
    cpu.hl = 6;
    steps(&mut cpu, &mut bus, 2);
    assert_eq!((cpu.a, cpu.a_alt), (2, 1));
    assert_eq!((cpu.bc, cpu.bc_alt), (4, 3));
    cpu.de = 7;
    cpu.hl = 8;
    step(&mut cpu, &mut bus);
    assert_eq!((cpu.de, cpu.hl), (8, 7));
}

// ========== CB Page ==========

#[test]
fn test_bit_res_set() {
    let (mut cpu, mut bus) = adl(&[0xCB, 0x78, 0xCB, 0xB8, 0xCB, 0xC0]);
    cpu.set_b(0x80);
    step(&mut cpu, &mut bus);
    assert!(!cpu.flag_z());
    assert!(cpu.flag_s());
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.b(), 0x00);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.b(), 0x01);
}

#[test]
fn test_shift_memory_operand() {
    // RLC (HL); SRA (HL)
    let (mut cpu, mut bus) = adl(&[0xCB, 0x06, 0xCB, 0x2E]);
    cpu.hl = 0xD00100;
    bus.poke(0xD00100, 0x81);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD00100), 0x03);
    assert!(cpu.flag_c());
    bus.poke(0xD00100, 0x82);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD00100), 0xC1);
    assert!(!cpu.flag_c());
}

#[test]
fn test_indexed_cb() {
    // SET 3,(IX-1)
    let (mut cpu, mut bus) = adl(&[0xDD, 0xCB, 0xFF, 0xDE]);
    cpu.ix = 0xD00101;
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD00100), 0x08);
    assert_eq!(cpu.pc, CODE + 4);
}

// ========== Index Prefixes ==========

#[test]
fn test_indexed_memory_loads() {
    // LD A,(IX+5); LD (IY-1),0x42
    let (mut cpu, mut bus) = adl(&[0xDD, 0x7E, 0x05, 0xFD, 0x36, 0xFF, 0x42]);
    cpu.ix = 0xD00100;
    cpu.iy = 0xD00200;
    bus.poke(0xD00105, 0x99);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x99);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD001FF), 0x42);
}

#[test]
fn test_index_halves() {
    // LD IXH,0x12; LD A,IXL
    let (mut cpu, mut bus) = adl(&[0xDD, 0x26, 0x12, 0xDD, 0x7D]);
    cpu.ix = 0xD00034;
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.ix, 0xD01234);
    assert_eq!(cpu.a, 0x34);
}

#[test]
fn test_indexed_load_targets_plain_h() {
    // LD H,(IX+0) writes H, not IXH
    let (mut cpu, mut bus) = adl(&[0xDD, 0x66, 0x00]);
    cpu.ix = 0xD00100;
    bus.poke(0xD00100, 0x77);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.h(), 0x77);
    assert_eq!(cpu.ix, 0xD00100);
}

#[test]
fn test_ex_de_hl_ignores_prefix() {
    let (mut cpu, mut bus) = adl(&[0xDD, 0xEB]);
    cpu.de = 1;
    cpu.hl = 2;
    cpu.ix = 3;
    step(&mut cpu, &mut bus);
    assert_eq!((cpu.de, cpu.hl, cpu.ix), (2, 1, 3));
}

#[test]
fn test_index_wide_loads() {
    // LD HL,(IX+3); LD (IX+6),DE; LD IY,(IX+0); LD (IY+3),IX
    let (mut cpu, mut bus) = adl(&[
        0xDD, 0x27, 0x03, 0xDD, 0x1F, 0x06, 0xDD, 0x31, 0x00, 0xFD, 0x3E, 0x03,
    ]);
    cpu.ix = 0xD00100;
    cpu.de = 0xABCDEF;
    load(&mut bus, 0xD00100, &[0x00, 0x02, 0xD0, 0x56, 0x34, 0x12]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x123456);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.mem.read_long(0xD00106), 0xABCDEF);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.iy, 0xD00200);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.mem.read_long(0xD00203), 0xD00100);
}

#[test]
fn test_jp_ix() {
    let (mut cpu, mut bus) = adl(&[0xDD, 0xE9]);
    cpu.ix = 0xD00400;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0xD00400);
}

// ========== ED Page Specials ==========

#[test]
fn test_ld_a_i_copies_iff2() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x57]);
    cpu.i = 0x0012;
    cpu.iff2 = true;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x12);
    assert!(cpu.flag_pv());
}

#[test]
fn test_ld_i_hl_and_hl_i() {
    let (mut cpu, mut bus) = adl(&[0xED, 0xC7, 0xED, 0xD7]);
    cpu.hl = 0x003456;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.i, 0x3456);
    cpu.hl = 0;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0xD03456);
}

#[test]
fn test_rld_rrd() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x6F, 0xED, 0x67]);
    cpu.hl = 0xD00100;
    cpu.a = 0x12;
    bus.poke(0xD00100, 0x34);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x13);
    assert_eq!(bus.peek(0xD00100), 0x42);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x12);
    assert_eq!(bus.peek(0xD00100), 0x34);
}

#[test]
fn test_im_modes() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x5E, 0xED, 0x56, 0xED, 0x46]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.im, InterruptMode::Mode2);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.im, InterruptMode::Mode1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.im, InterruptMode::Mode0);
}

#[test]
fn test_undefined_ed_opcode_is_nop() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x77]);
    let before = cpu.clone();
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 2);
    assert_eq!(cpu.a, before.a);
    assert_eq!(cpu.f, before.f);
}

// ========== Block Instructions ==========

#[test]
fn test_ldir_iterates_once_per_step() {
    let (mut cpu, mut bus) = adl(&[0xED, 0xB0]);
    load(&mut bus, 0xD00100, &[1, 2, 3]);
    cpu.hl = 0xD00100;
    cpu.de = 0xD00200;
    cpu.bc = 3;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    assert_eq!(cpu.bc, 2);
    assert!(cpu.flag_pv());
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 2);
    assert_eq!(cpu.bc, 0);
    assert!(!cpu.flag_pv());
    assert_eq!(cpu.hl, 0xD00103);
    assert_eq!(cpu.de, 0xD00203);
    assert_eq!([bus.peek(0xD00200), bus.peek(0xD00201), bus.peek(0xD00202)], [1, 2, 3]);
}

#[test]
fn test_lddr() {
    let (mut cpu, mut bus) = adl(&[0xED, 0xB8]);
    load(&mut bus, 0xD00100, &[1, 2]);
    cpu.hl = 0xD00101;
    cpu.de = 0xD00201;
    cpu.bc = 2;
    steps(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.hl, 0xD000FF);
    assert_eq!(bus.peek(0xD00200), 1);
    assert_eq!(bus.peek(0xD00201), 2);
}

#[test]
fn test_cpir_stops_on_match() {
    let (mut cpu, mut bus) = adl(&[0xED, 0xB1]);
    load(&mut bus, 0xD00100, &[5, 6, 7, 8]);
    cpu.hl = 0xD00100;
    cpu.bc = 4;
    cpu.a = 6;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 2);
    assert!(cpu.flag_z());
    assert_eq!(cpu.bc, 2);
    assert_eq!(cpu.hl, 0xD00102);
}

#[test]
fn test_ini2_steps_c() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x84]);
    bus.port_write_debug(0x1000, 0xAB);
    cpu.bc = 0x1000;
    cpu.hl = 0xD00100;
    step(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0xD00100), 0xAB);
    assert_eq!(cpu.c(), 0x01);
    assert_eq!(cpu.b(), 0x0F);
    assert_eq!(cpu.hl, 0xD00101);
}

#[test]
fn test_otirx_uses_de_port_and_bc_count() {
    let (mut cpu, mut bus) = adl(&[0xED, 0xC3]);
    load(&mut bus, 0xD00100, &[7, 8]);
    cpu.hl = 0xD00100;
    cpu.de = 0x1020;
    cpu.bc = 2;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE);
    assert_eq!(bus.port_read_debug(0x1020), 7);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 2);
    assert_eq!(bus.port_read_debug(0x1020), 8);
    assert_eq!(cpu.bc, 0);
    assert!(cpu.flag_z());
}

#[test]
fn test_otimr_walks_port_c() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x93]);
    load(&mut bus, 0xD00100, &[1, 2]);
    bus.ports.monitors_mut().set(0x0011, PortFlags::WRITE, true).unwrap();
    cpu.hl = 0xD00100;
    cpu.bc = 0x0210;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.c(), 0x11);
    assert_eq!(bus.take_hit(), None);
    step(&mut cpu, &mut bus);
    assert_eq!(bus.take_hit().map(|e| e.address), Some(0x0011));
    assert_eq!(cpu.b(), 0);
    assert_eq!(cpu.pc, CODE + 2);
}

// ========== I/O ==========

#[test]
fn test_in_a_n_uses_a_as_high_byte() {
    let (mut cpu, mut bus) = adl(&[0xDB, 0x05]);
    bus.port_write_debug(0x1005, 0x5A);
    cpu.a = 0x10;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x5A);
}

#[test]
fn test_out_c_r_uses_bc() {
    // OUT (C),B then IN E,(C)
    let (mut cpu, mut bus) = adl(&[0xED, 0x41, 0xED, 0x58]);
    cpu.bc = 0x1007;
    step(&mut cpu, &mut bus);
    assert_eq!(bus.port_read_debug(0x1007), 0x10);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.e(), 0x10);
    assert!(!cpu.flag_z());
}

#[test]
fn test_in0_reads_low_page() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x38, 0x03]);
    bus.ports.monitors_mut().set(0x0003, PortFlags::READ, true).unwrap();
    step(&mut cpu, &mut bus);
    assert_eq!(bus.take_hit().map(|e| e.address), Some(0x0003));
}

#[test]
fn test_port_cost_reaches_step_cycles() {
    // OUT0 (0x10),A from RAM: 3 fetches at 4 cycles plus a range-0 write at 2
    let (mut cpu, mut bus) = adl(&[0xED, 0x39, 0x10]);
    assert_eq!(step(&mut cpu, &mut bus), 3 * 4 + 2);
}
