//! ADL/Z80 mode tests
//!
//! Covers:
//! - Z80 mode addressing through MBASE and the short stack
//! - suffix handling and prefix runs
//! - mode switches through JP/CALL/RET/RST and mixed-memory mode
//! - interrupt entry, HALT and the EI delay
//! - boundary checks, persistence and debugger register access

use super::*;
use crate::peripherals::interrupt::sources;

// ========== Z80 Mode ==========

#[test]
fn test_z80_data_access_uses_mbase() {
    let (mut cpu, mut bus) = z80(&[0x7E]);
    cpu.hl = 0x0200;
    bus.poke(0xD00200, 0x42);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0x42);
    assert_eq!(cpu.pc, 0x0101);
}

#[test]
fn test_z80_pc_wraps_at_16_bits() {
    let (mut cpu, mut bus) = z80(&[]);
    cpu.set_pc(0xFFFF, false);
    bus.poke(0xD0FFFF, 0x00);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x0000);
}

#[test]
fn test_z80_push_uses_sps() {
    let (mut cpu, mut bus) = z80(&[0xC5]);
    cpu.bc = 0x1234;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.sps, 0x1FFE);
    assert_eq!(cpu.spl, 0xD1A000);
    assert_eq!(bus.mem.read_word(0xD01FFE), 0x1234);
}

#[test]
fn test_z80_call_ret_16bit() {
    let (mut cpu, mut bus) = z80(&[0xCD, 0x00, 0x03]);
    bus.poke(0xD00300, 0xC9);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x0300);
    assert_eq!(cpu.sps, 0x1FFE);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x0103);
    assert!(!cpu.adl);
}

#[test]
fn test_z80_rp_writes_clear_upper_byte() {
    let (mut cpu, mut bus) = z80(&[0x21, 0x34, 0x12, 0x23]);
    cpu.hl = 0xAB0000;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x001234);
    cpu.hl = 0x00FFFF;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x000000);
}

#[test]
fn test_z80_ldir_counts_16_bits() {
    let (mut cpu, mut bus) = z80(&[0xED, 0xB0]);
    bus.poke(0xD00400, 0x99);
    cpu.hl = 0x0400;
    cpu.de = 0x0500;
    cpu.bc = 0x010001;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.bc, 0);
    assert_eq!(cpu.pc, 0x0102);
    assert_eq!(bus.peek(0xD00500), 0x99);
}

#[test]
fn test_ld_mb_a_only_in_adl() {
    let (mut cpu, mut bus) = z80(&[0xED, 0x6D]);
    cpu.a = 0xD1;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.mbase, 0xD0);

    let (mut cpu, mut bus) = adl(&[0xED, 0x6D, 0xED, 0x6E]);
    cpu.a = 0xD1;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.mbase, 0xD1);
    cpu.a = 0;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xD1);
}

// ========== Suffixes and Prefix Runs ==========

#[test]
fn test_lil_suffix_loads_24_bits_in_z80_mode() {
    let (mut cpu, mut bus) = z80(&[0x5B, 0x21, 0x56, 0x34, 0x12]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x123456);
    assert_eq!(cpu.pc, 0x0105);
    assert!(!cpu.adl);
}

#[test]
fn test_sis_suffix_loads_16_bits_in_adl_mode() {
    let (mut cpu, mut bus) = adl(&[0x40, 0x21, 0x34, 0x12]);
    cpu.hl = 0xFFFFFF;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 0x001234);
    assert_eq!(cpu.pc, CODE + 4);
}

#[test]
fn test_sis_suffix_selects_short_stack() {
    // PUSH.SIS BC
    let (mut cpu, mut bus) = adl(&[0x40, 0xC5]);
    cpu.bc = 0x123456;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.sps, 0x1FFE);
    assert_eq!(cpu.spl, 0xD1A000);
    assert_eq!(bus.mem.read_word(0xD01FFE), 0x3456);
}

#[test]
fn test_suffix_run_executes_alone() {
    let (mut cpu, mut bus) = adl(&[0x40, 0x5B, 0x21, 1, 2, 3]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 6);
    assert_eq!(cpu.hl, 0x030201);
}

#[test]
fn test_prefix_run_executes_alone() {
    let (mut cpu, mut bus) = adl(&[0xDD, 0xFD, 0x21, 1, 2, 3]);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.iy, 0x030201);
    assert_eq!(cpu.ix, 0);
}

#[test]
fn test_index_prefix_before_ed_is_ignored() {
    // DD ED 6C is MLT HL, not MLT IX
    let (mut cpu, mut bus) = adl(&[0xDD, 0xED, 0x6C]);
    cpu.hl = 0x000304;
    cpu.ix = 0x000506;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.hl, 12);
    assert_eq!(cpu.ix, 0x000506);
}

// ========== Mode Switches ==========

#[test]
fn test_jp_lil_enters_adl() {
    let (mut cpu, mut bus) = z80(&[0x5B, 0xC3, 0x00, 0x04, 0xD0]);
    bus.poke(0xD00400, 0x00);
    step(&mut cpu, &mut bus);
    assert!(cpu.adl);
    assert_eq!(cpu.pc, 0xD00400);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0xD00401);
}

#[test]
fn test_jp_sis_hl_leaves_adl() {
    let (mut cpu, mut bus) = adl(&[0x40, 0xE9]);
    cpu.hl = 0xD00300;
    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x0300);
}

#[test]
fn test_mixed_call_is_and_ret_l_round_trip() {
    // CALL.IS 0x0200 from ADL, then RET.L from Z80 mode
    let (mut cpu, mut bus) = adl(&[0x49, 0xCD, 0x00, 0x02]);
    load(&mut bus, 0xD00200, &[0x49, 0xC9]);
    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x0200);
    // PCU and the mode byte on SPL, PCH/PCL on SPS
    assert_eq!(cpu.spl, 0xD19FFE);
    assert_eq!(bus.peek(0xD19FFF), 0xD0);
    assert_eq!(bus.peek(0xD19FFE), 0x01);
    assert_eq!(cpu.sps, 0x1FFE);
    assert_eq!(bus.mem.read_word(0xD01FFE), 0x0004);

    step(&mut cpu, &mut bus);
    assert!(cpu.adl);
    assert_eq!(cpu.pc, CODE + 4);
    assert_eq!(cpu.spl, 0xD1A000);
    assert_eq!(cpu.sps, 0x2000);
}

#[test]
fn test_mixed_call_il_from_z80_and_ret_l() {
    // CALL.LIL 0xD00300 from Z80 mode, RET.L back
    let (mut cpu, mut bus) = z80(&[0x5B, 0xCD, 0x00, 0x03, 0xD0]);
    load(&mut bus, 0xD00300, &[0x5B, 0xC9]);
    step(&mut cpu, &mut bus);
    assert!(cpu.adl);
    assert_eq!(cpu.pc, 0xD00300);
    assert_eq!(cpu.spl, 0xD19FFD);
    assert_eq!(bus.peek(0xD19FFD), 0x00);
    assert_eq!(bus.mem.read_word(0xD19FFE), 0x0105);
    assert_eq!(cpu.sps, 0x2000);

    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x0105);
    assert_eq!(cpu.spl, 0xD1A000);
}

#[test]
fn test_rst_without_suffix_keeps_mode() {
    let (mut cpu, mut bus) = z80(&[0xCF]);
    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x08);
    assert_eq!(cpu.sps, 0x1FFE);
}

#[test]
fn test_stmix_rsmix() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x7D, 0xED, 0x7E]);
    step(&mut cpu, &mut bus);
    assert!(cpu.madl);
    step(&mut cpu, &mut bus);
    assert!(!cpu.madl);
}

// ========== Interrupts ==========

#[test]
fn test_nmi_vectors_to_0x66() {
    let (mut cpu, mut bus) = adl(&[0x00]);
    cpu.iff1 = true;
    bus.ports.lines_mut().nmi = true;
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x66);
    assert!(!cpu.iff1);
    assert!(cpu.iff2);
    assert_eq!(bus.mem.read_long(cpu.spl), CODE);
}

#[test]
fn test_irq_vectors_to_0x38_in_every_mode() {
    for im in [0xED46u16, 0xED56, 0xED5E] {
        let (mut cpu, mut bus) = adl(&[(im >> 8) as u8, im as u8, 0x00]);
        step(&mut cpu, &mut bus);
        cpu.iff1 = true;
        raise_irq(&mut bus, sources::TIMER1);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.pc, 0x38, "mode {:?}", cpu.im);
        assert!(!cpu.iff1);
    }
}

#[test]
fn test_irq_ignored_while_disabled() {
    let (mut cpu, mut bus) = adl(&[0x00, 0x00]);
    raise_irq(&mut bus, sources::TIMER1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 1);
}

#[test]
fn test_ei_takes_effect_after_next_instruction() {
    let (mut cpu, mut bus) = adl(&[0xFB, 0x00, 0x00]);
    raise_irq(&mut bus, sources::TIMER1);
    step(&mut cpu, &mut bus);
    assert!(!cpu.iff1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, CODE + 2, "the instruction after EI runs");
    assert!(cpu.iff1);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x38);
}

#[test]
fn test_di_cancels_pending_ei() {
    let (mut cpu, mut bus) = adl(&[0xFB, 0xF3, 0x00, 0x00]);
    steps(&mut cpu, &mut bus, 4);
    assert!(!cpu.iff1);
    assert!(!cpu.iff2);
}

#[test]
fn test_halt_idles_until_interrupt() {
    let (mut cpu, mut bus) = adl(&[0x76]);
    step(&mut cpu, &mut bus);
    assert!(cpu.halted);
    assert_eq!(cpu.pc, CODE + 1);
    assert_eq!(step(&mut cpu, &mut bus), 4);
    assert_eq!(cpu.pc, CODE + 1);

    // A masked IRQ does not wake
    raise_irq(&mut bus, sources::RTC);
    step(&mut cpu, &mut bus);
    assert!(cpu.halted);

    cpu.iff1 = true;
    step(&mut cpu, &mut bus);
    assert!(!cpu.halted);
    assert_eq!(cpu.pc, 0x38);
    assert_eq!(bus.mem.read_long(cpu.spl), CODE + 1);
}

#[test]
fn test_slp_halts() {
    let (mut cpu, mut bus) = adl(&[0xED, 0x76]);
    step(&mut cpu, &mut bus);
    assert!(cpu.halted);
}

#[test]
fn test_z80_interrupt_pushes_short_return() {
    let (mut cpu, mut bus) = z80(&[0x00]);
    cpu.iff1 = true;
    raise_irq(&mut bus, sources::TIMER2);
    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x38);
    assert_eq!(cpu.sps, 0x1FFE);
    assert_eq!(bus.mem.read_word(0xD01FFE), 0x0100);
}

#[test]
fn test_madl_interrupt_from_z80_and_reti() {
    let (mut cpu, mut bus) = z80(&[0x00]);
    load(&mut bus, 0x38, &[0xED, 0x4D]);
    cpu.madl = true;
    cpu.iff1 = true;
    raise_irq(&mut bus, sources::TIMER3);
    step(&mut cpu, &mut bus);
    assert!(cpu.adl);
    assert_eq!(cpu.pc, 0x38);
    assert_eq!(cpu.spl, 0xD19FFD);
    assert_eq!(bus.peek(0xD19FFD), 0x02);
    assert_eq!(bus.mem.read_word(0xD19FFE), 0x0100);
    assert_eq!(cpu.sps, 0x2000);

    bus.port_write(0x5000, sources::TIMER3 as u8);
    step(&mut cpu, &mut bus);
    assert!(!cpu.adl);
    assert_eq!(cpu.pc, 0x0100);
    assert_eq!(cpu.spl, 0xD1A000);
}

// ========== Boundary Checks ==========

#[test]
fn test_oversized_register_is_a_desync() {
    let (mut cpu, mut bus) = adl(&[0x00]);
    cpu.bc = 0x1000000;
    let err = cpu.step(&mut bus).unwrap_err();
    assert!(err.reason.contains("BC"), "{}", err.reason);
}

#[test]
fn test_oversized_short_stack_is_a_desync() {
    let (mut cpu, mut bus) = z80(&[0x00]);
    cpu.sps = 0x10000;
    let err = cpu.step(&mut bus).unwrap_err();
    assert!(err.reason.contains("SPS"), "{}", err.reason);
}

#[test]
fn test_set_pc_changes_mode_and_drops_halt() {
    let (mut cpu, mut bus) = z80(&[0x76]);
    step(&mut cpu, &mut bus);
    assert!(cpu.halted);
    bus.poke(0xD00400, 0x00);
    cpu.set_pc(0xD00400, true);
    assert!(!cpu.halted);
    step(&mut cpu, &mut bus);
    assert!(cpu.adl);
    assert_eq!(cpu.pc, 0xD00401);
}

// ========== Debugger Access and Persistence ==========

#[test]
fn test_set_register_masks_to_width() {
    let mut cpu = Cpu::new();
    cpu.set_register(Register::SPS, 0x123456);
    assert_eq!(cpu.sps, 0x3456);
    cpu.set_register(Register::A, 0x1FF);
    assert_eq!(cpu.a, 0xFF);
    cpu.set_register(Register::PC, 0xD01234);
    assert_eq!(cpu.pc, 0x1234, "PC follows the Z80 mode width");
    cpu.set_register(Register::ADL, 1);
    cpu.set_register(Register::PC, 0xD01234);
    assert_eq!(cpu.pc, 0xD01234);
    cpu.set_register(Register::AltAF, 0xABCD);
    assert_eq!((cpu.a_alt, cpu.f_alt), (0xAB, 0xCD));
    assert_eq!(cpu.register(Register::AltAF), 0xABCD);

    cpu.set_register(Register::IM, 1);
    assert_eq!(cpu.register(Register::IM), 1);
    cpu.set_register(Register::IM, 2);
    assert_eq!(cpu.im, InterruptMode::Mode2);
    cpu.set_register(Register::IM, 3);
    assert_eq!(cpu.register(Register::IM), 2, "invalid mode is ignored");
    cpu.set_register(Register::IM, 0);
    assert_eq!(cpu.im, InterruptMode::Mode0);
}

#[test]
fn test_save_load_round_trip() {
    let (mut cpu, mut bus) = adl(&[0xFB, 0x00]);
    step(&mut cpu, &mut bus);
    cpu.bc_alt = 0x123456;
    cpu.i = 0xBEEF;
    cpu.madl = true;
    cpu.im = InterruptMode::Mode1;

    let mut w = Writer::new();
    cpu.save(&mut w);
    let bytes = w.finish();
    let restored = Cpu::load(&mut Reader::new(&bytes)).unwrap();
    assert_eq!(restored.bc_alt, 0x123456);
    assert_eq!(restored.im, InterruptMode::Mode1);
    assert!(restored.madl);
    let mut again = Writer::new();
    restored.save(&mut again);
    assert_eq!(again.finish(), bytes);
}

#[test]
fn test_load_rejects_bad_interrupt_mode() {
    let mut w = Writer::new();
    Cpu::new().save(&mut w);
    let mut bytes = w.finish();
    // IM is followed by ADL, MADL, halted and the EI delay
    let im_at = bytes.len() - 5;
    bytes[im_at] = 7;
    assert!(Cpu::load(&mut Reader::new(&bytes)).is_err());
}
