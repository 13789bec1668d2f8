//! TI-84 Plus CE Emulator Core
//!
//! This crate provides a platform-agnostic eZ80 machine with debugger
//! instrumentation and a stable C ABI. No OS APIs are used by the core
//! itself; ROM images and snapshots move through byte buffers or
//! `Read`/`Write` values.
//!
//! # Architecture
//!
//! - `memory`: flash and RAM storage
//! - `ports`: the 16-range port dispatcher and its debugger monitors
//! - `peripherals`: the fixed set of port range handlers
//! - `scheduler`: multi-clock event queue
//! - `bus`: address decoding, access costs, memory breakpoints
//! - `cpu`: eZ80 CPU implementation
//! - `debug`: breakpoint tables and the pause/step state machine
//! - `machine`: the aggregate that ties everything together
//! - `worker`: runs a machine on its own thread behind a command queue
//!
//! # Memory Map (24-bit eZ80 address space)
//!
//! | Address Range       | Region              |
//! |---------------------|---------------------|
//! | 0x000000 - 0x3FFFFF | Flash (4MB)         |
//! | 0x400000 - 0xBFFFFF | Flash mirrors       |
//! | 0xC00000 - 0xCFFFFF | Unmapped            |
//! | 0xD00000 - 0xD657FF | RAM + VRAM          |
//! | 0xD65800 - 0xDFFFFF | Unmapped            |
//! | 0xE00000 - 0xFFFFFF | Memory-mapped I/O   |

pub mod bus;
pub mod config;
pub mod cpu;
pub mod debug;
pub mod decode;
pub mod error;
pub mod machine;
pub mod memory;
pub mod peripherals;
pub mod ports;
pub mod scheduler;
pub mod snapshot;
pub mod worker;

#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::*;

use std::slice;
use std::sync::{Mutex, MutexGuard};

pub use config::{CpuSpeed, MachineConfig};
pub use cpu::Register;
pub use debug::{BreakFlags, BreakReason, DebugEvent, DebugState, PortFlags, StepKind};
pub use error::{CoreDesync, DebugError, Error, Result};
pub use machine::Machine;
pub use snapshot::Snapshot;
pub use worker::{Command, Status, Worker};

/// Thread-safe wrapper for the machine.
/// All FFI calls go through this mutex so a UI thread and an emulation
/// thread never touch the machine at the same time.
/// This is an opaque type from C's perspective (used via void*).
pub struct SyncEmu {
    inner: Mutex<Machine>,
}

impl SyncEmu {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Lock the machine behind `emu`, or return `fallback` for a null handle.
fn with_machine<T>(emu: *const SyncEmu, fallback: T, f: impl FnOnce(&mut Machine) -> T) -> T {
    if emu.is_null() {
        return fallback;
    }
    let sync_emu = unsafe { &*emu };
    let mut machine = sync_emu.lock();
    f(&mut machine)
}

fn status<T>(result: Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => {
            tracing::debug!(%err, code = err.code(), "C ABI call failed");
            err.code()
        }
    }
}

fn reason_code(reason: BreakReason) -> i32 {
    match reason {
        BreakReason::Exec => 1,
        BreakReason::Read => 2,
        BreakReason::Write => 3,
        BreakReason::PortRead => 4,
        BreakReason::PortWrite => 5,
        BreakReason::RunUntil => 6,
        BreakReason::StepComplete => 7,
        BreakReason::PauseRequest => 8,
        BreakReason::ProgramRequest => 9,
    }
}

/// Create a new machine with the default configuration.
/// Returns null if the machine cannot be built.
/// The returned pointer is thread-safe - all operations are synchronized.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_create")]
pub extern "C" fn emu_create() -> *mut SyncEmu {
    match Machine::new(MachineConfig::default()) {
        Ok(machine) => Box::into_raw(Box::new(SyncEmu {
            inner: Mutex::new(machine),
        })),
        Err(err) => {
            tracing::error!(%err, "machine construction failed");
            std::ptr::null_mut()
        }
    }
}

/// Destroy a machine.
/// Safe to call with null pointer.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_destroy")]
pub extern "C" fn emu_destroy(emu: *mut SyncEmu) {
    if !emu.is_null() {
        unsafe {
            drop(Box::from_raw(emu));
        }
    }
}

/// Load ROM data and reset.
/// Returns 0 on success, negative error code on failure.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_load_rom")]
pub extern "C" fn emu_load_rom(emu: *mut SyncEmu, data: *const u8, len: usize) -> i32 {
    if data.is_null() {
        return -1;
    }
    let rom_data = unsafe { slice::from_raw_parts(data, len) };
    with_machine(emu, -1, |m| status(m.load_rom(rom_data)))
}

/// Reset the register file, RAM, peripherals and scheduler.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_reset")]
pub extern "C" fn emu_reset(emu: *mut SyncEmu) {
    with_machine(emu, (), |m| m.reset());
}

/// Run up to `max_instructions` instructions.
/// Returns 0 when the budget ran out or the machine was already paused,
/// 1 when the machine paused (the reason and address are written to the
/// out pointers if non-null), negative error code on failure.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_run")]
pub extern "C" fn emu_run(
    emu: *mut SyncEmu,
    max_instructions: u64,
    reason: *mut i32,
    address: *mut u32,
) -> i32 {
    with_machine(emu, -1, |m| match m.run(max_instructions) {
        Ok(None) => 0,
        Ok(Some(event)) => {
            if !reason.is_null() {
                unsafe { *reason = reason_code(event.reason) };
            }
            if !address.is_null() {
                unsafe { *address = event.address };
            }
            1
        }
        Err(err) => err.code(),
    })
}

/// Request a pause at the current instruction boundary.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_pause")]
pub extern "C" fn emu_pause(emu: *mut SyncEmu) {
    with_machine(emu, (), |m| {
        m.pause();
    });
}

#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_resume")]
pub extern "C" fn emu_resume(emu: *mut SyncEmu) {
    with_machine(emu, (), |m| m.resume());
}

/// Begin a step. kind: 0 = in, 1 = over, 2 = next, 3 = out.
/// Completion is reported by the next `emu_run`.
/// Returns 0 on success, -1 for an unknown kind.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_step")]
pub extern "C" fn emu_step(emu: *mut SyncEmu, kind: i32) -> i32 {
    with_machine(emu, -1, |m| {
        match kind {
            0 => m.step_in(),
            1 => m.step_over(),
            2 => m.step_next(),
            3 => m.step_out(),
            _ => return -1,
        }
        0
    })
}

/// Redirect execution to `address`. adl: non-zero for 24-bit mode.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_set_pc")]
pub extern "C" fn emu_set_pc(emu: *mut SyncEmu, address: u32, adl: i32) -> i32 {
    with_machine(emu, -1, |m| status(m.set_pc(address, adl != 0).map_err(Error::from)))
}

#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_run_until_toggle")]
pub extern "C" fn emu_run_until_toggle(emu: *mut SyncEmu, address: u32) -> i32 {
    with_machine(emu, -1, |m| status(m.run_until_toggle(address).map_err(Error::from)))
}

/// Set or clear breakpoint flags (bit 0 read, bit 1 write, bit 2 exec).
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_breakpoint_set")]
pub extern "C" fn emu_breakpoint_set(emu: *mut SyncEmu, address: u32, flags: u8, enabled: i32) -> i32 {
    let flags = BreakFlags::from_bits_truncate(flags);
    with_machine(emu, -1, |m| {
        status(m.breakpoint_set(address, flags, enabled != 0).map_err(Error::from))
    })
}

/// Add a breakpoint. Returns -12 if the address already has one.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_breakpoint_add")]
pub extern "C" fn emu_breakpoint_add(emu: *mut SyncEmu, address: u32, flags: u8) -> i32 {
    let flags = BreakFlags::from_bits_truncate(flags);
    with_machine(emu, -1, |m| status(m.breakpoint_add(address, flags).map_err(Error::from)))
}

/// Returns 1 if an entry was removed, 0 if there was none.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_breakpoint_remove")]
pub extern "C" fn emu_breakpoint_remove(emu: *mut SyncEmu, address: u32) -> i32 {
    with_machine(emu, -1, |m| m.breakpoint_remove(address) as i32)
}

/// Set or clear port monitor flags (bit 0 read, bit 1 write, bit 2 freeze).
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_port_monitor_set")]
pub extern "C" fn emu_port_monitor_set(emu: *mut SyncEmu, port: u32, flags: u8, enabled: i32) -> i32 {
    let flags = PortFlags::from_bits_truncate(flags);
    with_machine(emu, -1, |m| {
        status(m.port_monitor_set(port, flags, enabled != 0).map_err(Error::from))
    })
}

/// Returns 1 if an entry was removed, 0 if there was none, negative on a bad port.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_port_monitor_remove")]
pub extern "C" fn emu_port_monitor_remove(emu: *mut SyncEmu, port: u32) -> i32 {
    with_machine(emu, -1, |m| match m.port_monitor_remove(port) {
        Ok(removed) => removed as i32,
        Err(err) => Error::from(err).code(),
    })
}

/// Read a port without side effects. Returns the byte (0-255) or a negative code.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_port_read_debug")]
pub extern "C" fn emu_port_read_debug(emu: *mut SyncEmu, port: u32) -> i32 {
    with_machine(emu, -1, |m| match m.port_read_debug(port) {
        Ok(value) => value as i32,
        Err(err) => Error::from(err).code(),
    })
}

#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_port_write_debug")]
pub extern "C" fn emu_port_write_debug(emu: *mut SyncEmu, port: u32, value: u8) -> i32 {
    with_machine(emu, -1, |m| status(m.port_write_debug(port, value).map_err(Error::from)))
}

/// Read memory without triggering breakpoints.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_peek")]
pub extern "C" fn emu_peek(emu: *mut SyncEmu, address: u32) -> u8 {
    with_machine(emu, 0, |m| m.peek(address))
}

/// Write memory without triggering breakpoints. Flash is writable.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_poke")]
pub extern "C" fn emu_poke(emu: *mut SyncEmu, address: u32, value: u8) {
    with_machine(emu, (), |m| m.poke(address, value));
}

/// Read a register by its index in [`Register::ALL`]. Unknown indexes read 0.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_get_register")]
pub extern "C" fn emu_get_register(emu: *const SyncEmu, index: u32) -> u32 {
    with_machine(emu, 0, |m| Register::from_index(index).map_or(0, |r| m.register(r)))
}

/// Write a register by index, masked to its width. Returns -1 for an unknown index.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_set_register")]
pub extern "C" fn emu_set_register(emu: *mut SyncEmu, index: u32, value: u32) -> i32 {
    with_machine(emu, -1, |m| match Register::from_index(index) {
        Some(reg) => {
            m.set_register(reg, value);
            0
        }
        None => -1,
    })
}

/// CPU cycles since reset.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_cycles")]
pub extern "C" fn emu_cycles(emu: *const SyncEmu) -> u64 {
    with_machine(emu, 0, |m| m.cycles())
}

#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_set_throttle")]
pub extern "C" fn emu_set_throttle(emu: *mut SyncEmu, enabled: i32, speed_percent: u32) -> i32 {
    with_machine(emu, -1, |m| {
        status(m.set_throttle(enabled != 0, speed_percent).map_err(Error::from))
    })
}

/// Get the size needed for a save state buffer.
/// A step in progress is aborted, as for any save.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_save_state_size")]
pub extern "C" fn emu_save_state_size(emu: *mut SyncEmu) -> usize {
    with_machine(emu, 0, |m| m.save().map_or(0, |s| s.len()))
}

/// Save machine state to a buffer.
/// Returns bytes written on success, negative error code on failure
/// (-1 if the buffer is too small).
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_save_state")]
pub extern "C" fn emu_save_state(emu: *mut SyncEmu, out: *mut u8, cap: usize) -> i32 {
    if out.is_null() {
        return -1;
    }
    with_machine(emu, -1, |m| match m.save() {
        Ok(snapshot) if snapshot.len() <= cap => {
            let buffer = unsafe { slice::from_raw_parts_mut(out, cap) };
            buffer[..snapshot.len()].copy_from_slice(snapshot.as_bytes());
            snapshot.len() as i32
        }
        Ok(_) => -1,
        Err(err) => err.code(),
    })
}

/// Restore machine state from a buffer.
/// Returns 0 on success, negative error code on failure. On failure the
/// machine is unchanged.
#[cfg_attr(not(feature = "ios_prefixed"), no_mangle)]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_emu_load_state")]
pub extern "C" fn emu_load_state(emu: *mut SyncEmu, data: *const u8, len: usize) -> i32 {
    if data.is_null() {
        return -1;
    }
    let buffer = unsafe { slice::from_raw_parts(data, len) };
    let snapshot = Snapshot::from_bytes(buffer.to_vec());
    with_machine(emu, -1, |m| status(m.restore(&snapshot)))
}
