//! WebAssembly bindings for the emulator core
//!
//! This module provides JavaScript-friendly APIs using wasm-bindgen.

use js_sys::Array;
use wasm_bindgen::prelude::*;
use web_sys::console;

use crate::config::MachineConfig;
use crate::cpu::Register;
use crate::debug::{BreakFlags, PortFlags};
use crate::machine::Machine;
use crate::snapshot::Snapshot;

fn log(s: &str) {
    console::log_1(&JsValue::from_str(s));
}

fn warn(s: &str) {
    console::warn_1(&JsValue::from_str(s));
}

/// WASM-friendly wrapper around the machine.
/// Unlike the C FFI, this owns the machine directly without a mutex
/// since WASM is single-threaded.
#[wasm_bindgen]
pub struct WasmMachine {
    inner: Machine,
}

#[wasm_bindgen]
impl WasmMachine {
    /// Create a machine with the default configuration.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmMachine, JsValue> {
        #[cfg(target_arch = "wasm32")]
        console_error_panic_hook::set_once();

        let inner = Machine::new(MachineConfig::default())
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        Ok(WasmMachine { inner })
    }

    /// Load ROM data and reset.
    /// Returns 0 on success, negative error code on failure.
    #[wasm_bindgen]
    pub fn load_rom(&mut self, data: &[u8]) -> i32 {
        log(&format!("[WASM] load_rom: {} bytes", data.len()));
        match self.inner.load_rom(data) {
            Ok(()) => 0,
            Err(err) => {
                warn(&format!("[WASM] load_rom: {err}"));
                err.code()
            }
        }
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Run up to `max_instructions`. Returns the pause event as
    /// `[reason, address]`, or `undefined` if the budget ran out.
    #[wasm_bindgen]
    pub fn run(&mut self, max_instructions: u32) -> Result<JsValue, JsValue> {
        match self.inner.run(max_instructions as u64) {
            Ok(Some(event)) => {
                let pair = Array::of2(
                    &JsValue::from_str(&format!("{:?}", event.reason)),
                    &JsValue::from_f64(event.address as f64),
                );
                Ok(pair.into())
            }
            Ok(None) => Ok(JsValue::UNDEFINED),
            Err(err) => Err(JsValue::from_str(&err.to_string())),
        }
    }

    #[wasm_bindgen]
    pub fn pause(&mut self) {
        self.inner.pause();
    }

    #[wasm_bindgen]
    pub fn resume(&mut self) {
        self.inner.resume();
    }

    #[wasm_bindgen]
    pub fn step_in(&mut self) {
        self.inner.step_in();
    }

    #[wasm_bindgen]
    pub fn step_over(&mut self) {
        self.inner.step_over();
    }

    #[wasm_bindgen]
    pub fn step_next(&mut self) {
        self.inner.step_next();
    }

    #[wasm_bindgen]
    pub fn step_out(&mut self) {
        self.inner.step_out();
    }

    #[wasm_bindgen]
    pub fn set_pc(&mut self, address: u32, adl: bool) -> i32 {
        code(self.inner.set_pc(address, adl).map_err(Into::into))
    }

    /// Set or clear breakpoint flags (bit 0 read, bit 1 write, bit 2 exec).
    #[wasm_bindgen]
    pub fn breakpoint_set(&mut self, address: u32, flags: u8, enabled: bool) -> i32 {
        let flags = BreakFlags::from_bits_truncate(flags);
        code(self.inner.breakpoint_set(address, flags, enabled).map_err(Into::into))
    }

    #[wasm_bindgen]
    pub fn breakpoint_remove(&mut self, address: u32) -> bool {
        self.inner.breakpoint_remove(address)
    }

    /// Breakpoints as `[address, flags]` pairs.
    #[wasm_bindgen]
    pub fn breakpoints(&self) -> Array {
        self.inner
            .breakpoints()
            .into_iter()
            .map(|(address, flags)| {
                Array::of2(&JsValue::from_f64(address as f64), &JsValue::from_f64(flags.bits() as f64))
            })
            .collect()
    }

    /// Set or clear port monitor flags (bit 0 read, bit 1 write, bit 2 freeze).
    #[wasm_bindgen]
    pub fn port_monitor_set(&mut self, port: u32, flags: u8, enabled: bool) -> i32 {
        let flags = PortFlags::from_bits_truncate(flags);
        code(self.inner.port_monitor_set(port, flags, enabled).map_err(Into::into))
    }

    #[wasm_bindgen]
    pub fn port_read_debug(&mut self, port: u32) -> i32 {
        match self.inner.port_read_debug(port) {
            Ok(value) => value as i32,
            Err(err) => crate::error::Error::from(err).code(),
        }
    }

    #[wasm_bindgen]
    pub fn peek(&mut self, address: u32, len: u32) -> Vec<u8> {
        (0..len).map(|i| self.inner.peek(address.wrapping_add(i))).collect()
    }

    #[wasm_bindgen]
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.inner.poke(address.wrapping_add(i as u32), b);
        }
    }

    /// Read a register by its index in `Register::ALL`.
    #[wasm_bindgen]
    pub fn register(&self, index: u32) -> u32 {
        Register::from_index(index).map_or(0, |r| self.inner.register(r))
    }

    #[wasm_bindgen]
    pub fn set_register(&mut self, index: u32, value: u32) -> bool {
        match Register::from_index(index) {
            Some(reg) => {
                self.inner.set_register(reg, value);
                true
            }
            None => false,
        }
    }

    /// Save machine state to a byte array.
    /// Returns an empty array on failure.
    #[wasm_bindgen]
    pub fn save_state(&mut self) -> Vec<u8> {
        match self.inner.save() {
            Ok(snapshot) => snapshot.as_bytes().to_vec(),
            Err(err) => {
                warn(&format!("[WASM] save_state: {err}"));
                Vec::new()
            }
        }
    }

    /// Restore machine state from a byte array.
    /// Returns 0 on success, negative error code on failure.
    #[wasm_bindgen]
    pub fn load_state(&mut self, data: &[u8]) -> i32 {
        match self.inner.restore(&Snapshot::from_bytes(data.to_vec())) {
            Ok(()) => {
                log(&format!(
                    "[WASM] load_state OK: pc={:06X} cycles={}",
                    self.inner.register(Register::PC),
                    self.inner.cycles()
                ));
                0
            }
            Err(err) => {
                warn(&format!("[WASM] load_state FAILED: {err}"));
                err.code()
            }
        }
    }

    /// Debug console lines written by the program since the last call.
    #[wasm_bindgen]
    pub fn take_console(&mut self) -> Array {
        self.inner
            .take_console()
            .into_iter()
            .map(|line| JsValue::from_str(&line))
            .collect()
    }

    /// Dump diagnostic state for debugging.
    #[wasm_bindgen]
    pub fn dump_state(&self) -> String {
        format!("{:?}\n{}", self.inner, self.inner.dump_history())
    }
}

fn code(result: crate::error::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}
