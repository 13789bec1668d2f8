//! Debug port (port range 0xF, MMIO 0xFA0000 and up)
//!
//! Lets software running on the machine talk to the attached debugger:
//! - offset 0x00: command byte. 1 reports that the program aborted, 2 asks
//!   the debugger to stop here. Either one pauses emulation.
//! - offset 0x04: console. Bytes collect into a line; a newline hands the
//!   line to the log and to the host.

use super::PortCtx;
use crate::error::RestoreError;
use crate::snapshot::{Reader, Writer};

const COMMAND: u16 = 0x00;
const CONSOLE: u16 = 0x04;

/// Longest console line kept before it is flushed without a newline
const MAX_LINE: usize = 512;

/// A debugger command issued by the running program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProgramRequest {
    Abort = 1,
    EnterDebugger = 2,
}

impl ProgramRequest {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ProgramRequest::Abort),
            2 => Some(ProgramRequest::EnterDebugger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugPort {
    line: String,
}

impl DebugPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, _offset: u16) -> u8 {
        0
    }

    pub fn write(&mut self, offset: u16, value: u8, ctx: &mut PortCtx<'_>) {
        match offset & 0xFF {
            COMMAND => match ProgramRequest::from_code(value) {
                Some(request) => {
                    tracing::info!(?request, "program requested debugger");
                    ctx.lines.program_request = Some(request);
                }
                None => tracing::warn!(value, "unknown debug port command"),
            },
            CONSOLE => {
                if value == b'\n' {
                    self.flush(ctx);
                } else {
                    self.line.push(char::from(value));
                    if self.line.len() >= MAX_LINE {
                        self.flush(ctx);
                    }
                }
            }
            _ => {}
        }
    }

    fn flush(&mut self, ctx: &mut PortCtx<'_>) {
        let line = std::mem::take(&mut self.line);
        tracing::info!(target: "ce_core::console", "{line}");
        ctx.lines.push_console_line(line);
    }

    pub fn save(&self, w: &mut Writer) {
        w.block(self.line.as_bytes());
    }

    pub fn load(r: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let line = String::from_utf8(r.block("peripherals")?.to_vec())
            .map_err(|_| RestoreError::corrupt("peripherals", "console line is not UTF-8"))?;
        Ok(Self { line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::peripherals::{InterruptController, SystemLines};
    use crate::scheduler::Scheduler;

    fn with_ctx(f: impl FnOnce(&mut PortCtx<'_>)) -> SystemLines {
        let mut sched = Scheduler::new(MachineConfig::default().scheduler_rates()).unwrap();
        let mut intc = InterruptController::new();
        let mut lines = SystemLines::default();
        let mut ctx = PortCtx {
            sched: &mut sched,
            intc: &mut intc,
            lines: &mut lines,
            range: 0xF,
        };
        f(&mut ctx);
        lines
    }

    #[test]
    fn test_console_lines() {
        let mut port = DebugPort::new();
        let lines = with_ctx(|ctx| {
            for &b in b"hello\nwor" {
                port.write(CONSOLE, b, ctx);
            }
        });
        assert_eq!(lines.console, vec!["hello".to_string()]);
        assert_eq!(port.line, "wor");
    }

    #[test]
    fn test_commands() {
        let mut port = DebugPort::new();
        let lines = with_ctx(|ctx| port.write(COMMAND, 2, ctx));
        assert_eq!(lines.program_request, Some(ProgramRequest::EnterDebugger));
        let lines = with_ctx(|ctx| port.write(COMMAND, 9, ctx));
        assert_eq!(lines.program_request, None);
    }
}
