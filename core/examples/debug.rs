//! Debugger front end for the emulator core
//!
//! Loads a ROM, applies breakpoints and port monitors, runs the machine on
//! its worker thread and reports every debugger event. When the run ends a
//! snapshot is written next to the other snapshots with a timestamped name.
//!
//! Usage:
//!   cargo run --release --example debug -- <rom> [options]
//!
//! Examples:
//!   debug rom.bin --break 0x021000 --watch-write 0xD00100
//!   debug rom.bin --monitor-port 0x5004 --events 10
//!   debug rom.bin --restore snapshots/ce_20240101_120000.ce84 --paused
//!
//! Set RUST_LOG (e.g. `RUST_LOG=ce_core=debug`) to see core logging.

use std::error::Error;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ce_core::{
    BreakFlags, BreakReason, Command, CpuSpeed, Machine, MachineConfig, PortFlags, Register,
    Snapshot, StepKind, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "debug", about = "Run a TI-84 Plus CE ROM under the debugger")]
struct Args {
    /// ROM image to load
    rom: PathBuf,

    /// EXEC breakpoint (hex or decimal, repeatable)
    #[arg(long = "break", value_parser = parse_number)]
    exec: Vec<u32>,

    /// WRITE breakpoint
    #[arg(long = "watch-write", value_parser = parse_number)]
    watch_write: Vec<u32>,

    /// READ breakpoint
    #[arg(long = "watch-read", value_parser = parse_number)]
    watch_read: Vec<u32>,

    /// Port READ/WRITE monitor
    #[arg(long = "monitor-port", value_parser = parse_number)]
    monitor_port: Vec<u32>,

    /// Drop writes to this port
    #[arg(long = "freeze-port", value_parser = parse_number)]
    freeze_port: Vec<u32>,

    /// Stop once execution reaches this address
    #[arg(long = "run-until", value_parser = parse_number)]
    run_until: Option<u32>,

    /// Snapshot to restore after loading the ROM
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Start paused and single-step instead of running
    #[arg(long)]
    paused: bool,

    /// Number of debugger events to handle before stopping
    #[arg(long, default_value_t = 5)]
    events: usize,

    /// Give up after this many seconds without an event
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// CPU speed at reset in MHz (6, 12, 24 or 48)
    #[arg(long, default_value_t = 48)]
    mhz: u64,

    /// Emulated speed in percent; enables throttling
    #[arg(long)]
    speed: Option<u32>,

    /// Directory for the snapshot written at exit
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let speed = CpuSpeed::from_hz(args.mhz * 1_000_000)
        .ok_or_else(|| format!("unsupported CPU speed {} MHz", args.mhz))?;
    let config = MachineConfig::default()
        .with_cpu_speed(speed)
        .with_attach_paused(args.paused)
        .with_throttle(args.speed.is_some(), args.speed.unwrap_or(100));
    config.validate()?;

    let mut machine = Machine::new(config)?;
    let rom = fs::read(&args.rom)?;
    machine.load_rom(&rom)?;
    println!("Loaded {} ({} bytes)", args.rom.display(), rom.len());

    if let Some(path) = &args.restore {
        machine.restore_from(File::open(path)?)?;
        println!("Restored {}", path.display());
    }

    for &addr in &args.exec {
        machine.breakpoint_set(addr, BreakFlags::EXEC, true)?;
    }
    for &addr in &args.watch_write {
        machine.breakpoint_set(addr, BreakFlags::WRITE, true)?;
    }
    for &addr in &args.watch_read {
        machine.breakpoint_set(addr, BreakFlags::READ, true)?;
    }
    for &port in &args.monitor_port {
        machine.port_monitor_set(port, PortFlags::READ | PortFlags::WRITE, true)?;
    }
    for &port in &args.freeze_port {
        machine.port_monitor_set(port, PortFlags::FREEZE, true)?;
    }
    if let Some(addr) = args.run_until {
        machine.run_until_toggle(addr)?;
    }
    for (addr, flags) in machine.breakpoints() {
        println!("  breakpoint {addr:06X} {flags:?}");
    }
    for (port, flags) in machine.port_monitors() {
        println!("  monitor    {port:04X} {flags:?}");
    }

    let worker = Worker::spawn(machine);
    let started = Instant::now();
    let timeout = Duration::from_secs(args.timeout);

    for n in 0..args.events {
        if args.paused {
            worker.step(StepKind::Over)?;
        }
        let Some(event) = worker.wait_event(timeout) else {
            println!("No event within {}s", args.timeout);
            break;
        };
        let status = worker.status();
        println!(
            "[{n}] {:?} at {:06X}  PC={:06X} ADL={} cycles={}",
            event.reason, event.address, status.cpu.pc, status.cpu.adl, status.cycles
        );
        if let Some(desync) = &status.desync {
            println!("Core desync: {desync}");
            break;
        }
        if event.reason == BreakReason::ProgramRequest {
            break;
        }
        if !args.paused {
            worker.resume()?;
        }
    }

    worker.pause()?;
    let ram = worker.request(|reply| Command::Peek {
        address: 0xD00000,
        len: 16,
        reply,
    })?;
    let status = worker.status();
    println!(
        "Stopped after {:.2?}: {} instructions, {} cycles",
        started.elapsed(),
        status.instructions,
        status.cycles
    );
    println!(
        "  HL={:06X} DE={:06X} BC={:06X} SPL={:06X} RAM[D00000..]={:02X?}",
        status.cpu.hl, status.cpu.de, status.cpu.bc, status.cpu.spl, ram
    );

    let snapshot: Snapshot = worker.save()?;
    let mut machine = worker.shutdown()?;
    for line in machine.take_console() {
        println!("  console: {line}");
    }

    fs::create_dir_all(&args.snapshot_dir)?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = args.snapshot_dir.join(format!("ce_{timestamp}.ce84"));
    snapshot.write_to(BufWriter::new(File::create(&path)?))?;
    println!(
        "Snapshot written to {} ({} bytes, PC={:06X})",
        path.display(),
        snapshot.len(),
        machine.register(Register::PC)
    );
    Ok(())
}
