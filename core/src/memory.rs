//! Memory subsystem for TI-84 Plus CE
//!
//! Flat storage behind the 24-bit address space:
//! - 0x000000 - 0x3FFFFF: Flash (4MB), mirrored up to 0xBFFFFF
//! - 0xC00000 - 0xCFFFFF: Unmapped
//! - 0xD00000 - 0xD657FF: RAM (256KB + VRAM, 0x65800 bytes total)
//! - 0xD65800 - 0xDFFFFF: Unmapped
//! - 0xE00000 - 0xFFFFFF: Memory-mapped I/O (routed by the bus, not stored here)
//!
//! Accesses here never cost cycles and never trigger the debugger; the bus
//! layers timing and instrumentation on top.

use crate::error::{RestoreError, RomError};
use crate::snapshot::{Reader, Writer};

/// Memory region address constants
pub mod addr {
    /// Flash memory size (4MB)
    pub const FLASH_SIZE: usize = 0x400000;
    /// End of the flash mirror window (exclusive)
    pub const FLASH_MIRROR_END: u32 = 0xC00000;

    /// RAM start address
    pub const RAM_START: u32 = 0xD00000;
    /// RAM end address (exclusive, includes VRAM)
    pub const RAM_END: u32 = 0xD65800;
    /// Total RAM size (256KB user RAM + ~150KB VRAM)
    pub const RAM_SIZE: usize = 0x65800;

    /// Memory-mapped I/O start address
    pub const MMIO_START: u32 = 0xE00000;

    /// Maximum address in 24-bit space
    pub const ADDR_MASK: u32 = 0xFFFFFF;
}

/// Memory region that an address maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Flash,
    Ram,
    /// Memory-mapped I/O (0xE00000 - 0xFFFFFF)
    Mmio,
    Unmapped,
}

impl Region {
    pub fn of(addr: u32) -> Self {
        let addr = addr & addr::ADDR_MASK;
        if addr < addr::FLASH_MIRROR_END {
            Region::Flash
        } else if (addr::RAM_START..addr::RAM_END).contains(&addr) {
            Region::Ram
        } else if addr >= addr::MMIO_START {
            Region::Mmio
        } else {
            Region::Unmapped
        }
    }
}

/// Flash and RAM contents
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    flash: Vec<u8>,
    ram: Vec<u8>,
    /// Mirrors the control port's unlock bit; CPU stores to flash need it
    flash_writable: bool,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("flash_writable", &self.flash_writable)
            .finish_non_exhaustive()
    }
}

impl Memory {
    /// Erased flash, zeroed RAM
    pub fn new() -> Self {
        Self {
            flash: vec![0xFF; addr::FLASH_SIZE],
            ram: vec![0x00; addr::RAM_SIZE],
            flash_writable: false,
        }
    }

    /// Copy a ROM image into flash; the tail is left erased.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), RomError> {
        if image.is_empty() {
            return Err(RomError::Empty);
        }
        if image.len() > addr::FLASH_SIZE {
            return Err(RomError::TooLarge {
                size: image.len(),
                capacity: addr::FLASH_SIZE,
            });
        }
        self.flash[..image.len()].copy_from_slice(image);
        self.flash[image.len()..].fill(0xFF);
        Ok(())
    }

    /// Clear RAM; flash keeps its contents.
    pub fn reset(&mut self) {
        self.ram.fill(0x00);
        self.flash_writable = false;
    }

    pub fn set_flash_writable(&mut self, writable: bool) {
        self.flash_writable = writable;
    }

    pub fn flash_writable(&self) -> bool {
        self.flash_writable
    }

    // ========== Byte/word/long access ==========

    /// Read a byte. MMIO and unmapped addresses read 0.
    pub fn read_byte(&self, addr: u32) -> u8 {
        let addr = addr & addr::ADDR_MASK;
        match Region::of(addr) {
            Region::Flash => self.flash[flash_offset(addr)],
            Region::Ram => self.ram[(addr - addr::RAM_START) as usize],
            Region::Mmio | Region::Unmapped => 0x00,
        }
    }

    /// Store a byte as the CPU would: RAM always, flash only while writable.
    /// Returns whether anything changed hands.
    pub fn write_byte(&mut self, addr: u32, value: u8) -> bool {
        let addr = addr & addr::ADDR_MASK;
        match Region::of(addr) {
            Region::Flash if self.flash_writable => {
                self.flash[flash_offset(addr)] = value;
                true
            }
            Region::Ram => {
                self.ram[(addr - addr::RAM_START) as usize] = value;
                true
            }
            _ => false,
        }
    }

    /// Store a byte regardless of flash protection (debugger edits, test setup).
    pub fn poke(&mut self, addr: u32, value: u8) {
        let addr = addr & addr::ADDR_MASK;
        match Region::of(addr) {
            Region::Flash => self.flash[flash_offset(addr)] = value,
            Region::Ram => self.ram[(addr - addr::RAM_START) as usize] = value,
            Region::Mmio | Region::Unmapped => {}
        }
    }

    /// Read a 16-bit word (little-endian)
    pub fn read_word(&self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    /// Write a 16-bit word (little-endian)
    pub fn write_word(&mut self, addr: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Read a 24-bit value (little-endian)
    pub fn read_long(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.read_byte(addr),
            self.read_byte(addr.wrapping_add(1)),
            self.read_byte(addr.wrapping_add(2)),
            0,
        ])
    }

    /// Write a 24-bit value (little-endian)
    pub fn write_long(&mut self, addr: u32, value: u32) {
        let [b0, b1, b2, _] = value.to_le_bytes();
        self.write_byte(addr, b0);
        self.write_byte(addr.wrapping_add(1), b1);
        self.write_byte(addr.wrapping_add(2), b2);
    }

    // ========== Bulk access ==========

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

fn flash_offset(addr: u32) -> usize {
    (addr as usize) & (addr::FLASH_SIZE - 1)
}

// ========== State Persistence ==========

impl Memory {
    pub fn save_ram(&self, w: &mut Writer) {
        w.block(&self.ram);
    }

    pub fn save_flash(&self, w: &mut Writer) {
        w.block(&self.flash);
    }

    /// Decode both sections into a fresh instance.
    pub fn load(ram: &mut Reader<'_>, flash: &mut Reader<'_>) -> Result<Self, RestoreError> {
        let ram = ram.block("ram")?;
        if ram.len() != addr::RAM_SIZE {
            return Err(RestoreError::corrupt("ram", format!("{} bytes", ram.len())));
        }
        let flash = flash.block("flash")?;
        if flash.len() != addr::FLASH_SIZE {
            return Err(RestoreError::corrupt("flash", format!("{} bytes", flash.len())));
        }
        Ok(Self {
            flash: flash.to_vec(),
            ram: ram.to_vec(),
            flash_writable: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_memory_state() {
        let mem = Memory::new();
        assert_eq!(mem.read_byte(0x000000), 0xFF);
        assert_eq!(mem.read_byte(0x3FFFFF), 0xFF);
        assert_eq!(mem.read_byte(addr::RAM_START), 0x00);
    }

    #[test]
    fn test_load_rom_fills_tail() {
        let mut mem = Memory::new();
        mem.poke(0x10, 0x00);
        mem.load_rom(&[0x12, 0x34, 0x56, 0x78]).unwrap();
        assert_eq!(mem.read_byte(0), 0x12);
        assert_eq!(mem.read_byte(3), 0x78);
        assert_eq!(mem.read_byte(4), 0xFF);
        assert_eq!(mem.read_byte(0x10), 0xFF);
    }

    #[test]
    fn test_load_rom_rejects_bad_sizes() {
        let mut mem = Memory::new();
        assert_eq!(mem.load_rom(&[]), Err(RomError::Empty));
        let big = vec![0u8; addr::FLASH_SIZE + 1];
        assert!(matches!(mem.load_rom(&big), Err(RomError::TooLarge { .. })));
    }

    #[test]
    fn test_flash_mirror() {
        let mut mem = Memory::new();
        mem.poke(0x000123, 0xAB);
        assert_eq!(mem.read_byte(0x400123), 0xAB);
        assert_eq!(mem.read_byte(0x800123), 0xAB);
        assert_eq!(Region::of(0xC00000), Region::Unmapped);
    }

    #[test]
    fn test_flash_write_needs_unlock() {
        let mut mem = Memory::new();
        assert!(!mem.write_byte(0x100, 0x42));
        assert_eq!(mem.read_byte(0x100), 0xFF);
        mem.set_flash_writable(true);
        assert!(mem.write_byte(0x100, 0x42));
        assert_eq!(mem.read_byte(0x100), 0x42);
    }

    #[test]
    fn test_word_and_long_little_endian() {
        let mut mem = Memory::new();
        mem.write_word(0xD00200, 0xBEEF);
        assert_eq!(mem.read_byte(0xD00200), 0xEF);
        assert_eq!(mem.read_word(0xD00200), 0xBEEF);
        mem.write_long(0xD00300, 0xD12345);
        assert_eq!(mem.read_byte(0xD00302), 0xD1);
        assert_eq!(mem.read_long(0xD00300), 0xD12345);
    }

    #[test]
    fn test_unmapped_reads_zero_and_ignores_writes() {
        let mut mem = Memory::new();
        assert!(!mem.write_byte(addr::RAM_END, 0x55));
        assert_eq!(mem.read_byte(addr::RAM_END), 0x00);
        assert_eq!(mem.read_byte(0xF00000), 0x00);
    }

    #[test]
    fn test_reset_clears_ram_only() {
        let mut mem = Memory::new();
        mem.load_rom(&[0x01]).unwrap();
        mem.write_byte(0xD00000, 0x99);
        mem.reset();
        assert_eq!(mem.read_byte(0xD00000), 0x00);
        assert_eq!(mem.read_byte(0), 0x01);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut mem = Memory::new();
        mem.load_rom(&[0xC3, 0x00, 0x01]).unwrap();
        mem.write_long(0xD01234, 0x123456);

        let mut ram = Writer::new();
        mem.save_ram(&mut ram);
        let mut flash = Writer::new();
        mem.save_flash(&mut flash);
        let (ram, flash) = (ram.finish(), flash.finish());

        let loaded = Memory::load(&mut Reader::new(&ram), &mut Reader::new(&flash)).unwrap();
        assert_eq!(loaded, mem);
    }
}
