//! Machine snapshot container and the byte codec every component shares
//!
//! A snapshot is one opaque blob:
//!
//! ```text
//! "CE84" | version u32 | rom_hash u64 | payload_len u32 | payload
//! ```
//!
//! The payload is a sequence of sections (CPU, scheduler, peripherals,
//! machine metadata, RAM, flash), each written by the component that owns
//! the state. Decoding never touches live state: components decode into
//! fresh values and the machine swaps them in only after every section
//! parsed cleanly.

use std::io::{Read, Write};

use crate::error::{RestoreError, SaveError};

/// Magic bytes identifying a snapshot blob
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CE84";
/// Current blob layout version
pub const SNAPSHOT_VERSION: u32 = 3;
/// magic(4) + version(4) + rom_hash(8) + payload_len(4)
pub const HEADER_SIZE: usize = 20;

/// FNV-1a over the first 64 KiB of the ROM image.
pub fn rom_hash(flash: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in &flash[..flash.len().min(0x10000)] {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// A complete, self-describing machine snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("len", &self.bytes.len()).finish()
    }
}

impl Snapshot {
    pub(crate) fn new(rom_hash: u64, payload: Vec<u8>) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&rom_hash.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Self { bytes }
    }

    /// Wrap raw bytes. Validation happens on restore.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read a blob from any source.
    pub fn read_from(mut source: impl Read) -> Result<Self, RestoreError> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .map_err(|e| RestoreError::Io(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Write the blob to a destination.
    pub fn write_to(&self, mut destination: impl Write) -> Result<(), SaveError> {
        destination.write_all(&self.bytes)?;
        destination.flush()?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check the header against the loaded ROM and return the payload.
    pub(crate) fn payload(&self, expected_rom_hash: u64) -> Result<&[u8], RestoreError> {
        let available = self.bytes.len();
        let mut r = Reader::new(&self.bytes);
        let magic = r.array::<4>("header").map_err(|_| RestoreError::Truncated {
            needed: HEADER_SIZE,
            available,
        })?;
        if magic != SNAPSHOT_MAGIC {
            return Err(RestoreError::BadMagic(magic));
        }
        if available < HEADER_SIZE {
            return Err(RestoreError::Truncated {
                needed: HEADER_SIZE,
                available,
            });
        }
        let version = r.u32("header")?;
        if version != SNAPSHOT_VERSION {
            return Err(RestoreError::UnsupportedVersion(version));
        }
        if r.u64("header")? != expected_rom_hash {
            return Err(RestoreError::RomMismatch);
        }
        let len = r.u32("header")? as usize;
        if r.remaining() < len {
            return Err(RestoreError::Truncated {
                needed: HEADER_SIZE + len,
                available,
            });
        }
        let payload = r.bytes("header", len)?;
        if r.remaining() != 0 {
            return Err(RestoreError::corrupt(
                "header",
                format!("{} trailing bytes", r.remaining()),
            ));
        }
        Ok(payload)
    }
}

/// Append-only little-endian encoder.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 24-bit value stored in three bytes
    pub fn u24(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes()[..3]);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed byte block
    pub fn block(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked decoder. Every read names the section it belongs to so a
/// failure points at the component that produced bad bytes.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, section: &'static str, n: usize) -> Result<&'a [u8], RestoreError> {
        if self.remaining() < n {
            return Err(RestoreError::corrupt(
                section,
                format!("need {n} bytes, {} left", self.remaining()),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self, section: &'static str) -> Result<[u8; N], RestoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(section, N)?);
        Ok(out)
    }

    pub fn u8(&mut self, section: &'static str) -> Result<u8, RestoreError> {
        Ok(self.bytes(section, 1)?[0])
    }

    pub fn bool(&mut self, section: &'static str) -> Result<bool, RestoreError> {
        match self.u8(section)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RestoreError::corrupt(section, format!("bad bool {other}"))),
        }
    }

    pub fn u16(&mut self, section: &'static str) -> Result<u16, RestoreError> {
        Ok(u16::from_le_bytes(self.array(section)?))
    }

    pub fn u24(&mut self, section: &'static str) -> Result<u32, RestoreError> {
        let b = self.array::<3>(section)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn u32(&mut self, section: &'static str) -> Result<u32, RestoreError> {
        Ok(u32::from_le_bytes(self.array(section)?))
    }

    pub fn u64(&mut self, section: &'static str) -> Result<u64, RestoreError> {
        Ok(u64::from_le_bytes(self.array(section)?))
    }

    pub fn block(&mut self, section: &'static str) -> Result<&'a [u8], RestoreError> {
        let len = self.u32(section)? as usize;
        self.bytes(section, len)
    }
}
