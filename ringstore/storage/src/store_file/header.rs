//! Store header implementation.
//!
//! The header is located at the store's byte offset and records the
//! dimensions the store was created with. It is validated, never coerced,
//! when the store is reopened.

use std::io::{Read, Seek, SeekFrom, Write};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Magic number identifying a ringstore region.
pub const MAGIC: [u8; 8] = *b"RINGSTOR";

/// Current file format version.
pub const CURRENT_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: u64 = 64;

/// Bytes covered by the header CRC.
const CRC_COVERED: usize = 56;

/// Which structure owns a store region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum StoreKind {
    Journal = 1,
    Table = 2,
    WearTable = 3,
}

impl StoreKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(StoreKind::Journal),
            2 => Some(StoreKind::Table),
            3 => Some(StoreKind::WearTable),
            _ => None,
        }
    }
}

/// Flags for store features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreFlags {
    bits: u32,
}

impl StoreFlags {
    /// No special flags.
    pub const NONE: u32 = 0;
    /// Every slot ends with a CRC32 of its tag and payload.
    pub const SLOT_CHECKSUM: u32 = 1 << 0;

    /// Creates a new flags instance.
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Checks if a flag is set.
    pub fn has(&self, flag: u32) -> bool {
        self.bits & flag != 0
    }

    /// Sets a flag.
    pub fn set(&mut self, flag: u32) {
        self.bits |= flag;
    }
}

/// Store header.
///
/// # Header Layout (Fixed 64 Bytes)
///
/// | Offset | Size | Type | Field | Description |
/// |--------|------|------|-------|-------------|
/// | 0 | 8 | `[u8; 8]` | `magic` | Magic bytes "RINGSTOR" |
/// | 8 | 4 | `u32` | `version` | File format version (current: 1) |
/// | 12 | 4 | `u32` | `header_size` | Total header size (64 bytes) |
/// | 16 | 4 | `u32` | `kind` | Owning structure |
/// | 20 | 4 | `u32` | `flags` | Feature flags (bitmask) |
/// | 24 | 4 | `u32` | `record_size` | Value bytes per slot |
/// | 28 | 4 | `u32` | `key_size` | Key bytes per slot (0 for journals) |
/// | 32 | 8 | `u64` | `capacity` | Number of slots |
/// | 40 | 8 | `u64` | `byte_offset` | Offset of this header in the file |
/// | 48 | 4 | `u32` | `block_count` | Wear-level blocks (0 otherwise) |
/// | 52 | 4 | `u32` | `block_limit` | Counter budget per block (0 otherwise) |
/// | 56 | 4 | `u32` | `header_crc` | CRC32 of bytes 0..56 |
/// | 60 | 4 | `[u8]` | - | Padding (zero-filled) |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    /// Magic number (must be "RINGSTOR").
    pub magic: [u8; 8],
    /// File format version.
    pub version: u32,
    /// Header size in bytes.
    pub header_size: u32,
    /// Owning structure.
    pub kind: StoreKind,
    /// Feature flags.
    pub flags: StoreFlags,
    /// Value bytes per slot.
    pub record_size: u32,
    /// Key bytes per slot.
    pub key_size: u32,
    /// Number of slots.
    pub capacity: u64,
    /// Byte offset of this header in the file.
    pub byte_offset: u64,
    /// Number of wear-level blocks.
    pub block_count: u32,
    /// Counter budget per wear-level block.
    pub block_limit: u32,
    /// CRC32 checksum of the header (excluding this field).
    pub header_crc: u32,
}

impl StoreHeader {
    /// Creates a header for a store of the given kind and shape.
    pub fn new(kind: StoreKind, record_size: u32, key_size: u32, capacity: u64) -> Self {
        Self {
            magic: MAGIC,
            version: CURRENT_VERSION,
            header_size: HEADER_SIZE as u32,
            kind,
            flags: StoreFlags::default(),
            record_size,
            key_size,
            capacity,
            byte_offset: 0,
            block_count: 0,
            block_limit: 0,
            header_crc: 0,
        }
    }

    /// Offset of the first slot in the file.
    pub fn slots_offset(&self) -> u64 {
        self.byte_offset + u64::from(self.header_size)
    }

    /// Returns true if slots carry a CRC32.
    pub fn has_slot_checksum(&self) -> bool {
        self.flags.has(StoreFlags::SLOT_CHECKSUM)
    }

    /// Checks that this (stored) header describes the same store as `requested`.
    ///
    /// The first differing field is reported; nothing is adjusted.
    pub fn ensure_matches(&self, requested: &StoreHeader) -> StorageResult<()> {
        let fields: [(&'static str, u64, u64); 8] = [
            ("kind", self.kind as u64, requested.kind as u64),
            (
                "flags",
                u64::from(self.flags.bits()),
                u64::from(requested.flags.bits()),
            ),
            (
                "record_size",
                u64::from(self.record_size),
                u64::from(requested.record_size),
            ),
            (
                "key_size",
                u64::from(self.key_size),
                u64::from(requested.key_size),
            ),
            ("capacity", self.capacity, requested.capacity),
            ("byte_offset", self.byte_offset, requested.byte_offset),
            (
                "block_count",
                u64::from(self.block_count),
                u64::from(requested.block_count),
            ),
            (
                "block_limit",
                u64::from(self.block_limit),
                u64::from(requested.block_limit),
            ),
        ];
        for (field, stored, requested) in fields {
            if stored != requested {
                return Err(StorageError::HeaderMismatch {
                    field,
                    stored,
                    requested,
                });
            }
        }
        Ok(())
    }

    fn encode_covered(&self) -> [u8; CRC_COVERED] {
        let mut out = [0u8; CRC_COVERED];
        out[0..8].copy_from_slice(&self.magic);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        out[16..20].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[24..28].copy_from_slice(&self.record_size.to_le_bytes());
        out[28..32].copy_from_slice(&self.key_size.to_le_bytes());
        out[32..40].copy_from_slice(&self.capacity.to_le_bytes());
        out[40..48].copy_from_slice(&self.byte_offset.to_le_bytes());
        out[48..52].copy_from_slice(&self.block_count.to_le_bytes());
        out[52..56].copy_from_slice(&self.block_limit.to_le_bytes());
        out
    }

    /// Computes the CRC32 checksum of the header (excluding the crc field).
    fn compute_crc(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.encode_covered());
        hasher.finalize()
    }

    /// Updates the CRC field with the computed checksum.
    pub fn update_crc(&mut self) {
        self.header_crc = self.compute_crc();
    }

    /// Writes the header at its byte offset.
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> StorageResult<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..CRC_COVERED].copy_from_slice(&self.encode_covered());
        buf[CRC_COVERED..CRC_COVERED + 4].copy_from_slice(&self.header_crc.to_le_bytes());

        writer.seek(SeekFrom::Start(self.byte_offset))?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads and validates the header stored at `byte_offset`.
    pub fn read_from<R: Read + Seek>(reader: &mut R, byte_offset: u64) -> StorageResult<Self> {
        reader.seek(SeekFrom::Start(byte_offset))?;

        let mut buf = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut buf)?;

        let u32_at =
            |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        if magic != MAGIC {
            return Err(StorageError::InvalidMagic {
                offset: byte_offset,
            });
        }

        let stored_crc = u32_at(CRC_COVERED);
        let mut hasher = Hasher::new();
        hasher.update(&buf[..CRC_COVERED]);
        let computed = hasher.finalize();
        if computed != stored_crc {
            return Err(StorageError::HeaderChecksumMismatch {
                expected: stored_crc,
                actual: computed,
            });
        }

        let version = u32_at(8);
        let header_size = u32_at(12);
        if version > CURRENT_VERSION || u64::from(header_size) != HEADER_SIZE {
            return Err(StorageError::UnsupportedVersion(version, CURRENT_VERSION));
        }

        let raw_kind = u32_at(16);
        let kind = StoreKind::from_raw(raw_kind).ok_or_else(|| {
            StorageError::InvalidConfig(format!("unknown store kind {raw_kind}"))
        })?;

        Ok(Self {
            magic,
            version,
            header_size,
            kind,
            flags: StoreFlags::new(u32_at(20)),
            record_size: u32_at(24),
            key_size: u32_at(28),
            capacity: u64_at(32),
            byte_offset: u64_at(40),
            block_count: u32_at(48),
            block_limit: u32_at(52),
            header_crc: stored_crc,
        })
    }
}
