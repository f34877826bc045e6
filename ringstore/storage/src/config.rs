//! Construction parameters for the ring storage structures.
//!
//! Every structure is opened with the exact dimensions it was created with;
//! the header stored in the file is compared against these values on open.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::store_file::header::HEADER_SIZE;
use crate::store_file::slot::{RING_TAG_WIDTH, SLOT_CRC_SIZE, WEAR_TAG_WIDTH};

/// When mutations are made durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// `sync_data` after every mutating operation.
    #[default]
    Immediate,
    /// Leave syncing to explicit `flush` calls.
    Deferred,
}

/// Configuration for a [`RingJournal`](crate::RingJournal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Payload bytes per record.
    pub record_size: usize,
    /// Number of slots in the ring.
    pub capacity: u64,
    /// Byte offset of the store inside the file.
    pub byte_offset: u64,
    /// Whether `open` creates a missing store.
    pub create_if_missing: bool,
    /// Whether every slot carries a CRC32.
    pub checksum: bool,
    /// Durability policy.
    pub sync_mode: SyncMode,
}

impl RingConfig {
    /// Creates a new configuration with the given record size and capacity.
    pub fn new(record_size: usize, capacity: u64) -> Self {
        Self {
            record_size,
            capacity,
            byte_offset: 0,
            create_if_missing: false,
            checksum: false,
            sync_mode: SyncMode::default(),
        }
    }

    /// Sets the byte offset of the store inside the file.
    pub fn with_byte_offset(mut self, offset: u64) -> Self {
        self.byte_offset = offset;
        self
    }

    /// Sets whether to create the store if it doesn't exist.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether slots carry a CRC32.
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the durability policy.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Bytes occupied by one slot.
    pub fn slot_size(&self) -> u64 {
        slot_size(RING_TAG_WIDTH, self.record_size, self.checksum)
    }

    /// Bytes occupied by the header and all slots.
    pub fn region_len(&self) -> u64 {
        HEADER_SIZE + self.capacity * self.slot_size()
    }

    pub(crate) fn validate(&self) -> StorageResult<()> {
        check_ring_dimensions(self.record_size, self.capacity)
    }
}

/// Configuration for a [`RingTable`](crate::RingTable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Key bytes per row, including padding.
    pub key_size: usize,
    /// Value bytes per row.
    pub value_size: usize,
    /// Number of rows before the oldest is evicted.
    pub capacity: u64,
    /// Byte offset of the store inside the file.
    pub byte_offset: u64,
    /// Whether `open` creates a missing store.
    pub create_if_missing: bool,
    /// Whether every slot carries a CRC32.
    pub checksum: bool,
    /// Durability policy.
    pub sync_mode: SyncMode,
}

impl TableConfig {
    /// Creates a new configuration with the given key/value sizes and capacity.
    pub fn new(key_size: usize, value_size: usize, capacity: u64) -> Self {
        Self {
            key_size,
            value_size,
            capacity,
            byte_offset: 0,
            create_if_missing: false,
            checksum: false,
            sync_mode: SyncMode::default(),
        }
    }

    /// Sets the byte offset of the store inside the file.
    pub fn with_byte_offset(mut self, offset: u64) -> Self {
        self.byte_offset = offset;
        self
    }

    /// Sets whether to create the store if it doesn't exist.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether slots carry a CRC32.
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the durability policy.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Bytes occupied by one slot.
    pub fn slot_size(&self) -> u64 {
        slot_size(
            RING_TAG_WIDTH,
            self.key_size + self.value_size,
            self.checksum,
        )
    }

    /// Bytes occupied by the header and all slots.
    pub fn region_len(&self) -> u64 {
        HEADER_SIZE + self.capacity * self.slot_size()
    }

    pub(crate) fn validate(&self) -> StorageResult<()> {
        if self.key_size == 0 {
            return Err(StorageError::InvalidConfig(
                "key_size must be at least 1".into(),
            ));
        }
        check_ring_dimensions(self.key_size + self.value_size, self.capacity)
    }
}

/// Configuration for a [`WearLevelTable`](crate::WearLevelTable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WearConfig {
    /// Key bytes per row, including padding.
    pub key_size: usize,
    /// Value bytes per row.
    pub value_size: usize,
    /// Number of rotating blocks.
    pub block_count: u32,
    /// Slots per block.
    pub block_size: u32,
    /// Rewrite counter values a block absorbs before its rows migrate.
    pub block_limit: u32,
    /// Byte offset of the store inside the file.
    pub byte_offset: u64,
    /// Whether `open` creates a missing store.
    pub create_if_missing: bool,
    /// Whether every slot carries a CRC32.
    pub checksum: bool,
    /// Durability policy.
    pub sync_mode: SyncMode,
}

impl WearConfig {
    /// Creates a new configuration with the given row and block geometry.
    pub fn new(
        key_size: usize,
        value_size: usize,
        block_count: u32,
        block_size: u32,
        block_limit: u32,
    ) -> Self {
        Self {
            key_size,
            value_size,
            block_count,
            block_size,
            block_limit,
            byte_offset: 0,
            create_if_missing: false,
            checksum: false,
            sync_mode: SyncMode::default(),
        }
    }

    /// Sets the byte offset of the store inside the file.
    pub fn with_byte_offset(mut self, offset: u64) -> Self {
        self.byte_offset = offset;
        self
    }

    /// Sets whether to create the store if it doesn't exist.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether slots carry a CRC32.
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the durability policy.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Total number of slots across all blocks.
    pub fn capacity(&self) -> u64 {
        u64::from(self.block_count) * u64::from(self.block_size)
    }

    /// Bytes occupied by one slot.
    pub fn slot_size(&self) -> u64 {
        slot_size(
            WEAR_TAG_WIDTH,
            self.key_size + self.value_size,
            self.checksum,
        )
    }

    /// Bytes occupied by the header and all slots.
    pub fn region_len(&self) -> u64 {
        HEADER_SIZE + self.capacity() * self.slot_size()
    }

    pub(crate) fn validate(&self) -> StorageResult<()> {
        if self.key_size == 0 {
            return Err(StorageError::InvalidConfig(
                "key_size must be at least 1".into(),
            ));
        }
        check_payload_size(self.key_size + self.value_size)?;
        if self.block_count < 2 {
            return Err(StorageError::InvalidConfig(format!(
                "block_count must be at least 2, got {}",
                self.block_count
            )));
        }
        if self.block_size == 0 {
            return Err(StorageError::InvalidConfig(
                "block_size must be at least 1".into(),
            ));
        }
        if self.block_limit <= self.block_size {
            return Err(StorageError::InvalidConfig(format!(
                "block_limit ({}) must exceed block_size ({})",
                self.block_limit, self.block_size
            )));
        }
        if self.block_limit > i32::MAX as u32 {
            return Err(StorageError::InvalidConfig(format!(
                "block_limit ({}) does not fit a slot counter",
                self.block_limit
            )));
        }
        Ok(())
    }
}

fn slot_size(tag_width: usize, payload_size: usize, checksum: bool) -> u64 {
    let crc = if checksum { SLOT_CRC_SIZE } else { 0 };
    (tag_width + payload_size + crc) as u64
}

fn check_payload_size(payload_size: usize) -> StorageResult<()> {
    if payload_size == 0 {
        return Err(StorageError::InvalidConfig(
            "record size must be at least 1".into(),
        ));
    }
    if u32::try_from(payload_size).is_err() {
        return Err(StorageError::InvalidConfig(format!(
            "record size {payload_size} is too large"
        )));
    }
    Ok(())
}

fn check_ring_dimensions(payload_size: usize, capacity: u64) -> StorageResult<()> {
    check_payload_size(payload_size)?;
    if capacity < 2 {
        return Err(StorageError::InvalidConfig(format!(
            "capacity must be at least 2, got {capacity}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_region_len() {
        let config = RingConfig::new(4, 5);
        assert_eq!(config.slot_size(), 5);
        assert_eq!(config.region_len(), HEADER_SIZE + 25);

        let config = config.with_checksum(true);
        assert_eq!(config.slot_size(), 9);
    }

    #[test]
    fn test_builder_methods() {
        let config = TableConfig::new(8, 16, 10)
            .with_byte_offset(4096)
            .with_create_if_missing(true)
            .with_sync_mode(SyncMode::Deferred);
        assert_eq!(config.byte_offset, 4096);
        assert!(config.create_if_missing);
        assert_eq!(config.sync_mode, SyncMode::Deferred);
        assert_eq!(config.slot_size(), 25);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(RingConfig::new(0, 5).validate().is_err());
        assert!(RingConfig::new(4, 1).validate().is_err());
        assert!(TableConfig::new(0, 4, 5).validate().is_err());
        assert!(WearConfig::new(4, 4, 1, 4, 8).validate().is_err());
        assert!(WearConfig::new(4, 4, 2, 4, 4).validate().is_err());
        assert!(WearConfig::new(4, 4, 2, 0, 4).validate().is_err());
        assert!(WearConfig::new(4, 4, 3, 4, 5).validate().is_ok());
    }

    #[test]
    fn test_wear_capacity() {
        let config = WearConfig::new(8, 8, 3, 4, 16);
        assert_eq!(config.capacity(), 12);
        assert_eq!(config.slot_size(), 20);
    }
}
