//! Key/value table on a ring, evicting the oldest row when full.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Ring, RingEntry, RingStats};
use crate::codec::{decode_fixed, encode_fixed, pad_key, pad_to};
use crate::config::TableConfig;
use crate::error::{StorageError, StorageResult};
use crate::store_file::{StoreFlags, StoreHeader, StoreKind};

/// Fixed-capacity key/value table with FIFO eviction.
///
/// Rows live in a ring, so opening the table costs O(log capacity) slot
/// reads. Key lookups scan every row from the oldest. Keys are compared
/// after zero-padding to the key size, so `b"ab"` and `b"ab\0"` are the
/// same key.
pub struct RingTable {
    ring: Ring,
    key_size: usize,
    value_size: usize,
}

impl RingTable {
    fn requested_header(config: &TableConfig) -> StorageResult<StoreHeader> {
        config.validate()?;
        let mut header = StoreHeader::new(
            StoreKind::Table,
            config.value_size as u32,
            config.key_size as u32,
            config.capacity,
        );
        header.byte_offset = config.byte_offset;
        if config.checksum {
            header.flags.set(StoreFlags::SLOT_CHECKSUM);
        }
        Ok(header)
    }

    /// Creates an empty table at `config.byte_offset`, overwriting any store already there.
    pub fn create<P: AsRef<Path>>(path: P, config: &TableConfig) -> StorageResult<Self> {
        let header = Self::requested_header(config)?;
        let ring = Ring::create(path.as_ref(), header, config.sync_mode)?;
        Ok(Self::with_ring(ring, config))
    }

    /// Opens an existing table, creating it if allowed by `config.create_if_missing`.
    pub fn open<P: AsRef<Path>>(path: P, config: &TableConfig) -> StorageResult<Self> {
        let header = Self::requested_header(config)?;
        let ring = Ring::open_or_create(
            path.as_ref(),
            header,
            config.create_if_missing,
            config.sync_mode,
        )?;
        Ok(Self::with_ring(ring, config))
    }

    fn with_ring(ring: Ring, config: &TableConfig) -> Self {
        Self {
            ring,
            key_size: config.key_size,
            value_size: config.value_size,
        }
    }

    /// Finds the oldest live row whose key equals `padded_key`.
    fn find_entry(&mut self, padded_key: &[u8]) -> StorageResult<Option<RingEntry>> {
        let key_size = self.key_size;
        Ok(self
            .ring
            .entries(0, 0)?
            .into_iter()
            .find(|entry| entry.slot.tag.is_live() && entry.slot.payload[..key_size] == *padded_key))
    }

    fn upsert(&mut self, padded_key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let existing = self.find_entry(&padded_key)?;
        let mut payload = padded_key;
        payload.extend_from_slice(&value);
        match existing {
            Some(entry) => self.ring.overwrite(entry.physical, entry.slot.tag, payload)?,
            None => {
                self.ring.append(payload)?;
            }
        }
        self.ring.commit()
    }

    /// Inserts a row, or overwrites the value of the live row with the same key.
    ///
    /// Inserting into a full table evicts the oldest row.
    pub fn add_row(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let padded_key = pad_key(key, self.key_size)?;
        let value = pad_to(value, self.value_size, "value")?;
        self.upsert(padded_key, value)
    }

    /// Inserts a row whose value is serialized with postcard.
    pub fn add_encoded<T: Serialize>(&mut self, key: &[u8], value: &T) -> StorageResult<()> {
        let padded_key = pad_key(key, self.key_size)?;
        let value = encode_fixed(value, self.value_size)?;
        self.upsert(padded_key, value)
    }

    /// Deletes the live row with `key`.
    pub fn del_row(&mut self, key: &[u8]) -> StorageResult<()> {
        let padded_key = pad_key(key, self.key_size)?;
        let entry = self.find_entry(&padded_key)?.ok_or(StorageError::NotFound)?;
        self.ring.tombstone(entry.physical, entry.slot)?;
        self.ring.commit()
    }

    /// Returns the value of the live row with `key`.
    pub fn find_key_value(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let padded_key = pad_key(key, self.key_size)?;
        let key_size = self.key_size;
        Ok(self
            .find_entry(&padded_key)?
            .map(|entry| entry.slot.payload[key_size..].to_vec()))
    }

    /// Looks up `key` and deserializes its value.
    pub fn find_decoded<T: DeserializeOwned>(&mut self, key: &[u8]) -> StorageResult<Option<T>> {
        self.find_key_value(key)?
            .map(|value| decode_fixed(&value))
            .transpose()
    }

    /// Returns every live `(key, value)` pair, oldest first, with padding kept.
    pub fn rows(&mut self) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let key_size = self.key_size;
        Ok(self
            .ring
            .entries(0, 0)?
            .into_iter()
            .filter(|entry| entry.slot.tag.is_live())
            .map(|entry| {
                let mut key = entry.slot.payload;
                let value = key.split_off(key_size);
                (key, value)
            })
            .collect())
    }

    /// Removes every row.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.ring.clear()?;
        self.ring.commit()
    }

    /// Number of rows in the ring, deleted ones included.
    pub fn len(&self) -> u64 {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.position().is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn path(&self) -> &Path {
        self.ring.file().path()
    }

    pub fn header(&self) -> &StoreHeader {
        self.ring.file().header()
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.ring.flush()
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

impl std::fmt::Debug for RingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingTable")
            .field("path", &self.path())
            .field("key_size", &self.key_size)
            .field("value_size", &self.value_size)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
