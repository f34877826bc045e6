//! Circular log of fixed-size records.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Ring, RingPosition, RingStats};
use crate::codec::{decode_fixed, encode_fixed, pad_to};
use crate::config::RingConfig;
use crate::error::{StorageError, StorageResult};
use crate::store_file::{StoreFile, StoreFlags, StoreHeader, StoreKind};

/// Append-only ring of fixed-size records.
///
/// Logical index 0 is the oldest record. When the ring is full, appending
/// overwrites the oldest record and every index shifts down by one.
/// Deleted records keep their slot until they are evicted; reading them
/// yields `None`.
///
/// # Example
///
/// ```no_run
/// use ringstore_storage::{RingConfig, RingJournal};
///
/// let config = RingConfig::new(4, 5).with_create_if_missing(true);
/// let mut journal = RingJournal::open("events.ring", &config)?;
/// for value in 1u32..=7 {
///     journal.append(&value.to_le_bytes())?;
/// }
/// assert_eq!(journal.read(0)?, Some(3u32.to_le_bytes().to_vec()));
/// # Ok::<(), ringstore_storage::StorageError>(())
/// ```
pub struct RingJournal {
    ring: Ring,
    record_size: usize,
}

impl RingJournal {
    fn requested_header(config: &RingConfig) -> StorageResult<StoreHeader> {
        config.validate()?;
        let mut header = StoreHeader::new(
            StoreKind::Journal,
            config.record_size as u32,
            0,
            config.capacity,
        );
        header.byte_offset = config.byte_offset;
        if config.checksum {
            header.flags.set(StoreFlags::SLOT_CHECKSUM);
        }
        Ok(header)
    }

    /// Creates an empty journal at `config.byte_offset`, overwriting any store already there.
    pub fn create<P: AsRef<Path>>(path: P, config: &RingConfig) -> StorageResult<Self> {
        let header = Self::requested_header(config)?;
        let ring = Ring::create(path.as_ref(), header, config.sync_mode)?;
        Ok(Self {
            ring,
            record_size: config.record_size,
        })
    }

    /// Opens an existing journal and recovers its position.
    ///
    /// A journal that was never written is created when
    /// `config.create_if_missing` is set, and reported as
    /// [`StoreMissing`](crate::StorageError::StoreMissing) otherwise.
    pub fn open<P: AsRef<Path>>(path: P, config: &RingConfig) -> StorageResult<Self> {
        let header = Self::requested_header(config)?;
        let ring = Ring::open_or_create(
            path.as_ref(),
            header,
            config.create_if_missing,
            config.sync_mode,
        )?;
        Ok(Self {
            ring,
            record_size: config.record_size,
        })
    }

    /// Returns true if a store header exists at `config.byte_offset`.
    pub fn exists<P: AsRef<Path>>(path: P, config: &RingConfig) -> StorageResult<bool> {
        StoreFile::is_initialized(path, config.byte_offset)
    }

    /// Appends a record, zero-padding it to the record size.
    pub fn append(&mut self, record: &[u8]) -> StorageResult<()> {
        let payload = pad_to(record, self.record_size, "record")?;
        self.ring.append(payload)?;
        self.ring.commit()
    }

    /// Appends a value serialized with postcard.
    pub fn append_encoded<T: Serialize>(&mut self, value: &T) -> StorageResult<()> {
        let payload = encode_fixed(value, self.record_size)?;
        self.ring.append(payload)?;
        self.ring.commit()
    }

    /// Marks the record at `index` as deleted.
    ///
    /// Returns [`NotFound`](crate::StorageError::NotFound) if the index is
    /// past the end or the record is already deleted.
    pub fn delete(&mut self, index: u64) -> StorageResult<()> {
        let entry = self
            .ring
            .entry(index)?
            .ok_or(StorageError::NotFound)?;
        self.ring.tombstone(entry.physical, entry.slot)?;
        self.ring.commit()
    }

    /// Removes every record.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.ring.clear()?;
        self.ring.commit()
    }

    /// Returns the record at `index` if it exists and is not deleted.
    pub fn read(&mut self, index: u64) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .ring
            .entry(index)?
            .filter(|entry| entry.slot.tag.is_live())
            .map(|entry| entry.slot.payload))
    }

    /// Reads and deserializes the record at `index`.
    pub fn read_decoded<T: DeserializeOwned>(&mut self, index: u64) -> StorageResult<Option<T>> {
        self.read(index)?
            .map(|payload| decode_fixed(&payload))
            .transpose()
    }

    /// Returns the live records in `[start, start + count)` with their indices.
    ///
    /// A `count` of 0 reads to the end.
    pub fn read_range(&mut self, start: u64, count: u64) -> StorageResult<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .ring
            .entries(start, count)?
            .into_iter()
            .filter(|entry| entry.slot.tag.is_live())
            .map(|entry| (entry.logical, entry.slot.payload))
            .collect())
    }

    /// Changes the capacity and rewrites the header.
    ///
    /// Growing keeps every record. Shrinking clamps the ring to the new
    /// capacity; when the ring has wrapped, the records kept are not
    /// necessarily the newest ones. The slots given up by a shrink are zeroed.
    ///
    /// Growing needs the bytes after the region to be free: if the file
    /// holds any non-zero byte where the new slots would go, for example
    /// another store laid out right after this one, the journal is left
    /// unchanged and [`InvalidConfig`](crate::StorageError::InvalidConfig)
    /// is returned.
    pub fn resize(&mut self, new_capacity: u64) -> StorageResult<()> {
        self.ring.resize(new_capacity)?;
        self.ring.commit()
    }

    /// Number of records in the journal, deleted ones included.
    pub fn len(&self) -> u64 {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.position().is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Physical head/tail position.
    pub fn position(&self) -> RingPosition {
        self.ring.position()
    }

    pub fn path(&self) -> &Path {
        self.ring.file().path()
    }

    pub fn header(&self) -> &StoreHeader {
        self.ring.file().header()
    }

    /// Syncs all written records to disk.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.ring.flush()
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

impl std::fmt::Debug for RingJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingJournal")
            .field("path", &self.path())
            .field("record_size", &self.record_size)
            .field("capacity", &self.capacity())
            .field("position", &self.position())
            .finish()
    }
}
