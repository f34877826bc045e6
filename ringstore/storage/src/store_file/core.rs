//! Core store file implementation.
//!
//! This module provides the `StoreFile` struct that owns the file handle of
//! one store region and performs every header and slot I/O on it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::header::{HEADER_SIZE, MAGIC, StoreHeader};
use super::slot::{Slot, SlotLayout, SlotTag};
use crate::config::SyncMode;
use crate::error::{StorageError, StorageResult};

/// Slots encoded per write call when filling large ranges.
const FILL_BATCH_SLOTS: u64 = 4096;

/// Bytes read or written per call when checking or zeroing a byte range.
const ZERO_CHUNK: u64 = 64 * 1024;

/// One store region inside a file: a header followed by fixed-size slots.
///
/// # Physical Layout
///
/// ```text
/// +--------------+-------------+-------------+-----+-----------------+
/// | Header (64B) |   Slot 0    |   Slot 1    | ... |   Slot N - 1    |
/// +--------------+-------------+-------------+-----+-----------------+
/// ^              ^
/// byte_offset    byte_offset + 64
/// ```
///
/// The handle is exclusively owned: it is neither `Clone` nor shared, and
/// every mutating call takes `&mut self`.
pub struct StoreFile {
    /// The underlying file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Cached header.
    header: StoreHeader,
    /// Slot byte layout derived from the header.
    layout: SlotLayout,
    /// Durability policy.
    sync_mode: SyncMode,
    /// Slots read since the handle was opened.
    slot_reads: u64,
    /// Slots written since the handle was opened.
    slot_writes: u64,
}

impl StoreFile {
    /// Creates a store region at `header.byte_offset`, creating the file if needed.
    ///
    /// Bytes outside the region are left untouched, so several stores can
    /// share one file. The slots themselves are written by the caller.
    pub fn create<P: AsRef<Path>>(
        path: P,
        mut header: StoreHeader,
        tag_width: usize,
        sync_mode: SyncMode,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        header.update_crc();
        let layout = SlotLayout::new(
            tag_width,
            (header.key_size + header.record_size) as usize,
            header.has_slot_checksum(),
        );

        let mut store = Self {
            file,
            path,
            header,
            layout,
            sync_mode,
            slot_reads: 0,
            slot_writes: 0,
        };
        store.header.write_to(&mut store.file)?;

        info!(
            path = %store.path.display(),
            kind = ?store.header.kind,
            capacity = store.header.capacity,
            byte_offset = store.header.byte_offset,
            "created store region"
        );
        Ok(store)
    }

    /// Opens an existing store region and validates it against `requested`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        requested: &StoreHeader,
        tag_width: usize,
        sync_mode: SyncMode,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let header = StoreHeader::read_from(&mut file, requested.byte_offset)?;
        header.ensure_matches(requested)?;

        let layout = SlotLayout::new(
            tag_width,
            (header.key_size + header.record_size) as usize,
            header.has_slot_checksum(),
        );

        let expected = header.slots_offset() + header.capacity * layout.slot_size() as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(StorageError::FileTruncated { expected, actual });
        }

        info!(
            path = %path.display(),
            kind = ?header.kind,
            capacity = header.capacity,
            byte_offset = header.byte_offset,
            "opened store region"
        );
        Ok(Self {
            file,
            path,
            header,
            layout,
            sync_mode,
            slot_reads: 0,
            slot_writes: 0,
        })
    }

    /// Returns true if a store header has been written at `byte_offset`.
    ///
    /// A missing file, a file too short to hold a header, or all-zero magic
    /// bytes count as "not initialized".
    pub fn is_initialized<P: AsRef<Path>>(path: P, byte_offset: u64) -> StorageResult<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }

        let mut file = File::open(path)?;
        if file.metadata()?.len() < byte_offset + HEADER_SIZE {
            return Ok(false);
        }

        let mut magic = [0u8; MAGIC.len()];
        file.seek(SeekFrom::Start(byte_offset))?;
        file.read_exact(&mut magic)?;
        Ok(magic.iter().any(|&b| b != 0))
    }

    /// Returns the path to the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a reference to the current header.
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Returns the slot layout.
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    /// Number of slots in the region.
    pub fn capacity(&self) -> u64 {
        self.header.capacity
    }

    /// Slots read since the handle was opened.
    pub fn slot_reads(&self) -> u64 {
        self.slot_reads
    }

    /// Slots written since the handle was opened.
    pub fn slot_writes(&self) -> u64 {
        self.slot_writes
    }

    fn slot_offset(&self, index: u64) -> u64 {
        self.header.slots_offset() + index * self.layout.slot_size() as u64
    }

    fn check_range(&self, start: u64, count: u64, limit: u64) -> StorageResult<()> {
        if count > 0 && start + count > limit {
            return Err(StorageError::corrupted(
                start + count - 1,
                format!("slot index beyond capacity {limit}"),
            ));
        }
        Ok(())
    }

    /// Reads the slot at physical index `index`.
    pub fn read_slot<T: SlotTag>(&mut self, index: u64) -> StorageResult<Slot<T>> {
        self.check_range(index, 1, self.header.capacity)?;

        let mut raw = vec![0u8; self.layout.slot_size()];
        self.file.seek(SeekFrom::Start(self.slot_offset(index)))?;
        self.file.read_exact(&mut raw)?;
        self.slot_reads += 1;

        self.layout.decode(&raw, index)
    }

    /// Reads `count` consecutive slots starting at `start` with one I/O call.
    pub fn read_slots<T: SlotTag>(&mut self, start: u64, count: u64) -> StorageResult<Vec<Slot<T>>> {
        self.check_range(start, count, self.header.capacity)?;

        let slot_size = self.layout.slot_size();
        let mut raw = vec![0u8; slot_size * count as usize];
        self.file.seek(SeekFrom::Start(self.slot_offset(start)))?;
        self.file.read_exact(&mut raw)?;
        self.slot_reads += count;

        raw.chunks_exact(slot_size)
            .zip(start..)
            .map(|(chunk, index)| self.layout.decode(chunk, index))
            .collect()
    }

    /// Writes the slot at physical index `index`.
    pub fn write_slot<T: SlotTag>(&mut self, index: u64, slot: &Slot<T>) -> StorageResult<()> {
        self.check_range(index, 1, self.header.capacity)?;
        self.write_raw(index, self.layout.encode(slot), 1)
    }

    /// Writes consecutive slots starting at `start` with one I/O call.
    pub fn write_slots<T: SlotTag>(&mut self, start: u64, slots: &[Slot<T>]) -> StorageResult<()> {
        self.check_range(start, slots.len() as u64, self.header.capacity)?;
        let mut raw = Vec::with_capacity(self.layout.slot_size() * slots.len());
        for slot in slots {
            self.layout.encode_into(slot, &mut raw);
        }
        self.write_raw(start, raw, slots.len() as u64)
    }

    fn write_raw(&mut self, start: u64, raw: Vec<u8>, count: u64) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(self.slot_offset(start)))?;
        self.file.write_all(&raw)?;
        self.slot_writes += count;
        Ok(())
    }

    /// Writes `count` copies of `slot` starting at `start`.
    pub fn fill_slots<T: SlotTag>(&mut self, start: u64, count: u64, slot: &Slot<T>) -> StorageResult<()> {
        self.check_range(start, count, self.header.capacity)?;
        self.fill_raw(start, count, slot)
    }

    fn fill_raw<T: SlotTag>(&mut self, start: u64, count: u64, slot: &Slot<T>) -> StorageResult<()> {
        let encoded = self.layout.encode(slot);
        let mut written = 0;
        while written < count {
            let batch = (count - written).min(FILL_BATCH_SLOTS);
            let raw = encoded.repeat(batch as usize);
            self.write_raw(start + written, raw, batch)?;
            written += batch;
        }
        Ok(())
    }

    /// Extends the region to `capacity` slots, filling the new ones with `filler`.
    ///
    /// Fails with [`StorageError::InvalidConfig`] if any byte the region would
    /// grow into is non-zero, which is the case when another store follows
    /// it in the file. The new slots are written before the header, so a
    /// crash in between leaves the old header describing the old, intact
    /// region.
    pub fn grow<T: SlotTag>(&mut self, capacity: u64, filler: &Slot<T>) -> StorageResult<()> {
        let previous = self.header.capacity;
        if capacity > previous {
            self.ensure_vacant(self.slot_offset(previous), self.slot_offset(capacity))?;
            self.fill_raw(previous, capacity - previous, filler)?;
        }
        self.set_capacity(capacity)
    }

    /// Reduces the region to `capacity` slots and zeroes the bytes it gave up.
    ///
    /// The header is rewritten first; the released slots are only zeroed
    /// once they no longer belong to the region.
    pub fn shrink(&mut self, capacity: u64) -> StorageResult<()> {
        let previous = self.header.capacity;
        debug_assert!(capacity <= previous);
        self.set_capacity(capacity)?;
        self.zero_bytes(self.slot_offset(capacity), self.slot_offset(previous))
    }

    /// Checks that the file holds only zero bytes in `[start, end)`, or ends before them.
    fn ensure_vacant(&mut self, start: u64, end: u64) -> StorageResult<()> {
        let end = end.min(self.file.metadata()?.len());
        let mut buf = vec![0u8; ZERO_CHUNK.min(end.saturating_sub(start)) as usize];
        let mut at = start;
        while at < end {
            let len = (end - at).min(ZERO_CHUNK) as usize;
            self.file.seek(SeekFrom::Start(at))?;
            self.file.read_exact(&mut buf[..len])?;
            if let Some(pos) = buf[..len].iter().position(|&b| b != 0) {
                return Err(StorageError::InvalidConfig(format!(
                    "cannot grow store at byte offset {}: byte {} is in use",
                    self.header.byte_offset,
                    at + pos as u64
                )));
            }
            at += len as u64;
        }
        Ok(())
    }

    fn zero_bytes(&mut self, start: u64, end: u64) -> StorageResult<()> {
        let zeros = vec![0u8; ZERO_CHUNK.min(end.saturating_sub(start)) as usize];
        let mut at = start;
        self.file.seek(SeekFrom::Start(at))?;
        while at < end {
            let len = (end - at).min(ZERO_CHUNK) as usize;
            self.file.write_all(&zeros[..len])?;
            at += len as u64;
        }
        Ok(())
    }

    /// Rewrites the header with a new slot count.
    fn set_capacity(&mut self, capacity: u64) -> StorageResult<()> {
        let previous = self.header.capacity;
        self.header.capacity = capacity;
        self.header.update_crc();
        self.header.write_to(&mut self.file)?;
        debug!(
            path = %self.path.display(),
            previous,
            capacity,
            "rewrote store header capacity"
        );
        Ok(())
    }

    /// Makes the preceding mutation durable if the sync mode asks for it.
    pub fn commit(&mut self) -> StorageResult<()> {
        if self.sync_mode == SyncMode::Immediate {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Flushes buffered data and syncs to disk.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::store_file::header::StoreKind;
    use crate::store_file::slot::{RING_TAG_WIDTH, RingTag};

    fn temp_store_path(prefix: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("{}_{}.ring", prefix, uuid::Uuid::new_v4()));
        path
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_file(path);
    }

    fn journal_header(capacity: u64, byte_offset: u64) -> StoreHeader {
        let mut header = StoreHeader::new(StoreKind::Journal, 4, 0, capacity);
        header.byte_offset = byte_offset;
        header
    }

    #[test]
    fn test_create_and_open() {
        let path = temp_store_path("store_create_open");

        {
            let mut store =
                StoreFile::create(&path, journal_header(4, 0), RING_TAG_WIDTH, SyncMode::Immediate)
                    .unwrap();
            let slots = vec![Slot::zeroed(RingTag::Empty, 4); 4];
            store.write_slots(0, &slots).unwrap();
            store.commit().unwrap();
        }

        {
            let mut store =
                StoreFile::open(&path, &journal_header(4, 0), RING_TAG_WIDTH, SyncMode::Immediate)
                    .unwrap();
            assert_eq!(store.capacity(), 4);
            let slot: Slot<RingTag> = store.read_slot(3).unwrap();
            assert_eq!(slot.tag, RingTag::Empty);
            assert_eq!(store.slot_reads(), 1);
        }

        cleanup(&path);
    }

    #[test]
    fn test_slot_roundtrip_at_offset() {
        let path = temp_store_path("store_offset");
        let mut store =
            StoreFile::create(&path, journal_header(3, 1000), RING_TAG_WIDTH, SyncMode::Deferred)
                .unwrap();
        store
            .write_slots(0, &vec![Slot::zeroed(RingTag::Empty, 4); 3])
            .unwrap();

        let slot = Slot {
            tag: RingTag::RunBLive,
            payload: vec![9, 8, 7, 6],
        };
        store.write_slot(2, &slot).unwrap();
        store.flush().unwrap();

        assert_eq!(store.read_slot::<RingTag>(2).unwrap(), slot);
        assert!(StoreFile::is_initialized(&path, 1000).unwrap());
        assert!(!StoreFile::is_initialized(&path, 0).unwrap());

        cleanup(&path);
    }

    #[test]
    fn test_read_out_of_range() {
        let path = temp_store_path("store_range");
        let mut store =
            StoreFile::create(&path, journal_header(2, 0), RING_TAG_WIDTH, SyncMode::Deferred)
                .unwrap();
        store
            .write_slots(0, &vec![Slot::zeroed(RingTag::Empty, 4); 2])
            .unwrap();

        assert!(store.read_slot::<RingTag>(2).is_err());

        cleanup(&path);
    }

    #[test]
    fn test_open_detects_truncation() {
        let path = temp_store_path("store_truncated");
        {
            let _store =
                StoreFile::create(&path, journal_header(8, 0), RING_TAG_WIDTH, SyncMode::Immediate)
                    .unwrap();
            // Slots never written
        }

        let result =
            StoreFile::open(&path, &journal_header(8, 0), RING_TAG_WIDTH, SyncMode::Immediate);
        assert!(matches!(result, Err(StorageError::FileTruncated { .. })));

        cleanup(&path);
    }

    #[test]
    fn test_grow_refuses_bytes_in_use() {
        let path = temp_store_path("store_grow_blocked");
        let empty = Slot::zeroed(RingTag::Empty, 4);
        let mut store =
            StoreFile::create(&path, journal_header(2, 0), RING_TAG_WIDTH, SyncMode::Deferred)
                .unwrap();
        store.fill_slots(0, 2, &empty).unwrap();

        // A second region right after the first one.
        let next_offset = store.slot_offset(2);
        let mut next = StoreFile::create(
            &path,
            journal_header(2, next_offset),
            RING_TAG_WIDTH,
            SyncMode::Deferred,
        )
        .unwrap();
        next.fill_slots(0, 2, &empty).unwrap();

        assert!(matches!(
            store.grow(4, &empty),
            Err(StorageError::InvalidConfig(_))
        ));
        assert_eq!(store.capacity(), 2);
        assert!(StoreFile::is_initialized(&path, next_offset).unwrap());

        cleanup(&path);
    }

    #[test]
    fn test_shrink_zeroes_released_slots() {
        let path = temp_store_path("store_shrink_zero");
        let mut store =
            StoreFile::create(&path, journal_header(4, 0), RING_TAG_WIDTH, SyncMode::Deferred)
                .unwrap();
        let slot = Slot {
            tag: RingTag::RunALive,
            payload: vec![1, 2, 3, 4],
        };
        store.fill_slots(0, 4, &slot).unwrap();

        store.shrink(2).unwrap();
        let raw = fs::read(&path).unwrap();
        let end = store.slot_offset(2) as usize;
        assert!(raw[end..].iter().all(|&b| b == 0));

        store.grow(4, &Slot::zeroed(RingTag::Empty, 4)).unwrap();
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.read_slot::<RingTag>(3).unwrap().tag, RingTag::Empty);

        cleanup(&path);
    }

    #[test]
    fn test_is_initialized_missing_file() {
        let path = temp_store_path("store_missing");
        assert!(!StoreFile::is_initialized(&path, 0).unwrap());
    }
}
