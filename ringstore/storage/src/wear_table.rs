//! Key/value table spread over rotating blocks.
//!
//! Only one block is active at a time. Every write in the active block takes
//! the next value of a per-block counter; once the counter reaches the block
//! limit, the live rows migrate to the next block and the old one is marked
//! retired. Rewrites therefore wander across the file instead of hammering
//! the same slots.
//!
//! ```text
//!  block 0 (retired)     block 1 (active)      block 2 (retired)
//! [-5][..][..][..]      [ 3][ 0][ 2][-1]      [-5][-1][-1][-1]
//!                         ^ counters: recency order within the block
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{decode_fixed, encode_fixed, pad_key, pad_to};
use crate::config::WearConfig;
use crate::error::{StorageError, StorageResult};
use crate::store_file::{
    Slot, StoreFile, StoreFlags, StoreHeader, StoreKind, WEAR_TAG_WIDTH, WearTag,
};

/// Counters describing a wear-level table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WearStats {
    pub block_count: u32,
    pub block_size: u32,
    pub block_limit: u32,
    pub current_block: u32,
    /// Highest counter used in the active block.
    pub max_counter: Option<u32>,
    /// Block rotations since open.
    pub rotations: u64,
    pub live_rows: u64,
    pub tombstones: u64,
    pub free_slots: u64,
    pub slot_reads: u64,
    pub slot_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    Free,
    Live,
    Deleted,
}

/// Block-rotating key/value table.
///
/// Lookups are answered from an in-memory copy of the active block; only
/// mutations touch the file.
pub struct WearLevelTable {
    file: StoreFile,
    key_size: usize,
    value_size: usize,
    block_count: u32,
    block_size: u32,
    block_limit: u32,
    current_block: u32,
    max_counter: Option<u32>,
    mirror: Vec<Slot<WearTag>>,
    rotations: u64,
}

impl WearLevelTable {
    fn requested_header(config: &WearConfig) -> StorageResult<StoreHeader> {
        config.validate()?;
        let mut header = StoreHeader::new(
            StoreKind::WearTable,
            config.value_size as u32,
            config.key_size as u32,
            config.capacity(),
        );
        header.byte_offset = config.byte_offset;
        header.block_count = config.block_count;
        header.block_limit = config.block_limit;
        if config.checksum {
            header.flags.set(StoreFlags::SLOT_CHECKSUM);
        }
        Ok(header)
    }

    fn with_file(file: StoreFile, config: &WearConfig) -> Self {
        Self {
            file,
            key_size: config.key_size,
            value_size: config.value_size,
            block_count: config.block_count,
            block_size: config.block_size,
            block_limit: config.block_limit,
            current_block: 0,
            max_counter: None,
            mirror: Vec::new(),
            rotations: 0,
        }
    }

    /// Creates an empty table at `config.byte_offset`, overwriting any store already there.
    pub fn create<P: AsRef<Path>>(path: P, config: &WearConfig) -> StorageResult<Self> {
        let header = Self::requested_header(config)?;
        let file = StoreFile::create(path, header, WEAR_TAG_WIDTH, config.sync_mode)?;
        let mut table = Self::with_file(file, config);

        let block = table.retired_block();
        for index in 0..table.block_count {
            table.file.write_slots(table.block_start(index), &block)?;
        }
        table.file.commit()?;
        table.mirror = block;
        Ok(table)
    }

    /// Opens an existing table, creating it if allowed by `config.create_if_missing`.
    ///
    /// The active block is the first one whose first slot is not marked
    /// retired; block 0 if every block is.
    pub fn open<P: AsRef<Path>>(path: P, config: &WearConfig) -> StorageResult<Self> {
        let path = path.as_ref();
        let header = Self::requested_header(config)?;
        if !StoreFile::is_initialized(path, header.byte_offset)? {
            if config.create_if_missing {
                return Self::create(path, config);
            }
            return Err(StorageError::StoreMissing {
                path: path.to_path_buf(),
            });
        }

        let file = StoreFile::open(path, &header, WEAR_TAG_WIDTH, config.sync_mode)?;
        let mut table = Self::with_file(file, config);

        let mut active = None;
        for index in 0..table.block_count {
            let first = table.file.read_slot::<WearTag>(table.block_start(index))?;
            if first.tag != WearTag::Retired {
                active = Some(index);
                break;
            }
        }
        table.current_block = active.unwrap_or(0);
        table.load_mirror()?;

        debug!(
            path = %path.display(),
            current_block = table.current_block,
            max_counter = ?table.max_counter,
            live_rows = table.len(),
            "opened wear-level table"
        );
        Ok(table)
    }

    fn load_mirror(&mut self) -> StorageResult<()> {
        let start = self.block_start(self.current_block);
        let mirror = self.file.read_slots::<WearTag>(start, u64::from(self.block_size))?;

        let mut max_counter = None;
        for (offset, slot) in mirror.iter().enumerate() {
            let index = start + offset as u64;
            match slot.tag {
                WearTag::Counter(counter) if counter >= self.block_limit => {
                    warn!(slot = index, counter, "wear-level counter beyond block limit");
                    return Err(StorageError::corrupted(
                        index,
                        format!("counter {counter} beyond block limit {}", self.block_limit),
                    ));
                }
                WearTag::Counter(counter) => {
                    max_counter = max_counter.max(Some(counter));
                }
                WearTag::Retired if offset > 0 => {
                    warn!(slot = index, "retired marker inside the active wear-level block");
                    return Err(StorageError::corrupted(
                        index,
                        "retired marker inside the active block",
                    ));
                }
                WearTag::Retired | WearTag::Unused => {}
            }
        }

        self.mirror = mirror;
        self.max_counter = max_counter;
        Ok(())
    }

    fn block_start(&self, block: u32) -> u64 {
        u64::from(block) * u64::from(self.block_size)
    }

    fn payload_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// A block as laid out at creation: retired marker, then unused slots.
    fn retired_block(&self) -> Vec<Slot<WearTag>> {
        let unused = Slot::zeroed(WearTag::Unused, self.payload_size());
        let mut block = vec![unused; self.block_size as usize];
        block[0].tag = WearTag::Retired;
        block
    }

    fn next_counter(&self) -> u32 {
        self.max_counter.map_or(0, |max| max + 1)
    }

    fn row_state(&self, slot: &Slot<WearTag>) -> RowState {
        match slot.tag {
            WearTag::Unused | WearTag::Retired => RowState::Free,
            WearTag::Counter(_) if is_zero(&slot.payload[..self.key_size]) => RowState::Deleted,
            WearTag::Counter(_) => RowState::Live,
        }
    }

    fn find_live(&self, padded_key: &[u8]) -> Option<usize> {
        self.mirror.iter().position(|slot| {
            self.row_state(slot) == RowState::Live && slot.payload[..self.key_size] == *padded_key
        })
    }

    fn first_free(&self) -> Option<usize> {
        self.mirror
            .iter()
            .position(|slot| self.row_state(slot) == RowState::Free)
    }

    fn count(&self, state: RowState) -> u64 {
        self.mirror
            .iter()
            .filter(|slot| self.row_state(slot) == state)
            .count() as u64
    }

    fn checked_key(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let padded = pad_key(key, self.key_size)?;
        if is_zero(&padded) {
            return Err(StorageError::InvalidRecord(
                "key of only zero bytes cannot be told apart from a deleted row".into(),
            ));
        }
        Ok(padded)
    }

    /// Writes `payload` into slot `index` of the active block with the next counter.
    ///
    /// Rotates right after the write when it consumed the last counter value.
    fn write_row(&mut self, index: usize, payload: Vec<u8>) -> StorageResult<()> {
        let counter = self.next_counter();
        debug_assert!(counter < self.block_limit);

        let slot = Slot {
            tag: WearTag::Counter(counter),
            payload,
        };
        self.file
            .write_slot(self.block_start(self.current_block) + index as u64, &slot)?;
        self.mirror[index] = slot;
        self.max_counter = Some(counter);

        if counter + 1 >= self.block_limit {
            self.rotate()?;
        }
        Ok(())
    }

    /// Rotates first if a torn rotation left the active block without budget.
    fn ensure_budget(&mut self) -> StorageResult<()> {
        if self.next_counter() >= self.block_limit {
            self.rotate()?;
        }
        Ok(())
    }

    /// Moves the live rows to the next block and retires the current one.
    ///
    /// The new block is complete on disk before the old one is marked, so
    /// an interrupted rotation leaves at least one intact copy of every row.
    fn rotate(&mut self) -> StorageResult<()> {
        let from = self.current_block;
        let to = (from + 1) % self.block_count;

        let mut live: Vec<&Slot<WearTag>> = self
            .mirror
            .iter()
            .filter(|slot| self.row_state(slot) == RowState::Live)
            .collect();
        live.sort_by_key(|slot| match slot.tag {
            WearTag::Counter(counter) => counter,
            WearTag::Unused | WearTag::Retired => 0,
        });

        let payload_size = self.payload_size();
        let mut block: Vec<Slot<WearTag>> = live
            .iter()
            .zip(0u32..)
            .map(|(slot, counter)| Slot {
                tag: WearTag::Counter(counter),
                payload: slot.payload.clone(),
            })
            .collect();
        let copied = block.len();
        block.resize(self.block_size as usize, Slot::zeroed(WearTag::Unused, payload_size));

        self.file.write_slots(self.block_start(to), &block)?;
        self.file.write_slot(
            self.block_start(from),
            &Slot::zeroed(WearTag::Retired, payload_size),
        )?;

        self.current_block = to;
        self.max_counter = (copied as u32).checked_sub(1);
        self.mirror = block;
        self.rotations += 1;

        debug!(from, to, copied, "rotated wear-level block");
        if to == 0 {
            warn!(
                path = %self.file.path().display(),
                block_count = self.block_count,
                "wear-level table wrapped around to block 0"
            );
        }
        Ok(())
    }

    fn upsert(&mut self, padded_key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.ensure_budget()?;

        let index = match self.find_live(&padded_key).or_else(|| self.first_free()) {
            Some(index) => index,
            None if self.count(RowState::Deleted) > 0 => {
                // Compaction: rotating drops the tombstones.
                self.rotate()?;
                self.first_free().ok_or(StorageError::CapacityExhausted {
                    block: self.current_block,
                })?
            }
            None => {
                return Err(StorageError::CapacityExhausted {
                    block: self.current_block,
                });
            }
        };

        let mut payload = padded_key;
        payload.extend_from_slice(&value);
        self.write_row(index, payload)?;
        self.file.commit()
    }

    /// Inserts a row, or rewrites the live row with the same key.
    ///
    /// Fails with [`CapacityExhausted`](StorageError::CapacityExhausted) when
    /// the active block holds `block_size` live rows.
    pub fn add_row(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let padded_key = self.checked_key(key)?;
        let value = pad_to(value, self.value_size, "value")?;
        self.upsert(padded_key, value)
    }

    /// Inserts a row whose value is serialized with postcard.
    pub fn add_encoded<T: Serialize>(&mut self, key: &[u8], value: &T) -> StorageResult<()> {
        let padded_key = self.checked_key(key)?;
        let value = encode_fixed(value, self.value_size)?;
        self.upsert(padded_key, value)
    }

    /// Deletes the live row with `key`. The deletion consumes a counter value.
    pub fn del_row(&mut self, key: &[u8]) -> StorageResult<()> {
        let padded_key = self.checked_key(key)?;
        if self.find_live(&padded_key).is_none() {
            return Err(StorageError::NotFound);
        }
        // Rotating moves the row, so look it up again afterwards.
        self.ensure_budget()?;
        let index = self.find_live(&padded_key).ok_or(StorageError::NotFound)?;
        let mut payload = self.mirror[index].payload.clone();
        payload[..self.key_size].fill(0);
        self.write_row(index, payload)?;
        self.file.commit()
    }

    /// Returns the value of the live row with `key`, without touching the file.
    pub fn find_key_value(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let padded_key = self.checked_key(key)?;
        Ok(self
            .find_live(&padded_key)
            .map(|index| self.mirror[index].payload[self.key_size..].to_vec()))
    }

    /// Looks up `key` and deserializes its value.
    pub fn find_decoded<T: DeserializeOwned>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        self.find_key_value(key)?
            .map(|value| decode_fixed(&value))
            .transpose()
    }

    /// Returns every live `(key, value)` pair, least recently written first.
    pub fn rows(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut live: Vec<(u32, &Slot<WearTag>)> = self
            .mirror
            .iter()
            .filter_map(|slot| match slot.tag {
                WearTag::Counter(counter) if self.row_state(slot) == RowState::Live => {
                    Some((counter, slot))
                }
                _ => None,
            })
            .collect();
        live.sort_by_key(|(counter, _)| *counter);
        live.into_iter()
            .map(|(_, slot)| {
                let (key, value) = slot.payload.split_at(self.key_size);
                (key.to_vec(), value.to_vec())
            })
            .collect()
    }

    /// Number of live rows.
    pub fn len(&self) -> u64 {
        self.count(RowState::Live)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_block(&self) -> u32 {
        self.current_block
    }

    /// Highest counter in the active block, `None` if it has not been written.
    pub fn max_counter(&self) -> Option<u32> {
        self.max_counter
    }

    /// Rotations performed since the table was opened.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn header(&self) -> &StoreHeader {
        self.file.header()
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()
    }

    pub fn stats(&self) -> WearStats {
        WearStats {
            block_count: self.block_count,
            block_size: self.block_size,
            block_limit: self.block_limit,
            current_block: self.current_block,
            max_counter: self.max_counter,
            rotations: self.rotations,
            live_rows: self.count(RowState::Live),
            tombstones: self.count(RowState::Deleted),
            free_slots: self.count(RowState::Free),
            slot_reads: self.file.slot_reads(),
            slot_writes: self.file.slot_writes(),
        }
    }
}

impl std::fmt::Debug for WearLevelTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WearLevelTable")
            .field("path", &self.path())
            .field("current_block", &self.current_block)
            .field("max_counter", &self.max_counter)
            .field("live_rows", &self.len())
            .finish()
    }
}

fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}
