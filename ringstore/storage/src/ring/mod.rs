//! Tag-recovered rings.
//!
//! A ring is a fixed number of slots holding the newest `capacity` elements;
//! appending to a full ring overwrites the oldest. [`RingJournal`] stores
//! bare records, [`RingTable`] stores key/value rows, and both share the
//! engine in this module.
//!
//! The non-head slots carry one of two run families. The family flips every
//! time the tail wraps from the last slot to slot 0, which keeps the tags
//! split into at most two contiguous runs with the head on the boundary.
//! [`recover_position`] relies on that to find the head without a scan.

pub mod journal;
pub mod recovery;
pub mod table;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use self::journal::RingJournal;
pub use self::recovery::{RingPosition, TagProbe, recover_position};
pub use self::table::RingTable;
use crate::config::SyncMode;
use crate::error::{StorageError, StorageResult};
use crate::store_file::{RING_TAG_WIDTH, RingTag, RunFamily, Slot, StoreFile, StoreHeader};

/// Counters describing a ring and the work done on it since open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingStats {
    pub capacity: u64,
    /// Elements in the ring, tombstones included.
    pub len: u64,
    pub head: Option<u64>,
    pub tail: Option<u64>,
    /// Slots read while recovering the position on open.
    pub recovery_reads: u64,
    pub slot_reads: u64,
    pub slot_writes: u64,
}

/// A ring slot addressed both ways.
#[derive(Debug, Clone)]
pub(crate) struct RingEntry {
    pub logical: u64,
    pub physical: u64,
    pub slot: Slot<RingTag>,
}

/// Ring engine over one store region.
pub(crate) struct Ring {
    file: StoreFile,
    position: RingPosition,
    recovery_reads: u64,
}

impl Ring {
    /// Writes a header and `capacity` empty slots.
    pub(crate) fn create(path: &Path, header: StoreHeader, sync_mode: SyncMode) -> StorageResult<Self> {
        let capacity = header.capacity;
        let mut file = StoreFile::create(path, header, RING_TAG_WIDTH, sync_mode)?;
        let empty = Slot::zeroed(RingTag::Empty, file.layout().payload_size);
        file.fill_slots(0, capacity, &empty)?;
        file.commit()?;

        Ok(Self {
            file,
            position: RingPosition::Empty,
            recovery_reads: 0,
        })
    }

    /// Validates the header against `requested` and recovers the position.
    pub(crate) fn open(path: &Path, requested: &StoreHeader, sync_mode: SyncMode) -> StorageResult<Self> {
        let mut file = StoreFile::open(path, requested, RING_TAG_WIDTH, sync_mode)?;
        let capacity = file.capacity();

        let position = match recover_position(&mut file, capacity) {
            Ok(position) => position,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "ring recovery failed, the store must be recreated"
                );
                return Err(e);
            }
        };
        let recovery_reads = file.slot_reads();
        debug!(
            path = %path.display(),
            ?position,
            recovery_reads,
            "recovered ring position"
        );

        Ok(Self {
            file,
            position,
            recovery_reads,
        })
    }

    /// Opens the region, creating it when it has never been written and `create_if_missing` is set.
    pub(crate) fn open_or_create(
        path: &Path,
        header: StoreHeader,
        create_if_missing: bool,
        sync_mode: SyncMode,
    ) -> StorageResult<Self> {
        if StoreFile::is_initialized(path, header.byte_offset)? {
            return Self::open(path, &header, sync_mode);
        }
        if create_if_missing {
            return Self::create(path, header, sync_mode);
        }
        Err(StorageError::StoreMissing {
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn file(&self) -> &StoreFile {
        &self.file
    }

    pub(crate) fn position(&self) -> RingPosition {
        self.position
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.file.capacity()
    }

    pub(crate) fn len(&self) -> u64 {
        self.position.len(self.capacity())
    }

    pub(crate) fn payload_size(&self) -> usize {
        self.file.layout().payload_size
    }

    pub(crate) fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity(),
            len: self.len(),
            head: self.position.head(),
            tail: self.position.tail(),
            recovery_reads: self.recovery_reads,
            slot_reads: self.file.slot_reads(),
            slot_writes: self.file.slot_writes(),
        }
    }

    /// Appends a padded payload as the newest element, evicting the oldest when full.
    ///
    /// Returns the physical slot written. Does not commit.
    pub(crate) fn append(&mut self, payload: Vec<u8>) -> StorageResult<u64> {
        debug_assert_eq!(payload.len(), self.payload_size());
        let capacity = self.capacity();

        let (head, tail) = match self.position {
            RingPosition::Empty => {
                self.file.write_slot(0, &Slot {
                    tag: RingTag::Head,
                    payload,
                })?;
                self.position = RingPosition::Span { head: 0, tail: 0 };
                return Ok(0);
            }
            RingPosition::Span { head, tail } => (head, tail),
        };

        let full = self.len() == capacity;
        let family = match self.file.read_slot::<RingTag>(tail)?.tag {
            RingTag::Empty => {
                return Err(StorageError::corrupted(tail, "tail slot is empty"));
            }
            // Only the sole element can be both head and tail.
            RingTag::Head | RingTag::HeadDeleted => RunFamily::A,
            RingTag::RunALive | RingTag::RunADeleted => RunFamily::A,
            RingTag::RunBLive | RingTag::RunBDeleted => RunFamily::B,
        };

        let new_tail = (tail + 1) % capacity;
        let family = if new_tail == 0 { family.flip() } else { family };
        self.file.write_slot(new_tail, &Slot {
            tag: family.live(),
            payload,
        })?;

        if full {
            // The record went into the old head slot; the next slot becomes the head.
            let new_head = (head + 1) % capacity;
            let mut next = self.file.read_slot::<RingTag>(new_head)?;
            next.tag = next.tag.promoted_to_head();
            self.file.write_slot(new_head, &next)?;
            self.position = RingPosition::Span {
                head: new_head,
                tail: new_tail,
            };
        } else {
            self.position = RingPosition::Span {
                head,
                tail: new_tail,
            };
        }
        Ok(new_tail)
    }

    /// Reads the element at a logical index; `None` past the end.
    pub(crate) fn entry(&mut self, logical: u64) -> StorageResult<Option<RingEntry>> {
        let Some(physical) = self.position.physical(logical, self.capacity()) else {
            return Ok(None);
        };
        let slot = self.file.read_slot(physical)?;
        Ok(Some(RingEntry {
            logical,
            physical,
            slot,
        }))
    }

    /// Reads up to `count` elements from logical index `start` (`0` means to the end).
    ///
    /// At most two read calls are issued, one per side of the wrap.
    pub(crate) fn entries(&mut self, start: u64, count: u64) -> StorageResult<Vec<RingEntry>> {
        let capacity = self.capacity();
        let len = self.len();
        let Some(first) = self.position.physical(start, capacity) else {
            return Ok(Vec::new());
        };

        let wanted = if count == 0 {
            len - start
        } else {
            count.min(len - start)
        };
        let before_wrap = wanted.min(capacity - first);
        let mut slots = self.file.read_slots::<RingTag>(first, before_wrap)?;
        if wanted > before_wrap {
            slots.extend(self.file.read_slots::<RingTag>(0, wanted - before_wrap)?);
        }

        Ok(slots
            .into_iter()
            .zip(start..)
            .map(|(slot, logical)| RingEntry {
                logical,
                physical: (first + logical - start) % capacity,
                slot,
            })
            .collect())
    }

    /// Replaces the payload of an occupied slot, keeping its tag.
    pub(crate) fn overwrite(&mut self, physical: u64, tag: RingTag, payload: Vec<u8>) -> StorageResult<()> {
        self.file.write_slot(physical, &Slot { tag, payload })
    }

    /// Turns the live element in `physical` into a tombstone.
    pub(crate) fn tombstone(&mut self, physical: u64, slot: Slot<RingTag>) -> StorageResult<()> {
        let tag = slot.tag.tombstoned().ok_or(StorageError::NotFound)?;
        self.file.write_slot(physical, &Slot {
            tag,
            payload: slot.payload,
        })
    }

    /// Resets every slot to empty.
    pub(crate) fn clear(&mut self) -> StorageResult<()> {
        let empty = Slot::zeroed(RingTag::Empty, self.payload_size());
        self.file.fill_slots(0, self.capacity(), &empty)?;
        self.position = RingPosition::Empty;
        Ok(())
    }

    /// Changes the slot count, keeping the two-run layout intact.
    ///
    /// Growing a wrapped ring appends tombstones of the older family, so the
    /// ring stays full. Shrinking clamps the position to the new capacity and
    /// may drop elements other than the oldest ones. Growing into bytes that
    /// are in use fails before anything is written.
    pub(crate) fn resize(&mut self, new_capacity: u64) -> StorageResult<()> {
        if new_capacity < 2 {
            return Err(StorageError::InvalidConfig(format!(
                "capacity must be at least 2, got {new_capacity}"
            )));
        }
        let previous = self.capacity();
        if new_capacity == previous {
            return Ok(());
        }

        let payload_size = self.payload_size();
        if new_capacity > previous {
            let filler = match self.position {
                RingPosition::Span { head, .. } if head > 0 => {
                    // Slot 0 carries the newer family in a wrapped ring.
                    let newer = self.file.read_slot::<RingTag>(0)?.tag.family();
                    let newer = newer.ok_or_else(|| {
                        StorageError::corrupted(0, "wrapped ring without a run at slot 0")
                    })?;
                    newer.flip().deleted()
                }
                _ => RingTag::Empty,
            };
            self.file
                .grow(new_capacity, &Slot::zeroed(filler, payload_size))?;
        } else {
            self.position = match self.position {
                RingPosition::Empty => RingPosition::Empty,
                RingPosition::Span { head: 0, tail } => RingPosition::Span {
                    head: 0,
                    tail: tail.min(new_capacity - 1),
                },
                RingPosition::Span { head, tail } if head < new_capacity => {
                    RingPosition::Span { head, tail }
                }
                RingPosition::Span { .. } => {
                    let head = new_capacity - 1;
                    let mut slot = self.file.read_slot::<RingTag>(head)?;
                    slot.tag = slot.tag.promoted_to_head();
                    self.file.write_slot(head, &slot)?;
                    RingPosition::Span {
                        head,
                        tail: head - 1,
                    }
                }
            };
            self.file.shrink(new_capacity)?;
        }

        info!(
            path = %self.file.path().display(),
            previous,
            capacity = new_capacity,
            position = ?self.position,
            "resized ring"
        );
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> StorageResult<()> {
        self.file.commit()
    }

    pub(crate) fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()
    }
}
