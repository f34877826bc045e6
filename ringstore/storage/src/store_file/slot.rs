//! Fixed-size slot codec.
//!
//! A slot is `[tag][payload][crc32?]`. The tag vocabulary depends on the
//! structure: rings use a one-byte [`RingTag`], wear-level tables a signed
//! 32-bit [`WearTag`].

use std::fmt;

use crc32fast::Hasher;

use crate::error::{StorageError, StorageResult};

/// Width of a ring tag on disk.
pub const RING_TAG_WIDTH: usize = 1;
/// Width of a wear-level tag on disk.
pub const WEAR_TAG_WIDTH: usize = 4;
/// Width of the optional slot CRC.
pub const SLOT_CRC_SIZE: usize = 4;

/// A tag vocabulary that can be stored in front of a slot payload.
pub trait SlotTag: Copy + fmt::Debug + PartialEq {
    /// Bytes occupied on disk.
    const WIDTH: usize;

    /// Writes the tag into `out`, which is exactly `WIDTH` bytes.
    fn encode(self, out: &mut [u8]);

    /// Decodes a tag; `None` means the raw value is outside the vocabulary.
    fn decode(raw: &[u8]) -> Option<Self>;
}

/// One of the two families of non-head ring tags.
///
/// Walking the slots physically, the families form at most two contiguous
/// runs; the head slot sits on the boundary between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFamily {
    A,
    B,
}

impl RunFamily {
    /// The other family.
    pub fn flip(self) -> Self {
        match self {
            RunFamily::A => RunFamily::B,
            RunFamily::B => RunFamily::A,
        }
    }

    /// Live tag of this family.
    pub fn live(self) -> RingTag {
        match self {
            RunFamily::A => RingTag::RunALive,
            RunFamily::B => RingTag::RunBLive,
        }
    }

    /// Tombstone tag of this family.
    pub fn deleted(self) -> RingTag {
        match self {
            RunFamily::A => RingTag::RunADeleted,
            RunFamily::B => RingTag::RunBDeleted,
        }
    }
}

/// Tag of a journal or ring-table slot.
///
/// The discriminants are the on-disk byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RingTag {
    Empty = 0,
    Head = 1,
    RunALive = 2,
    RunADeleted = 3,
    RunBLive = 4,
    RunBDeleted = 5,
    HeadDeleted = 6,
}

impl RingTag {
    /// Slot holds a record that has not been deleted.
    pub fn is_live(self) -> bool {
        matches!(self, RingTag::Head | RingTag::RunALive | RingTag::RunBLive)
    }

    /// Slot holds a record, live or tombstoned.
    pub fn is_occupied(self) -> bool {
        self != RingTag::Empty
    }

    /// Slot is the oldest element of the ring.
    pub fn is_head(self) -> bool {
        matches!(self, RingTag::Head | RingTag::HeadDeleted)
    }

    /// Run family of a non-head, non-empty slot.
    pub fn family(self) -> Option<RunFamily> {
        match self {
            RingTag::RunALive | RingTag::RunADeleted => Some(RunFamily::A),
            RingTag::RunBLive | RingTag::RunBDeleted => Some(RunFamily::B),
            RingTag::Empty | RingTag::Head | RingTag::HeadDeleted => None,
        }
    }

    /// Tombstoned counterpart, or `None` if there is no live record to delete.
    pub fn tombstoned(self) -> Option<RingTag> {
        match self {
            RingTag::Head => Some(RingTag::HeadDeleted),
            RingTag::RunALive => Some(RingTag::RunADeleted),
            RingTag::RunBLive => Some(RingTag::RunBDeleted),
            RingTag::Empty | RingTag::HeadDeleted | RingTag::RunADeleted | RingTag::RunBDeleted => {
                None
            }
        }
    }

    /// Tag this slot takes when it becomes the head; liveness is preserved.
    pub fn promoted_to_head(self) -> RingTag {
        if self.is_live() {
            RingTag::Head
        } else {
            RingTag::HeadDeleted
        }
    }
}

impl SlotTag for RingTag {
    const WIDTH: usize = RING_TAG_WIDTH;

    fn encode(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        match raw[0] {
            0 => Some(RingTag::Empty),
            1 => Some(RingTag::Head),
            2 => Some(RingTag::RunALive),
            3 => Some(RingTag::RunADeleted),
            4 => Some(RingTag::RunBLive),
            5 => Some(RingTag::RunBDeleted),
            6 => Some(RingTag::HeadDeleted),
            _ => None,
        }
    }
}

/// Tag of a wear-level table slot.
///
/// On disk: `-1` unused, `-5` first slot of an inactive block, `>= 0` the
/// rewrite counter within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WearTag {
    Unused,
    Retired,
    Counter(u32),
}

impl WearTag {
    const UNUSED: i32 = -1;
    const RETIRED: i32 = -5;

    /// Raw on-disk value.
    pub fn raw(self) -> i32 {
        match self {
            WearTag::Unused => Self::UNUSED,
            WearTag::Retired => Self::RETIRED,
            WearTag::Counter(counter) => counter as i32,
        }
    }
}

impl SlotTag for WearTag {
    const WIDTH: usize = WEAR_TAG_WIDTH;

    fn encode(self, out: &mut [u8]) {
        out.copy_from_slice(&self.raw().to_le_bytes());
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let value = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        match value {
            Self::UNUSED => Some(WearTag::Unused),
            Self::RETIRED => Some(WearTag::Retired),
            counter if counter >= 0 => Some(WearTag::Counter(counter as u32)),
            _ => None,
        }
    }
}

/// A decoded slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<T> {
    pub tag: T,
    pub payload: Vec<u8>,
}

impl<T: SlotTag> Slot<T> {
    /// A slot with the given tag and an all-zero payload.
    pub fn zeroed(tag: T, payload_size: usize) -> Self {
        Self {
            tag,
            payload: vec![0u8; payload_size],
        }
    }
}

/// Byte layout shared by every slot of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub tag_width: usize,
    pub payload_size: usize,
    pub checksum: bool,
}

impl SlotLayout {
    pub fn new(tag_width: usize, payload_size: usize, checksum: bool) -> Self {
        Self {
            tag_width,
            payload_size,
            checksum,
        }
    }

    /// Bytes occupied by one slot.
    pub fn slot_size(&self) -> usize {
        let crc = if self.checksum { SLOT_CRC_SIZE } else { 0 };
        self.tag_width + self.payload_size + crc
    }

    /// Appends the encoded slot to `out`.
    pub fn encode_into<T: SlotTag>(&self, slot: &Slot<T>, out: &mut Vec<u8>) {
        debug_assert_eq!(T::WIDTH, self.tag_width);
        debug_assert_eq!(slot.payload.len(), self.payload_size);

        let start = out.len();
        out.resize(start + self.tag_width, 0);
        slot.tag.encode(&mut out[start..]);
        out.extend_from_slice(&slot.payload);
        if self.checksum {
            let crc = body_crc(&out[start..]);
            out.extend_from_slice(&crc.to_le_bytes());
        }
    }

    /// Encodes a single slot.
    pub fn encode<T: SlotTag>(&self, slot: &Slot<T>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.slot_size());
        self.encode_into(slot, &mut out);
        out
    }

    /// Decodes the slot stored at physical index `index`.
    pub fn decode<T: SlotTag>(&self, raw: &[u8], index: u64) -> StorageResult<Slot<T>> {
        debug_assert_eq!(raw.len(), self.slot_size());

        let body_len = self.tag_width + self.payload_size;
        if self.checksum {
            let mut stored = [0u8; SLOT_CRC_SIZE];
            stored.copy_from_slice(&raw[body_len..body_len + SLOT_CRC_SIZE]);
            if u32::from_le_bytes(stored) != body_crc(&raw[..body_len]) {
                return Err(StorageError::SlotChecksumMismatch { slot: index });
            }
        }

        let tag = T::decode(&raw[..self.tag_width]).ok_or_else(|| {
            StorageError::corrupted(
                index,
                format!("unknown tag bytes {:?}", &raw[..self.tag_width]),
            )
        })?;
        Ok(Slot {
            tag,
            payload: raw[self.tag_width..body_len].to_vec(),
        })
    }
}

fn body_crc(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}
