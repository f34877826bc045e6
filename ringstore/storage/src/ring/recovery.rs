//! Head/tail recovery from slot tags.
//!
//! Rings keep no index of their position. Instead every slot tag carries
//! enough information to find the boundary between the newest and oldest
//! elements by binary search:
//!
//! ```text
//!  never wrapped:  [ H ][ A ][ A ][ A ][ . ][ . ]     occupied | empty
//!  wrapped:        [ B ][ B ][ H ][ A ][ A ][ A ]     family B | head | family A
//!                              ^ head, tail = head - 1
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store_file::{RingTag, RunFamily, StoreFile};

/// Reads the tag of one physical slot.
pub trait TagProbe {
    fn probe(&mut self, index: u64) -> StorageResult<RingTag>;
}

impl TagProbe for StoreFile {
    fn probe(&mut self, index: u64) -> StorageResult<RingTag> {
        Ok(self.read_slot::<RingTag>(index)?.tag)
    }
}

/// Physical position of the logical ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingPosition {
    #[default]
    Empty,
    /// `head` holds the oldest element, `tail` the newest.
    Span { head: u64, tail: u64 },
}

impl RingPosition {
    /// Number of elements (live or tombstoned) in a ring of `capacity` slots.
    pub fn len(&self, capacity: u64) -> u64 {
        match *self {
            RingPosition::Empty => 0,
            RingPosition::Span { head, tail } => (tail + capacity - head) % capacity + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RingPosition::Empty)
    }

    pub fn head(&self) -> Option<u64> {
        match *self {
            RingPosition::Empty => None,
            RingPosition::Span { head, .. } => Some(head),
        }
    }

    pub fn tail(&self) -> Option<u64> {
        match *self {
            RingPosition::Empty => None,
            RingPosition::Span { tail, .. } => Some(tail),
        }
    }

    /// Maps a logical index (0 = oldest) to a physical slot.
    pub fn physical(&self, logical: u64, capacity: u64) -> Option<u64> {
        match *self {
            RingPosition::Span { head, .. } if logical < self.len(capacity) => {
                Some((head + logical) % capacity)
            }
            _ => None,
        }
    }
}

/// Reconstructs the ring position of `capacity` slots from their tags.
///
/// Reads O(log capacity) slots. Fails with [`StorageError::RingCorrupted`]
/// when the tags do not form one of the two patterns above.
pub fn recover_position<P: TagProbe + ?Sized>(
    probe: &mut P,
    capacity: u64,
) -> StorageResult<RingPosition> {
    let newer = match probe.probe(0)? {
        RingTag::Empty => return Ok(RingPosition::Empty),
        RingTag::Head | RingTag::HeadDeleted => {
            return recover_unwrapped(probe, capacity);
        }
        RingTag::RunALive | RingTag::RunADeleted => RunFamily::A,
        RingTag::RunBLive | RingTag::RunBDeleted => RunFamily::B,
    };

    // Invariant: slot `lo` carries the newer family, slot `hi` does not (or is past the end).
    let (mut lo, mut hi) = (0u64, capacity);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        let tag = probe.probe(mid)?;
        if tag.is_head() {
            return Ok(wrapped_at(mid));
        }
        match tag.family() {
            Some(family) if family == newer => lo = mid,
            Some(_) => hi = mid,
            None => {
                return Err(StorageError::corrupted(
                    mid,
                    "empty slot inside a wrapped ring",
                ));
            }
        }
    }

    if hi == capacity {
        return Err(StorageError::corrupted(
            lo,
            "no head tag after the newest run",
        ));
    }
    if !probe.probe(hi)?.is_head() {
        return Err(StorageError::corrupted(
            hi,
            "run boundary does not carry a head tag",
        ));
    }
    Ok(wrapped_at(hi))
}

fn wrapped_at(head: u64) -> RingPosition {
    debug_assert!(head > 0);
    RingPosition::Span {
        head,
        tail: head - 1,
    }
}

/// Head at slot 0: the tail is the last slot before the first empty one.
fn recover_unwrapped<P: TagProbe + ?Sized>(
    probe: &mut P,
    capacity: u64,
) -> StorageResult<RingPosition> {
    // Invariant: slot `lo` is occupied, slot `hi` is empty (or past the end).
    let (mut lo, mut hi) = (0u64, capacity);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        let tag = probe.probe(mid)?;
        if tag.is_head() {
            return Err(StorageError::corrupted(
                mid,
                "second head tag in a ring headed at slot 0",
            ));
        }
        if tag.is_occupied() {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(RingPosition::Span { head: 0, tail: lo })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory tags that count how often they are probed.
    struct VecProbe {
        tags: Vec<RingTag>,
        reads: u64,
    }

    impl VecProbe {
        fn new(tags: Vec<RingTag>) -> Self {
            Self { tags, reads: 0 }
        }
    }

    impl TagProbe for VecProbe {
        fn probe(&mut self, index: u64) -> StorageResult<RingTag> {
            self.reads += 1;
            Ok(self.tags[index as usize])
        }
    }

    use crate::store_file::RingTag::{Empty as E, Head as H, HeadDeleted as Hd, RunADeleted as Ad};
    use crate::store_file::RingTag::{RunALive as A, RunBDeleted as Bd, RunBLive as B};

    fn recover(tags: Vec<RingTag>) -> StorageResult<RingPosition> {
        let capacity = tags.len() as u64;
        recover_position(&mut VecProbe::new(tags), capacity)
    }

    #[test]
    fn test_empty_ring() {
        let mut probe = VecProbe::new(vec![E; 16]);
        assert_eq!(recover_position(&mut probe, 16).unwrap(), RingPosition::Empty);
        assert_eq!(probe.reads, 1);
    }

    #[test]
    fn test_unwrapped_rings() {
        assert_eq!(
            recover(vec![H, E, E, E, E]).unwrap(),
            RingPosition::Span { head: 0, tail: 0 }
        );
        assert_eq!(
            recover(vec![H, A, Ad, E, E]).unwrap(),
            RingPosition::Span { head: 0, tail: 2 }
        );
        assert_eq!(
            recover(vec![Hd, B, B, B, B]).unwrap(),
            RingPosition::Span { head: 0, tail: 4 }
        );
    }

    #[test]
    fn test_wrapped_rings() {
        assert_eq!(
            recover(vec![B, H, A, A, A]).unwrap(),
            RingPosition::Span { head: 1, tail: 0 }
        );
        assert_eq!(
            recover(vec![B, Bd, B, Hd, A]).unwrap(),
            RingPosition::Span { head: 3, tail: 2 }
        );
        assert_eq!(
            recover(vec![A, A, A, A, H]).unwrap(),
            RingPosition::Span { head: 4, tail: 3 }
        );
        assert_eq!(
            recover(vec![A, H]).unwrap(),
            RingPosition::Span { head: 1, tail: 0 }
        );
    }

    #[test]
    fn test_every_head_position() {
        for capacity in 2..=17usize {
            for head in 1..capacity {
                let mut tags = vec![B; capacity];
                tags[head] = H;
                for tag in tags.iter_mut().skip(head + 1) {
                    *tag = A;
                }
                assert_eq!(
                    recover(tags).unwrap(),
                    RingPosition::Span {
                        head: head as u64,
                        tail: head as u64 - 1
                    },
                    "capacity {capacity}, head {head}"
                );
            }
            for tail in 0..capacity {
                let mut tags = vec![E; capacity];
                tags[0] = H;
                for tag in tags.iter_mut().take(tail + 1).skip(1) {
                    *tag = A;
                }
                assert_eq!(
                    recover(tags).unwrap(),
                    RingPosition::Span {
                        head: 0,
                        tail: tail as u64
                    }
                );
            }
        }
    }

    #[test]
    fn test_corrupted_patterns() {
        // Empty slot between two runs
        assert!(matches!(
            recover(vec![B, B, E, A, A]),
            Err(StorageError::RingCorrupted { .. })
        ));
        // No head tag at the boundary
        assert!(matches!(
            recover(vec![B, B, A, A, A]),
            Err(StorageError::RingCorrupted { .. })
        ));
        // One family everywhere
        assert!(matches!(
            recover(vec![A, A, A, A]),
            Err(StorageError::RingCorrupted { .. })
        ));
        // Two heads
        assert!(matches!(
            recover(vec![H, A, H, A, E]),
            Err(StorageError::RingCorrupted { slot: 2, .. })
        ));
    }

    #[test]
    fn test_logarithmic_reads() {
        for k in 4..=16u32 {
            let capacity = 1usize << k;
            let head = capacity / 3 + 1;
            let mut tags = vec![A; capacity];
            tags[head] = H;
            for tag in tags.iter_mut().skip(head + 1) {
                *tag = B;
            }
            let mut probe = VecProbe::new(tags);
            let position = recover_position(&mut probe, capacity as u64).unwrap();
            assert_eq!(position.head(), Some(head as u64));
            assert!(
                probe.reads <= u64::from(k) + 2,
                "{} reads for capacity 2^{k}",
                probe.reads
            );
        }
    }

    #[test]
    fn test_position_len_and_physical() {
        let position = RingPosition::Span { head: 3, tail: 1 };
        assert_eq!(position.len(5), 4);
        assert_eq!(position.physical(0, 5), Some(3));
        assert_eq!(position.physical(3, 5), Some(1));
        assert_eq!(position.physical(4, 5), None);
        assert_eq!(RingPosition::Empty.len(5), 0);
        assert_eq!(RingPosition::Empty.physical(0, 5), None);
    }
}
