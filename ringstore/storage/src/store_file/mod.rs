//! Store region module for ringstore.
//!
//! This module provides the on-disk building blocks shared by every
//! structure:
//! - Fixed header with magic number, version, dimensions and CRC
//! - Fixed-size slots with a structure-specific tag and optional CRC
//! - An owned file handle placing one region at a byte offset
//! - Offline inspection of a region
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │       (other regions sharing the file, if any)         │
//! ├────────────────────────────────────────────────────────┤  byte_offset
//! │                 STORE HEADER (64 bytes)                │
//! ├────────────────────────────────────────────────────────┤
//! │  [tag][key][value][crc?]                     Slot 0    │
//! │  [tag][key][value][crc?]                     Slot 1    │
//! │  ...                                                   │
//! │  [tag][key][value][crc?]                     Slot N-1  │
//! ├────────────────────────────────────────────────────────┤
//! │       (other regions sharing the file, if any)         │
//! └────────────────────────────────────────────────────────┘
//! ```

pub mod core;
pub mod header;
pub mod inspect;
pub mod slot;

pub use self::core::StoreFile;
pub use header::{CURRENT_VERSION, HEADER_SIZE, MAGIC, StoreFlags, StoreHeader, StoreKind};
pub use inspect::{StoreReport, inspect_store, read_store_header};
pub use slot::{
    RING_TAG_WIDTH, RingTag, RunFamily, SLOT_CRC_SIZE, Slot, SlotLayout, SlotTag, WEAR_TAG_WIDTH,
    WearTag,
};
