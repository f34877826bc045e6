//! On-disk ring storage structures.
//!
//! Three fixed-record structures that survive unclean restarts without a
//! write-ahead log:
//!
//! - [`RingJournal`]: circular log of fixed-size records
//! - [`RingTable`]: key/value table evicting its oldest row when full
//! - [`WearLevelTable`]: key/value table rotating across blocks to bound
//!   rewrites per slot
//!
//! Each structure owns one region of a file (a 64-byte header followed by
//! fixed-size slots) at a caller-chosen byte offset, so several stores can
//! share one file. See [`store_file`] for the layout.

mod codec;
pub mod config;
pub mod error;
pub mod ring;
pub mod store_file;
pub mod wear_table;


pub use config::{RingConfig, SyncMode, TableConfig, WearConfig};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use ring::{RingJournal, RingPosition, RingStats, RingTable};
pub use store_file::{StoreHeader, StoreKind, StoreReport, inspect_store, read_store_header};
pub use wear_table::{WearLevelTable, WearStats};
