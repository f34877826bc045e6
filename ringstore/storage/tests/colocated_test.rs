mod common;

use common::{TestDir, poke, record};
use ringstore_storage::{
    RingConfig, RingJournal, RingTable, StorageError, StoreKind, TableConfig, WearConfig,
    WearLevelTable, inspect_store, read_store_header,
};

struct Layout {
    journal: RingConfig,
    table: TableConfig,
    wear: WearConfig,
}

fn layout() -> Layout {
    let journal = RingConfig::new(4, 5);
    let table = TableConfig::new(4, 4, 6).with_byte_offset(journal.region_len());
    let wear = WearConfig::new(4, 4, 2, 4, 8)
        .with_byte_offset(table.byte_offset + table.region_len());
    Layout {
        journal,
        table,
        wear,
    }
}

#[test]
fn test_three_stores_share_one_file() {
    let dir = TestDir::new();
    let path = dir.file("shared.bin");
    let layout = layout();

    {
        let mut journal = RingJournal::create(&path, &layout.journal).unwrap();
        let mut table = RingTable::create(&path, &layout.table).unwrap();
        let mut wear = WearLevelTable::create(&path, &layout.wear).unwrap();

        for value in 1..=7 {
            journal.append(&record(value)).unwrap();
            table.add_row(&[b't', b'0' + value as u8], &record(value * 10)).unwrap();
            wear.add_row(b"last", &record(value)).unwrap();
        }
    }

    let mut journal = RingJournal::open(&path, &layout.journal).unwrap();
    let mut table = RingTable::open(&path, &layout.table).unwrap();
    let wear = WearLevelTable::open(&path, &layout.wear).unwrap();

    assert_eq!(journal.read(0).unwrap(), Some(record(3)));
    assert_eq!(journal.read(4).unwrap(), Some(record(7)));
    assert_eq!(table.find_key_value(b"t1").unwrap(), None);
    assert_eq!(table.find_key_value(b"t7").unwrap(), Some(record(70)));
    assert_eq!(table.len(), 6);
    assert_eq!(wear.find_key_value(b"last").unwrap(), Some(record(7)));

    let end = layout.wear.byte_offset + layout.wear.region_len();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), end);
}

#[test]
fn test_grow_stops_at_next_store() {
    let dir = TestDir::new();
    let path = dir.file("grow_blocked.bin");
    let layout = layout();

    let mut journal = RingJournal::create(&path, &layout.journal).unwrap();
    for value in 1..=3 {
        journal.append(&record(value)).unwrap();
    }
    let mut table = RingTable::create(&path, &layout.table).unwrap();
    table.add_row(b"t1", &record(10)).unwrap();
    drop(table);

    let err = journal.resize(20).unwrap_err();
    assert!(matches!(err, StorageError::InvalidConfig(_)));
    assert_eq!(journal.capacity(), 5);
    assert_eq!(journal.read(2).unwrap(), Some(record(3)));
    drop(journal);

    let mut journal = RingJournal::open(&path, &layout.journal).unwrap();
    assert_eq!(journal.len(), 3);
    let mut table = RingTable::open(&path, &layout.table).unwrap();
    assert_eq!(table.find_key_value(b"t1").unwrap(), Some(record(10)));
}

#[test]
fn test_blank_file_reports_missing_store() {
    let file = temp_file::empty();
    let layout = layout();

    assert!(matches!(
        RingJournal::open(file.path(), &layout.journal),
        Err(StorageError::StoreMissing { .. })
    ));
    assert!(matches!(
        RingTable::open(file.path(), &layout.table),
        Err(StorageError::StoreMissing { .. })
    ));
    assert!(matches!(
        WearLevelTable::open(file.path(), &layout.wear),
        Err(StorageError::StoreMissing { .. })
    ));

    // Creating the table leaves the journal region zeroed and missing.
    let table_config = layout.table.clone().with_create_if_missing(true);
    let mut table = RingTable::open(file.path(), &table_config).unwrap();
    table.add_row(b"k", b"v").unwrap();
    assert!(matches!(
        RingJournal::open(file.path(), &layout.journal),
        Err(StorageError::StoreMissing { .. })
    ));

    let journal_config = layout.journal.clone().with_create_if_missing(true);
    let mut journal = RingJournal::open(file.path(), &journal_config).unwrap();
    journal.append(b"j").unwrap();
    drop(table);

    let mut table = RingTable::open(file.path(), &layout.table).unwrap();
    assert_eq!(table.find_key_value(b"k").unwrap(), Some(b"v\0\0\0".to_vec()));
}

#[test]
fn test_inspect_each_region() {
    let dir = TestDir::new();
    let path = dir.file("inspect.bin");
    let layout = layout();
    {
        let mut journal = RingJournal::create(&path, &layout.journal).unwrap();
        for value in 1..=7 {
            journal.append(&record(value)).unwrap();
        }
        journal.delete(1).unwrap();

        let mut table = RingTable::create(&path, &layout.table).unwrap();
        for key in [b"aa", b"bb", b"cc"] {
            table.add_row(key, b"1").unwrap();
        }

        let mut wear = WearLevelTable::create(&path, &layout.wear).unwrap();
        wear.add_row(b"a", b"1").unwrap();
        wear.add_row(b"b", b"2").unwrap();
        wear.del_row(b"a").unwrap();
    }

    let report = inspect_store(&path, 0).unwrap();
    assert_eq!(report.header.kind, StoreKind::Journal);
    assert_eq!((report.live, report.tombstones, report.vacant), (4, 1, 0));
    assert!(report.is_valid());

    let report = inspect_store(&path, layout.table.byte_offset).unwrap();
    assert_eq!(report.header.key_size, 4);
    assert_eq!((report.live, report.tombstones, report.vacant), (3, 0, 3));

    let report = inspect_store(&path, layout.wear.byte_offset).unwrap();
    assert_eq!(report.header.block_count, 2);
    assert_eq!((report.live, report.tombstones, report.vacant), (1, 1, 6));

    // Unknown tag byte in journal slot 3.
    poke(&path, 64 + 3 * 5, &[0x7f]);
    let report = inspect_store(&path, 0).unwrap();
    assert_eq!(report.corrupted_slots, vec![3]);
    assert!(!report.is_valid());

    let header = read_store_header(&path, layout.table.byte_offset).unwrap();
    assert_eq!(header.capacity, 6);
    assert!(matches!(
        read_store_header(&path, 8),
        Err(StorageError::InvalidMagic { offset: 8 })
    ));
}
