//! Helpers shared by the integration tests.
//!
//! Each test binary compiles this module on its own and uses only part of it.
#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use temp_dir::TempDir;

pub struct TestDir {
    // Hold the directory so it is removed when the test ends
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.child(name)
    }
}

pub fn record(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Overwrites bytes at an absolute file offset, as a crash or bit rot would.
pub fn poke(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}
