use std::io;

use core::mem::size_of;
use core::str;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::file::OpenFile;
use crate::{NAME_LEN, NUM_DIR_ENTRIES};

/// On-disk size of a directory's table image.
pub const DIRECTORY_FILE_SIZE: usize = NUM_DIR_ENTRIES * size_of::<DirEntry>();

/// One slot of a directory table. Cleared slots keep their old bytes; only
/// `in_use` decides liveness.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct DirEntry {
    in_use: u8,
    is_dir: u8,
    name: [u8; NAME_LEN],
    sector: u32,
}

impl DirEntry {
    /// The stored name, up to the first NUL.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }
}

/// Fixed-capacity table of named entries, stored as a file holding the raw
/// byte image of the entry array. Removal clears a slot in place (no
/// compaction); `add` reuses the first free slot.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct Directory {
    table: [DirEntry; NUM_DIR_ENTRIES],
}

impl Directory {
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    /// Header sector of the named entry, if present.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.find_entry(name).map(|entry| entry.sector)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.in_use != 0 && entry.name() == name)
    }

    pub fn find_entry(&self, name: &str) -> Option<&DirEntry> {
        self.table
            .iter()
            .find(|entry| entry.in_use != 0 && entry.name() == name)
    }

    /// Fills the first free slot. Fails on a duplicate name, a name wider
    /// than the entry field, or a full table.
    pub fn add(&mut self, name: &str, sector: u32, is_dir: bool) -> bool {
        if name.is_empty() || name.len() > NAME_LEN || self.find(name).is_some() {
            return false;
        }
        let Some(slot) = self.table.iter_mut().find(|entry| entry.in_use == 0) else {
            return false;
        };

        slot.in_use = 1;
        slot.is_dir = is_dir as u8;
        slot.name = [0; NAME_LEN];
        slot.name[..name.len()].copy_from_slice(name.as_bytes());
        slot.sector = sector;
        true
    }

    /// Clears the named slot. Returns whether the name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.find_index(name) {
            Some(index) => {
                self.table[index].in_use = 0;
                true
            }
            None => false,
        }
    }

    /// Live entries in table order.
    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.table.iter().filter(|entry| entry.in_use != 0)
    }

    /// Names of the live entries, in table order.
    pub fn names(&self) -> Vec<String> {
        self.entries().map(|entry| entry.name().to_string()).collect()
    }

    pub fn in_use_count(&self) -> usize {
        self.entries().count()
    }

    pub fn fetch_from(file: &OpenFile) -> io::Result<Self> {
        let mut buf = [0u8; DIRECTORY_FILE_SIZE];
        file.read_at(&mut buf, 0)?;
        // Infallible: the buffer is exactly one table image.
        Ok(Directory::read_from(buf.as_slice()).expect("buffer matches table image size"))
    }

    pub fn write_back(&self, file: &mut OpenFile) -> io::Result<()> {
        file.write_at(self.as_bytes(), 0)?;
        Ok(())
    }
}
