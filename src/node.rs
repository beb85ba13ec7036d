use std::io;

use core::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::SectorMap;
use crate::io::SectorStorage;
use crate::{LEAF_SPAN, NUM_DIRECT, SECTOR_SIZE};

/// Indirect header: each `data_sectors` entry locates a leaf header.
const LEVEL_INDIRECT: u32 = 0;
/// Leaf header: each `data_sectors` entry locates a data sector.
const LEVEL_LEAF: u32 = 1;

/// Per-file metadata, exactly one sector on disk.
///
/// A leaf header addresses up to `LEAF_SPAN` bytes of data directly; an
/// indirect header addresses up to `NUM_DIRECT` leaf headers, which lifts
/// the cap to `MAX_FILE_SIZE`. Small system files (the free map, every
/// directory table) live under a single leaf header at a known sector.
/// Headers are written at creation and never grown afterwards.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct FileHeader {
    pub(crate) num_bytes: u32,
    pub(crate) num_sectors: u32,
    pub(crate) level: u32,
    pub(crate) data_sectors: [u32; NUM_DIRECT],
}

const _: () = assert!(size_of::<FileHeader>() == SECTOR_SIZE);

impl FileHeader {
    pub fn new_leaf() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            level: LEVEL_LEAF,
            data_sectors: [0; NUM_DIRECT],
        }
    }

    pub fn new_indirect() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            level: LEVEL_INDIRECT,
            data_sectors: [0; NUM_DIRECT],
        }
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes as usize
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEVEL_LEAF
    }

    /// The used prefix of the sector array.
    pub fn sectors(&self) -> &[u32] {
        &self.data_sectors[..self.num_sectors as usize]
    }

    /// Reserves `ceil(size / SECTOR_SIZE)` data sectors out of the free map
    /// for a leaf header. Fails when the map has fewer clear bits than that,
    /// in which case the caller discards its in-memory map unchanged.
    pub fn allocate(&mut self, free_map: &mut SectorMap, size: usize) -> bool {
        debug_assert_eq!(self.level, LEVEL_LEAF);
        let n = size.div_ceil(SECTOR_SIZE);
        if n > NUM_DIRECT || free_map.num_clear() < n {
            return false;
        }

        for slot in self.data_sectors.iter_mut().take(n) {
            match free_map.find_and_set() {
                Some(sector) => *slot = sector,
                None => return false,
            }
        }
        self.num_bytes = size as u32;
        self.num_sectors = n as u32;
        true
    }

    /// Releases this header's data sectors back to the free map. The
    /// header's own sector is the caller's to clear, so an indirect/leaf
    /// pair unwinds without double counting.
    pub fn deallocate(&self, free_map: &mut SectorMap) {
        for &sector in self.sectors() {
            free_map.clear(sector);
        }
    }

    pub fn fetch_from(disk: &dyn SectorStorage, sector: u32) -> io::Result<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector as usize, &mut buf)?;
        // Infallible: the buffer is exactly one header, checked above.
        Ok(FileHeader::read_from(buf.as_slice()).expect("sector buffer matches header size"))
    }

    pub fn write_back(&self, disk: &dyn SectorStorage, sector: u32) -> io::Result<()> {
        disk.write_sector(sector as usize, self.as_bytes())
    }

    /// Maps a logical byte offset to the data sector holding it, chasing one
    /// level of indirection when this header is not a leaf.
    pub fn byte_to_sector(&self, disk: &dyn SectorStorage, offset: usize) -> io::Result<u32> {
        debug_assert!(offset < self.num_bytes as usize);
        if self.is_leaf() {
            Ok(self.data_sectors[offset / SECTOR_SIZE])
        } else {
            let child = FileHeader::fetch_from(disk, self.data_sectors[offset / LEAF_SPAN])?;
            child.byte_to_sector(disk, offset % LEAF_SPAN)
        }
    }
}
