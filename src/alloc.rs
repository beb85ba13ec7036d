use std::io;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::file::OpenFile;
use crate::{FREE_MAP_FILE_SIZE, NUM_SECTORS};

/// Allocation state of every sector on the device, one bit per sector,
/// LSB-first within each byte. Bit `i` set means sector `i` is in use.
///
/// The map is persisted as the contents of the file whose header sits at
/// `FREE_MAP_SECTOR`, so bits 0 and 1 are set on any formatted disk.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, PartialEq, Eq, Debug)]
pub struct SectorMap {
    bits: [u8; FREE_MAP_FILE_SIZE],
}

impl SectorMap {
    pub fn new() -> Self {
        Self {
            bits: [0; FREE_MAP_FILE_SIZE],
        }
    }

    pub fn mark(&mut self, sector: u32) {
        assert!((sector as usize) < NUM_SECTORS);
        self.bits[sector as usize / 8] |= 1u8 << (sector % 8);
    }

    pub fn clear(&mut self, sector: u32) {
        assert!((sector as usize) < NUM_SECTORS);
        self.bits[sector as usize / 8] &= !(1u8 << (sector % 8));
    }

    pub fn test(&self, sector: u32) -> bool {
        assert!((sector as usize) < NUM_SECTORS);
        self.bits[sector as usize / 8] & (1u8 << (sector % 8)) != 0
    }

    /// Finds the lowest clear bit, sets it, and returns its index. The scan
    /// order is part of the contract: callers rely on allocation order being
    /// reproducible.
    pub fn find_and_set(&mut self) -> Option<u32> {
        let sector = (0..NUM_SECTORS as u32).find(|&s| !self.test(s))?;
        self.mark(sector);
        Some(sector)
    }

    pub fn num_clear(&self) -> usize {
        (0..NUM_SECTORS as u32).filter(|&s| !self.test(s)).count()
    }

    /// Reads the map back out of its backing file.
    pub fn fetch_from(file: &OpenFile) -> io::Result<Self> {
        let mut bits = [0u8; FREE_MAP_FILE_SIZE];
        file.read_at(&mut bits, 0)?;
        Ok(Self { bits })
    }

    /// Flushes the map into its backing file.
    pub fn write_back(&self, file: &mut OpenFile) -> io::Result<()> {
        file.write_at(self.as_bytes(), 0)?;
        Ok(())
    }
}
