use std::cell::RefCell;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};

use crate::io::{SectorNumber, SectorStorage};
use crate::SECTOR_SIZE;

/// Emulates sector-granular disk storage in userspace using a plain file.
/// This is only meant to be used for file-system development and testing.
pub struct FileDiskEmulator {
    /// The file must be a fixed-size image, an exact multiple of the sector
    /// size.
    fd: RefCell<File>,
    /// The total number of sectors available on the emulated device.
    sector_count: usize,
}

impl FileDiskEmulator {
    /// Wraps an already-formatted image without touching its contents.
    pub fn from_file(fd: File, sector_count: usize) -> Self {
        FileDiskEmulator {
            fd: RefCell::new(fd),
            sector_count,
        }
    }

    /// Returns ownership of the underlying image to the caller.
    pub fn into_file(self) -> File {
        self.fd.into_inner()
    }
}

impl SectorStorage for FileDiskEmulator {
    fn read_sector(&self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if sector > (self.sector_count - 1) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }

        if buf.len() < SECTOR_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read sector",
            ));
        }

        let mut fd = self.fd.borrow_mut();
        fd.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        fd.read_exact(&mut buf[0..SECTOR_SIZE])?;
        Ok(())
    }

    /// This method truncates writes that exceed the sector size.
    fn write_sector(&self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()> {
        if sector > (self.sector_count - 1) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }

        let mut fd = self.fd.borrow_mut();
        fd.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;

        let max = if SECTOR_SIZE < buf.len() {
            SECTOR_SIZE
        } else {
            buf.len()
        };
        fd.write_all(&buf[0..max])?;
        Ok(())
    }

    fn sync(&self) -> std::io::Result<()> {
        self.fd.borrow_mut().sync_all()?;
        Ok(())
    }
}

pub struct FileDiskEmulatorBuilder {
    fd: File,
    sector_count: usize,
}

impl From<File> for FileDiskEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileDiskEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded
            // down to the nearest sector.
            sector_count: 0,
        }
    }
}

impl FileDiskEmulatorBuilder {
    /// Sets the number of desired sectors on the emulated device.
    pub fn with_sector_count(mut self, sectors: usize) -> Self {
        self.sector_count = sectors;
        self
    }

    /// This builder assumes ownership of the file used and does destructive
    /// things to prepare it as a zeroed image. Ownership of the file is
    /// transferred to the emulator, so this builder can only be used to
    /// create one emulator.
    pub fn build(mut self) -> std::io::Result<FileDiskEmulator> {
        debug_assert!(self.sector_count > 0);
        self.zero_image()?;
        Ok(FileDiskEmulator {
            fd: RefCell::new(self.fd),
            sector_count: self.sector_count,
        })
    }

    fn zero_image(&mut self) -> std::io::Result<()> {
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" image, buffering each write to prevent
        // excessive syscalls.
        for _ in 0..self.sector_count {
            bfd.write_all(vec![0x00; SECTOR_SIZE].as_slice())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let image = tempfile::tempfile().unwrap();
        let disk_emu = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(4)
            .build()
            .expect("failed to allocate disk image");
        disk_emu.sync().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            (4 * SECTOR_SIZE) as u64
        );
    }

    #[test]
    fn can_read_and_write_sectors() {
        let image = tempfile::tempfile().unwrap();
        let disk_emu = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(4)
            .build()
            .expect("failed to allocate disk image");
        disk_emu.sync().unwrap();

        // Fill a sector with a non-zero character.
        let block = vec![0x55; SECTOR_SIZE];
        disk_emu.write_sector(2, block.as_slice()).unwrap();
        disk_emu.sync().unwrap();

        let mut read_block = vec![0x00; SECTOR_SIZE];
        // Read a different sector.
        disk_emu.read_sector(3, read_block.as_mut_slice()).unwrap();
        assert_eq!(read_block, vec![0x00; SECTOR_SIZE]);

        // Read the sector with data.
        let mut filled_block = vec![0x00; SECTOR_SIZE];
        disk_emu
            .read_sector(2, filled_block.as_mut_slice())
            .unwrap();
        assert_eq!(filled_block, vec![0x55; SECTOR_SIZE]);
    }

    #[test]
    fn can_read_and_write_first_and_last_sectors() {
        let image = tempfile::tempfile().unwrap();
        let disk_emu = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(2)
            .build()
            .expect("failed to allocate disk image");
        disk_emu.sync().unwrap();

        let block = vec![0x55; SECTOR_SIZE];
        disk_emu.write_sector(0, block.as_slice()).unwrap();
        disk_emu.write_sector(1, block.as_slice()).unwrap();
        disk_emu.sync().unwrap();

        let mut read_block = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(0, read_block.as_mut_slice()).unwrap();
        assert_eq!(read_block, vec![0x55; SECTOR_SIZE]);

        let mut read_block = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(1, read_block.as_mut_slice()).unwrap();
        assert_eq!(read_block, vec![0x55; SECTOR_SIZE]);
    }

    #[test]
    fn sector_beyond_range_is_an_error() {
        let image = tempfile::tempfile().unwrap();
        let disk_emu = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(1)
            .build()
            .expect("failed to allocate disk image");
        disk_emu.sync().unwrap();

        let block = vec![0x55; SECTOR_SIZE];
        assert!(disk_emu.write_sector(1, block.as_slice()).is_err());

        let mut read_block = vec![0x00; SECTOR_SIZE];
        assert!(disk_emu.read_sector(1, read_block.as_mut_slice()).is_err());
    }

    #[test]
    fn writing_less_than_a_full_sector_succeeds() {
        let image = tempfile::tempfile().unwrap();
        let disk_emu = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(1)
            .build()
            .expect("failed to allocate disk image");
        disk_emu.sync().unwrap();

        // Fill half the sector with meaningful data.
        let block = vec![0x55; SECTOR_SIZE / 2];
        disk_emu
            .write_sector(0, block.as_slice())
            .expect("failed to write sector");
        disk_emu.sync().unwrap();
    }
}
