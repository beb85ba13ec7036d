use std::io;
use std::rc::Rc;

use crate::io::SectorStorage;
use crate::node::FileHeader;
use crate::SECTOR_SIZE;

/// Byte-oriented view of one on-disk file, located by its header sector.
///
/// The header is decoded once at open and carried for the handle's
/// lifetime; files never grow, so the copy stays accurate. Each handle
/// carries its own read/write position.
pub struct OpenFile {
    disk: Rc<dyn SectorStorage>,
    header: FileHeader,
    sector: u32,
    pos: usize,
}

impl OpenFile {
    pub fn open(disk: Rc<dyn SectorStorage>, sector: u32) -> io::Result<Self> {
        let header = FileHeader::fetch_from(disk.as_ref(), sector)?;
        Ok(Self {
            disk,
            header,
            sector,
            pos: 0,
        })
    }

    /// Logical file size in bytes.
    pub fn length(&self) -> usize {
        self.header.num_bytes()
    }

    pub fn header_sector(&self) -> u32 {
        self.sector
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Reads at the current position, advancing it by the count returned.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    /// Writes at the current position, advancing it by the count returned.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes starting at `pos`, clamped to the end
    /// of the file. Returns the count actually read.
    pub fn read_at(&self, buf: &mut [u8], pos: usize) -> io::Result<usize> {
        if pos >= self.length() {
            return Ok(0);
        }
        let n = buf.len().min(self.length() - pos);

        let mut staged = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < n {
            let offset = pos + done;
            let sector = self.header.byte_to_sector(self.disk.as_ref(), offset)?;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (n - done).min(SECTOR_SIZE - in_sector);

            self.disk.read_sector(sector as usize, &mut staged)?;
            buf[done..done + chunk].copy_from_slice(&staged[in_sector..in_sector + chunk]);
            done += chunk;
        }
        Ok(n)
    }

    /// Writes up to `buf.len()` bytes starting at `pos`, truncated to the
    /// file's fixed size. Partial sectors are staged through a read first so
    /// untouched bytes survive. Returns the count actually written.
    pub fn write_at(&mut self, buf: &[u8], pos: usize) -> io::Result<usize> {
        if pos >= self.length() {
            return Ok(0);
        }
        let n = buf.len().min(self.length() - pos);

        let mut staged = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < n {
            let offset = pos + done;
            let sector = self.header.byte_to_sector(self.disk.as_ref(), offset)?;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (n - done).min(SECTOR_SIZE - in_sector);

            if chunk < SECTOR_SIZE {
                self.disk.read_sector(sector as usize, &mut staged)?;
            }
            staged[in_sector..in_sector + chunk].copy_from_slice(&buf[done..done + chunk]);
            self.disk.write_sector(sector as usize, &staged)?;
            done += chunk;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SectorMap;
    use crate::io::FileDiskEmulatorBuilder;
    use crate::NUM_SECTORS;

    // A leaf-headed file of `size` bytes with its header at sector 2.
    fn file_of_size(size: usize) -> OpenFile {
        let image = tempfile::tempfile().unwrap();
        let disk: Rc<dyn SectorStorage> = Rc::new(
            FileDiskEmulatorBuilder::from(image)
                .with_sector_count(NUM_SECTORS)
                .build()
                .unwrap(),
        );

        let mut map = SectorMap::new();
        map.mark(0);
        map.mark(1);
        map.mark(2);
        let mut hdr = FileHeader::new_leaf();
        assert!(hdr.allocate(&mut map, size));
        hdr.write_back(disk.as_ref(), 2).unwrap();

        OpenFile::open(disk, 2).unwrap()
    }

    #[test]
    fn sequential_write_then_read_round_trips() {
        let mut file = file_of_size(SECTOR_SIZE * 2 + 40);

        let data: Vec<u8> = (0..file.length()).map(|i| (i % 251) as u8).collect();
        assert_eq!(file.write(&data).unwrap(), data.len());

        file.seek(0);
        let mut out = vec![0u8; data.len()];
        assert_eq!(file.read(&mut out).unwrap(), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn partial_sector_write_preserves_neighbors() {
        let mut file = file_of_size(SECTOR_SIZE);

        let base = vec![0xAA; SECTOR_SIZE];
        file.write_at(&base, 0).unwrap();
        file.write_at(&[0x11, 0x22, 0x33], 10).unwrap();

        let mut out = vec![0u8; SECTOR_SIZE];
        file.read_at(&mut out, 0).unwrap();
        assert_eq!(&out[..10], &base[..10]);
        assert_eq!(&out[10..13], &[0x11, 0x22, 0x33]);
        assert_eq!(&out[13..], &base[13..]);
    }

    #[test]
    fn writes_past_the_end_are_truncated() {
        let mut file = file_of_size(100);

        file.seek(90);
        assert_eq!(file.write(&[0x7F; 20]).unwrap(), 10);
        assert_eq!(file.position(), 100);
        assert_eq!(file.write(&[0x7F; 20]).unwrap(), 0);
    }

    #[test]
    fn reads_clamp_to_file_length() {
        let mut file = file_of_size(100);
        file.write_at(&[0x42; 100], 0).unwrap();

        let mut out = [0u8; 64];
        assert_eq!(file.read_at(&mut out, 80).unwrap(), 20);
        assert_eq!(file.read_at(&mut out, 100).unwrap(), 0);
        assert_eq!(file.read_at(&mut out, 200).unwrap(), 0);
    }

    #[test]
    fn zero_length_file_reads_and_writes_nothing() {
        let mut file = file_of_size(0);

        assert_eq!(file.length(), 0);
        assert_eq!(file.write(&[1, 2, 3]).unwrap(), 0);
        let mut out = [0u8; 4];
        assert_eq!(file.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn reads_spanning_sectors_stitch_correctly() {
        let mut file = file_of_size(SECTOR_SIZE * 3);

        let data: Vec<u8> = (0..file.length()).map(|i| (i / SECTOR_SIZE) as u8).collect();
        file.write_at(&data, 0).unwrap();

        let mut out = [0u8; 64];
        let straddle = SECTOR_SIZE - 32;
        assert_eq!(file.read_at(&mut out, straddle).unwrap(), 64);
        assert_eq!(&out[..32], &vec![0u8; 32][..]);
        assert_eq!(&out[32..], &vec![1u8; 32][..]);
    }
}
