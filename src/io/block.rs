use std::io;

/// The sector number to access, ranging from 0 (the first sector) to n - 1
/// (the last sector) where n is the number of sectors available.
pub type SectorNumber = usize;

/// Interface to the raw disk: a flat array of fixed-size sectors addressed
/// by index.
///
/// Methods take `&self` so a single device handle can serve the file-system
/// façade and every open file at once; drivers keep whatever interior
/// mutability their backing store needs. The file system runs one request at
/// a time, so no synchronization is required of implementors.
pub trait SectorStorage {
    /// Reads one sector into the provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a sector out of range, or into a buffer with less
    /// than a sector's worth of space, returns an error.
    fn read_sector(&self, sector: SectorNumber, buf: &mut [u8]) -> io::Result<()>;

    /// Writes the buffer into the specified sector. Bytes beyond one
    /// sector's worth are ignored.
    ///
    /// # Errors
    ///
    /// Attempting to write a sector out of range returns an error.
    fn write_sector(&self, sector: SectorNumber, buf: &[u8]) -> io::Result<()>;

    /// Flushes any buffered IO to the backing store. This is useful if it
    /// must be guaranteed the sector writes actually occurred, for instance
    /// before re-reading the raw image.
    fn sync(&self) -> io::Result<()>;
}
