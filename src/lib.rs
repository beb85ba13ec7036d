mod alloc;
mod dir;
mod file;
mod fs;
mod io;
mod node;
mod path;

pub use alloc::SectorMap;
pub use dir::{DirEntry, Directory, DIRECTORY_FILE_SIZE};
pub use file::OpenFile;
pub use fs::{FsError, FsResult, SectorFs};
pub use io::{FileDiskEmulator, FileDiskEmulatorBuilder, SectorNumber, SectorStorage};
pub use node::FileHeader;

use core::mem::size_of;

/// Unit of disk IO, in bytes.
pub const SECTOR_SIZE: usize = 128;
/// Total sectors on the device.
pub const NUM_SECTORS: usize = 128;

/// Sector holding the free-map file's header.
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector holding the root directory's header.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Sector numbers that fit in a header after its three fixed fields.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 3 * size_of::<u32>()) / size_of::<u32>();
/// Bytes addressable by one leaf header.
pub const LEAF_SPAN: usize = NUM_DIRECT * SECTOR_SIZE;
/// Cap on file size under two-level indirection.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * LEAF_SPAN;

/// Bytes in the persisted free map, one bit per sector.
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS.div_ceil(8);

/// Fixed capacity of every directory table.
pub const NUM_DIR_ENTRIES: usize = 64;
/// Bytes in a directory entry's name field.
pub const NAME_LEN: usize = 18;
