use std::io;
use std::rc::Rc;

use log::{debug, warn};
use thiserror::Error;

use crate::alloc::SectorMap;
use crate::dir::{Directory, DIRECTORY_FILE_SIZE};
use crate::file::OpenFile;
use crate::io::SectorStorage;
use crate::node::FileHeader;
use crate::path;
use crate::{
    FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR, LEAF_SPAN, MAX_FILE_SIZE, NAME_LEN, NUM_SECTORS,
    ROOT_DIR_SECTOR,
};

/// Descriptor slots; id 0 is never issued.
const NUM_DESCRIPTORS: usize = 20;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no directory entry for a path component")]
    NotFound,
    #[error("name already present in the directory")]
    Duplicate,
    #[error("directory table has no free slot")]
    DirectoryFull,
    #[error("not enough free sectors")]
    NoSpace,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("descriptor is not open")]
    BadDescriptor,
    #[error("descriptor table is full")]
    DescriptorTableFull,
    #[error("name is empty or exceeds {NAME_LEN} bytes")]
    NameTooLong,
    #[error("size exceeds the two-level indirection cap")]
    TooLarge,
    #[error("sector device error")]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

/// The file-system façade over one sector device.
///
/// The free-map file and the root-directory file stay open for the lifetime
/// of the file system. The free map itself is re-fetched from disk at the
/// start of every structural mutation and written back at the end; nothing
/// is cached across calls, so an operation that fails midway leaves no stale
/// in-memory state behind. At worst some already-written header sectors
/// strand on disk.
pub struct SectorFs {
    disk: Rc<dyn SectorStorage>,
    free_map_file: OpenFile,
    root_dir_file: OpenFile,
    descriptors: [Option<OpenFile>; NUM_DESCRIPTORS],
}

impl SectorFs {
    /// Initializes an empty file system onto the device: reserves the two
    /// well-known sectors, lays a leaf header over each system file, then
    /// writes the empty root table and the bitmap through freshly opened
    /// files.
    pub fn format(disk: Rc<dyn SectorStorage>) -> FsResult<Self> {
        debug!("formatting the file system");
        let mut free_map = SectorMap::new();
        let mut map_hdr = FileHeader::new_leaf();
        let mut dir_hdr = FileHeader::new_leaf();

        // Grab the header sectors first so allocation cannot hand them out.
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(ROOT_DIR_SECTOR);

        if !map_hdr.allocate(&mut free_map, FREE_MAP_FILE_SIZE)
            || !dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE)
        {
            return Err(FsError::NoSpace);
        }

        // Headers reach the disk before the files are opened, since opening
        // reads the header back off the (so far garbage) sector.
        map_hdr.write_back(disk.as_ref(), FREE_MAP_SECTOR)?;
        dir_hdr.write_back(disk.as_ref(), ROOT_DIR_SECTOR)?;

        let mut free_map_file = OpenFile::open(disk.clone(), FREE_MAP_SECTOR)?;
        let mut root_dir_file = OpenFile::open(disk.clone(), ROOT_DIR_SECTOR)?;

        Directory::new().write_back(&mut root_dir_file)?;
        free_map.write_back(&mut free_map_file)?;

        Ok(Self {
            disk,
            free_map_file,
            root_dir_file,
            descriptors: std::array::from_fn(|_| None),
        })
    }

    /// Opens an already-formatted device, picking the bitmap and the root
    /// directory up from their well-known sectors.
    pub fn mount(disk: Rc<dyn SectorStorage>) -> FsResult<Self> {
        debug!("mounting the file system");
        let free_map_file = OpenFile::open(disk.clone(), FREE_MAP_SECTOR)?;
        let root_dir_file = OpenFile::open(disk.clone(), ROOT_DIR_SECTOR)?;

        let fs = Self {
            disk,
            free_map_file,
            root_dir_file,
            descriptors: std::array::from_fn(|_| None),
        };
        let free_map = SectorMap::fetch_from(&fs.free_map_file)?;
        if !free_map.test(FREE_MAP_SECTOR) || !free_map.test(ROOT_DIR_SECTOR) {
            warn!("mounted image does not reserve its well-known sectors");
        }
        Ok(fs)
    }

    /// Walks an absolute path to a directory and returns a handle on its
    /// header sector. The empty path and `/` resolve to the root. Every
    /// intermediate segment must name an entry in the directory above it;
    /// callers pass paths they know to be directory-valued.
    pub fn open_dir(&self, dir_path: &str) -> FsResult<OpenFile> {
        let mut sector = ROOT_DIR_SECTOR;
        for segment in path::segments(dir_path) {
            let dir = Directory::fetch_from(&OpenFile::open(self.disk.clone(), sector)?)?;
            sector = dir.find(segment).ok_or(FsError::NotFound)?;
        }
        Ok(OpenFile::open(self.disk.clone(), sector)?)
    }

    /// Creates a fixed-size file at an absolute path. The file gets an
    /// indirect root header plus one leaf header per `LEAF_SPAN` of size;
    /// nothing reaches the disk until every reservation has succeeded, so a
    /// failed create leaves the persistent map and the directory untouched.
    pub fn create(&mut self, full_path: &str, initial_size: usize) -> FsResult<()> {
        debug!("creating file {full_path} with size {initial_size}");
        if initial_size > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        let (parent, name) = path::split(full_path);
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let mut dir_file = self.open_dir(parent)?;
        let mut dir = Directory::fetch_from(&dir_file)?;
        if dir.find(name).is_some() {
            return Err(FsError::Duplicate);
        }

        let mut free_map = SectorMap::fetch_from(&self.free_map_file)?;

        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        let num_leaves = initial_size.div_ceil(LEAF_SPAN);
        let mut leaf_sectors = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaf_sectors.push(free_map.find_and_set().ok_or(FsError::NoSpace)?);
        }

        if !dir.add(name, sector, false) {
            return Err(FsError::DirectoryFull);
        }

        let mut root_hdr = FileHeader::new_indirect();
        root_hdr.num_bytes = initial_size as u32;
        root_hdr.num_sectors = num_leaves as u32;
        root_hdr.data_sectors[..num_leaves].copy_from_slice(&leaf_sectors);

        let mut leaves = Vec::with_capacity(num_leaves);
        let mut remaining = initial_size;
        for _ in 0..num_leaves {
            let span = remaining.min(LEAF_SPAN);
            let mut leaf = FileHeader::new_leaf();
            if !leaf.allocate(&mut free_map, span) {
                return Err(FsError::NoSpace);
            }
            remaining -= span;
            leaves.push(leaf);
        }

        // All reservations held; publish. Headers land first so the
        // directory never names a sector with a stale image, and the map
        // lands last, recording what is now in use.
        root_hdr.write_back(self.disk.as_ref(), sector)?;
        for (leaf, &leaf_sector) in leaves.iter().zip(&leaf_sectors) {
            leaf.write_back(self.disk.as_ref(), leaf_sector)?;
        }
        dir.write_back(&mut dir_file)?;
        free_map.write_back(&mut self.free_map_file)?;
        Ok(())
    }

    /// Creates an empty directory named `name` under the directory at
    /// `parent`. The new table is written out immediately so a resolver
    /// landing on it sees a valid empty directory.
    pub fn create_directory(&mut self, name: &str, parent: &str) -> FsResult<()> {
        debug!("creating directory {name} under {parent}");
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let mut dir_file = self.open_dir(parent)?;
        let mut dir = Directory::fetch_from(&dir_file)?;
        if dir.find(name).is_some() {
            return Err(FsError::Duplicate);
        }

        let mut free_map = SectorMap::fetch_from(&self.free_map_file)?;
        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;

        if !dir.add(name, sector, true) {
            return Err(FsError::DirectoryFull);
        }

        let mut hdr = FileHeader::new_leaf();
        if !hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE) {
            return Err(FsError::NoSpace);
        }

        hdr.write_back(self.disk.as_ref(), sector)?;
        dir.write_back(&mut dir_file)?;
        free_map.write_back(&mut self.free_map_file)?;

        let mut new_dir_file = OpenFile::open(self.disk.clone(), sector)?;
        Directory::new().write_back(&mut new_dir_file)?;
        Ok(())
    }

    /// Opens the file at an absolute path.
    pub fn open(&self, full_path: &str) -> FsResult<OpenFile> {
        debug!("opening {full_path}");
        let (parent, name) = path::split(full_path);
        let dir = Directory::fetch_from(&self.open_dir(parent)?)?;
        let sector = dir.find(name).ok_or(FsError::NotFound)?;
        Ok(OpenFile::open(self.disk.clone(), sector)?)
    }

    /// Removes the file or directory at an absolute path. A non-empty
    /// directory is refused unless `recursive` is set, in which case the
    /// whole sub-tree goes first, depth-first, inheriting `recursive`.
    pub fn remove(&mut self, full_path: &str, recursive: bool) -> FsResult<()> {
        debug!("removing {full_path} (recursive: {recursive})");
        let (parent, name) = path::split(full_path);
        let mut dir_file = self.open_dir(parent)?;
        let mut dir = Directory::fetch_from(&dir_file)?;

        let entry = dir.find_entry(name).ok_or_else(|| {
            warn!("{name} not found under {parent}");
            FsError::NotFound
        })?;
        let sector = entry.sector();
        let is_dir = entry.is_dir();

        if is_dir {
            let sub = Directory::fetch_from(&OpenFile::open(self.disk.clone(), sector)?)?;
            if sub.in_use_count() != 0 && !recursive {
                return Err(FsError::NotEmpty);
            }
            for child in sub.names() {
                self.remove(&path::join(full_path, &child), recursive)?;
            }
        }

        let hdr = FileHeader::fetch_from(self.disk.as_ref(), sector)?;
        // Fetched only after the children are gone, so their frees are
        // visible here instead of being overwritten by the write-back below.
        let mut free_map = SectorMap::fetch_from(&self.free_map_file)?;

        if !hdr.is_leaf() {
            for &leaf_sector in hdr.sectors() {
                let leaf = FileHeader::fetch_from(self.disk.as_ref(), leaf_sector)?;
                leaf.deallocate(&mut free_map);
                // the leaf header's own sector is freed below, through the
                // root header's sector list
            }
        }
        hdr.deallocate(&mut free_map);
        free_map.clear(sector);
        dir.remove(name);

        // Map first: once the directory entry is gone the file is
        // unreachable and its sectors may be re-issued without hazard.
        free_map.write_back(&mut self.free_map_file)?;
        dir.write_back(&mut dir_file)?;
        Ok(())
    }

    /// Names of the live entries in the directory at `dir_path`, in table
    /// order.
    pub fn list(&self, dir_path: &str) -> FsResult<Vec<String>> {
        let dir = Directory::fetch_from(&self.open_dir(dir_path)?)?;
        Ok(dir.names())
    }

    /// Tree-shaped rendering of the sub-tree rooted at `dir_path`, one entry
    /// per line, with continuation and last-sibling markers at each depth
    /// and a `/` suffix on directories.
    pub fn recursive_list(&self, dir_path: &str) -> FsResult<String> {
        let mut out = String::new();
        self.render_tree(dir_path, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn render_tree(
        &self,
        dir_path: &str,
        ancestors_last: &mut Vec<bool>,
        out: &mut String,
    ) -> FsResult<()> {
        let dir = Directory::fetch_from(&self.open_dir(dir_path)?)?;
        let mut remaining = dir.in_use_count();
        for entry in dir.entries() {
            remaining -= 1;
            for &last in ancestors_last.iter() {
                out.push_str(if last { "    " } else { "│   " });
            }
            out.push_str(if remaining == 0 { "└──" } else { "├──" });
            out.push_str(entry.name());
            if entry.is_dir() {
                out.push('/');
            }
            out.push('\n');

            if entry.is_dir() {
                ancestors_last.push(remaining == 0);
                self.render_tree(&path::join(dir_path, entry.name()), ancestors_last, out)?;
                ancestors_last.pop();
            }
        }
        Ok(())
    }

    /// Opens `full_path` and binds the handle to the lowest free descriptor
    /// id.
    pub fn open_fd(&mut self, full_path: &str) -> FsResult<usize> {
        let file = self.open(full_path)?;
        let id = (1..NUM_DESCRIPTORS)
            .find(|&id| self.descriptors[id].is_none())
            .ok_or(FsError::DescriptorTableFull)?;
        self.descriptors[id] = Some(file);
        Ok(id)
    }

    /// Reads at the descriptor's current position, advancing it.
    pub fn read_fd(&mut self, id: usize, buf: &mut [u8]) -> FsResult<usize> {
        Ok(self.descriptor(id)?.read(buf)?)
    }

    /// Writes at the descriptor's current position, advancing it.
    pub fn write_fd(&mut self, id: usize, buf: &[u8]) -> FsResult<usize> {
        Ok(self.descriptor(id)?.write(buf)?)
    }

    /// Releases a descriptor. Returns whether it was open.
    pub fn close_fd(&mut self, id: usize) -> bool {
        match self.descriptors.get_mut(id) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    fn descriptor(&mut self, id: usize) -> FsResult<&mut OpenFile> {
        if id == 0 || id >= NUM_DESCRIPTORS {
            return Err(FsError::BadDescriptor);
        }
        self.descriptors[id].as_mut().ok_or(FsError::BadDescriptor)
    }

    /// Clear-bit count of the persisted free map.
    pub fn num_free_sectors(&self) -> FsResult<usize> {
        Ok(SectorMap::fetch_from(&self.free_map_file)?.num_clear())
    }

    /// Renders the system headers, free-map utilization, and root table for
    /// inspection.
    pub fn debug_dump(&self) -> FsResult<String> {
        let map_hdr = FileHeader::fetch_from(self.disk.as_ref(), FREE_MAP_SECTOR)?;
        let dir_hdr = FileHeader::fetch_from(self.disk.as_ref(), ROOT_DIR_SECTOR)?;
        let free_map = SectorMap::fetch_from(&self.free_map_file)?;
        let root = Directory::fetch_from(&self.root_dir_file)?;

        let mut out = String::new();
        out.push_str(&format!(
            "free map: {} bytes over sectors {:?}\n",
            map_hdr.num_bytes(),
            map_hdr.sectors()
        ));
        out.push_str(&format!(
            "root directory: {} bytes over sectors {:?}\n",
            dir_hdr.num_bytes(),
            dir_hdr.sectors()
        ));
        out.push_str(&format!(
            "{} of {} sectors free\n",
            free_map.num_clear(),
            NUM_SECTORS
        ));
        for entry in root.entries() {
            out.push_str(&format!(
                "/{}{} -> sector {}\n",
                entry.name(),
                if entry.is_dir() { "/" } else { "" },
                entry.sector()
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileDiskEmulatorBuilder;
    use crate::SECTOR_SIZE;

    fn fresh_fs() -> SectorFs {
        let image = tempfile::tempfile().unwrap();
        let disk = FileDiskEmulatorBuilder::from(image)
            .with_sector_count(NUM_SECTORS)
            .build()
            .unwrap();
        SectorFs::format(Rc::new(disk)).unwrap()
    }

    // Sectors 0 and 1, one for the map contents, and the root table image.
    fn post_format_free() -> usize {
        NUM_SECTORS - 2 - FREE_MAP_FILE_SIZE.div_ceil(SECTOR_SIZE)
            - DIRECTORY_FILE_SIZE.div_ceil(SECTOR_SIZE)
    }

    #[test]
    fn format_reserves_the_system_sectors() {
        let fs = fresh_fs();

        let map = SectorMap::fetch_from(&fs.free_map_file).unwrap();
        assert!(map.test(FREE_MAP_SECTOR));
        assert!(map.test(ROOT_DIR_SECTOR));
        assert_eq!(map.num_clear(), post_format_free());
        assert_eq!(fs.list("/").unwrap().len(), 0);
    }

    #[test]
    fn open_dir_resolves_the_root_for_empty_paths() {
        let fs = fresh_fs();

        assert_eq!(fs.open_dir("/").unwrap().header_sector(), ROOT_DIR_SECTOR);
        assert_eq!(fs.open_dir("").unwrap().header_sector(), ROOT_DIR_SECTOR);
    }

    #[test]
    fn missing_parents_are_reported() {
        let mut fs = fresh_fs();

        assert!(matches!(fs.create("/no/file", 1), Err(FsError::NotFound)));
        assert!(matches!(fs.open("/nothing"), Err(FsError::NotFound)));
        assert!(matches!(fs.remove("/nothing", false), Err(FsError::NotFound)));
    }

    #[test]
    fn empty_and_oversized_names_are_rejected() {
        let mut fs = fresh_fs();

        assert!(matches!(fs.create("/", 1), Err(FsError::NameTooLong)));
        let long = format!("/{}", "n".repeat(NAME_LEN + 1));
        assert!(matches!(fs.create(&long, 1), Err(FsError::NameTooLong)));
    }

    #[test]
    fn oversized_files_are_rejected_up_front() {
        let mut fs = fresh_fs();
        let before = fs.num_free_sectors().unwrap();

        assert!(matches!(
            fs.create("/huge", MAX_FILE_SIZE + 1),
            Err(FsError::TooLarge)
        ));
        // In range for the indirection scheme but not for this disk.
        assert!(matches!(
            fs.create("/big", MAX_FILE_SIZE),
            Err(FsError::NoSpace)
        ));
        assert_eq!(fs.num_free_sectors().unwrap(), before);
    }

    #[test]
    fn debug_dump_names_the_root_entries() {
        let mut fs = fresh_fs();
        fs.create("/a", 1).unwrap();
        fs.create_directory("d", "/").unwrap();

        let dump = fs.debug_dump().unwrap();
        assert!(dump.contains("/a -> sector"));
        assert!(dump.contains("/d/ -> sector"));
    }
}
