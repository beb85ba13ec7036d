mod block;
mod diskemu;

pub use block::{SectorNumber, SectorStorage};
pub use diskemu::{FileDiskEmulator, FileDiskEmulatorBuilder};
