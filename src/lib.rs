//! # exFAT volume
//!
//! Mounting exFAT volumes and reading file contents through their cluster chains.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::io::Read;
//!
//! use exfat_volume::{MountOptions, NodeReader, Volume};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = MountOptions::parse("ro,uid=1000,gid=1000");
//! let mut volume = Volume::open("/dev/sdb1", options)?;
//!
//! let root = volume.root().expect("mounted volume has a root");
//! let mut entries = Vec::new();
//! NodeReader::new(&volume, &root).read_to_end(&mut entries)?;
//!
//! volume.unmount();
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//! Directory parsing, writing and the upcase table contents are left to the layers above; the
//! volume only reads raw node data.

/// The Main Boot Sector layout
pub mod boot_sector;
pub(crate) mod buffer;
/// Cluster numbers and chain walking
pub mod cluster;
/// Disk utility functions
pub mod disk;
pub mod error;
pub mod fat;
pub mod node;
pub mod upcase;
pub mod volume;

#[cfg(test)]
mod testing;

pub use node::{Node, reader::NodeReader};
pub use volume::{MountOptions, Volume};
