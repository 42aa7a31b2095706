use bitflags::bitflags;

use crate::cluster::Cluster;

pub mod reader;

bitflags! {
    /// File attributes as stored in a file directory entry.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FileAttributes: u16 {
        const READ_ONLY = 1 << 0;
        const HIDDEN = 1 << 1;
        const SYSTEM = 1 << 2;
        const DIRECTORY = 1 << 4;
        const ARCHIVE = 1 << 5;
    }
}

/// The allocation and size metadata of one file or directory.
///
/// Nodes are shared through [`std::sync::Arc`]; the mounted volume owns the reference that keeps
/// the root alive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub(crate) attributes: FileAttributes,
    pub(crate) start_cluster: Cluster,
    /// Cluster the last seek ended on.
    pub(crate) fptr_cluster: Cluster,
    /// When set, the clusters are consecutive and the FAT is never consulted.
    pub(crate) contiguous: bool,
    pub(crate) size: u64,
    pub(crate) name: String,
    pub(crate) mtime: u64,
    pub(crate) atime: u64,
}

impl Node {
    pub fn new(
        attributes: FileAttributes,
        start_cluster: Cluster,
        size: u64,
        contiguous: bool,
    ) -> Node {
        Node {
            attributes,
            start_cluster,
            fptr_cluster: start_cluster,
            contiguous,
            size,
            ..Default::default()
        }
    }

    pub fn with_times(mut self, mtime: u64, atime: u64) -> Node {
        self.mtime = mtime;
        self.atime = atime;
        self
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn start_cluster(&self) -> Cluster {
        self.start_cluster
    }

    pub fn fptr_cluster(&self) -> Cluster {
        self.fptr_cluster
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn atime(&self) -> u64 {
        self.atime
    }
}
