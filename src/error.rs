use std::{collections::TryReserveError, path::PathBuf};

use crate::disk::ReadOffset;

/// A device read that could not be satisfied.
///
/// The device is expected to serve every in-range read, so this always means the volume or the
/// host is broken in a way that no retry fixes.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError<O: ReadOffset> {
    #[error("Failed to read {size} bytes from device at {offset:#x}: {source}.")]
    ShortRead {
        size: usize,
        offset: u64,
        #[source]
        source: O::Err,
    },
}

impl<O: ReadOffset> DeviceError<O> {
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClusterChainError {
    #[error("Invalid starting cluster: {0:#x}.")]
    InvalidFirstCluster(u32),
    #[error("Cluster chain is longer than the cluster heap ({clusters} clusters).")]
    Loop { clusters: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum FatLoadError<O: ReadOffset> {
    #[error("FAT starts at invalid offset.")]
    InvalidOffset,
    #[error("Invalid number of FATs detected: {0}. Must be either `1` or `2`.")]
    InvalidNumberOfFats(u8),
    #[error("FAT is too small: {count} entries needed, room for {capacity}.")]
    TooSmall { count: u64, capacity: u64 },
    #[error("Failed to allocate the FAT: {0}.")]
    OutOfMemory(#[source] TryReserveError),
    #[error("{0}")]
    ReadFailed(#[from] DeviceError<O>),
}

#[derive(Debug, thiserror::Error)]
pub enum MountError<O: ReadOffset> {
    #[error("Failed to open `{}`: {source}.", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Device(#[from] DeviceError<O>),
    #[error("exFAT file system is not found.")]
    NotExfat,
    #[error("Unsupported exFAT version: {major}.{minor}.")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("Too small sector size: 2^{0}.")]
    SectorTooSmall(u8),
    #[error("Too big cluster size: 2^{0}.")]
    ClusterTooLarge(u8),
    #[error("FAT could not be loaded: {0}")]
    Fat(#[from] FatLoadError<O>),
    #[error("Root directory cluster chain is broken: {0}")]
    RootDirectory(#[from] ClusterChainError),
    #[error("Failed to allocate {0}.")]
    OutOfMemory(&'static str),
}

impl<O: ReadOffset> MountError<O> {
    /// Whether the failure comes from the device itself rather than from what is stored on it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MountError::Device(_) | MountError::Fat(FatLoadError::ReadFailed(_))
        )
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            MountError::OutOfMemory(_) | MountError::Fat(FatLoadError::OutOfMemory(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError<O: ReadOffset> {
    #[error("Volume is not mounted.")]
    NotMounted,
    #[error("Got invalid cluster {cluster:#x} after reading {transferred} bytes.")]
    InvalidCluster { cluster: u32, transferred: usize },
    #[error("{0}")]
    Device(#[from] DeviceError<O>),
}

impl<O: ReadOffset> ReadError<O> {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadError::Device(_))
    }
}
