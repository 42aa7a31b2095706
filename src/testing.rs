//! Helpers for building small exFAT images in memory.

use std::{
    cell::Cell,
    collections::{HashMap, TryReserveError},
    io,
    sync::Mutex,
};

use bytemuck::Zeroable;

use crate::{
    boot_sector::{BootSector, FILESYSTEM_NAME, FileSystemRevision},
    cluster::{Cluster, FIRST_DATA_CLUSTER, chain::ClusterMap},
    disk::ReadOffset,
};

const FAT_OFFSET_SECTORS: u32 = 24;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The byte every untouched position of a built image holds.
pub(crate) fn pattern(offset: u64) -> u8 {
    (offset % 251) as u8
}

pub(crate) struct TestImage {
    bytes_per_sector_shift: u8,
    sectors_per_cluster_shift: u8,
    cluster_count: u32,
    fat: Vec<u32>,
    boot: BootSector,
}

impl TestImage {
    /// An image with 512 byte sectors and 4096 byte clusters.
    pub(crate) fn new(cluster_count: u32) -> TestImage {
        Self::with_geometry(cluster_count, 9, 3)
    }

    pub(crate) fn with_geometry(
        cluster_count: u32,
        bytes_per_sector_shift: u8,
        sectors_per_cluster_shift: u8,
    ) -> TestImage {
        let mut fat = vec![0u32; (cluster_count + FIRST_DATA_CLUSTER) as usize];
        fat[0] = 0xfffffff8;
        fat[1] = Cluster::END.0;

        let fat_bytes = fat.len() as u32 * 4;
        let fat_length = fat_bytes.div_ceil(1 << bytes_per_sector_shift);

        let mut boot: BootSector = Zeroable::zeroed();
        boot.jump_boot = [0xeb, 0x76, 0x90];
        boot.filesystem_name = FILESYSTEM_NAME;
        boot.fat_offset = FAT_OFFSET_SECTORS.to_le();
        boot.fat_length = fat_length.to_le();
        boot.cluster_heap_offset = (FAT_OFFSET_SECTORS + fat_length).to_le();
        boot.cluster_count = cluster_count.to_le();
        boot.file_system_revision = FileSystemRevision {
            vermin: 0,
            vermaj: 1,
        };
        boot.bytes_per_sector_shift = bytes_per_sector_shift;
        boot.sectors_per_cluster_shift = sectors_per_cluster_shift;
        boot.number_of_fats = 1;
        boot.drive_select = 0x80;
        boot.percent_in_use = 0xff;
        boot.boot_code = [0xf4; 390];
        boot.boot_signature = 0xAA55u16.to_le();

        TestImage {
            bytes_per_sector_shift,
            sectors_per_cluster_shift,
            cluster_count,
            fat,
            boot,
        }
    }

    /// Records `from -> to` in the FAT.
    pub(crate) fn link(mut self, from: u32, to: u32) -> TestImage {
        self.fat[from as usize] = to;
        self
    }

    /// Links `clusters` in order and terminates the chain.
    pub(crate) fn chain(mut self, clusters: &[u32]) -> TestImage {
        for pair in clusters.windows(2) {
            self = self.link(pair[0], pair[1]);
        }
        if let Some(last) = clusters.last() {
            self = self.link(*last, Cluster::END.0);
        }
        self
    }

    /// Places the root directory on `clusters`.
    pub(crate) fn root(mut self, clusters: &[u32]) -> TestImage {
        self.boot.first_cluster_of_root_directory = clusters.first().copied().unwrap_or(0).to_le();
        self.chain(clusters)
    }

    pub(crate) fn boot_mut(mut self, f: impl FnOnce(&mut BootSector)) -> TestImage {
        f(&mut self.boot);
        self
    }

    pub(crate) fn boot_sector(&self) -> BootSector {
        self.boot
    }

    pub(crate) fn cluster_size(&self) -> u64 {
        1 << (self.bytes_per_sector_shift + self.sectors_per_cluster_shift)
    }

    /// Offset of `cluster` computed from the layout rather than from the boot sector.
    pub(crate) fn cluster_offset(&self, cluster: u32) -> u64 {
        let heap = u64::from(FAT_OFFSET_SECTORS) + u64::from(self.fat_length());
        (heap << self.bytes_per_sector_shift)
            + u64::from(cluster - FIRST_DATA_CLUSTER) * self.cluster_size()
    }

    fn fat_length(&self) -> u32 {
        (self.fat.len() as u32 * 4).div_ceil(1 << self.bytes_per_sector_shift)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let size = self.cluster_offset(FIRST_DATA_CLUSTER)
            + u64::from(self.cluster_count) * self.cluster_size();
        let mut image: Vec<u8> = (0..size).map(pattern).collect();

        image[..512].copy_from_slice(bytemuck::bytes_of(&self.boot));

        let fat_start = (FAT_OFFSET_SECTORS as usize) << self.bytes_per_sector_shift;
        for (i, entry) in self.fat.iter().enumerate() {
            let at = fat_start + i * 4;
            image[at..at + 4].copy_from_slice(&entry.to_le_bytes());
        }

        image
    }
}

/// A device that remembers every read it served.
#[derive(Debug)]
pub(crate) struct RecordingDevice {
    image: Vec<u8>,
    reads: Mutex<Vec<(u64, usize)>>,
}

impl RecordingDevice {
    pub(crate) fn new(image: Vec<u8>) -> RecordingDevice {
        RecordingDevice {
            image,
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Returns `(offset, length)` of every read since the last call.
    pub(crate) fn take_reads(&self) -> Vec<(u64, usize)> {
        std::mem::take(&mut *self.reads.lock().unwrap())
    }
}

impl ReadOffset for RecordingDevice {
    type Err = io::Error;

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Self::Err> {
        self.reads.lock().unwrap().push((offset, buffer.len()));
        self.image.read_at(offset, buffer)
    }
}

/// A cluster map counting its lookups.
pub(crate) struct CountingMap {
    pub(crate) links: HashMap<u32, u32>,
    pub(crate) lookups: core::cell::Cell<usize>,
}

impl CountingMap {
    pub(crate) fn chain(clusters: &[u32]) -> CountingMap {
        let mut links = HashMap::new();
        for pair in clusters.windows(2) {
            links.insert(pair[0], pair[1]);
        }
        if let Some(last) = clusters.last() {
            links.insert(*last, Cluster::END.0);
        }
        CountingMap {
            links,
            lookups: core::cell::Cell::new(0),
        }
    }
}

impl ClusterMap for CountingMap {
    fn next_cluster(&self, cluster: Cluster) -> Cluster {
        self.lookups.set(self.lookups.get() + 1);
        Cluster(self.links.get(&cluster.0).copied().unwrap_or(0))
    }

    fn reset(&mut self) {}

    fn release(&mut self) {
        self.links.clear();
    }
}

/// Serializes tests that read or change the process umask.
pub(crate) static PROCESS_UMASK: Mutex<()> = Mutex::new(());

/// Mount options that do not depend on the running process.
pub(crate) fn options() -> crate::volume::MountOptions {
    crate::volume::MountOptions {
        dmask: 0o022,
        fmask: 0o133,
        uid: 1000,
        gid: 1000,
        read_only: true,
        noatime: false,
    }
}

thread_local! {
    static ALLOCATION_LIMIT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Makes fallible allocations above `bytes` fail on this thread until the guard is dropped.
pub(crate) fn limit_allocations(bytes: usize) -> AllocationLimit {
    ALLOCATION_LIMIT.set(Some(bytes));
    AllocationLimit
}

pub(crate) struct AllocationLimit;

impl Drop for AllocationLimit {
    fn drop(&mut self) {
        ALLOCATION_LIMIT.set(None);
    }
}

pub(crate) fn check_allocation(bytes: usize) -> Result<(), TryReserveError> {
    match ALLOCATION_LIMIT.get() {
        // capacity overflow is the only way to obtain the error without allocating
        Some(limit) if bytes > limit => Vec::<u8>::new().try_reserve_exact(usize::MAX),
        _ => Ok(()),
    }
}
