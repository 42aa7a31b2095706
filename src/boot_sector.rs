use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::cluster::{Cluster, FIRST_DATA_CLUSTER};

/// The file system name every exFAT volume carries at byte offset 3.
pub const FILESYSTEM_NAME: [u8; 8] = *b"EXFAT   ";
/// The only revision this crate can mount (1.0).
pub const SUPPORTED_REVISION: u16 = 0x0100;
/// Smallest sector size shift allowed (512 bytes).
pub const MIN_BYTES_PER_SECTOR_SHIFT: u8 = 9;
/// exFAT caps clusters at 32MB.
pub const MAX_CLUSTER_SHIFT: u8 = 25;

/// The Main Boot Sector, read once from offset `0` at mount time.
///
/// All multi-byte fields are stored little-endian; the accessors convert them to host order.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct BootSector {
    pub(crate) jump_boot: [u8; 3],

    /// Must be `"EXFAT   "` (including three trailing spaces).
    pub(crate) filesystem_name: [u8; 8],

    pub(crate) _reserved: [u8; 53],

    /// Sector offset of the partition on the media. Ignored when `0`.
    pub(crate) partition_offset: u64,

    /// Size of the volume in sectors.
    pub(crate) volume_length: u64,

    /// Sector offset from the start of the volume to the First FAT.
    pub(crate) fat_offset: u32,

    /// Sectors occupied by each FAT.
    pub(crate) fat_length: u32,

    /// Sector offset from the start of the volume to the Cluster Heap, the home of cluster `2`.
    pub(crate) cluster_heap_offset: u32,

    /// Number of clusters in the Cluster Heap.
    pub(crate) cluster_count: u32,

    /// Index of the first cluster of the root directory.
    pub(crate) first_cluster_of_root_directory: u32,

    pub(crate) volume_serial_number: u32,

    /// High byte major, low byte minor.
    pub(crate) file_system_revision: FileSystemRevision,

    /// See [`VolumeFlags`].
    pub(crate) volume_flags: u16,

    /// Sector ("block") size as a power-of-two exponent.
    pub(crate) bytes_per_sector_shift: u8,

    /// Sectors per cluster as a power-of-two exponent.
    pub(crate) sectors_per_cluster_shift: u8,

    /// `1`, or `2` for TexFAT.
    pub(crate) number_of_fats: u8,

    pub(crate) drive_select: u8,

    pub(crate) percent_in_use: u8,

    pub(crate) _reserved2: [u8; 7],

    pub(crate) boot_code: [u8; 390],

    /// Must be `0xAA55`.
    pub(crate) boot_signature: u16,
}

bitflags! {
    /// A set of flags that indicate file system status.
    #[derive(Copy, Clone, Debug, Default, Ord, PartialOrd, Eq, PartialEq)]
    pub struct VolumeFlags: u16 {
        /// Second FAT and allocation bitmap are active (TexFAT only).
        const ACTIVE_FAT = 1 << 0;
        /// The volume was not unmounted cleanly.
        const VOLUME_DIRTY = 1 << 1;
        const MEDIA_FAILURE = 1 << 2;
        const CLEAR_TO_ZERO = 1 << 3;
    }
}

/// Structure representing the file system revision.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct FileSystemRevision {
    /// Minor version of the exFAT file system (low-order byte).
    pub(crate) vermin: u8,
    /// Major version of the exFAT file system (high-order byte).
    pub(crate) vermaj: u8,
}

impl FileSystemRevision {
    pub fn major(&self) -> u8 {
        self.vermaj
    }

    pub fn minor(&self) -> u8 {
        self.vermin
    }

    /// Packed as `(major << 8) | minor`.
    pub fn packed(&self) -> u16 {
        u16::from(self.vermaj) << 8 | u16::from(self.vermin)
    }
}

impl BootSector {
    pub fn filesystem_name(&self) -> &[u8; 8] {
        &self.filesystem_name
    }

    pub fn revision(&self) -> FileSystemRevision {
        self.file_system_revision
    }

    pub fn volume_flags(&self) -> VolumeFlags {
        VolumeFlags::from_bits_truncate(u16::from_le(self.volume_flags))
    }

    pub fn bytes_per_sector_shift(&self) -> u8 {
        self.bytes_per_sector_shift
    }

    pub fn sectors_per_cluster_shift(&self) -> u8 {
        self.sectors_per_cluster_shift
    }

    /// `log2` of the cluster size in bytes. Computed in `u32` so that corrupt shifts cannot wrap.
    pub fn cluster_shift(&self) -> u32 {
        u32::from(self.bytes_per_sector_shift) + u32::from(self.sectors_per_cluster_shift)
    }

    pub fn number_of_fats(&self) -> u8 {
        self.number_of_fats
    }

    pub fn fat_offset(&self) -> u32 {
        u32::from_le(self.fat_offset)
    }

    pub fn fat_length(&self) -> u32 {
        u32::from_le(self.fat_length)
    }

    pub fn cluster_heap_offset(&self) -> u32 {
        u32::from_le(self.cluster_heap_offset)
    }

    pub fn cluster_count(&self) -> u32 {
        u32::from_le(self.cluster_count)
    }

    pub fn root_directory_cluster(&self) -> Cluster {
        Cluster(u32::from_le(self.first_cluster_of_root_directory))
    }

    /// Size of a physical block (sector) in bytes.
    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.bytes_per_sector_shift
    }

    /// Size of a cluster in bytes.
    pub fn bytes_per_cluster(&self) -> u32 {
        1 << self.cluster_shift()
    }

    /// Absolute byte offset of `cluster` on the device.
    ///
    /// Clusters below `2` do not exist on disk and must never be dereferenced.
    pub fn cluster_offset(&self, cluster: Cluster) -> u64 {
        debug_assert!(cluster.0 >= FIRST_DATA_CLUSTER, "bad cluster {cluster}");
        let sector = u64::from(self.cluster_heap_offset())
            + (u64::from(cluster.0.wrapping_sub(FIRST_DATA_CLUSTER))
                << self.sectors_per_cluster_shift);
        sector << self.bytes_per_sector_shift
    }
}

#[test]
fn layout_matches_disk() {
    use core::mem::offset_of;

    assert_eq!(size_of::<BootSector>(), 512);
    assert_eq!(offset_of!(BootSector, filesystem_name), 3);
    assert_eq!(offset_of!(BootSector, fat_offset), 80);
    assert_eq!(offset_of!(BootSector, cluster_heap_offset), 88);
    assert_eq!(offset_of!(BootSector, first_cluster_of_root_directory), 96);
    assert_eq!(offset_of!(BootSector, file_system_revision), 104);
    assert_eq!(offset_of!(BootSector, volume_flags), 106);
    assert_eq!(offset_of!(BootSector, bytes_per_sector_shift), 108);
    assert_eq!(offset_of!(BootSector, sectors_per_cluster_shift), 109);
    assert_eq!(offset_of!(BootSector, boot_signature), 510);
}

#[test]
fn geometry() {
    let mut boot: BootSector = Zeroable::zeroed();
    boot.bytes_per_sector_shift = 9;
    boot.sectors_per_cluster_shift = 3;
    boot.cluster_heap_offset = 128u32.to_le();

    assert_eq!(boot.bytes_per_sector(), 512);
    assert_eq!(boot.bytes_per_cluster(), 4096);
    assert_eq!(boot.cluster_offset(Cluster(2)), 128 * 512);
    assert_eq!(boot.cluster_offset(Cluster(5)), 128 * 512 + 3 * 4096);
}

#[test]
fn revision_is_read_little_endian() {
    let revision: FileSystemRevision = bytemuck::cast([0x00u8, 0x01]);

    assert_eq!(revision.major(), 1);
    assert_eq!(revision.minor(), 0);
    assert_eq!(revision.packed(), SUPPORTED_REVISION);
}
