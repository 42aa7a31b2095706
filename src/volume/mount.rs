use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::Arc,
};

use bytemuck::Zeroable;

use super::{MountOptions, Volume};
use crate::{
    boot_sector::{
        BootSector, FILESYSTEM_NAME, MAX_CLUSTER_SHIFT, MIN_BYTES_PER_SECTOR_SHIFT,
        SUPPORTED_REVISION, VolumeFlags,
    },
    buffer,
    cluster::chain::{self, ClusterMap},
    disk::{self, ReadOffset},
    error::{ClusterChainError, MountError},
    fat::Fat,
    node::{FileAttributes, Node},
    upcase::UpcaseTable,
};

impl Volume<File> {
    /// Opens the device at `path` (read-only if requested) and mounts it.
    pub fn open<P: AsRef<Path>>(path: P, options: MountOptions) -> Result<Self, MountError<File>> {
        let path = path.as_ref();
        let device = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .open(path)
            .map_err(|source| {
                log::error!("failed to open `{}`: {source}", path.display());
                MountError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        Self::mount(device, options)
    }
}

impl<D: ReadOffset> Volume<D> {
    /// Validates the boot sector of `device` and brings the volume into mounted state.
    ///
    /// On failure everything acquired so far is released again before returning, including the
    /// device.
    pub fn mount(device: D, options: MountOptions) -> Result<Self, MountError<D>> {
        log::debug!("mounting with {options:?}");

        let mut boot: Box<BootSector> = Box::new(Zeroable::zeroed());
        disk::read_raw(&device, bytemuck::bytes_of_mut(&mut *boot), 0)?;
        validate::<D>(&boot)?;

        if boot.volume_flags().contains(VolumeFlags::VOLUME_DIRTY) {
            log::warn!("volume was not unmounted cleanly");
        }
        log::debug!(
            "block size {}, cluster size {}, {} clusters, root at {}",
            boot.bytes_per_sector(),
            boot.bytes_per_cluster(),
            boot.cluster_count(),
            boot.root_directory_cluster()
        );

        let zero_block = zero_block::<D>(boot.bytes_per_sector() as usize).inspect_err(|_| {
            log::error!("failed to allocate zero block");
        })?;

        let fat = Fat::load(&device, &boot).inspect_err(|e| log::error!("{e}"))?;

        let root = root_node::<D>(&boot, &fat)?;

        Ok(Self {
            device: Some(device),
            boot: Some(boot),
            zero_block: Some(zero_block),
            // the volume holds the permanent reference to the root
            root: Some(Arc::new(root)),
            fat: Some(fat),
            upcase: UpcaseTable::default(),
            options,
        })
    }
}

fn validate<D: ReadOffset>(boot: &BootSector) -> Result<(), MountError<D>> {
    if *boot.filesystem_name() != FILESYSTEM_NAME {
        log::error!("exFAT file system is not found");
        return Err(MountError::NotExfat);
    }

    let revision = boot.revision();
    if revision.packed() != SUPPORTED_REVISION {
        log::error!(
            "unsupported exFAT version: {}.{}",
            revision.major(),
            revision.minor()
        );
        return Err(MountError::UnsupportedVersion {
            major: revision.major(),
            minor: revision.minor(),
        });
    }

    let cluster_shift = boot.cluster_shift();
    if cluster_shift > u32::from(MAX_CLUSTER_SHIFT) {
        log::error!("too big cluster size: 2^{cluster_shift}");
        return Err(MountError::ClusterTooLarge(
            u8::try_from(cluster_shift).unwrap_or(u8::MAX),
        ));
    }

    if boot.bytes_per_sector_shift() < MIN_BYTES_PER_SECTOR_SHIFT {
        log::error!(
            "too small sector size: 2^{}",
            boot.bytes_per_sector_shift()
        );
        return Err(MountError::SectorTooSmall(boot.bytes_per_sector_shift()));
    }

    Ok(())
}

fn zero_block<D: ReadOffset>(size: usize) -> Result<Box<[u8]>, MountError<D>> {
    let block: Vec<u8> =
        buffer::zeroed(size).map_err(|_| MountError::OutOfMemory("zero block"))?;
    Ok(block.into_boxed_slice())
}

/// Builds the root directory node. exFAT has neither timestamps nor a contiguity flag for it.
fn root_node<D: ReadOffset>(boot: &BootSector, fat: &Fat) -> Result<Node, MountError<D>> {
    let start = boot.root_directory_cluster();
    let size = rootdir_size(boot, fat).inspect_err(|e| log::error!("{e}"))?;

    Ok(Node::new(FileAttributes::DIRECTORY, start, size, false).with_times(0, 0))
}

/// Size of the root directory: the length of its cluster chain times the cluster size.
pub(crate) fn rootdir_size<C: ClusterMap + ?Sized>(
    boot: &BootSector,
    map: &C,
) -> Result<u64, ClusterChainError> {
    let mut cluster = boot.root_directory_cluster();
    if cluster.is_invalid() {
        return Err(ClusterChainError::InvalidFirstCluster(cluster.0));
    }

    let max = u64::from(boot.cluster_count());
    let mut clusters = 0u64;
    while !cluster.is_invalid() {
        clusters += 1;
        if clusters > max {
            return Err(ClusterChainError::Loop { clusters });
        }
        cluster = chain::next(map, cluster, false);
    }

    Ok(clusters * u64::from(boot.bytes_per_cluster()))
}

#[test]
fn mounts_and_sizes_root() {
    use crate::{
        cluster::Cluster,
        testing::{TestImage, init_logger, options},
    };

    init_logger();
    let image = TestImage::new(16).root(&[4, 11, 6]);
    let volume = Volume::mount(image.build(), options()).unwrap();

    let root = volume.root().unwrap();
    assert_eq!(root.size(), 12288);
    assert!(root.is_directory());
    assert!(!root.is_contiguous());
    assert_eq!(root.start_cluster(), Cluster(4));
    assert_eq!(root.fptr_cluster(), Cluster(4));
    assert_eq!(root.name(), "");
    assert_eq!((root.mtime(), root.atime()), (0, 0));

    let zero = volume.zero_block().unwrap();
    assert_eq!(zero.len(), 512);
    assert!(zero.iter().all(|b| *b == 0));

    // permanent reference plus ours
    assert_eq!(Arc::strong_count(&root), 2);
    assert!(volume.is_mounted());
    assert!(volume.upcase().is_empty());
}

#[test]
fn root_is_read_through_its_chain() {
    use crate::testing::{TestImage, options, pattern};

    let image = TestImage::new(16).root(&[4, 11, 6]);
    let volume = Volume::mount(image.build(), options()).unwrap();
    let root = volume.root().unwrap();

    let mut buffer = vec![0u8; root.size() as usize];
    assert_eq!(volume.read(&root, &mut buffer, 0).unwrap(), 12288);
    assert_eq!(buffer[4096], pattern(image.cluster_offset(11)));
    assert_eq!(buffer[8192], pattern(image.cluster_offset(6)));
}

#[test]
fn rejects_wrong_signature() {
    use crate::testing::{TestImage, options};

    for name in [*b"EXFAT  \0", *b"exfat   ", *b"NTFS    ", [0; 8]] {
        let image = TestImage::new(8)
            .root(&[2])
            .boot_mut(|b| b.filesystem_name = name);
        let err = Volume::mount(image.build(), options()).unwrap_err();
        assert!(matches!(err, MountError::NotExfat));
        assert!(!err.is_fatal());
    }
}

#[test]
fn rejects_unsupported_version() {
    use crate::{
        boot_sector::FileSystemRevision,
        testing::{TestImage, options},
    };

    for (vermaj, vermin) in [(1, 1), (2, 0), (0, 1)] {
        let image = TestImage::new(8)
            .root(&[2])
            .boot_mut(|b| b.file_system_revision = FileSystemRevision { vermin, vermaj });
        let err = Volume::mount(image.build(), options()).unwrap_err();
        assert!(matches!(
            err,
            MountError::UnsupportedVersion { major, minor } if major == vermaj && minor == vermin
        ));
    }
}

#[test]
fn rejects_oversized_cluster() {
    use crate::testing::{TestImage, options};

    let image = TestImage::new(8)
        .root(&[2])
        .boot_mut(|b| b.sectors_per_cluster_shift = 17);
    let err = Volume::mount(image.build(), options()).unwrap_err();
    assert!(matches!(err, MountError::ClusterTooLarge(26)));

    // exactly 32MB is fine as far as validation goes
    let mut boot = TestImage::new(8).boot_sector();
    boot.sectors_per_cluster_shift = 16;
    assert!(validate::<Vec<u8>>(&boot).is_ok());
}

#[test]
fn rejects_small_sectors() {
    use crate::testing::TestImage;

    let mut boot = TestImage::new(8).boot_sector();
    boot.bytes_per_sector_shift = 8;
    assert!(matches!(
        validate::<Vec<u8>>(&boot),
        Err(MountError::SectorTooSmall(8))
    ));
}

#[test]
fn truncated_device_is_fatal() {
    use crate::testing::{TestImage, options};

    let mut image = TestImage::new(8).root(&[2]).build();
    image.truncate(100);
    let err = Volume::mount(image, options()).unwrap_err();
    assert!(matches!(err, MountError::Device(_)));
    assert!(err.is_fatal());

    let mut image = TestImage::new(8).root(&[2]).build();
    image.truncate(24 * 512 + 8);
    let err = Volume::mount(image, options()).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn broken_root_chain() {
    use crate::testing::{TestImage, options};

    let image = TestImage::new(8).boot_mut(|b| b.first_cluster_of_root_directory = 1);
    let err = Volume::mount(image.build(), options()).unwrap_err();
    assert!(matches!(
        err,
        MountError::RootDirectory(ClusterChainError::InvalidFirstCluster(1))
    ));

    let image = TestImage::new(8).root(&[2, 3]).link(3, 2);
    let err = Volume::mount(image.build(), options()).unwrap_err();
    assert!(matches!(
        err,
        MountError::RootDirectory(ClusterChainError::Loop { clusters: 9 })
    ));
}

#[test]
fn failed_mount_releases_the_device() {
    use crate::{
        boot_sector::FileSystemRevision,
        testing::{RecordingDevice, TestImage, options},
    };

    let images = [
        TestImage::new(8).root(&[2]).boot_mut(|b| b.filesystem_name = [0; 8]),
        TestImage::new(8).root(&[2]).boot_mut(|b| {
            b.file_system_revision = FileSystemRevision {
                vermin: 0,
                vermaj: 2,
            }
        }),
        TestImage::new(8)
            .root(&[2])
            .boot_mut(|b| b.sectors_per_cluster_shift = 20),
        TestImage::new(8).root(&[2]).boot_mut(|b| b.number_of_fats = 0),
        TestImage::new(8).root(&[2]).link(2, 2),
    ];

    for image in images {
        let device = Arc::new(RecordingDevice::new(image.build()));
        assert!(Volume::mount(Arc::clone(&device), options()).is_err());
        assert_eq!(Arc::strong_count(&device), 1);
    }
}

#[test]
fn opens_read_only_from_path() {
    use crate::testing::{TestImage, options};

    let path = std::env::temp_dir().join(format!("exfat-volume-{}.img", std::process::id()));
    std::fs::write(&path, TestImage::new(8).root(&[2, 5]).build()).unwrap();

    let volume = Volume::open(&path, options()).unwrap();
    assert_eq!(volume.root().unwrap().size(), 2 * 4096);
    drop(volume);
    std::fs::remove_file(&path).unwrap();

    let err = Volume::open(&path, options()).unwrap_err();
    assert!(matches!(err, MountError::Open { .. }));
}

#[test]
fn allocation_failure_unwinds_mount() {
    use crate::{
        error::FatLoadError,
        testing::{RecordingDevice, TestImage, limit_allocations, options},
    };

    // zero block takes 512 bytes, the FAT 302 * 4
    for (limit, zero_block_fails) in [(100, true), (1000, false)] {
        let device = Arc::new(RecordingDevice::new(TestImage::new(300).root(&[2]).build()));
        let err = {
            let _limit = limit_allocations(limit);
            Volume::mount(Arc::clone(&device), options()).unwrap_err()
        };

        assert!(err.is_out_of_memory());
        assert!(!err.is_fatal());
        assert_eq!(
            matches!(err, MountError::OutOfMemory("zero block")),
            zero_block_fails
        );
        assert_eq!(
            matches!(err, MountError::Fat(FatLoadError::OutOfMemory(_))),
            !zero_block_fails
        );
        assert_eq!(Arc::strong_count(&device), 1);
    }
}

#[test]
fn fat_smaller_than_heap_is_not_fatal() {
    use crate::{
        error::FatLoadError,
        testing::{TestImage, options},
    };

    let image = TestImage::new(8)
        .root(&[2])
        .boot_mut(|b| b.cluster_count = 200u32.to_le());
    let err = Volume::mount(image.build(), options()).unwrap_err();

    assert!(matches!(err, MountError::Fat(FatLoadError::TooSmall { .. })));
    assert!(!err.is_fatal());
}
