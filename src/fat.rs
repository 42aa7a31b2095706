use bytemuck::{Pod, Zeroable};
use checked_num::CheckedU64;

use crate::{
    boot_sector::{BootSector, VolumeFlags},
    cluster::{Cluster, FIRST_DATA_CLUSTER, chain::ClusterMap},
    buffer,
    disk::{self, ReadOffset},
    error::FatLoadError,
};

#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct FatEntry(pub(crate) u32);

/// The active File Allocation Table, held in memory for successor lookups.
#[derive(Clone, Debug, Default)]
pub struct Fat {
    entries: Vec<FatEntry>,
}

impl Fat {
    /// Loads the active FAT: one entry per heap cluster plus the two reserved leading entries.
    pub fn load<R: ReadOffset>(device: &R, boot: &BootSector) -> Result<Fat, FatLoadError<R>> {
        let number_of_fats = boot.number_of_fats();
        if !(1..=2).contains(&number_of_fats) {
            return Err(FatLoadError::InvalidNumberOfFats(number_of_fats));
        }

        let index = if boot.volume_flags().contains(VolumeFlags::ACTIVE_FAT) && number_of_fats == 2
        {
            1
        } else {
            0
        };

        let sector_offset =
            CheckedU64::new(boot.fat_length() as u64) * index as u64 + boot.fat_offset() as u64;
        let byte_offset =
            (sector_offset * boot.bytes_per_sector() as u64).ok_or(FatLoadError::InvalidOffset)?;

        let count = u64::from(boot.cluster_count()) + u64::from(FIRST_DATA_CLUSTER);
        let capacity = u64::from(boot.fat_length()) * u64::from(boot.bytes_per_sector())
            / size_of::<FatEntry>() as u64;
        if count > capacity {
            log::error!("FAT holds {capacity} entries, but {count} are needed");
            return Err(FatLoadError::TooSmall { count, capacity });
        }

        // bounded by a u32 cluster count
        let count = count as usize;
        let mut entries: Vec<FatEntry> =
            buffer::zeroed(count).map_err(FatLoadError::OutOfMemory)?;

        disk::read_raw(device, bytemuck::cast_slice_mut(&mut entries), byte_offset)?;
        for entry in entries.iter_mut() {
            entry.0 = u32::from_le(entry.0);
        }

        log::debug!(
            "loaded FAT #{index} with {count} entries from offset {byte_offset:#x}"
        );
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClusterMap for Fat {
    fn next_cluster(&self, cluster: Cluster) -> Cluster {
        if cluster.is_invalid() {
            return Cluster::BAD;
        }
        let Some(next) = self.entries.get(cluster.0 as usize).map(|e| Cluster(e.0)) else {
            return Cluster::BAD;
        };

        // a successor outside the cluster heap would be read from beyond the volume
        if next.is_invalid() || (next.0 as usize) < self.entries.len() {
            next
        } else {
            log::error!("cluster {cluster} points outside the cluster heap: {next}");
            Cluster::BAD
        }
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn release(&mut self) {
        self.entries = Vec::new();
    }
}

#[test]
fn loads_active_fat() {
    use crate::testing::TestImage;

    let image = TestImage::new(16).chain(&[3, 9, 4]).chain(&[5]);
    let boot = image.boot_sector();
    let device = image.build();

    let fat = Fat::load(&device, &boot).unwrap();

    assert_eq!(fat.len(), 18);
    assert_eq!(fat.next_cluster(Cluster(3)), Cluster(9));
    assert_eq!(fat.next_cluster(Cluster(9)), Cluster(4));
    assert_eq!(fat.next_cluster(Cluster(4)), Cluster::END);
    assert_eq!(fat.next_cluster(Cluster(5)), Cluster::END);
    // free entry
    assert!(fat.next_cluster(Cluster(6)).is_invalid());
}

#[test]
fn successor_outside_heap_is_bad() {
    use crate::testing::TestImage;

    let image = TestImage::new(8).link(3, 500);
    let boot = image.boot_sector();
    let fat = Fat::load(&image.build(), &boot).unwrap();

    assert_eq!(fat.next_cluster(Cluster(3)), Cluster::BAD);
    assert_eq!(fat.next_cluster(Cluster(4000)), Cluster::BAD);
}

#[test]
fn rejects_three_fats() {
    use crate::testing::TestImage;

    let mut boot = TestImage::new(8).boot_sector();
    boot.number_of_fats = 3;

    let err = Fat::load(&Vec::<u8>::new(), &boot).unwrap_err();
    assert!(matches!(err, FatLoadError::InvalidNumberOfFats(3)));
}

#[test]
fn reset_and_release_drop_entries() {
    use crate::testing::TestImage;

    let image = TestImage::new(8).chain(&[2, 3]);
    let boot = image.boot_sector();
    let mut fat = Fat::load(&image.build(), &boot).unwrap();

    fat.reset();
    assert!(fat.is_empty());
    assert!(fat.next_cluster(Cluster(2)).is_invalid());

    fat.release();
    assert_eq!(fat.entries.capacity(), 0);
}

#[test]
fn rejects_count_beyond_fat_length() {
    use crate::testing::TestImage;

    // one sector holds 128 entries
    let image = TestImage::new(8).boot_mut(|b| b.cluster_count = 200u32.to_le());
    let boot = image.boot_sector();

    let err = Fat::load(&image.build(), &boot).unwrap_err();
    assert!(matches!(
        err,
        FatLoadError::TooSmall {
            count: 202,
            capacity: 128
        }
    ));

    // rejected before anything is allocated or read
    let mut boot = boot;
    boot.cluster_count = (1u32 << 26).to_le();
    let err = Fat::load(&Vec::<u8>::new(), &boot).unwrap_err();
    assert!(matches!(err, FatLoadError::TooSmall { .. }));
}

#[test]
fn allocation_failure_is_reported() {
    use crate::testing::{TestImage, limit_allocations};

    let image = TestImage::new(300);
    let boot = image.boot_sector();
    let _limit = limit_allocations(1000);

    let err = Fat::load(&image.build(), &boot).unwrap_err();
    assert!(matches!(err, FatLoadError::OutOfMemory(_)));
}
