//! The mounted-state aggregate and the chain-aware node reader.

use std::sync::Arc;

use crate::{
    boot_sector::BootSector,
    cluster::chain,
    disk::{self, ReadOffset},
    error::ReadError,
    fat::Fat,
    node::Node,
    upcase::UpcaseTable,
};

mod mount;
mod options;
mod unmount;

pub use options::{
    MountOptions, MountOptionsBuilder, MountOptionsBuilderError, ProcessIdentity, UmaskGuard,
};

/// A mounted exFAT volume.
///
/// Created fully populated by [`Volume::mount`] or [`Volume::open`]. [`Volume::unmount`] empties
/// every field again, so a torn-down volume never hands out stale references.
#[derive(Debug)]
pub struct Volume<D> {
    device: Option<D>,
    boot: Option<Box<BootSector>>,
    /// One zeroed block for reading sparse regions.
    zero_block: Option<Box<[u8]>>,
    root: Option<Arc<Node>>,
    fat: Option<Fat>,
    upcase: UpcaseTable,
    options: MountOptions,
}

impl<D> Volume<D> {
    pub fn is_mounted(&self) -> bool {
        self.boot.is_some()
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn boot_sector(&self) -> Option<&BootSector> {
        self.boot.as_deref()
    }

    pub fn zero_block(&self) -> Option<&[u8]> {
        self.zero_block.as_deref()
    }

    /// A new reference to the root directory.
    pub fn root(&self) -> Option<Arc<Node>> {
        self.root.clone()
    }

    pub fn cluster_map(&self) -> Option<&Fat> {
        self.fat.as_ref()
    }

    pub fn upcase(&self) -> &UpcaseTable {
        &self.upcase
    }

    /// Installs the upcase table once the directory layer has loaded it.
    pub fn set_upcase(&mut self, upcase: UpcaseTable) {
        self.upcase = upcase;
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Permission bits of `node` after applying the directory or file mask.
    pub fn permissions(&self, node: &Node) -> u32 {
        let mask = if node.is_directory() {
            self.options.dmask
        } else {
            self.options.fmask
        };
        0o777 & !mask
    }
}

impl<D: ReadOffset> Volume<D> {
    /// Reads from `node` at the logical `offset` into `buffer`, following the node's cluster
    /// chain.
    ///
    /// Returns the number of bytes read, which is `buffer.len()` clamped to the node size.
    /// Reading at or past the end of the node returns `0` without touching the device.
    pub fn read(&self, node: &Node, buffer: &mut [u8], offset: u64) -> Result<usize, ReadError<D>> {
        if offset >= node.size || buffer.is_empty() {
            return Ok(0);
        }
        let (Some(device), Some(boot), Some(fat)) = (&self.device, &self.boot, &self.fat) else {
            return Err(ReadError::NotMounted);
        };

        let cluster_size = u64::from(boot.bytes_per_cluster());
        let mut cluster = chain::advance(
            fat,
            node.start_cluster,
            node.contiguous,
            offset / cluster_size,
        );
        if cluster.is_invalid() {
            log::error!("got invalid cluster {cluster} seeking to {offset:#x}");
            return Err(ReadError::InvalidCluster {
                cluster: cluster.0,
                transferred: 0,
            });
        }

        // bounded by `buffer.len()`, so the cast is lossless
        let total = (buffer.len() as u64).min(node.size - offset) as usize;
        let mut local_offset = offset % cluster_size;
        let mut done = 0;

        loop {
            let amount = (cluster_size - local_offset).min((total - done) as u64) as usize;
            disk::read_raw(
                device,
                &mut buffer[done..done + amount],
                boot.cluster_offset(cluster) + local_offset,
            )?;
            done += amount;
            local_offset = 0;

            if done == total {
                return Ok(done);
            }

            cluster = chain::next(fat, cluster, node.contiguous);
            if cluster.is_invalid() {
                log::error!("got invalid cluster {cluster} after reading {done} bytes");
                return Err(ReadError::InvalidCluster {
                    cluster: cluster.0,
                    transferred: done,
                });
            }
        }
    }
}

#[cfg(test)]
fn contiguous_node() -> (
    Volume<Arc<crate::testing::RecordingDevice>>,
    Arc<crate::testing::RecordingDevice>,
    crate::testing::TestImage,
) {
    use crate::testing::{RecordingDevice, TestImage, init_logger, options};

    init_logger();
    let image = TestImage::new(16).root(&[2]);
    let device = Arc::new(RecordingDevice::new(image.build()));
    let volume = Volume::mount(Arc::clone(&device), options()).unwrap();
    device.take_reads();

    (volume, device, image)
}

#[test]
fn contiguous_read_spans_three_clusters() {
    use crate::{cluster::Cluster, node::FileAttributes, testing::pattern};

    let (volume, device, image) = contiguous_node();
    let boot = *volume.boot_sector().unwrap();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(5), 10000, true);

    let mut buffer = vec![0u8; 10000];
    assert_eq!(volume.read(&node, &mut buffer, 0).unwrap(), 10000);

    assert_eq!(
        device.take_reads(),
        vec![
            (boot.cluster_offset(Cluster(5)), 4096),
            (boot.cluster_offset(Cluster(6)), 4096),
            (boot.cluster_offset(Cluster(7)), 1808),
        ]
    );
    assert_eq!(boot.cluster_offset(Cluster(5)), image.cluster_offset(5));

    let start = image.cluster_offset(5);
    assert!(
        buffer
            .iter()
            .enumerate()
            .all(|(i, b)| *b == pattern(start + i as u64))
    );
}

#[test]
fn read_is_clamped_to_node_size() {
    use crate::{cluster::Cluster, node::FileAttributes};

    let (volume, device, _) = contiguous_node();
    let boot = *volume.boot_sector().unwrap();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(5), 10000, true);

    let mut buffer = vec![0xAA; 5000];
    assert_eq!(volume.read(&node, &mut buffer, 9000).unwrap(), 1000);

    assert_eq!(
        device.take_reads(),
        vec![(boot.cluster_offset(Cluster(7)) + 9000 % 4096, 1000)]
    );
    // nothing past the clamp is written
    assert!(buffer[1000..].iter().all(|b| *b == 0xAA));
}

#[test]
fn eof_and_empty_reads_do_no_io() {
    use crate::{cluster::Cluster, node::FileAttributes};

    let (volume, device, _) = contiguous_node();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(5), 10000, true);

    let mut buffer = vec![0u8; 64];
    assert_eq!(volume.read(&node, &mut buffer, 10000).unwrap(), 0);
    assert_eq!(volume.read(&node, &mut buffer, u64::MAX).unwrap(), 0);
    assert_eq!(volume.read(&node, &mut [], 0).unwrap(), 0);

    assert!(device.take_reads().is_empty());
}

#[test]
fn returned_length_matches_clamp() {
    use crate::{cluster::Cluster, node::FileAttributes};

    let (volume, _, _) = contiguous_node();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(3), 9000, true);

    for (size, offset) in [(1, 0), (4096, 1), (8999, 1), (9000, 0), (20000, 4095), (7, 8995)] {
        let mut buffer = vec![0u8; size];
        let expected = size.min((9000 - offset) as usize);
        assert_eq!(volume.read(&node, &mut buffer, offset).unwrap(), expected);
    }
}

#[test]
fn fragmented_read_follows_fat() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{RecordingDevice, TestImage, options, pattern},
    };

    let image = TestImage::new(16).root(&[2]).chain(&[9, 4, 12]);
    let device = Arc::new(RecordingDevice::new(image.build()));
    let volume = Volume::mount(Arc::clone(&device), options()).unwrap();
    device.take_reads();

    let node = Node::new(FileAttributes::ARCHIVE, Cluster(9), 3 * 4096, false);
    let mut buffer = vec![0u8; 6000];
    assert_eq!(volume.read(&node, &mut buffer, 4000).unwrap(), 6000);

    assert_eq!(
        device.take_reads(),
        vec![
            (image.cluster_offset(9) + 4000, 96),
            (image.cluster_offset(4), 4096),
            (image.cluster_offset(12), 1808),
        ]
    );
    assert_eq!(buffer[0], pattern(image.cluster_offset(9) + 4000));
    assert_eq!(buffer[96], pattern(image.cluster_offset(4)));
    assert_eq!(buffer[5999], pattern(image.cluster_offset(12) + 1807));
}

#[test]
fn sector_sized_clusters() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{RecordingDevice, TestImage, options, pattern},
    };

    let image = TestImage::with_geometry(64, 9, 0)
        .root(&[2])
        .chain(&[10, 5, 30]);
    let device = Arc::new(RecordingDevice::new(image.build()));
    let volume = Volume::mount(Arc::clone(&device), options()).unwrap();
    device.take_reads();

    assert_eq!(volume.root().unwrap().size(), 512);

    let node = Node::new(FileAttributes::ARCHIVE, Cluster(10), 1500, false);
    let mut buffer = vec![0u8; 2048];
    assert_eq!(volume.read(&node, &mut buffer, 0).unwrap(), 1500);

    assert_eq!(
        device.take_reads(),
        vec![
            (image.cluster_offset(10), 512),
            (image.cluster_offset(5), 512),
            (image.cluster_offset(30), 476),
        ]
    );
    assert_eq!(buffer[512], pattern(image.cluster_offset(5)));
    assert_eq!(buffer[1499], pattern(image.cluster_offset(30) + 475));

    // starting mid-cluster
    assert_eq!(volume.read(&node, &mut buffer[..600], 700).unwrap(), 600);
    assert_eq!(
        device.take_reads(),
        vec![
            (image.cluster_offset(5) + 188, 324),
            (image.cluster_offset(30), 276),
        ]
    );
}

#[test]
fn chain_shorter_than_size_fails() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{TestImage, options},
    };

    let image = TestImage::new(16).root(&[2]).chain(&[9, 4]);
    let volume = Volume::mount(image.build(), options()).unwrap();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(9), 3 * 4096, false);

    let mut buffer = vec![0u8; 3 * 4096];
    let err = volume.read(&node, &mut buffer, 0).unwrap_err();
    assert!(matches!(
        err,
        ReadError::InvalidCluster {
            cluster: 0xffffffff,
            transferred: 8192
        }
    ));
    assert!(!err.is_fatal());

    let err = volume.read(&node, &mut buffer, 2 * 4096).unwrap_err();
    assert!(matches!(
        err,
        ReadError::InvalidCluster { transferred: 0, .. }
    ));

    // the successor of the last cluster needed is never looked up
    assert_eq!(volume.read(&node, &mut buffer[..4096], 4096).unwrap(), 4096);
}

#[test]
fn cluster_beyond_device_is_fatal() {
    use crate::{cluster::Cluster, node::FileAttributes, testing::TestImage};

    let image = TestImage::new(4).root(&[2]);
    let volume = Volume::mount(image.build(), crate::testing::options()).unwrap();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(3), 64 * 4096, true);

    let mut buffer = vec![0u8; 4096];
    let err = volume.read(&node, &mut buffer, 10 * 4096).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn concurrent_reads_share_the_device() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{TestImage, options, pattern},
    };

    let image = TestImage::new(32).root(&[2]).chain(&[20, 3, 17, 8, 30]);
    let volume = Volume::mount(image.build(), options()).unwrap();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(20), 5 * 4096, false);
    let clusters = [20u32, 3, 17, 8, 30];

    std::thread::scope(|s| {
        for (i, cluster) in clusters.iter().enumerate() {
            let volume = &volume;
            let node = &node;
            let image = &image;
            s.spawn(move || {
                let mut buffer = vec![0u8; 4096];
                for _ in 0..20 {
                    let n = volume.read(node, &mut buffer, i as u64 * 4096).unwrap();
                    assert_eq!(n, 4096);
                    assert_eq!(buffer[0], pattern(image.cluster_offset(*cluster)));
                    assert_eq!(buffer[4095], pattern(image.cluster_offset(*cluster) + 4095));
                }
            });
        }
    });
}

#[test]
fn permissions_apply_masks() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{TestImage, options},
    };

    let volume = Volume::mount(TestImage::new(4).root(&[2]).build(), options()).unwrap();
    let file = Node::new(FileAttributes::ARCHIVE, Cluster(3), 1, true);

    assert_eq!(volume.permissions(&volume.root().unwrap()), 0o755);
    assert_eq!(volume.permissions(&file), 0o644);
}
