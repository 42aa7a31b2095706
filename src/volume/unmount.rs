use std::sync::Arc;

use super::Volume;
use crate::cluster::chain::ClusterMap;

impl<D> Volume<D> {
    /// Releases everything [`Volume::mount`] acquired and closes the device.
    ///
    /// Safe to call more than once. Nodes handed out earlier stay valid but the volume can no
    /// longer read them.
    pub fn unmount(&mut self) {
        if !self.is_mounted() {
            return;
        }
        log::debug!("unmounting");

        let root = self.root.take();
        if let Some(root) = &root {
            let outstanding = Arc::strong_count(root) - 1;
            if outstanding > 0 {
                log::warn!("root directory still has {outstanding} references");
            }
        }

        if let Some(fat) = self.fat.as_mut() {
            fat.reset();
        }
        drop(root);

        self.zero_block = None;

        if let Some(mut fat) = self.fat.take() {
            fat.release();
        }

        // closes the device
        self.device = None;
        self.boot = None;
        self.upcase.release();

        log::debug!("unmounted");
    }
}

impl<D> Drop for Volume<D> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[test]
fn unmount_clears_every_field() {
    use crate::{
        testing::{RecordingDevice, TestImage, init_logger, options},
        upcase::UpcaseTable,
    };

    init_logger();
    let device = Arc::new(RecordingDevice::new(TestImage::new(8).root(&[2, 3]).build()));
    let mut volume = Volume::mount(Arc::clone(&device), options()).unwrap();
    volume.set_upcase(UpcaseTable::new(vec![0x41, 0x42]));
    assert_eq!(Arc::strong_count(&device), 2);

    volume.unmount();

    assert!(!volume.is_mounted());
    assert!(volume.device().is_none());
    assert!(volume.boot_sector().is_none());
    assert!(volume.zero_block().is_none());
    assert!(volume.root().is_none());
    assert!(volume.cluster_map().is_none());
    assert!(volume.upcase().is_empty());
    assert_eq!(Arc::strong_count(&device), 1);
}

#[test]
fn unmount_twice() {
    use crate::testing::{TestImage, options};

    let mut volume = Volume::mount(TestImage::new(8).root(&[2]).build(), options()).unwrap();
    volume.unmount();
    volume.unmount();
    assert!(!volume.is_mounted());
}

#[test]
fn read_after_unmount() {
    use crate::{
        error::ReadError,
        testing::{TestImage, options},
    };

    let mut volume = Volume::mount(TestImage::new(8).root(&[2, 5]).build(), options()).unwrap();
    let root = volume.root().unwrap();
    volume.unmount();

    // the node outlives the volume's reference
    assert_eq!(root.size(), 8192);
    assert_eq!(Arc::strong_count(&root), 1);

    let mut buffer = [0u8; 16];
    assert!(matches!(
        volume.read(&root, &mut buffer, 0),
        Err(ReadError::NotMounted)
    ));
}

#[test]
fn drop_closes_the_device() {
    use crate::testing::{RecordingDevice, TestImage, options};

    let device = Arc::new(RecordingDevice::new(TestImage::new(8).root(&[2]).build()));
    let volume = Volume::mount(Arc::clone(&device), options()).unwrap();
    drop(volume);
    assert_eq!(Arc::strong_count(&device), 1);
}
