use std::io::{self, Read, Seek, SeekFrom};

use crate::{disk::ReadOffset, error::ReadError, node::Node, volume::Volume};

/// A cursor over the contents of a node, reading through [`Volume::read`].
#[derive(Debug)]
pub struct NodeReader<'a, D> {
    volume: &'a Volume<D>,
    node: &'a Node,
    offset: u64,
}

impl<'a, D: ReadOffset> NodeReader<'a, D> {
    pub fn new(volume: &'a Volume<D>, node: &'a Node) -> Self {
        Self {
            volume,
            node,
            offset: 0,
        }
    }

    pub fn node(&self) -> &Node {
        self.node
    }

    /// Current logical position within the node.
    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl<D: ReadOffset> Read for NodeReader<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .volume
            .read(self.node, buf, self.offset)
            .map_err(into_io_error)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Keeps the chain and device failures apart: a broken chain is bad data, a failed device read
/// means the device ended early.
fn into_io_error<D: ReadOffset>(error: ReadError<D>) -> io::Error {
    let kind = match error {
        ReadError::NotMounted => io::ErrorKind::NotConnected,
        ReadError::InvalidCluster { .. } => io::ErrorKind::InvalidData,
        ReadError::Device(_) => io::ErrorKind::UnexpectedEof,
    };
    io::Error::new(kind, error.to_string())
}

impl<D: ReadOffset> Seek for NodeReader<'_, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.node.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
        };

        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };
        self.offset = target;
        Ok(target)
    }
}

#[cfg(test)]
fn mounted() -> (Volume<Vec<u8>>, crate::testing::TestImage) {
    use crate::testing::{TestImage, options};

    let image = TestImage::new(16).root(&[2]).chain(&[7, 3, 10]);
    let volume = Volume::mount(image.build(), options()).unwrap();
    (volume, image)
}

#[test]
fn read_to_end_follows_the_chain() {
    use crate::{cluster::Cluster, node::FileAttributes, testing::pattern};

    let (volume, image) = mounted();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(7), 2 * 4096 + 100, false);
    let mut reader = NodeReader::new(&volume, &node);

    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).unwrap();

    assert_eq!(contents.len(), 8292);
    assert_eq!(reader.position(), 8292);
    assert_eq!(contents[0], pattern(image.cluster_offset(7)));
    assert_eq!(contents[4096], pattern(image.cluster_offset(3)));
    assert_eq!(contents[8291], pattern(image.cluster_offset(10) + 99));
}

#[test]
fn seek_then_read() {
    use crate::{cluster::Cluster, node::FileAttributes, testing::pattern};

    let (volume, image) = mounted();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(7), 3 * 4096, false);
    let mut reader = NodeReader::new(&volume, &node);

    assert_eq!(reader.seek(SeekFrom::End(-10)).unwrap(), 3 * 4096 - 10);
    let mut tail = [0u8; 10];
    reader.read_exact(&mut tail).unwrap();
    assert_eq!(tail[9], pattern(image.cluster_offset(10) + 4095));

    reader.seek(SeekFrom::Start(4090)).unwrap();
    assert_eq!(reader.seek(SeekFrom::Current(8)).unwrap(), 4098);
    let mut byte = [0u8];
    reader.read_exact(&mut byte).unwrap();
    assert_eq!(byte[0], pattern(image.cluster_offset(3) + 2));

    // past the end reads nothing
    reader.seek(SeekFrom::Start(1 << 20)).unwrap();
    assert_eq!(reader.read(&mut byte).unwrap(), 0);
}

#[test]
fn negative_seek_is_rejected() {
    use crate::{cluster::Cluster, node::FileAttributes};

    let (volume, _) = mounted();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(7), 100, false);
    let mut reader = NodeReader::new(&volume, &node);

    let err = reader.seek(SeekFrom::Current(-1)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert!(reader.seek(SeekFrom::End(-101)).is_err());
    assert_eq!(reader.position(), 0);
}

#[test]
fn broken_chain_surfaces_as_io_error() {
    use crate::{cluster::Cluster, node::FileAttributes};

    let (volume, _) = mounted();
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(7), 5 * 4096, false);
    let mut reader = NodeReader::new(&volume, &node);

    let mut contents = Vec::new();
    let err = reader.read_to_end(&mut contents).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn device_failure_surfaces_as_eof() {
    use crate::{
        cluster::Cluster,
        node::FileAttributes,
        testing::{TestImage, options},
    };

    let volume = Volume::mount(TestImage::new(4).root(&[2]).build(), options()).unwrap();
    // runs far past the end of the heap
    let node = Node::new(FileAttributes::ARCHIVE, Cluster(3), 64 * 4096, true);
    let mut reader = NodeReader::new(&volume, &node);

    reader.seek(SeekFrom::Start(10 * 4096)).unwrap();
    let mut buffer = [0u8; 16];
    let err = reader.read(&mut buffer).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    assert_eq!(reader.position(), 10 * 4096);
}

#[test]
fn unmounted_volume_is_not_connected() {
    use crate::testing::{TestImage, options};

    let mut volume = Volume::mount(TestImage::new(4).root(&[2, 3]).build(), options()).unwrap();
    let root = volume.root().unwrap();
    volume.unmount();

    let mut buffer = [0u8; 16];
    let err = NodeReader::new(&volume, &root).read(&mut buffer).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}
