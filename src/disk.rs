use core::ops::Deref;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};

use crate::error::DeviceError;

pub trait PartitionError {
    fn unexpected_eop() -> Self;
}

/// A byte-addressed device that can be read at arbitrary 64-bit offsets without a shared cursor.
pub trait ReadOffset {
    type Err: PartitionError + core::error::Error + Send + Sync + 'static;

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Self::Err>;

    /// Fills `buffer` completely, continuing partial reads. Running out of device is an error.
    fn read_exact(&self, mut offset: u64, mut buffer: &mut [u8]) -> Result<(), Self::Err> {
        while !buffer.is_empty() {
            match self.read_at(offset, buffer) {
                Ok(0) => return Err(<Self::Err as PartitionError>::unexpected_eop()),
                Ok(n) => {
                    buffer = &mut buffer[n..];
                    offset = offset
                        .checked_add(n as u64)
                        .ok_or_else(<Self::Err as PartitionError>::unexpected_eop)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Reads exactly `buffer.len()` bytes at the absolute byte `offset`.
///
/// The device must always satisfy in-range reads, so any failure here means the volume geometry
/// is broken. It is reported as [`DeviceError::ShortRead`], which is never worth retrying.
pub fn read_raw<O: ReadOffset>(
    device: &O,
    buffer: &mut [u8],
    offset: u64,
) -> Result<(), DeviceError<O>> {
    let size = buffer.len();
    device.read_exact(offset, buffer).map_err(|source| {
        log::error!("failed to read {size} bytes from device at {offset:#x}: {source}");
        DeviceError::ShortRead {
            size,
            offset,
            source,
        }
    })
}

impl PartitionError for io::Error {
    fn unexpected_eop() -> Self {
        io::Error::from(ErrorKind::UnexpectedEof)
    }
}

impl<T: ReadOffset> ReadOffset for &T {
    type Err = T::Err;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        (*self).read_at(offset, buf)
    }
}
impl<T: ReadOffset> ReadOffset for Arc<T> {
    type Err = T::Err;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        self.deref().read_at(offset, buf)
    }
}
impl ReadOffset for std::fs::File {
    type Err = std::io::Error;

    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// In-memory volume images.
impl ReadOffset for Vec<u8> {
    type Err = std::io::Error;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.get(start..) else {
            return Ok(0);
        };
        let amount = available.len().min(buf.len());
        buf[..amount].copy_from_slice(&available[..amount]);
        Ok(amount)
    }
}

#[test]
fn partial_reads_are_continued() {
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Trickle(Vec<u8>, Mutex<usize>);

    impl ReadOffset for Trickle {
        type Err = io::Error;

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
            *self.1.lock().unwrap() += 1;
            // never more than 3 bytes at a time
            let limit = buf.len().min(3);
            self.0.read_at(offset, &mut buf[..limit])
        }
    }

    let device = Trickle((0u8..32).collect(), Mutex::new(0));
    let mut buffer = [0u8; 10];
    read_raw(&device, &mut buffer, 4).unwrap();

    assert_eq!(buffer, [4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
    assert_eq!(*device.1.lock().unwrap(), 4);
}

#[test]
fn short_read_is_fatal() {
    let device: Vec<u8> = vec![0xAB; 100];
    let mut buffer = [0u8; 16];

    let err = read_raw(&device, &mut buffer, 90).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::ShortRead {
            size: 16,
            offset: 90,
            ..
        }
    ));
    assert!(err.is_fatal());
}
