use core::fmt;

use bytemuck::{Pod, Zeroable};

pub mod chain;

/// First cluster index that addresses the cluster heap.
pub const FIRST_DATA_CLUSTER: u32 = 2;

/// A 32-bit index into the cluster address space.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Cluster(pub u32);

impl Cluster {
    /// Marks a bad cluster in the FAT.
    pub const BAD: Cluster = Cluster(0xfffffff7);
    /// Marks the end of a cluster chain.
    pub const END: Cluster = Cluster(0xffffffff);

    /// Whether this value cannot name a data cluster: a free entry, a reserved index, a bad
    /// cluster or the end of a chain.
    pub fn is_invalid(self) -> bool {
        self.0 < FIRST_DATA_CLUSTER || self.0 >= Self::BAD.0
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for Cluster {
    fn from(value: u32) -> Self {
        Cluster(value)
    }
}

#[test]
fn sentinels() {
    assert!(Cluster(0).is_invalid());
    assert!(Cluster(1).is_invalid());
    assert!(!Cluster(2).is_invalid());
    assert!(!Cluster(0xfffffff6).is_invalid());
    assert!(Cluster::BAD.is_invalid());
    assert!(Cluster::END.is_invalid());
}
