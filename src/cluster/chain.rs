//! Walking cluster chains.
//!
//! A contiguous node occupies consecutive cluster indices, so its chain is pure arithmetic.
//! Every other node is a linked list whose successors are recorded in a [`ClusterMap`].

use super::Cluster;

/// Successor lookups for fragmented chains, plus the cache lifecycle the volume drives.
pub trait ClusterMap {
    /// The cluster following `cluster`, or an invalid cluster when the chain ends or is broken.
    fn next_cluster(&self, cluster: Cluster) -> Cluster;

    /// Drops cached state. The map may be released afterwards.
    fn reset(&mut self);

    /// Frees the backing storage.
    fn release(&mut self);
}

/// The single next cluster of a walk.
pub fn next<C: ClusterMap + ?Sized>(map: &C, cluster: Cluster, contiguous: bool) -> Cluster {
    if contiguous {
        cluster
            .0
            .checked_add(1)
            .map(Cluster)
            .unwrap_or(Cluster::BAD)
    } else {
        map.next_cluster(cluster)
    }
}

/// The cluster reached after skipping `count` clusters forward from `start`.
///
/// `O(1)` for contiguous chains, `O(count)` otherwise. Any invalid cluster met on the way is
/// returned as is, ending the walk.
pub fn advance<C: ClusterMap + ?Sized>(
    map: &C,
    start: Cluster,
    contiguous: bool,
    count: u64,
) -> Cluster {
    if contiguous {
        return u64::from(start.0)
            .checked_add(count)
            .and_then(|c| u32::try_from(c).ok())
            .map(Cluster)
            .unwrap_or(Cluster::BAD);
    }

    let mut cluster = start;
    for _ in 0..count {
        cluster = map.next_cluster(cluster);
        if cluster.is_invalid() {
            break;
        }
    }
    cluster
}

#[test]
fn contiguous_never_consults_the_map() {
    use crate::testing::CountingMap;

    let map = CountingMap::chain(&[]);

    for n in [0u64, 1, 7, 1000] {
        assert_eq!(advance(&map, Cluster(5), true, n), Cluster(5 + n as u32));
    }
    assert_eq!(next(&map, Cluster(9), true), Cluster(10));
    assert_eq!(map.lookups.get(), 0);
}

#[test]
fn contiguous_overflow_is_invalid() {
    use crate::testing::CountingMap;

    let map = CountingMap::chain(&[]);

    assert!(advance(&map, Cluster(u32::MAX - 1), true, 5).is_invalid());
    assert!(next(&map, Cluster(u32::MAX), true).is_invalid());
}

#[test]
fn fragmented_advance_follows_next() {
    use crate::testing::CountingMap;

    let map = CountingMap::chain(&[10, 4, 22, 7]);

    let mut cluster = Cluster(10);
    for n in 0..4u64 {
        assert_eq!(advance(&map, Cluster(10), false, n), cluster);
        cluster = next(&map, cluster, false);
    }
    assert_eq!(cluster, Cluster::END);
}

#[test]
fn fragmented_advance_past_the_end_is_invalid() {
    use crate::testing::CountingMap;

    let map = CountingMap::chain(&[10, 4, 22]);

    assert!(advance(&map, Cluster(10), false, 3).is_invalid());
    // the walk stops at the first invalid cluster
    assert!(advance(&map, Cluster(10), false, 50).is_invalid());
    assert_eq!(map.lookups.get(), 3 + 3);
}
