//! Partition filter: the chaos-testing seam.

use consort_types::NodeId;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::info;

/// Per-node set of blocked peer ids.
///
/// Consulted inside the peer client's send path before every outbound
/// message: a blocked target is dropped without touching the network,
/// simulating one-way packet loss from this node's perspective. This is a
/// test hook, not a firewall; `SetPartition` replaces the whole set.
#[derive(Debug, Default)]
pub struct PartitionFilter {
    blocked: RwLock<HashSet<NodeId>>,
}

impl PartitionFilter {
    /// Empty filter: all peers reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Is outbound traffic to `peer` currently dropped?
    pub fn is_blocked(&self, peer: NodeId) -> bool {
        self.blocked.read().contains(&peer)
    }

    /// Replace the blocked set wholesale.
    pub fn replace(&self, blocked: impl IntoIterator<Item = NodeId>) {
        let blocked: HashSet<NodeId> = blocked.into_iter().collect();
        info!(?blocked, "partition filter replaced");
        *self.blocked.write() = blocked;
    }

    /// Unblock everyone.
    pub fn clear(&self) {
        self.replace([]);
    }

    /// Current blocked set, sorted for stable output.
    pub fn snapshot(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.blocked.read().iter().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_and_query() {
        let filter = PartitionFilter::new();
        assert!(!filter.is_blocked(NodeId(2)));

        filter.replace([NodeId(2), NodeId(3)]);
        assert!(filter.is_blocked(NodeId(2)));
        assert!(filter.is_blocked(NodeId(3)));
        assert!(!filter.is_blocked(NodeId(4)));

        // Replacement is wholesale, not additive.
        filter.replace([NodeId(4)]);
        assert!(!filter.is_blocked(NodeId(2)));
        assert!(filter.is_blocked(NodeId(4)));

        filter.clear();
        assert_eq!(filter.snapshot(), vec![]);
    }

    #[test]
    fn concurrent_readers_and_writer() {
        use std::sync::Arc;
        let filter = Arc::new(PartitionFilter::new());
        filter.replace([NodeId(1)]);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let filter = filter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = filter.is_blocked(NodeId(1));
                    }
                })
            })
            .collect();
        filter.replace([NodeId(2)]);
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(filter.is_blocked(NodeId(2)));
    }
}
