//! Simulated network with deterministic latency, packet loss, and
//! partitions.

use consort_types::NodeId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way message latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Probability of dropping any given message.
    pub packet_loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            jitter_fraction: 0.2,
            packet_loss_rate: 0.0,
        }
    }
}

/// Message-delivery oracle for the simulation.
///
/// Partitions are directional: `(a, b)` in the set drops traffic from `a`
/// to `b` only, which is exactly the semantics of a node-local partition
/// filter. Helpers install both directions where tests want symmetry.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    partitions: HashSet<(NodeId, NodeId)>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
        }
    }

    // ─── Partition management ───

    /// Is traffic from `from` to `to` currently dropped?
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Drop traffic from `from` to `to` (one direction).
    pub fn partition_unidirectional(&mut self, from: NodeId, to: NodeId) {
        self.partitions.insert((from, to));
    }

    /// Drop traffic between `a` and `b` in both directions.
    pub fn partition_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Sever two groups from each other, both directions.
    pub fn partition_groups(&mut self, group_a: &[NodeId], group_b: &[NodeId]) {
        for &a in group_a {
            for &b in group_b {
                self.partitions.insert((a, b));
                self.partitions.insert((b, a));
            }
        }
    }

    /// Cut one node off from everyone in `all`.
    pub fn isolate_node(&mut self, node: NodeId, all: &[NodeId]) {
        for &other in all {
            if other != node {
                self.partitions.insert((node, other));
                self.partitions.insert((other, node));
            }
        }
    }

    /// Restore full connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    /// Number of active directional partition pairs.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // ─── Delivery decisions ───

    /// Decide whether a message from `from` to `to` is delivered.
    ///
    /// `None` means dropped (partition or loss); `Some(latency)` is the
    /// sampled delivery delay. Partition checks come first so they stay
    /// deterministic regardless of the loss rate.
    pub fn should_deliver(
        &self,
        from: NodeId,
        to: NodeId,
        rng: &mut ChaCha8Rng,
    ) -> Option<Duration> {
        if self.is_partitioned(from, to) {
            return None;
        }
        if self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate {
            return None;
        }
        Some(self.sample_latency(rng))
    }

    /// Sample a delivery latency with jitter.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0005))
    }

    /// Set the packet loss rate, clamped to [0, 1].
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }
}
