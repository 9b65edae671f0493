//! Deterministic cluster runner.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use consort_bft::{BftConfig, BftState};
use consort_cft::{CftConfig, CftState};
use consort_core::{
    event_for_message, Action, Event, NodeStatus, OutboundMessage, RequestId, StateMachine,
    SubmitOutcome, TimerId,
};
use consort_kv::KvStore;
use consort_types::{ClusterConfig, Command, ConfigError, NodeId, Peer, Role};
use consort_wal::{Wal, WalError};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{trace, warn};

/// The event a fired virtual timer injects.
fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Election => Event::ElectionTimeout,
        TimerId::Heartbeat => Event::HeartbeatTick,
        TimerId::ViewChange => Event::ViewChangeTimeout,
    }
}

/// Synthetic peer records for a simulated cluster; the ports are never
/// dialed.
fn sim_config(n: u64) -> ClusterConfig {
    let peers = (1..=n)
        .map(|i| Peer {
            id: NodeId(i),
            host: "sim.invalid".to_string(),
            port: 7000 + i as u16,
        })
        .collect();
    // Ids are unique by construction.
    ClusterConfig::new(peers).unwrap_or_else(|_| unreachable!("generated peers are valid"))
}

/// Statistics collected while a simulation runs.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    pub events_processed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub timers_set: u64,
    pub timers_cancelled: u64,
    pub wal_saves: u64,
}

struct SimNode<S> {
    state: S,
    kv: KvStore,
    wal: Option<Wal>,
    /// Mirrors the production rule: a failed WAL save suppresses this
    /// node's outbound traffic until a save succeeds.
    poisoned: bool,
}

/// A whole cluster of protocol state machines under virtual time.
pub struct Cluster<S: StateMachine> {
    config: ClusterConfig,
    nodes: BTreeMap<NodeId, SimNode<S>>,
    network: SimulatedNetwork,
    queue: BTreeMap<EventKey, (NodeId, Event)>,
    timers: HashMap<(NodeId, TimerId), EventKey>,
    now: Duration,
    seq: u64,
    rng: ChaCha8Rng,
    next_request_id: u64,
    outcomes: HashMap<RequestId, SubmitOutcome>,
    stats: SimulationStats,
    data_dir: Option<PathBuf>,
    seed: u64,
}

impl Cluster<CftState> {
    /// A CFT-Log cluster of `n` nodes with real WALs under `data_dir`.
    pub fn cft(n: u64, seed: u64, data_dir: &Path) -> Result<Self, WalError> {
        let config = sim_config(n);
        let mut cluster = Self::empty(config, seed, Some(data_dir.to_path_buf()));
        for id in cluster.config.node_ids() {
            cluster.boot_cft_node(id)?;
        }
        Ok(cluster)
    }

    fn boot_cft_node(&mut self, id: NodeId) -> Result<(), WalError> {
        let Some(dir) = self.data_dir.clone() else {
            return Ok(()); // CFT clusters always carry a data dir
        };
        let wal = Wal::open(&dir, id.0)?;
        let recovered = wal.load()?;
        let state = CftState::new(
            id,
            self.config.clone(),
            CftConfig::default(),
            recovered,
            self.seed ^ id.0.wrapping_mul(0x9e3779b97f4a7c15),
        );
        self.insert_node(id, state, Some(wal));
        Ok(())
    }

    /// Bring a killed node back from its WAL, as a follower.
    pub fn restart(&mut self, id: NodeId) -> Result<(), WalError> {
        self.boot_cft_node(id)
    }
}

impl Cluster<BftState> {
    /// A BFT-3P cluster of `n = 3f+1` nodes; members of `byzantine` run
    /// in fault-injection mode.
    pub fn bft(n: u64, seed: u64, byzantine: &[NodeId]) -> Result<Self, ConfigError> {
        let config = sim_config(n);
        let mut cluster = Self::empty(config.clone(), seed, None);
        for id in config.node_ids() {
            let node_config = BftConfig {
                byzantine: byzantine.contains(&id),
                ..BftConfig::default()
            };
            let state = BftState::new(id, config.clone(), node_config)?;
            cluster.insert_node(id, state, None);
        }
        Ok(cluster)
    }
}

impl<S: StateMachine> Cluster<S> {
    fn empty(config: ClusterConfig, seed: u64, data_dir: Option<PathBuf>) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            network: SimulatedNetwork::new(NetworkConfig::default()),
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            now: Duration::ZERO,
            seq: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_request_id: 0,
            outcomes: HashMap::new(),
            stats: SimulationStats::default(),
            data_dir,
            seed,
        }
    }

    fn insert_node(&mut self, id: NodeId, mut state: S, wal: Option<Wal>) {
        let actions = state.bootstrap();
        self.nodes.insert(
            id,
            SimNode {
                state,
                kv: KvStore::new(),
                wal,
                poisoned: false,
            },
        );
        self.process_actions(id, actions);
    }

    // ─── Driving the clock ───

    /// Advance virtual time by `duration`, processing everything due.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        loop {
            let next_at = self.queue.keys().next().map(|key| key.at);
            match next_at {
                Some(at) if at <= deadline => {}
                _ => break,
            }
            let Some((key, (node, event))) = self.queue.pop_first() else {
                break;
            };
            self.now = self.now.max(key.at);
            self.timers.retain(|_, scheduled| *scheduled != key);
            self.stats.events_processed += 1;
            self.deliver(node, event);
        }
        self.now = deadline;
    }

    fn deliver(&mut self, node: NodeId, event: Event) {
        let Some(sim) = self.nodes.get_mut(&node) else {
            trace!(%node, event = event.type_name(), "dropping event for dead node");
            return;
        };
        let actions = sim.state.handle(event);
        self.process_actions(node, actions);
    }

    fn process_actions(&mut self, from: NodeId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => self.route(from, to, message),
                Action::Broadcast { message } => {
                    for to in self.config.node_ids() {
                        if to != from {
                            self.route(from, to, message.clone());
                        }
                    }
                }
                Action::SetTimer { id, duration } => {
                    if let Some(old) = self.timers.remove(&(from, id)) {
                        self.queue.remove(&old);
                        self.stats.timers_cancelled += 1;
                    }
                    let key = self.schedule(self.now + duration, from, timer_event(id));
                    self.timers.insert((from, id), key);
                    self.stats.timers_set += 1;
                }
                Action::CancelTimer { id } => {
                    if let Some(old) = self.timers.remove(&(from, id)) {
                        self.queue.remove(&old);
                        self.stats.timers_cancelled += 1;
                    }
                }
                Action::Persist { state } => {
                    if let Some(sim) = self.nodes.get_mut(&from) {
                        if let Some(wal) = &sim.wal {
                            match wal.save(&state) {
                                Ok(()) => {
                                    sim.poisoned = false;
                                    self.stats.wal_saves += 1;
                                }
                                Err(err) => {
                                    warn!(%from, "WAL save failed in simulation: {err}");
                                    sim.poisoned = true;
                                }
                            }
                        }
                    }
                }
                Action::ApplyCommand { index, command } => {
                    if let Some(sim) = self.nodes.get(&from) {
                        trace!(%from, index, %command, "apply");
                        sim.kv.apply(&command);
                    }
                }
                Action::RespondSubmit {
                    request_id,
                    outcome,
                } => {
                    self.outcomes.insert(request_id, outcome);
                }
            }
        }
    }

    fn route(&mut self, from: NodeId, to: NodeId, message: OutboundMessage) {
        let sender_poisoned = self.nodes.get(&from).map(|n| n.poisoned).unwrap_or(true);
        if sender_poisoned {
            self.stats.messages_dropped += 1;
            return;
        }
        match self.network.should_deliver(from, to, &mut self.rng) {
            Some(latency) => {
                self.stats.messages_sent += 1;
                self.schedule(self.now + latency, to, event_for_message(message));
            }
            None => {
                trace!(%from, %to, msg = message.type_name(), "message dropped");
                self.stats.messages_dropped += 1;
            }
        }
    }

    fn schedule(&mut self, at: Duration, node: NodeId, event: Event) -> EventKey {
        self.seq += 1;
        let key = EventKey { at, seq: self.seq };
        self.queue.insert(key, (node, event));
        key
    }

    // ─── Cluster operations ───

    /// Submit a command to one node. Resolve with [`Cluster::outcome`].
    pub fn submit(&mut self, node: NodeId, command: Command) -> RequestId {
        self.next_request_id += 1;
        let request_id = RequestId(self.next_request_id);
        self.schedule(
            self.now,
            node,
            Event::SubmitCommand {
                command,
                request_id,
            },
        );
        request_id
    }

    /// Inject an arbitrary event into one node (test affordance).
    pub fn inject(&mut self, node: NodeId, event: Event) {
        self.schedule(self.now, node, event);
    }

    /// The resolution of a submission, if any yet.
    pub fn outcome(&self, request_id: RequestId) -> Option<&SubmitOutcome> {
        self.outcomes.get(&request_id)
    }

    /// Crash a node: state and store vanish, WAL files stay on disk,
    /// queued traffic to it is dropped on delivery.
    pub fn kill(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        let stale: Vec<EventKey> = self
            .timers
            .iter()
            .filter(|((owner, _), _)| *owner == node)
            .map(|(_, key)| *key)
            .collect();
        for key in stale {
            self.queue.remove(&key);
        }
        self.timers.retain(|(owner, _), _| *owner != node);
    }

    // ─── Inspection ───

    /// Ids configured in the cluster.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.config.node_ids()
    }

    /// Ids currently alive.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// All live nodes currently reporting Leader.
    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.state.status().role == Role::Leader)
            .map(|n| n.state.status().node_id)
            .collect()
    }

    /// The leader, when exactly one exists.
    pub fn leader(&self) -> Option<NodeId> {
        match self.leaders().as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Status snapshot of one node.
    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&node).map(|n| n.state.status())
    }

    /// Read a key from one node's store.
    pub fn get(&self, node: NodeId, key: &str) -> Option<String> {
        self.nodes.get(&node)?.kv.get(key)
    }

    /// Full store snapshot of one node.
    pub fn kv_snapshot(&self, node: NodeId) -> Option<BTreeMap<String, String>> {
        self.nodes.get(&node).map(|n| n.kv.snapshot())
    }

    /// Direct access to a node's state machine.
    pub fn state(&self, node: NodeId) -> Option<&S> {
        self.nodes.get(&node).map(|n| &n.state)
    }

    /// The simulated network, for partition and loss injection.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}
