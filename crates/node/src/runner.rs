//! Node event loop: owns the protocol state machine, executes its actions.

use crate::partition::PartitionFilter;
use crate::peer::PeerClient;
use crate::server::{NetworkError, RpcServer, ServerContext, SubmitRequest};
use crate::timers::TimerManager;
use consort_core::{Action, Event, NodeStatus, RequestId, StateMachine, SubmitOutcome};
use consort_kv::KvStore;
use consort_types::{ClusterConfig, ConfigError, NodeId};
use consort_wal::{Wal, WalError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Errors from assembling or running a node.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("network setup failed: {0}")]
    Network(#[from] NetworkError),

    #[error("WAL failure: {0}")]
    Wal(#[from] WalError),
}

/// Runtime assembly parameters, distinct from protocol configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub id: NodeId,
    pub cluster: ClusterConfig,
    /// Listen address override; defaults to this node's cluster record.
    pub listen_addr: Option<String>,
    /// Connect/write deadline for peer sends.
    pub peer_deadline: Duration,
    /// How long a submitter may wait for commitment.
    pub client_deadline: Duration,
    /// Capacity of the event and submit channels.
    pub channel_capacity: usize,
}

impl RuntimeConfig {
    /// Defaults from the timeout budget.
    pub fn new(id: NodeId, cluster: ClusterConfig) -> Self {
        Self {
            id,
            cluster,
            listen_addr: None,
            peer_deadline: Duration::from_millis(100),
            client_deadline: Duration::from_secs(5),
            channel_capacity: 1024,
        }
    }
}

/// Signals the event loop to exit when triggered or dropped.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown, consuming the handle.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Handle to a running node.
pub struct NodeHandle {
    id: NodeId,
    addr: SocketAddr,
    kv: Arc<KvStore>,
    status: Arc<RwLock<NodeStatus>>,
    partition: Arc<PartitionFilter>,
    shutdown: Option<ShutdownHandle>,
    loop_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The bound RPC address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Dial string for [`crate::ClusterClient`].
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    /// The node's key-value store.
    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    /// Latest protocol status snapshot.
    pub fn status(&self) -> NodeStatus {
        self.status.read().clone()
    }

    /// The node's partition filter.
    pub fn partition(&self) -> &Arc<PartitionFilter> {
        &self.partition
    }

    /// Stop timers, close peer clients, and tear the node down.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.loop_task).await;
        self.server_task.abort();
    }
}

/// The event loop. One per node; single ownership of the state machine
/// replaces any lock around protocol state.
pub struct NodeRunner<S> {
    id: NodeId,
    state: S,
    wal: Option<Wal>,
    kv: Arc<KvStore>,
    peers: HashMap<NodeId, PeerClient>,
    timer_manager: TimerManager,
    status: Arc<RwLock<NodeStatus>>,
    pending: HashMap<RequestId, oneshot::Sender<SubmitOutcome>>,
    next_request_id: u64,
    /// Set after a failed WAL save: outbound protocol traffic is
    /// suppressed until a save succeeds, because correctness of those
    /// messages depends on durability.
    poisoned: bool,
}

impl<S: StateMachine + Send + 'static> NodeRunner<S> {
    /// Assemble and start a node: bind the server, spawn peer clients,
    /// bootstrap the state machine, run the loop.
    pub async fn start(
        config: RuntimeConfig,
        state: S,
        wal: Option<Wal>,
    ) -> Result<NodeHandle, RunnerError> {
        let id = config.id;
        let own_record = config
            .cluster
            .peer(id)
            .ok_or(ConfigError::UnknownNode(id))?
            .clone();
        let listen_addr = config.listen_addr.clone().unwrap_or_else(|| own_record.addr());

        let kv = Arc::new(KvStore::new());
        let partition = Arc::new(PartitionFilter::new());
        let status = Arc::new(RwLock::new(state.status()));

        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (submit_tx, submit_rx) = mpsc::channel(config.channel_capacity);
        // Timers have their own small channel so a network flood can
        // never starve an election timeout.
        let (timer_tx, timer_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server = RpcServer::bind(
            &listen_addr,
            ServerContext {
                node_id: id,
                event_tx,
                submit_tx,
                kv: kv.clone(),
                partition: partition.clone(),
                status: status.clone(),
                client_deadline: config.client_deadline,
            },
        )
        .await?;
        let addr = server.local_addr()?;
        let server_task = server.spawn();

        let peers: HashMap<NodeId, PeerClient> = config
            .cluster
            .others(id)?
            .into_iter()
            .map(|peer| {
                let client =
                    PeerClient::spawn(id, peer.clone(), partition.clone(), config.peer_deadline);
                (peer.id, client)
            })
            .collect();

        let runner = NodeRunner {
            id,
            state,
            wal,
            kv: kv.clone(),
            peers,
            timer_manager: TimerManager::new(timer_tx),
            status: status.clone(),
            pending: HashMap::new(),
            next_request_id: 0,
            poisoned: false,
        };
        let loop_task = tokio::spawn(runner.run(event_rx, submit_rx, timer_rx, shutdown_rx));

        Ok(NodeHandle {
            id,
            addr,
            kv,
            status,
            partition,
            shutdown: Some(ShutdownHandle {
                tx: Some(shutdown_tx),
            }),
            loop_task,
            server_task,
        })
    }

    async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<Event>,
        mut submit_rx: mpsc::Receiver<SubmitRequest>,
        mut timer_rx: mpsc::Receiver<Event>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let actions = self.state.bootstrap();
        self.execute(actions);
        self.publish_status();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                Some(event) = timer_rx.recv() => self.dispatch(event),
                Some(event) = event_rx.recv() => self.dispatch(event),
                Some(request) = submit_rx.recv() => self.dispatch_submit(request),
                else => break,
            }
        }

        self.timer_manager.cancel_all();
        for client in self.peers.values() {
            client.shutdown();
        }
        info!(node = %self.id, "event loop stopped");
    }

    fn dispatch(&mut self, event: Event) {
        trace!(node = %self.id, event = event.type_name(), "dispatch");
        let actions = self.state.handle(event);
        self.execute(actions);
        self.publish_status();
    }

    fn dispatch_submit(&mut self, request: SubmitRequest) {
        self.next_request_id += 1;
        let request_id = RequestId(self.next_request_id);
        self.pending.insert(request_id, request.reply);
        self.dispatch(Event::SubmitCommand {
            command: request.command,
            request_id,
        });
    }

    /// Execute a batch of actions, in order. The ordering contract with
    /// the state machines lives here: a persist failure disarms every
    /// later send in the batch (and all sends until a save succeeds).
    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Persist { state } => match &self.wal {
                    Some(wal) => match wal.save(&state) {
                        Ok(()) => self.poisoned = false,
                        Err(err) => {
                            error!(
                                node = %self.id,
                                "WAL save failed, suppressing outbound protocol traffic: {err}"
                            );
                            self.poisoned = true;
                        }
                    },
                    None => {}
                },
                Action::Send { to, message } => {
                    if self.poisoned {
                        debug!(node = %self.id, "poisoned: dropping {}", message.type_name());
                        continue;
                    }
                    if let Some(peer) = self.peers.get(&to) {
                        peer.send(message);
                    }
                }
                Action::Broadcast { message } => {
                    if self.poisoned {
                        debug!(node = %self.id, "poisoned: dropping {}", message.type_name());
                        continue;
                    }
                    for peer in self.peers.values() {
                        peer.send(message.clone());
                    }
                }
                Action::SetTimer { id, duration } => {
                    self.timer_manager.set_timer(id, duration);
                }
                Action::CancelTimer { id } => {
                    self.timer_manager.cancel_timer(id);
                }
                Action::ApplyCommand { index, command } => {
                    trace!(node = %self.id, index, %command, "apply");
                    self.kv.apply(&command);
                }
                Action::RespondSubmit {
                    request_id,
                    outcome,
                } => {
                    if let Some(reply) = self.pending.remove(&request_id) {
                        // The submitter may have timed out and gone away.
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
    }

    fn publish_status(&self) {
        *self.status.write() = self.state.status();
    }
}
