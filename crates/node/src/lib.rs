//! Production node runtime with async I/O.
//!
//! This crate wraps the deterministic protocol state machines with real
//! I/O:
//!
//! - One TCP RPC server per node, speaking length-prefixed versioned
//!   frames for peer traffic and client requests alike
//! - One [`PeerClient`] per peer, with the [`PartitionFilter`] consulted
//!   in its send path and a hard deadline on connect and write
//! - Tokio-task timers that feed timeout events back to the state machine
//! - WAL persistence executed in action order, before dependent sends
//!
//! # Architecture
//!
//! A single task owns the state machine and receives events over mpsc
//! channels; there is no lock around protocol state. Peer fan-out happens
//! on per-peer writer tasks, so a slow or partitioned peer never blocks
//! the event loop or the accept loop.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Node                               │
//! │                                                              │
//! │  RPC server ──peer frames──► event channel ─┐                │
//! │  RPC server ──submissions──► submit channel ┼─► NodeRunner   │
//! │  TimerManager ──timeouts───► timer channel ─┘    │           │
//! │                                                  ▼           │
//! │              WAL ◄── actions ──► PeerClients (fan-out)       │
//! │              KvStore ◄── applies                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod codec;
mod partition;
mod peer;
mod runner;
mod server;
pub mod telemetry;
mod timers;

pub use client::ClusterClient;
pub use codec::{CodecError, SubmitReply, WireRequest, WireResponse, WIRE_VERSION};
pub use partition::PartitionFilter;
pub use peer::PeerClient;
pub use runner::{NodeHandle, NodeRunner, RunnerError, RuntimeConfig, ShutdownHandle};
pub use server::{NetworkError, RpcServer, ServerContext, SubmitRequest};
pub use telemetry::init_telemetry;
pub use timers::TimerManager;
