//! CFT-Log consensus state machine.
//!
//! Crash-fault-tolerant log replication with leader election, modeled on
//! Raft. The state machine is synchronous and event-driven:
//!
//! - `Event::ElectionTimeout` → become candidate, solicit votes
//! - `Event::RequestVote*` → grant/collect votes, win elections
//! - `Event::HeartbeatTick` → leader replicates its log
//! - `Event::AppendEntries*` → consistency-checked log repair and commit
//! - `Event::SubmitCommand` → leader appends and replicates
//!
//! All I/O is performed by the runner via returned `Action`s; durability
//! actions are ordered before the sends that depend on them.
//!
//! # Safety properties
//!
//! - **Election safety**: one vote per term per node, persisted before the
//!   reply leaves; a candidate needs a strict majority.
//! - **Log matching**: the `prev_log_index/term` consistency check plus
//!   conflict truncation keeps logs pairwise consistent.
//! - **Leader completeness**: the vote recency rule and the
//!   current-term-only commit rule keep committed entries in every future
//!   leader's log.
//! - **Monotone terms**: any higher term observed anywhere forces an
//!   immediate step-down.

mod config;
mod state;

pub use config::CftConfig;
pub use state::CftState;
