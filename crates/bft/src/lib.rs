//! BFT-3P consensus state machine.
//!
//! Three-phase Byzantine agreement modeled on pBFT: a cluster of
//! `n = 3f+1` replicas tolerates up to `f` arbitrary faults. Requests are
//! ordered by the primary of the current view and agreed in three phases:
//!
//! - **PRE_PREPARE**: the primary assigns a sequence number and broadcasts
//!   the request together with the SHA-256 digest of its canonical bytes.
//! - **PREPARE**: replicas that accept the pre-prepare (primary identity,
//!   digest, no conflicting request at the slot) broadcast agreement;
//!   `2f+1` matching prepares make a replica *prepared*.
//! - **COMMIT**: prepared replicas broadcast commitment; `2f+1` matching
//!   commits make the slot *committed-local*, and requests apply to the
//!   key-value store in strict sequence order within the view.
//!
//! Quorum sets are indexed by sender id, so duplicates never double-count.
//! Any message whose digest does not match an accepted pre-prepare is
//! dropped: a faulty sender cannot force honest nodes into error states.
//!
//! Two test affordances ship with the protocol: a vote-based view change
//! that replaces an unresponsive primary, and a byzantine mode that makes
//! a node tamper digests, equivocate its prepares, and withhold commits.

mod config;
mod state;

pub use config::BftConfig;
pub use state::BftState;
