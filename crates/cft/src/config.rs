//! CFT-Log timing configuration.

use std::time::Duration;

/// Timing parameters for elections and replication.
#[derive(Debug, Clone)]
pub struct CftConfig {
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,
    /// Leader heartbeat period.
    pub heartbeat_interval: Duration,
}

impl Default for CftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(600),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}
