//! Deterministic ordering key for the simulation event queue.

use std::time::Duration;

/// Orders queued events by virtual time, ties broken by insertion order.
///
/// The sequence component makes the ordering total, which is what keeps
/// simulations reproducible: two events at the same instant always pop in
/// the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// Virtual delivery time.
    pub at: Duration,
    /// Global insertion counter.
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_time_then_sequence() {
        let early = EventKey {
            at: Duration::from_millis(10),
            seq: 5,
        };
        let late = EventKey {
            at: Duration::from_millis(20),
            seq: 1,
        };
        let tie_breaker = EventKey {
            at: Duration::from_millis(10),
            seq: 6,
        };

        assert!(early < late);
        assert!(early < tie_breaker);
        assert!(tie_breaker < late);
    }
}
