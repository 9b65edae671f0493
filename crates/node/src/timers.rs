//! Timer management for the node runtime.
//!
//! Each armed timer is a tokio task that sleeps and then delivers the
//! matching timeout event to the runner's timer channel. Timers are
//! one-shot and replace-by-id, which is exactly the contract the state
//! machines assume for election and watchdog re-arming.

use consort_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// The event a fired timer injects.
fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Election => Event::ElectionTimeout,
        TimerId::Heartbeat => Event::HeartbeatTick,
        TimerId::ViewChange => Event::ViewChangeTimeout,
    }
}

/// Owns the active timer tasks for one node.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    /// Create a manager feeding `event_tx`.
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm a timer, replacing any previous timer with the same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "timer fired");
            let _ = event_tx.send(timer_event(id)).await;
        });
        self.timers.insert(id, handle);
        trace!(?id, ?duration, "timer set");
    }

    /// Disarm a timer; no-op if it is not armed or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(?id, "timer cancelled");
        }
    }

    /// Disarm everything. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Number of currently armed timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires_with_matching_event() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerId::Election, Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_millis(200), event_rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert!(matches!(event, Event::ElectionTimeout));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerId::Heartbeat, Duration::from_millis(20));
        manager.cancel_timer(TimerId::Heartbeat);

        let result = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_timer() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut manager = TimerManager::new(event_tx);

        // A long timer replaced by a short one fires once, quickly.
        manager.set_timer(TimerId::Election, Duration::from_secs(60));
        manager.set_timer(TimerId::Election, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);

        let event = tokio::time::timeout(Duration::from_millis(200), event_rx.recv())
            .await
            .expect("replacement timer should fire")
            .expect("channel open");
        assert!(matches!(event, Event::ElectionTimeout));

        let extra = tokio::time::timeout(Duration::from_millis(50), event_rx.recv()).await;
        assert!(extra.is_err(), "replaced timer must not also fire");
    }

    #[tokio::test]
    async fn cancel_all_silences_everything() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerId::Election, Duration::from_millis(20));
        manager.set_timer(TimerId::Heartbeat, Duration::from_millis(20));
        manager.set_timer(TimerId::ViewChange, Duration::from_millis(20));
        assert_eq!(manager.active_count(), 3);

        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(result.is_err());
    }
}
